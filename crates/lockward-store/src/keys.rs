//! Key store: in-memory unlocked keys plus persisted key slots.
//!
//! While an account is unlocked its user key, organization keys, key pair
//! and encryption key live in memory.  Some of them also have persisted
//! copies in the `persisted_keys` table:
//!
//! | slot          | written by                                   |
//! |---------------|----------------------------------------------|
//! | `auto`        | [`KeyStore::toggle_key_persistence`] (never-lock) |
//! | `biometric`   | [`MemoryKeyStore::set_biometric_key`]        |
//! | `enc_key`     | [`MemoryKeyStore::load`]                     |
//! | `key_pair`    | [`MemoryKeyStore::load`]                     |
//! | `org:<id>`    | [`MemoryKeyStore::load`]                     |
//!
//! All key bytes are held in zeroizing buffers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lockward_vault::provider::KeyStore;
use lockward_vault::{
    AccountId, ClearScope, KeySuffix, ProviderResult, SymmetricKey, TimeoutAction,
    TimeoutPreference,
};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::db::Database;
use crate::error::StoreResult;

const SLOT_ENC_KEY: &str = "enc_key";
const SLOT_KEY_PAIR: &str = "key_pair";
const ORG_SLOT_PREFIX: &str = "org:";

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Keys produced by a successful unlock.
#[derive(Debug, Clone, Default)]
pub struct UnlockedKeys {
    pub user_key: Option<SymmetricKey>,
    pub org_keys: BTreeMap<String, SymmetricKey>,
    pub key_pair: Option<SymmetricKey>,
    pub enc_key: Option<SymmetricKey>,
}

/// Which in-memory slots are filled for an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyPresence {
    pub user_key: bool,
    pub org_keys: usize,
    pub key_pair: bool,
    pub enc_key: bool,
}

impl KeyPresence {
    /// `true` when nothing is held in memory.
    pub fn is_empty(&self) -> bool {
        !self.user_key && self.org_keys == 0 && !self.key_pair && !self.enc_key
    }
}

#[derive(Default)]
struct MemorySlots {
    user_key: Option<SymmetricKey>,
    org_keys: BTreeMap<String, SymmetricKey>,
    key_pair: Option<SymmetricKey>,
    enc_key: Option<SymmetricKey>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Store
// ═══════════════════════════════════════════════════════════════════════

/// [`KeyStore`] keeping unlocked keys in memory and persisted slots in
/// SQLite.
pub struct MemoryKeyStore {
    db: Database,
    memory: DashMap<AccountId, MemorySlots>,
}

impl MemoryKeyStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            memory: DashMap::new(),
        }
    }

    /// Install the keys of a freshly unlocked account and persist the
    /// slots that survive a restart.
    pub async fn load(&self, account: &AccountId, keys: UnlockedKeys) -> StoreResult<()> {
        let mut persisted: Vec<(String, SymmetricKey)> = Vec::new();
        if let Some(enc) = &keys.enc_key {
            persisted.push((SLOT_ENC_KEY.to_owned(), enc.clone()));
        }
        if let Some(pair) = &keys.key_pair {
            persisted.push((SLOT_KEY_PAIR.to_owned(), pair.clone()));
        }
        for (org, key) in &keys.org_keys {
            persisted.push((format!("{ORG_SLOT_PREFIX}{org}"), key.clone()));
        }
        for (slot, key) in persisted {
            self.put_slot(account, slot, &key).await?;
        }

        let org_count = keys.org_keys.len();
        self.memory.insert(
            account.clone(),
            MemorySlots {
                user_key: keys.user_key,
                org_keys: keys.org_keys,
                key_pair: keys.key_pair,
                enc_key: keys.enc_key,
            },
        );
        debug!(account_id = %account, org_keys = org_count, "keys loaded");
        Ok(())
    }

    /// Store or remove the biometric-protected copy of the user key.
    pub async fn set_biometric_key(
        &self,
        account: &AccountId,
        key: Option<&SymmetricKey>,
    ) -> StoreResult<()> {
        match key {
            Some(key) => {
                self.put_slot(account, KeySuffix::Biometric.as_str().to_owned(), key)
                    .await
            }
            None => self
                .delete_slots(account, SlotMatch::Exact(KeySuffix::Biometric.as_str()))
                .await
                .map(|_| ()),
        }
    }

    /// Which in-memory slots are filled for `account`.
    pub fn presence(&self, account: &AccountId) -> KeyPresence {
        self.memory
            .get(account)
            .map(|slots| KeyPresence {
                user_key: slots.user_key.is_some(),
                org_keys: slots.org_keys.len(),
                key_pair: slots.key_pair.is_some(),
                enc_key: slots.enc_key.is_some(),
            })
            .unwrap_or_default()
    }

    /// Names of the persisted slots for `account`, sorted.
    pub async fn persisted_slots(&self, account: &AccountId) -> StoreResult<Vec<String>> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT slot FROM persisted_keys WHERE account_id = ?1 ORDER BY slot",
                )?;
                let slots = stmt
                    .query_map(params![id], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(slots)
            })
            .await
    }

    /// Rebuild the in-memory keys of `account` from its persisted slots.
    ///
    /// The user key comes from the `auto` slot, or from the `biometric` slot
    /// when no auto key is stored.  Slots that are missing stay empty.
    pub async fn restore(&self, account: &AccountId) -> StoreResult<KeyPresence> {
        let mut keys = UnlockedKeys::default();
        let mut biometric = None;
        for (slot, key) in self.all_slots(account).await? {
            match slot.as_str() {
                SLOT_ENC_KEY => keys.enc_key = Some(key),
                SLOT_KEY_PAIR => keys.key_pair = Some(key),
                s if s == KeySuffix::Auto.as_str() => keys.user_key = Some(key),
                s if s == KeySuffix::Biometric.as_str() => biometric = Some(key),
                s => {
                    if let Some(org) = s.strip_prefix(ORG_SLOT_PREFIX) {
                        keys.org_keys.insert(org.to_owned(), key);
                    }
                }
            }
        }
        if keys.user_key.is_none() {
            keys.user_key = biometric;
        }

        self.memory.insert(
            account.clone(),
            MemorySlots {
                user_key: keys.user_key,
                org_keys: keys.org_keys,
                key_pair: keys.key_pair,
                enc_key: keys.enc_key,
            },
        );
        let presence = self.presence(account);
        debug!(
            account_id = %account,
            user_key = presence.user_key,
            org_keys = presence.org_keys,
            "keys restored"
        );
        Ok(presence)
    }

    /// Put a user key into memory without touching the other slots.
    pub fn install_user_key(&self, account: &AccountId, key: SymmetricKey) {
        self.memory.entry(account.clone()).or_default().user_key = Some(key);
    }

    /// Drop every key, in memory and persisted, for `account`.
    pub async fn forget(&self, account: &AccountId) -> StoreResult<()> {
        self.memory.remove(account);
        self.delete_slots(account, SlotMatch::All).await?;
        Ok(())
    }

    // ── persisted slots ──────────────────────────────────────────────

    async fn put_slot(
        &self,
        account: &AccountId,
        slot: String,
        key: &SymmetricKey,
    ) -> StoreResult<()> {
        let id = account.to_string();
        let material = Zeroizing::new(key.as_bytes().to_vec());
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO persisted_keys (account_id, slot, material, stored_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(account_id, slot) DO UPDATE SET
                        material = excluded.material,
                        stored_at = excluded.stored_at",
                    params![id, slot, material.as_slice(), now],
                )?;
                Ok(())
            })
            .await
    }

    async fn get_slot(
        &self,
        account: &AccountId,
        slot: &'static str,
    ) -> StoreResult<Option<SymmetricKey>> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                let material = conn
                    .query_row(
                        "SELECT material FROM persisted_keys WHERE account_id = ?1 AND slot = ?2",
                        params![id, slot],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?;
                Ok(material.map(SymmetricKey::new))
            })
            .await
    }

    async fn all_slots(&self, account: &AccountId) -> StoreResult<Vec<(String, SymmetricKey)>> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT slot, material FROM persisted_keys WHERE account_id = ?1",
                )?;
                let slots = stmt
                    .query_map(params![id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })?
                    .map(|row| row.map(|(slot, material)| (slot, SymmetricKey::new(material))))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(slots)
            })
            .await
    }

    async fn has_slot(&self, account: &AccountId, slot: &'static str) -> StoreResult<bool> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM persisted_keys WHERE account_id = ?1 AND slot = ?2",
                        params![id, slot],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await
    }

    async fn delete_slots(&self, account: &AccountId, which: SlotMatch) -> StoreResult<usize> {
        let id = account.to_string();
        let removed = self
            .db
            .execute(move |conn| {
                let removed = match which {
                    SlotMatch::Exact(slot) => conn.execute(
                        "DELETE FROM persisted_keys WHERE account_id = ?1 AND slot = ?2",
                        params![id, slot],
                    )?,
                    SlotMatch::Prefix(prefix) => conn.execute(
                        "DELETE FROM persisted_keys WHERE account_id = ?1 AND substr(slot, 1, ?3) = ?2",
                        params![id, prefix, prefix.len() as i64],
                    )?,
                    SlotMatch::All => conn.execute(
                        "DELETE FROM persisted_keys WHERE account_id = ?1",
                        params![id],
                    )?,
                };
                Ok(removed)
            })
            .await?;
        if removed > 0 {
            debug!(account_id = %account, removed, "persisted key slots deleted");
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotMatch {
    Exact(&'static str),
    Prefix(&'static str),
    All,
}

// ═══════════════════════════════════════════════════════════════════════
//  KeyStore
// ═══════════════════════════════════════════════════════════════════════

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn has_key_stored(&self, suffix: KeySuffix, account: &AccountId) -> ProviderResult<bool> {
        Ok(self.has_slot(account, suffix.as_str()).await?)
    }

    async fn get_key(
        &self,
        suffix: KeySuffix,
        account: &AccountId,
    ) -> ProviderResult<Option<SymmetricKey>> {
        Ok(self.get_slot(account, suffix.as_str()).await?)
    }

    async fn has_key_in_memory(&self, account: &AccountId) -> ProviderResult<bool> {
        Ok(self
            .memory
            .get(account)
            .is_some_and(|slots| slots.user_key.is_some()))
    }

    async fn clear_key(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        if let Some(mut slots) = self.memory.get_mut(account) {
            slots.user_key = None;
        }
        if scope == ClearScope::IncludingPersisted {
            self.delete_slots(account, SlotMatch::Exact(KeySuffix::Auto.as_str()))
                .await?;
            self.delete_slots(account, SlotMatch::Exact(KeySuffix::Biometric.as_str()))
                .await?;
        }
        Ok(())
    }

    async fn clear_org_keys(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        if let Some(mut slots) = self.memory.get_mut(account) {
            slots.org_keys.clear();
        }
        if scope == ClearScope::IncludingPersisted {
            self.delete_slots(account, SlotMatch::Prefix(ORG_SLOT_PREFIX))
                .await?;
        }
        Ok(())
    }

    async fn clear_key_pair(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        if let Some(mut slots) = self.memory.get_mut(account) {
            slots.key_pair = None;
        }
        if scope == ClearScope::IncludingPersisted {
            self.delete_slots(account, SlotMatch::Exact(SLOT_KEY_PAIR))
                .await?;
        }
        Ok(())
    }

    async fn clear_enc_key(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        if let Some(mut slots) = self.memory.get_mut(account) {
            slots.enc_key = None;
        }
        if scope == ClearScope::IncludingPersisted {
            self.delete_slots(account, SlotMatch::Exact(SLOT_ENC_KEY))
                .await?;
        }
        Ok(())
    }

    async fn toggle_key_persistence(
        &self,
        account: &AccountId,
        preference: &TimeoutPreference,
    ) -> ProviderResult<()> {
        let keep_auto = preference.action == TimeoutAction::Lock && preference.is_never();
        if !keep_auto {
            self.delete_slots(account, SlotMatch::Exact(KeySuffix::Auto.as_str()))
                .await?;
            return Ok(());
        }

        let user_key = self
            .memory
            .get(account)
            .and_then(|slots| slots.user_key.clone());
        match user_key {
            Some(key) => {
                self.put_slot(account, KeySuffix::Auto.as_str().to_owned(), &key)
                    .await?;
                info!(account_id = %account, "auto key persisted");
            }
            None => {
                debug!(account_id = %account, "no user key in memory, auto slot left as is");
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
