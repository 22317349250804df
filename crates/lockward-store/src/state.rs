//! SQLite-backed per-account lock state.
//!
//! One `account_state` row per account.  Rows are created lazily by the
//! first write, so every setter is an upsert.  The PIN-decrypted user key is
//! never written to disk; it lives in a process-local map and disappears on
//! restart or on [`StateStore::set_decrypted_pin_protected`]`(None)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lockward_vault::provider::StateStore;
use lockward_vault::{AccountId, ProviderResult, SymmetricKey, TimeoutAction};
use rusqlite::types::FromSql;
use rusqlite::{OptionalExtension, ToSql, params};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Snapshot of one account's stored lock state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRow {
    pub account_id: String,
    pub label: Option<String>,
    pub authenticated: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub vault_timeout: Option<i64>,
    pub vault_timeout_action: Option<TimeoutAction>,
    pub ever_been_unlocked: bool,
    pub biometric_locked: bool,
    pub biometric_unlock: bool,
    pub pin_set: bool,
}

// ═══════════════════════════════════════════════════════════════════════
//  Store
// ═══════════════════════════════════════════════════════════════════════

/// Persisted account state on top of a [`Database`].
pub struct SqliteStateStore {
    db: Database,
    decrypted_pins: DashMap<AccountId, SymmetricKey>,
}

impl SqliteStateStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            decrypted_pins: DashMap::new(),
        }
    }

    /// Create the row for `account` if missing and set its label.
    #[instrument(skip(self), fields(account_id = %account))]
    pub async fn ensure_account(
        &self,
        account: &AccountId,
        label: Option<&str>,
    ) -> StoreResult<()> {
        let id = account.to_string();
        let label = label.map(str::to_owned);
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO account_state (account_id, label, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(account_id) DO UPDATE SET
                        label = COALESCE(excluded.label, account_state.label),
                        updated_at = excluded.updated_at",
                    params![id, label, now],
                )?;
                Ok(())
            })
            .await?;
        debug!("account row ensured");
        Ok(())
    }

    /// Delete everything stored for `account`.  Returns `true` if a row
    /// existed.
    #[instrument(skip(self), fields(account_id = %account))]
    pub async fn remove_account(&self, account: &AccountId) -> StoreResult<bool> {
        self.decrypted_pins.remove(account);
        let id = account.to_string();
        let removed = self
            .db
            .execute(move |conn| {
                Ok(conn.execute("DELETE FROM account_state WHERE account_id = ?1", params![id])?)
            })
            .await?;
        if self.active_account().await?.as_ref() == Some(account) {
            self.set_active_account(None).await?;
        }
        if removed > 0 {
            info!("account state removed");
        }
        Ok(removed > 0)
    }

    pub async fn set_authenticated(&self, account: &AccountId, value: bool) -> StoreResult<()> {
        self.set_column(account, "authenticated", value).await
    }

    pub async fn set_biometric_unlock(&self, account: &AccountId, value: bool) -> StoreResult<()> {
        self.set_column(account, "biometric_unlock", value).await
    }

    pub async fn set_encrypted_pin_protected(
        &self,
        account: &AccountId,
        value: Option<String>,
    ) -> StoreResult<()> {
        self.set_column(account, "encrypted_pin_protected", value).await
    }

    pub async fn set_convert_to_key_connector(
        &self,
        account: &AccountId,
        value: bool,
    ) -> StoreResult<()> {
        self.set_column(account, "convert_to_key_connector", value)
            .await
    }

    pub async fn biometric_locked(&self, account: &AccountId) -> StoreResult<bool> {
        Ok(self
            .get_column::<bool>(account, "biometric_locked")
            .await?
            .unwrap_or(true))
    }

    /// `true` while a PIN-decrypted user key is held in memory.
    pub fn has_decrypted_pin(&self, account: &AccountId) -> bool {
        self.decrypted_pins.contains_key(account)
    }

    /// Snapshot of one account, or `None` if it has no row.
    pub async fn account(&self, account: &AccountId) -> StoreResult<Option<AccountRow>> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("{SELECT_ROW} WHERE account_id = ?1"),
                    params![id],
                    map_row,
                )
                .optional()?
                .transpose()
            })
            .await
    }

    /// Every stored account, ordered by id.
    pub async fn list_accounts(&self) -> StoreResult<Vec<AccountRow>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_ROW} ORDER BY account_id"))?;
                let rows = stmt.query_map([], map_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row??);
                }
                Ok(out)
            })
            .await
    }

    /// The account recorded as active, if any.
    pub async fn active_account(&self) -> StoreResult<Option<AccountId>> {
        let value = self
            .db
            .execute(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM app_state WHERE key = ?1",
                        params![ACTIVE_ACCOUNT_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(value.map(AccountId::from))
    }

    /// Record `account` as active, or clear the record with `None`.
    pub async fn set_active_account(&self, account: Option<&AccountId>) -> StoreResult<()> {
        let value = account.map(|a| a.to_string());
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                match value {
                    Some(id) => conn.execute(
                        "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at",
                        params![ACTIVE_ACCOUNT_KEY, id, now],
                    )?,
                    None => conn.execute(
                        "DELETE FROM app_state WHERE key = ?1",
                        params![ACTIVE_ACCOUNT_KEY],
                    )?,
                };
                Ok(())
            })
            .await
    }

    // ── column helpers ───────────────────────────────────────────────

    /// Upsert a single column.  `column` is always a literal from this
    /// module.
    async fn set_column<V>(
        &self,
        account: &AccountId,
        column: &'static str,
        value: V,
    ) -> StoreResult<()>
    where
        V: ToSql + Send + 'static,
    {
        let id = account.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "INSERT INTO account_state (account_id, {column}, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(account_id) DO UPDATE SET
                        {column} = excluded.{column},
                        updated_at = excluded.updated_at"
                );
                conn.execute(&sql, params![id, value, now])?;
                Ok(())
            })
            .await?;
        debug!(account_id = %account, column, "account state updated");
        Ok(())
    }

    /// Read a single column.  A missing row and a NULL value both come back
    /// as `None`.
    async fn get_column<T>(
        &self,
        account: &AccountId,
        column: &'static str,
    ) -> StoreResult<Option<T>>
    where
        T: FromSql + Send + 'static,
    {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!("SELECT {column} FROM account_state WHERE account_id = ?1");
                let value = conn
                    .query_row(&sql, params![id], |row| row.get::<_, Option<T>>(0))
                    .optional()?;
                Ok(value.flatten())
            })
            .await
    }
}

const ACTIVE_ACCOUNT_KEY: &str = "active_account";

const SELECT_ROW: &str = "SELECT account_id, label, authenticated, last_active_ms, vault_timeout,
        vault_timeout_action, ever_been_unlocked, biometric_locked, biometric_unlock,
        protected_pin IS NOT NULL OR encrypted_pin_protected IS NOT NULL
     FROM account_state";

/// Map a [`SELECT_ROW`] row.  The outer result is rusqlite's, the inner one
/// reports values this crate cannot interpret.
fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreResult<AccountRow>> {
    let action: Option<String> = row.get(5)?;
    let last_active_ms: Option<i64> = row.get(3)?;
    let parsed = match action.as_deref().map(parse_action).transpose() {
        Ok(parsed) => parsed,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(AccountRow {
        account_id: row.get(0)?,
        label: row.get(1)?,
        authenticated: row.get(2)?,
        last_active: last_active_ms.and_then(DateTime::from_timestamp_millis),
        vault_timeout: row.get(4)?,
        vault_timeout_action: parsed,
        ever_been_unlocked: row.get(6)?,
        biometric_locked: row.get(7)?,
        biometric_unlock: row.get(8)?,
        pin_set: row.get(9)?,
    }))
}

fn parse_action(raw: &str) -> StoreResult<TimeoutAction> {
    TimeoutAction::parse(raw).ok_or_else(|| StoreError::InvalidValue {
        column: "vault_timeout_action",
        value: raw.to_owned(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  StateStore
// ═══════════════════════════════════════════════════════════════════════

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn is_authenticated(&self, account: &AccountId) -> ProviderResult<bool> {
        Ok(self
            .get_column::<bool>(account, "authenticated")
            .await?
            .unwrap_or(false))
    }

    async fn last_active(&self, account: &AccountId) -> ProviderResult<Option<DateTime<Utc>>> {
        let ms = self.get_column::<i64>(account, "last_active_ms").await?;
        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    async fn set_last_active(&self, account: &AccountId, at: DateTime<Utc>) -> ProviderResult<()> {
        Ok(self
            .set_column(account, "last_active_ms", at.timestamp_millis())
            .await?)
    }

    async fn vault_timeout(&self, account: &AccountId) -> ProviderResult<Option<i64>> {
        Ok(self.get_column::<i64>(account, "vault_timeout").await?)
    }

    async fn set_vault_timeout(
        &self,
        account: &AccountId,
        minutes: Option<i64>,
    ) -> ProviderResult<()> {
        Ok(self.set_column(account, "vault_timeout", minutes).await?)
    }

    async fn vault_timeout_action(
        &self,
        account: &AccountId,
    ) -> ProviderResult<Option<TimeoutAction>> {
        let raw = self
            .get_column::<String>(account, "vault_timeout_action")
            .await?;
        Ok(raw.as_deref().map(parse_action).transpose()?)
    }

    async fn set_vault_timeout_action(
        &self,
        account: &AccountId,
        action: TimeoutAction,
    ) -> ProviderResult<()> {
        Ok(self
            .set_column(account, "vault_timeout_action", action.as_str())
            .await?)
    }

    async fn ever_been_unlocked(&self, account: &AccountId) -> ProviderResult<bool> {
        Ok(self
            .get_column::<bool>(account, "ever_been_unlocked")
            .await?
            .unwrap_or(false))
    }

    async fn set_ever_been_unlocked(&self, account: &AccountId, value: bool) -> ProviderResult<()> {
        Ok(self.set_column(account, "ever_been_unlocked", value).await?)
    }

    async fn set_biometric_locked(&self, account: &AccountId, value: bool) -> ProviderResult<()> {
        Ok(self.set_column(account, "biometric_locked", value).await?)
    }

    async fn biometric_unlock(&self, account: &AccountId) -> ProviderResult<bool> {
        Ok(self
            .get_column::<bool>(account, "biometric_unlock")
            .await?
            .unwrap_or(false))
    }

    async fn protected_pin(&self, account: &AccountId) -> ProviderResult<Option<String>> {
        Ok(self.get_column::<String>(account, "protected_pin").await?)
    }

    async fn set_protected_pin(
        &self,
        account: &AccountId,
        value: Option<String>,
    ) -> ProviderResult<()> {
        Ok(self.set_column(account, "protected_pin", value).await?)
    }

    async fn encrypted_pin_protected(
        &self,
        account: &AccountId,
    ) -> ProviderResult<Option<String>> {
        Ok(self
            .get_column::<String>(account, "encrypted_pin_protected")
            .await?)
    }

    async fn set_decrypted_pin_protected(
        &self,
        account: &AccountId,
        value: Option<SymmetricKey>,
    ) -> ProviderResult<()> {
        match value {
            Some(key) => {
                self.decrypted_pins.insert(account.clone(), key);
            }
            None => {
                self.decrypted_pins.remove(account);
            }
        }
        Ok(())
    }

    async fn convert_account_to_key_connector(
        &self,
        account: &AccountId,
    ) -> ProviderResult<bool> {
        Ok(self
            .get_column::<bool>(account, "convert_to_key_connector")
            .await?
            .unwrap_or(false))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStateStore {
        SqliteStateStore::new(Database::in_memory_migrated().await.unwrap())
    }

    #[tokio::test]
    async fn unknown_account_reads_as_defaults() {
        let store = store().await;
        let ghost = AccountId::from("ghost");

        assert!(!store.is_authenticated(&ghost).await.unwrap());
        assert!(store.last_active(&ghost).await.unwrap().is_none());
        assert!(store.vault_timeout(&ghost).await.unwrap().is_none());
        assert!(store.vault_timeout_action(&ghost).await.unwrap().is_none());
        assert!(!store.ever_been_unlocked(&ghost).await.unwrap());
        assert!(store.biometric_locked(&ghost).await.unwrap());
        assert!(store.account(&ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn setters_upsert_one_column_at_a_time() {
        let store = store().await;
        let alice = AccountId::from("alice");

        store.set_vault_timeout(&alice, Some(15)).await.unwrap();
        store
            .set_vault_timeout_action(&alice, TimeoutAction::LogOut)
            .await
            .unwrap();
        store.set_authenticated(&alice, true).await.unwrap();

        assert_eq!(store.vault_timeout(&alice).await.unwrap(), Some(15));
        assert_eq!(
            store.vault_timeout_action(&alice).await.unwrap(),
            Some(TimeoutAction::LogOut)
        );
        assert!(store.is_authenticated(&alice).await.unwrap());

        store.set_vault_timeout(&alice, None).await.unwrap();
        assert_eq!(store.vault_timeout(&alice).await.unwrap(), None);
        assert!(store.is_authenticated(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn last_active_keeps_millisecond_precision() {
        let store = store().await;
        let alice = AccountId::from("alice");
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

        store.set_last_active(&alice, at).await.unwrap();
        assert_eq!(store.last_active(&alice).await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn decrypted_pin_stays_in_memory() {
        let store = store().await;
        let alice = AccountId::from("alice");

        store
            .set_decrypted_pin_protected(&alice, Some(SymmetricKey::new(vec![1; 32])))
            .await
            .unwrap();
        assert!(store.has_decrypted_pin(&alice));
        assert!(store.account(&alice).await.unwrap().is_none());

        store.set_decrypted_pin_protected(&alice, None).await.unwrap();
        assert!(!store.has_decrypted_pin(&alice));
    }

    #[tokio::test]
    async fn row_snapshot_reports_pin_halves() {
        let store = store().await;
        let alice = AccountId::from("alice");
        store.ensure_account(&alice, Some("Alice")).await.unwrap();

        let row = store.account(&alice).await.unwrap().unwrap();
        assert_eq!(row.label.as_deref(), Some("Alice"));
        assert!(!row.pin_set);

        store
            .set_encrypted_pin_protected(&alice, Some("2.enc|pin".into()))
            .await
            .unwrap();
        let row = store.account(&alice).await.unwrap().unwrap();
        assert!(row.pin_set);
    }

    #[tokio::test]
    async fn ensure_account_keeps_existing_label() {
        let store = store().await;
        let alice = AccountId::from("alice");
        store.ensure_account(&alice, Some("Alice")).await.unwrap();
        store.ensure_account(&alice, None).await.unwrap();

        let rows = store.list_accounts().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn remove_account_drops_row() {
        let store = store().await;
        let alice = AccountId::from("alice");
        store.set_authenticated(&alice, true).await.unwrap();

        assert!(store.remove_account(&alice).await.unwrap());
        assert!(!store.remove_account(&alice).await.unwrap());
        assert!(!store.is_authenticated(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_action_is_reported() {
        let store = store().await;
        store
            .db
            .execute(|conn| {
                conn.execute_batch(
                    "PRAGMA ignore_check_constraints = ON;
                     INSERT INTO account_state (account_id, vault_timeout_action, created_at, updated_at)
                     VALUES ('bob', 'explode', 0, 0);",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .vault_timeout_action(&AccountId::from("bob"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("explode"));
    }

    #[tokio::test]
    async fn active_account_round_trips_and_follows_removal() {
        let store = store().await;
        let alice = AccountId::from("alice");
        assert!(store.active_account().await.unwrap().is_none());

        store.ensure_account(&alice, None).await.unwrap();
        store.set_active_account(Some(&alice)).await.unwrap();
        assert_eq!(store.active_account().await.unwrap(), Some(alice.clone()));

        store.remove_account(&alice).await.unwrap();
        assert!(store.active_account().await.unwrap().is_none());
    }
}
