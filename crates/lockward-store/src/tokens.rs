//! Session tokens, held in memory and optionally persisted.
//!
//! Tokens always live in memory.  Whether they are also written to the
//! `session_tokens` table follows the account's timeout preference: an
//! account that logs out after a finite timeout never keeps tokens on disk,
//! everything else does so the session survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lockward_vault::provider::TokenStore;
use lockward_vault::{AccountId, ProviderResult, TimeoutAction, TimeoutPreference};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::db::Database;
use crate::error::StoreResult;

/// An access/refresh token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access: Zeroizing<String>,
    pub refresh: Option<Zeroizing<String>>,
}

impl SessionTokens {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: Zeroizing::new(access.into()),
            refresh: refresh.map(Zeroizing::new),
        }
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access", &"[redacted]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// `true` when tokens for this preference must stay off disk.
pub fn memory_only(preference: &TimeoutPreference) -> bool {
    preference.action == TimeoutAction::LogOut && !preference.is_never()
}

/// [`TokenStore`] over memory plus the `session_tokens` table.
pub struct SqliteTokenStore {
    db: Database,
    memory: DashMap<AccountId, SessionTokens>,
    memory_only: DashMap<AccountId, bool>,
}

impl SqliteTokenStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            memory: DashMap::new(),
            memory_only: DashMap::new(),
        }
    }

    /// Store tokens for `account`, persisting them unless the account is
    /// currently memory-only.
    pub async fn set_tokens(&self, account: &AccountId, tokens: SessionTokens) -> StoreResult<()> {
        let persist = !self.memory_only.get(account).is_some_and(|m| *m);
        if persist {
            self.persist(account, &tokens).await?;
        }
        self.memory.insert(account.clone(), tokens);
        debug!(account_id = %account, persist, "session tokens stored");
        Ok(())
    }

    /// Tokens for `account`, from memory first and then from disk.
    pub async fn tokens(&self, account: &AccountId) -> StoreResult<Option<SessionTokens>> {
        if let Some(tokens) = self.memory.get(account) {
            return Ok(Some(tokens.clone()));
        }
        let id = account.to_string();
        let row = self
            .db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT access_token, refresh_token FROM session_tokens WHERE account_id = ?1",
                        params![id],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                    )
                    .optional()?)
            })
            .await?;
        Ok(row.map(|(access, refresh)| SessionTokens::new(access, refresh)))
    }

    /// `true` if tokens for `account` are on disk.
    pub async fn is_persisted(&self, account: &AccountId) -> StoreResult<bool> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT 1 FROM session_tokens WHERE account_id = ?1",
                        params![id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some())
            })
            .await
    }

    /// Drop all tokens for `account`.
    pub async fn clear(&self, account: &AccountId) -> StoreResult<()> {
        self.memory.remove(account);
        self.memory_only.remove(account);
        self.delete_persisted(account).await
    }

    async fn persist(&self, account: &AccountId, tokens: &SessionTokens) -> StoreResult<()> {
        let id = account.to_string();
        let access = tokens.access.clone();
        let refresh = tokens.refresh.clone();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO session_tokens (account_id, access_token, refresh_token, stored_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(account_id) DO UPDATE SET
                        access_token = excluded.access_token,
                        refresh_token = excluded.refresh_token,
                        stored_at = excluded.stored_at",
                    params![id, access.as_str(), refresh.as_ref().map(|r| r.as_str()), now],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete_persisted(&self, account: &AccountId) -> StoreResult<()> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM session_tokens WHERE account_id = ?1", params![id])?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn toggle_tokens(
        &self,
        account: &AccountId,
        preference: &TimeoutPreference,
    ) -> ProviderResult<()> {
        let memory_only = memory_only(preference);
        self.memory_only.insert(account.clone(), memory_only);

        if memory_only {
            self.delete_persisted(account).await?;
            info!(account_id = %account, "session tokens moved to memory only");
            return Ok(());
        }

        let current = self.memory.get(account).map(|t| t.clone());
        if let Some(tokens) = current {
            self.persist(account, &tokens).await?;
            debug!(account_id = %account, "session tokens persisted");
        }
        Ok(())
    }
}
