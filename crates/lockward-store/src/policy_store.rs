//! Organization policies, persisted per account.
//!
//! Policies are synced from the organization and stored as JSON payloads
//! keyed by `(account_id, kind)`.  A disabled row behaves as if absent.

use async_trait::async_trait;
use chrono::Utc;
use lockward_vault::provider::PolicySource;
use lockward_vault::{AccountId, OrgTimeoutPolicy, PolicyKind, ProviderResult};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::error::StoreResult;

/// [`PolicySource`] backed by the `org_policies` table.
#[derive(Clone)]
pub struct SqlitePolicyStore {
    db: Database,
}

impl SqlitePolicyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store (or replace) an enabled policy for `account`.
    #[instrument(skip(self, policy), fields(account_id = %account))]
    pub async fn set_policy(
        &self,
        account: &AccountId,
        kind: PolicyKind,
        policy: OrgTimeoutPolicy,
    ) -> StoreResult<()> {
        let id = account.to_string();
        let data = serde_json::to_string(&policy)?;
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO org_policies (account_id, kind, enabled, data, updated_at)
                     VALUES (?1, ?2, 1, ?3, ?4)
                     ON CONFLICT(account_id, kind) DO UPDATE SET
                        enabled = 1,
                        data = excluded.data,
                        updated_at = excluded.updated_at",
                    params![id, kind.as_str(), data, now],
                )?;
                Ok(())
            })
            .await?;
        info!(max_minutes = policy.max_minutes, "organization policy stored");
        Ok(())
    }

    /// Keep the row but stop enforcing it.  Returns `true` if a row existed.
    pub async fn disable(&self, account: &AccountId, kind: PolicyKind) -> StoreResult<bool> {
        self.set_enabled(account, kind, false).await
    }

    /// Enforce a previously disabled policy again.
    pub async fn enable(&self, account: &AccountId, kind: PolicyKind) -> StoreResult<bool> {
        self.set_enabled(account, kind, true).await
    }

    /// Delete the policy.  Returns `true` if a row existed.
    pub async fn clear(&self, account: &AccountId, kind: PolicyKind) -> StoreResult<bool> {
        let id = account.to_string();
        let removed = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM org_policies WHERE account_id = ?1 AND kind = ?2",
                    params![id, kind.as_str()],
                )?)
            })
            .await?;
        debug!(account_id = %account, kind = kind.as_str(), removed, "organization policy cleared");
        Ok(removed > 0)
    }

    /// The enabled policy of `kind` for `account`, if any.
    pub async fn get(
        &self,
        account: &AccountId,
        kind: PolicyKind,
    ) -> StoreResult<Option<OrgTimeoutPolicy>> {
        let id = account.to_string();
        let data = self
            .db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM org_policies
                         WHERE account_id = ?1 AND kind = ?2 AND enabled = 1",
                        params![id, kind.as_str()],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten())
            })
            .await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_enabled(
        &self,
        account: &AccountId,
        kind: PolicyKind,
        enabled: bool,
    ) -> StoreResult<bool> {
        let id = account.to_string();
        let now = Utc::now().timestamp();
        let changed = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "UPDATE org_policies SET enabled = ?3, updated_at = ?4
                     WHERE account_id = ?1 AND kind = ?2",
                    params![id, kind.as_str(), enabled, now],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn is_enabled(&self, account: &AccountId, kind: PolicyKind) -> StoreResult<bool> {
        let id = account.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT enabled FROM org_policies WHERE account_id = ?1 AND kind = ?2",
                        params![id, kind.as_str()],
                        |row| row.get::<_, bool>(0),
                    )
                    .optional()?
                    .unwrap_or(false))
            })
            .await
    }
}

#[async_trait]
impl PolicySource for SqlitePolicyStore {
    async fn policy_applies(&self, kind: PolicyKind, account: &AccountId) -> ProviderResult<bool> {
        Ok(self.is_enabled(account, kind).await?)
    }

    async fn policy_data(
        &self,
        kind: PolicyKind,
        account: &AccountId,
    ) -> ProviderResult<Option<OrgTimeoutPolicy>> {
        Ok(self.get(account, kind).await?)
    }
}
