//! Collaborator contracts.
//!
//! The lock core decides *when* state is purged; the stores below do the
//! actual storing.  Every trait is `Send + Sync` so one service instance can
//! be shared by the scheduler task and any number of callers.
//!
//! Accessors are fail-soft: missing data comes back as `None`/`false`, never
//! as an error.  Errors are reserved for real storage failures.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::account::{
    AccountId, ClearScope, KeySuffix, OrgTimeoutPolicy, PolicyKind, SymmetricKey, TimeoutAction,
    TimeoutPreference,
};

/// Error surfaced by a collaborator.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by every collaborator call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Persisted account state
// ---------------------------------------------------------------------------

/// Per-account persisted state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn is_authenticated(&self, account: &AccountId) -> ProviderResult<bool>;

    async fn last_active(&self, account: &AccountId) -> ProviderResult<Option<DateTime<Utc>>>;
    async fn set_last_active(&self, account: &AccountId, at: DateTime<Utc>) -> ProviderResult<()>;

    async fn vault_timeout(&self, account: &AccountId) -> ProviderResult<Option<i64>>;
    async fn set_vault_timeout(
        &self,
        account: &AccountId,
        minutes: Option<i64>,
    ) -> ProviderResult<()>;

    async fn vault_timeout_action(&self, account: &AccountId)
    -> ProviderResult<Option<TimeoutAction>>;
    async fn set_vault_timeout_action(
        &self,
        account: &AccountId,
        action: TimeoutAction,
    ) -> ProviderResult<()>;

    async fn ever_been_unlocked(&self, account: &AccountId) -> ProviderResult<bool>;
    async fn set_ever_been_unlocked(&self, account: &AccountId, value: bool) -> ProviderResult<()>;

    async fn set_biometric_locked(&self, account: &AccountId, value: bool) -> ProviderResult<()>;

    /// Whether the user enabled biometric unlock.
    async fn biometric_unlock(&self, account: &AccountId) -> ProviderResult<bool>;

    async fn protected_pin(&self, account: &AccountId) -> ProviderResult<Option<String>>;
    async fn set_protected_pin(
        &self,
        account: &AccountId,
        value: Option<String>,
    ) -> ProviderResult<()>;

    async fn encrypted_pin_protected(&self, account: &AccountId)
    -> ProviderResult<Option<String>>;

    /// In-memory PIN-decrypted user key.
    async fn set_decrypted_pin_protected(
        &self,
        account: &AccountId,
        value: Option<SymmetricKey>,
    ) -> ProviderResult<()>;

    /// Whether the account must be migrated to a key connector before use.
    async fn convert_account_to_key_connector(&self, account: &AccountId)
    -> ProviderResult<bool>;
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Key material, in memory and in persisted slots.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn has_key_stored(&self, suffix: KeySuffix, account: &AccountId)
    -> ProviderResult<bool>;

    async fn get_key(
        &self,
        suffix: KeySuffix,
        account: &AccountId,
    ) -> ProviderResult<Option<SymmetricKey>>;

    async fn has_key_in_memory(&self, account: &AccountId) -> ProviderResult<bool>;

    /// Clear the primary (user) key.
    async fn clear_key(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()>;
    async fn clear_org_keys(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()>;
    async fn clear_key_pair(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()>;
    async fn clear_enc_key(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()>;

    /// Store or remove persisted key slots to match `preference`.
    async fn toggle_key_persistence(
        &self,
        account: &AccountId,
        preference: &TimeoutPreference,
    ) -> ProviderResult<()>;
}

// ---------------------------------------------------------------------------
// Caches and the search index
// ---------------------------------------------------------------------------

/// A per-account cache of decrypted vault data (ciphers, folders, ...).
#[async_trait]
pub trait AccountCache: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &str;

    async fn clear_cache(&self, account: &AccountId) -> ProviderResult<()>;
}

/// The process-wide search index built from the active account's vault.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn clear_index(&self) -> ProviderResult<()>;
}

// ---------------------------------------------------------------------------
// Policy, tokens, view
// ---------------------------------------------------------------------------

/// Organization policy lookups.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn policy_applies(&self, kind: PolicyKind, account: &AccountId) -> ProviderResult<bool>;

    async fn policy_data(
        &self,
        kind: PolicyKind,
        account: &AccountId,
    ) -> ProviderResult<Option<OrgTimeoutPolicy>>;
}

/// Session tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Move tokens between memory and persistent storage to match
    /// `preference`.
    async fn toggle_tokens(
        &self,
        account: &AccountId,
        preference: &TimeoutPreference,
    ) -> ProviderResult<()>;
}

/// "Is any vault view currently open" signal.
#[async_trait]
pub trait ViewSignal: Send + Sync {
    async fn is_view_open(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Trivial implementations
// ---------------------------------------------------------------------------

/// Policy source for deployments without organizations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPolicies;

#[async_trait]
impl PolicySource for NoPolicies {
    async fn policy_applies(&self, _: PolicyKind, _: &AccountId) -> ProviderResult<bool> {
        Ok(false)
    }

    async fn policy_data(
        &self,
        _: PolicyKind,
        _: &AccountId,
    ) -> ProviderResult<Option<OrgTimeoutPolicy>> {
        Ok(None)
    }
}

/// Token store for hosts that keep tokens elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTokens;

#[async_trait]
impl TokenStore for NoTokens {
    async fn toggle_tokens(&self, _: &AccountId, _: &TimeoutPreference) -> ProviderResult<()> {
        Ok(())
    }
}

/// A view signal flipped by the host UI.
#[derive(Debug, Default)]
pub struct ViewFlag {
    open: AtomicBool,
}

impl ViewFlag {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

#[async_trait]
impl ViewSignal for ViewFlag {
    async fn is_view_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn view_flag_toggles() {
        let flag = ViewFlag::default();
        assert!(!flag.is_view_open().await);
        flag.set_open(true);
        assert!(flag.is_view_open().await);
    }

    #[tokio::test]
    async fn no_policies_never_applies() {
        let id = AccountId::from("alice");
        assert!(
            !NoPolicies
                .policy_applies(PolicyKind::MaximumVaultTimeout, &id)
                .await
                .unwrap()
        );
        assert!(
            NoPolicies
                .policy_data(PolicyKind::MaximumVaultTimeout, &id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
