//! Lock core error types.
//!
//! Every public API in this crate returns [`LockError`].  Collaborator
//! failures arrive as boxed [`ProviderError`]s and are wrapped with the
//! account and operation that was in progress, so a failed teardown names
//! the exact step that aborted it.

use lockward_kernel::KernelError;

use crate::account::AccountId;
use crate::provider::ProviderError;

/// Unified error type for the vault lock core.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    // -- Collaborator errors ------------------------------------------------
    /// The persisted state store failed.
    #[error("state store failed during {operation} for {account_id}: {reason}")]
    State {
        account_id: String,
        operation: &'static str,
        reason: String,
    },

    /// The key store failed.
    #[error("key store failed during {operation} for {account_id}: {reason}")]
    KeyStore {
        account_id: String,
        operation: &'static str,
        reason: String,
    },

    /// A decrypted-data cache could not be cleared.
    #[error("{cache} cache could not be cleared for {account_id}: {reason}")]
    Cache {
        cache: String,
        account_id: String,
        reason: String,
    },

    /// The shared search index could not be cleared.
    #[error("search index could not be cleared: {reason}")]
    SearchIndex { reason: String },

    /// Organization policy lookup failed.
    #[error("policy lookup failed for {account_id}: {reason}")]
    Policy { account_id: String, reason: String },

    /// The token store failed to reconcile token persistence.
    #[error("token store failed for {account_id}: {reason}")]
    TokenStore { account_id: String, reason: String },

    // -- Hook errors --------------------------------------------------------
    /// A registered hook failed.  The lock or logout it observed has already
    /// been committed.
    #[error("{hook} hook failed for {account_id}: {reason}")]
    Hook {
        hook: String,
        account_id: String,
        reason: String,
    },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {reason}")]
    Config { reason: String },

    // -- Underlying errors --------------------------------------------------
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl LockError {
    pub(crate) fn state(account: &AccountId, operation: &'static str, err: ProviderError) -> Self {
        Self::State {
            account_id: account.to_string(),
            operation,
            reason: err.to_string(),
        }
    }

    pub(crate) fn key_store(
        account: &AccountId,
        operation: &'static str,
        err: ProviderError,
    ) -> Self {
        Self::KeyStore {
            account_id: account.to_string(),
            operation,
            reason: err.to_string(),
        }
    }

    pub(crate) fn policy(account: &AccountId, err: ProviderError) -> Self {
        Self::Policy {
            account_id: account.to_string(),
            reason: err.to_string(),
        }
    }

    /// `true` for failures raised after the state transition was committed.
    pub fn is_post_commit(&self) -> bool {
        matches!(self, Self::Hook { .. })
    }
}

/// Convenience alias used throughout the lock core.
pub type Result<T> = std::result::Result<T, LockError>;
