//! Vault lock core for Lockward.
//!
//! Decides when an account's decrypted vault state must be purged and runs
//! the purge.  Storage is left to collaborators behind the traits in
//! [`provider`]; this crate only sequences calls into them.
//!
//! # Modules
//!
//! - [`account`] -- per-account data model (timeout preference, key slots).
//! - [`provider`] -- collaborator traits (state, keys, caches, policy, tokens).
//! - [`policy`] -- organization timeout clamp.
//! - [`clock`] -- activity clock and expiry check.
//! - [`executor`] -- ordered lock teardown and logout delegation.
//! - [`query`] -- lock-state queries.
//! - [`hooks`] -- lock and logout observers.
//! - [`timeout`] -- the recurring per-account timeout check.
//! - [`guard`] -- access decisions for vault destinations.
//! - [`service`] -- [`VaultTimeoutService`], the public entry point.
//! - [`config`] -- configuration loading.
//! - [`error`] -- unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lockward_vault::{AccountId, TimeoutAction, VaultTimeoutService};
//! # use lockward_vault::provider::{AccountCache, KeyStore, SearchIndex, StateStore};
//!
//! # async fn example(
//! #     state: Arc<dyn StateStore>,
//! #     keys: Arc<dyn KeyStore>,
//! #     ciphers: Arc<dyn AccountCache>,
//! #     folders: Arc<dyn AccountCache>,
//! #     collections: Arc<dyn AccountCache>,
//! #     index: Arc<dyn SearchIndex>,
//! # ) -> lockward_vault::Result<()> {
//! let service = VaultTimeoutService::builder()
//!     .state(state)
//!     .keys(keys)
//!     .ciphers(ciphers)
//!     .folders(folders)
//!     .collections(collections)
//!     .search_index(index)
//!     .build()?;
//!
//! let alice = AccountId::from("alice");
//! service.registry().register(alice.clone(), Some("Alice"));
//! service.set_timeout_options(&alice, Some(15), TimeoutAction::Lock).await?;
//!
//! // Check every 10 seconds from now on.
//! service.init(true)?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod hooks;
pub mod policy;
pub mod provider;
pub mod query;
pub mod service;
pub mod timeout;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the most commonly used types at the crate root for convenience.
pub use account::{
    AccountId, ClearScope, KeySuffix, LockOutcome, OrgTimeoutPolicy, PinLockStatus, PolicyKind,
    SymmetricKey, TimeoutAction, TimeoutPreference,
};
pub use clock::{ActivityClock, Clock, ManualClock, SystemClock};
pub use config::{LockwardConfig, TimeoutSettings, ViewSuppression};
pub use error::{LockError, Result};
pub use guard::{AuthGuard, GuardDecision};
pub use hooks::{HookId, LockHook};
pub use provider::{ProviderError, ProviderResult};
pub use service::{VaultTimeoutService, VaultTimeoutServiceBuilder};
pub use timeout::{AccountOutcome, SkipReason, TickReport};
