//! Lock and logout execution.
//!
//! The lock teardown runs in a fixed order:
//!
//! ```text
//! search index (active account only)
//!   -> cipher / folder / collection caches
//!   -> everBeenUnlocked = true
//!   -> user key (memory only)
//!   -> org keys, key pair, enc key (memory and persisted)
//!   -> biometric-locked flag
//!   == committed ==
//!   -> `locked` event
//!   -> lock hooks
//! ```
//!
//! Any failure before the commit point aborts the remaining steps and leaves
//! the account marked *incomplete* in the [`TeardownLedger`].  An incomplete
//! account never reports as locked, so the next scheduler tick (or the next
//! explicit lock) re-runs the whole sequence from the top.
//!
//! At most one teardown per account is in flight; a concurrent request for
//! the same account returns [`LockOutcome::InProgress`] without touching
//! anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lockward_kernel::{AccountRegistry, Event, IpcBus};

use crate::account::{AccountId, ClearScope, LockOutcome};
use crate::error::{LockError, Result};
use crate::hooks::HookRegistry;
use crate::provider::{AccountCache, KeyStore, SearchIndex, StateStore};
use crate::query::LockStateQuery;

// ---------------------------------------------------------------------------
// Teardown ledger
// ---------------------------------------------------------------------------

/// Tracks teardowns that are running or that stopped part-way.
#[derive(Default)]
pub struct TeardownLedger {
    in_flight: DashMap<AccountId, ()>,
    incomplete: DashMap<AccountId, DateTime<Utc>>,
}

impl TeardownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the per-account teardown slot.  `None` if it is taken.
    fn try_begin(&self, account: &AccountId) -> Option<InFlightGuard<'_>> {
        match self.in_flight.entry(account.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    ledger: self,
                    account: account.clone(),
                })
            }
        }
    }

    fn mark_incomplete(&self, account: &AccountId) {
        self.incomplete.insert(account.clone(), Utc::now());
    }

    fn mark_complete(&self, account: &AccountId) {
        self.incomplete.remove(account);
    }

    /// `true` if a teardown for `account` started and never finished.
    pub fn is_incomplete(&self, account: &AccountId) -> bool {
        self.incomplete.contains_key(account)
    }

    /// When the unfinished teardown for `account` started.
    pub fn incomplete_since(&self, account: &AccountId) -> Option<DateTime<Utc>> {
        self.incomplete.get(account).map(|e| *e.value())
    }

    pub fn is_in_flight(&self, account: &AccountId) -> bool {
        self.in_flight.contains_key(account)
    }
}

/// Releases the in-flight slot when dropped, including when the teardown
/// future is cancelled.
struct InFlightGuard<'a> {
    ledger: &'a TeardownLedger,
    account: AccountId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ledger.in_flight.remove(&self.account);
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// The decrypted-data caches purged on lock, in purge order.
#[derive(Clone)]
pub struct VaultCaches {
    pub ciphers: Arc<dyn AccountCache>,
    pub folders: Arc<dyn AccountCache>,
    pub collections: Arc<dyn AccountCache>,
}

impl VaultCaches {
    fn in_order(&self) -> [&Arc<dyn AccountCache>; 3] {
        [&self.ciphers, &self.folders, &self.collections]
    }
}

/// Performs lock teardowns and logout delegation.
pub struct LockExecutor {
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) keys: Arc<dyn KeyStore>,
    pub(crate) caches: VaultCaches,
    pub(crate) search_index: Arc<dyn SearchIndex>,
    pub(crate) registry: AccountRegistry,
    pub(crate) bus: IpcBus,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) query: LockStateQuery,
    pub(crate) ledger: Arc<TeardownLedger>,
}

impl LockExecutor {
    /// Lock `account`.
    ///
    /// `allow_soft_lock` marks a timeout-triggered lock; it is carried on the
    /// `locked` event and does not change the teardown.
    pub async fn execute_lock(
        &self,
        account: &AccountId,
        allow_soft_lock: bool,
    ) -> Result<LockOutcome> {
        let Some(_slot) = self.ledger.try_begin(account) else {
            tracing::debug!(account_id = %account, "lock already in progress, ignoring");
            return Ok(LockOutcome::InProgress);
        };

        let authenticated = self
            .state
            .is_authenticated(account)
            .await
            .map_err(|e| LockError::state(account, "is_authenticated", e))?;
        if !authenticated {
            tracing::debug!(
                account_id = %account,
                "lock requested for unauthenticated account, ignoring"
            );
            return Ok(LockOutcome::NotAuthenticated);
        }

        if self.query.is_locked(account).await? {
            tracing::debug!(account_id = %account, "account already locked, ignoring");
            return Ok(LockOutcome::AlreadyLocked);
        }

        self.ledger.mark_incomplete(account);
        self.teardown(account).await?;
        self.ledger.mark_complete(account);

        tracing::info!(account_id = %account, soft = allow_soft_lock, "vault locked");

        if let Err(err) = self.bus.publish(Event::locked(account.clone(), allow_soft_lock)) {
            tracing::warn!(account_id = %account, error = %err, "failed to publish locked event");
        }

        self.hooks.notify_locked(account).await?;

        Ok(LockOutcome::Locked)
    }

    /// Log `account` out by delegating to the registered hooks.
    pub async fn execute_log_out(&self, account: &AccountId) -> Result<()> {
        tracing::info!(account_id = %account, "logging out");
        self.hooks.notify_logged_out(account).await
    }

    async fn teardown(&self, account: &AccountId) -> Result<()> {
        if self.registry.is_active(account) {
            self.search_index
                .clear_index()
                .await
                .map_err(|e| LockError::SearchIndex {
                    reason: e.to_string(),
                })?;
        }

        for cache in self.caches.in_order() {
            cache
                .clear_cache(account)
                .await
                .map_err(|e| LockError::Cache {
                    cache: cache.name().to_owned(),
                    account_id: account.to_string(),
                    reason: e.to_string(),
                })?;
        }

        self.state
            .set_ever_been_unlocked(account, true)
            .await
            .map_err(|e| LockError::state(account, "set_ever_been_unlocked", e))?;

        self.keys
            .clear_key(account, ClearScope::MemoryOnly)
            .await
            .map_err(|e| LockError::key_store(account, "clear_key", e))?;
        self.keys
            .clear_org_keys(account, ClearScope::IncludingPersisted)
            .await
            .map_err(|e| LockError::key_store(account, "clear_org_keys", e))?;
        self.keys
            .clear_key_pair(account, ClearScope::IncludingPersisted)
            .await
            .map_err(|e| LockError::key_store(account, "clear_key_pair", e))?;
        self.keys
            .clear_enc_key(account, ClearScope::IncludingPersisted)
            .await
            .map_err(|e| LockError::key_store(account, "clear_enc_key", e))?;

        self.state
            .set_biometric_locked(account, true)
            .await
            .map_err(|e| LockError::state(account, "set_biometric_locked", e))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
