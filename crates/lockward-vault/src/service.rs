//! The vault timeout service.
//!
//! [`VaultTimeoutService`] is the single entry point hosts talk to.  It owns
//! the policy resolver, activity clock, lock executor and lock-state query,
//! and drives the recurring timeout check through the kernel scheduler.
//! Cloning is cheap; all clones share the same state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use lockward_kernel::{AccountRegistry, Event, IpcBus, Scheduler, SchedulerStats};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::account::{AccountId, LockOutcome, PinLockStatus, TimeoutAction, TimeoutPreference};
use crate::clock::{ActivityClock, Clock, SystemClock};
use crate::config::TimeoutSettings;
use crate::error::{LockError, Result};
use crate::executor::{LockExecutor, TeardownLedger, VaultCaches};
use crate::guard::AuthGuard;
use crate::hooks::{HookId, HookRegistry, LockHook};
use crate::policy::TimeoutResolver;
use crate::provider::{
    AccountCache, KeyStore, NoPolicies, NoTokens, PolicySource, SearchIndex, StateStore,
    TokenStore, ViewFlag, ViewSignal,
};
use crate::query::LockStateQuery;
use crate::timeout::TimeoutCheck;

pub(crate) struct Inner {
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) keys: Arc<dyn KeyStore>,
    pub(crate) tokens: Arc<dyn TokenStore>,
    pub(crate) view: Arc<dyn ViewSignal>,
    pub(crate) search_index: Arc<dyn SearchIndex>,
    pub(crate) registry: AccountRegistry,
    pub(crate) bus: IpcBus,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) ledger: Arc<TeardownLedger>,
    pub(crate) activity: ActivityClock,
    pub(crate) resolver: TimeoutResolver,
    pub(crate) query: LockStateQuery,
    pub(crate) executor: LockExecutor,
    pub(crate) settings: TimeoutSettings,
    pub(crate) scheduler: Scheduler,
    pub(crate) tick_gate: Mutex<()>,
    inited: AtomicBool,
}

/// Vault lock and timeout orchestration for every account in the process.
#[derive(Clone)]
pub struct VaultTimeoutService {
    pub(crate) inner: Arc<Inner>,
}

impl VaultTimeoutService {
    pub fn builder() -> VaultTimeoutServiceBuilder {
        VaultTimeoutServiceBuilder::default()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Initialise the service.
    ///
    /// Only the first call has any effect.  With `check_on_interval` the
    /// recurring timeout check starts: once immediately, then every
    /// configured interval.  The returned handle completes after
    /// [`shutdown`](Self::shutdown).
    pub fn init(&self, check_on_interval: bool) -> Result<Option<JoinHandle<()>>> {
        if self.inner.inited.swap(true, Ordering::AcqRel) {
            tracing::debug!("vault timeout service already initialised");
            return Ok(None);
        }

        if !check_on_interval {
            tracing::info!("vault timeout service initialised without interval check");
            return Ok(None);
        }

        let job = Arc::new(TimeoutCheck::new(self.clone()));
        let handle = match self.inner.scheduler.start(job) {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.inited.store(false, Ordering::Release);
                return Err(err.into());
            }
        };
        tracing::info!(
            interval_secs = self.inner.scheduler.interval().as_secs(),
            "vault timeout check started"
        );
        Ok(Some(handle))
    }

    /// Stop the recurring check.  A tick in progress is cancelled; any
    /// teardown it interrupted is repaired by the next lock attempt.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        tracing::info!("vault timeout service shutting down");
    }

    pub fn is_initialised(&self) -> bool {
        self.inner.inited.load(Ordering::Acquire)
    }

    pub async fn scheduler_stats(&self) -> SchedulerStats {
        self.inner.scheduler.stats().await
    }

    // -- Queries ------------------------------------------------------------

    pub async fn is_locked(&self, account: &AccountId) -> Result<bool> {
        self.inner.query.is_locked(account).await
    }

    pub async fn is_authenticated(&self, account: &AccountId) -> Result<bool> {
        self.inner
            .state
            .is_authenticated(account)
            .await
            .map_err(|e| LockError::state(account, "is_authenticated", e))
    }

    /// Effective timeout in minutes, clamped by organization policy.
    pub async fn get_vault_timeout(&self, account: &AccountId) -> Result<Option<i64>> {
        self.inner.resolver.resolve(account).await
    }

    /// Stored timeout action; [`TimeoutAction::Lock`] when none is stored.
    pub async fn vault_timeout_action(&self, account: &AccountId) -> Result<TimeoutAction> {
        let action = self
            .inner
            .state
            .vault_timeout_action(account)
            .await
            .map_err(|e| LockError::state(account, "vault_timeout_action", e))?;
        Ok(action.unwrap_or_default())
    }

    pub async fn is_pin_lock_set(&self, account: &AccountId) -> Result<PinLockStatus> {
        self.inner.query.is_pin_lock_set(account).await
    }

    pub async fn is_biometric_lock_set(&self, account: &AccountId) -> Result<bool> {
        self.inner.query.is_biometric_lock_set(account).await
    }

    /// When the account's last teardown stopped part-way, if it did.
    pub fn incomplete_teardown_since(&self, account: &AccountId) -> Option<DateTime<Utc>> {
        self.inner.ledger.incomplete_since(account)
    }

    // -- Transitions --------------------------------------------------------

    pub async fn lock(&self, account: &AccountId, allow_soft_lock: bool) -> Result<LockOutcome> {
        self.inner.executor.execute_lock(account, allow_soft_lock).await
    }

    /// Lock the active account.  `None` when no account is active.
    pub async fn lock_active(&self, allow_soft_lock: bool) -> Result<Option<LockOutcome>> {
        match self.inner.registry.active() {
            Some(account) => self.lock(&account, allow_soft_lock).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn log_out(&self, account: &AccountId) -> Result<()> {
        self.inner.executor.execute_log_out(account).await
    }

    /// Record activity for `account` now.
    pub async fn touch(&self, account: &AccountId) -> Result<DateTime<Utc>> {
        self.inner.activity.touch(account).await
    }

    /// Make `account` the active account.
    ///
    /// The search index belongs to the active account, so it is cleared
    /// whenever ownership actually changes.
    pub async fn switch_active_account(&self, account: &AccountId) -> Result<Option<AccountId>> {
        let previous = self.inner.registry.set_active(account)?;
        if previous.as_ref() == Some(account) {
            return Ok(previous);
        }

        self.inner
            .search_index
            .clear_index()
            .await
            .map_err(|e| LockError::SearchIndex {
                reason: e.to_string(),
            })?;

        tracing::info!(
            account_id = %account,
            previous = ?previous.as_ref().map(AccountId::as_str),
            "active account changed"
        );
        let event = Event::ActiveAccountChanged {
            previous: previous.clone(),
            current: Some(account.clone()),
        };
        if let Err(err) = self.inner.bus.publish(event) {
            tracing::warn!(error = %err, "failed to publish active account change");
        }
        Ok(previous)
    }

    // -- Preferences --------------------------------------------------------

    /// Store a new timeout preference, then let the key and token stores
    /// adjust what they persist.
    pub async fn set_timeout_options(
        &self,
        account: &AccountId,
        minutes: Option<i64>,
        action: TimeoutAction,
    ) -> Result<()> {
        let state = &self.inner.state;
        state
            .set_vault_timeout(account, minutes)
            .await
            .map_err(|e| LockError::state(account, "set_vault_timeout", e))?;
        state
            .set_vault_timeout_action(account, action)
            .await
            .map_err(|e| LockError::state(account, "set_vault_timeout_action", e))?;

        let preference = TimeoutPreference::new(minutes, action);
        self.inner
            .keys
            .toggle_key_persistence(account, &preference)
            .await
            .map_err(|e| LockError::key_store(account, "toggle_key_persistence", e))?;
        self.inner
            .tokens
            .toggle_tokens(account, &preference)
            .await
            .map_err(|e| LockError::TokenStore {
                account_id: account.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            account_id = %account,
            minutes = ?minutes,
            action = %action,
            "timeout options updated"
        );
        Ok(())
    }

    /// Reset `everBeenUnlocked` and drop all PIN material.
    pub async fn clear_ephemeral_lock_state(&self, account: &AccountId) -> Result<()> {
        let state = &self.inner.state;
        state
            .set_ever_been_unlocked(account, false)
            .await
            .map_err(|e| LockError::state(account, "set_ever_been_unlocked", e))?;
        state
            .set_decrypted_pin_protected(account, None)
            .await
            .map_err(|e| LockError::state(account, "set_decrypted_pin_protected", e))?;
        state
            .set_protected_pin(account, None)
            .await
            .map_err(|e| LockError::state(account, "set_protected_pin", e))?;

        tracing::debug!(account_id = %account, "ephemeral lock state cleared");
        Ok(())
    }

    // -- Wiring -------------------------------------------------------------

    pub fn register_hook(&self, hook: Arc<dyn LockHook>) -> HookId {
        self.inner.hooks.register(hook)
    }

    pub fn unregister_hook(&self, id: HookId) -> bool {
        self.inner.hooks.unregister(id)
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.inner.registry
    }

    pub fn bus(&self) -> &IpcBus {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.inner.bus.subscribe()
    }

    pub fn settings(&self) -> &TimeoutSettings {
        &self.inner.settings
    }

    pub fn guard(&self) -> AuthGuard {
        AuthGuard::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`VaultTimeoutService`].
///
/// The state store, key store, the three caches and the search index are
/// required.  Everything else has a default.
pub struct VaultTimeoutServiceBuilder {
    state: Option<Arc<dyn StateStore>>,
    keys: Option<Arc<dyn KeyStore>>,
    ciphers: Option<Arc<dyn AccountCache>>,
    folders: Option<Arc<dyn AccountCache>>,
    collections: Option<Arc<dyn AccountCache>>,
    search_index: Option<Arc<dyn SearchIndex>>,
    policies: Arc<dyn PolicySource>,
    tokens: Arc<dyn TokenStore>,
    view: Arc<dyn ViewSignal>,
    clock: Arc<dyn Clock>,
    registry: Option<AccountRegistry>,
    bus: Option<IpcBus>,
    settings: TimeoutSettings,
}

impl Default for VaultTimeoutServiceBuilder {
    fn default() -> Self {
        Self {
            state: None,
            keys: None,
            ciphers: None,
            folders: None,
            collections: None,
            search_index: None,
            policies: Arc::new(NoPolicies),
            tokens: Arc::new(NoTokens),
            view: Arc::new(ViewFlag::default()),
            clock: Arc::new(SystemClock),
            registry: None,
            bus: None,
            settings: TimeoutSettings::default(),
        }
    }
}

impl VaultTimeoutServiceBuilder {
    pub fn state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn keys(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn ciphers(mut self, cache: Arc<dyn AccountCache>) -> Self {
        self.ciphers = Some(cache);
        self
    }

    pub fn folders(mut self, cache: Arc<dyn AccountCache>) -> Self {
        self.folders = Some(cache);
        self
    }

    pub fn collections(mut self, cache: Arc<dyn AccountCache>) -> Self {
        self.collections = Some(cache);
        self
    }

    pub fn search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search_index = Some(index);
        self
    }

    pub fn policies(mut self, policies: Arc<dyn PolicySource>) -> Self {
        self.policies = policies;
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn view(mut self, view: Arc<dyn ViewSignal>) -> Self {
        self.view = view;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing registry.  A fresh one is created otherwise.
    pub fn registry(mut self, registry: AccountRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an existing bus.  A fresh one is created otherwise.
    pub fn bus(mut self, bus: IpcBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn settings(mut self, settings: TimeoutSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<VaultTimeoutService> {
        let state = required(self.state, "state store")?;
        let keys = required(self.keys, "key store")?;
        let caches = VaultCaches {
            ciphers: required(self.ciphers, "cipher cache")?,
            folders: required(self.folders, "folder cache")?,
            collections: required(self.collections, "collection cache")?,
        };
        let search_index = required(self.search_index, "search index")?;
        let registry = self.registry.unwrap_or_default();
        let bus = self.bus.unwrap_or_default();
        let scheduler = Scheduler::new(self.settings.check_interval())?;

        let hooks = Arc::new(HookRegistry::new());
        let ledger = Arc::new(TeardownLedger::new());
        let query = LockStateQuery::new(state.clone(), keys.clone(), ledger.clone());
        let executor = LockExecutor {
            state: state.clone(),
            keys: keys.clone(),
            caches,
            search_index: search_index.clone(),
            registry: registry.clone(),
            bus: bus.clone(),
            hooks: hooks.clone(),
            query: query.clone(),
            ledger: ledger.clone(),
        };

        Ok(VaultTimeoutService {
            inner: Arc::new(Inner {
                activity: ActivityClock::new(self.clock, state.clone()),
                resolver: TimeoutResolver::new(state.clone(), self.policies),
                state,
                keys,
                tokens: self.tokens,
                view: self.view,
                search_index,
                registry,
                bus,
                hooks,
                ledger,
                query,
                executor,
                settings: self.settings,
                scheduler,
                tick_gate: Mutex::new(()),
                inited: AtomicBool::new(false),
            }),
        })
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| LockError::Config {
        reason: format!("vault timeout service requires a {what}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
