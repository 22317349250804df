//! In-memory collaborators for unit tests.
//!
//! Every fake appends the mutations it performs to a shared [`OpLog`] as
//! `"<component>:<operation>:<account>"`, so tests can assert on the exact
//! order of a teardown.  Reads are not logged.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lockward_kernel::{AccountRegistry, IpcBus};

use crate::account::{
    AccountId, ClearScope, KeySuffix, OrgTimeoutPolicy, PolicyKind, SymmetricKey, TimeoutAction,
    TimeoutPreference,
};
use crate::clock::{Clock, ManualClock};
use crate::config::{TimeoutSettings, ViewSuppression};
use crate::hooks::LockHook;
use crate::provider::{
    AccountCache, KeyStore, PolicySource, ProviderResult, SearchIndex, StateStore, TokenStore,
    ViewFlag,
};
use crate::service::VaultTimeoutService;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Operation log
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn push(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Alias used where only mutations are expected.
    pub fn mutations(&self) -> Vec<String> {
        self.entries()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

/// Operations configured to fail, optionally only for one account.
#[derive(Default)]
struct Failures(Mutex<HashSet<(Option<AccountId>, String)>>);

impl Failures {
    fn add(&self, account: Option<&AccountId>, op: &str) {
        lock(&self.0).insert((account.cloned(), op.to_owned()));
    }

    fn clear(&self) {
        lock(&self.0).clear();
    }

    fn check(&self, component: &str, account: &AccountId, op: &str) -> ProviderResult<()> {
        let failures = lock(&self.0);
        if failures.contains(&(None, op.to_owned()))
            || failures.contains(&(Some(account.clone()), op.to_owned()))
        {
            return Err(format!("{component} {op} failed").into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AccountState {
    pub authenticated: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub vault_timeout: Option<i64>,
    pub action: Option<TimeoutAction>,
    pub ever_been_unlocked: bool,
    pub biometric_locked: bool,
    pub biometric_unlock: bool,
    pub protected_pin: Option<String>,
    pub encrypted_pin_protected: Option<String>,
    pub decrypted_pin_protected: Option<SymmetricKey>,
    pub key_connector: bool,
}

#[derive(Default)]
pub(crate) struct FakeState {
    accounts: Mutex<HashMap<AccountId, AccountState>>,
    writes: Mutex<HashMap<(AccountId, &'static str), usize>>,
    failures: Failures,
    log: OpLog,
}

impl FakeState {
    pub fn with_log(log: OpLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Edit state directly, bypassing the log and write counters.
    pub fn seed(&self, account: &AccountId, f: impl FnOnce(&mut AccountState)) {
        f(lock(&self.accounts).entry(account.clone()).or_default());
    }

    pub fn snapshot(&self, account: &AccountId) -> AccountState {
        lock(&self.accounts).get(account).cloned().unwrap_or_default()
    }

    pub fn write_count(&self, account: &AccountId, field: &str) -> usize {
        lock(&self.writes)
            .iter()
            .filter(|((id, f), _)| id == account && *f == field)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn fail_for(&self, account: &AccountId, op: &str) {
        self.failures.add(Some(account), op);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    fn read<T>(
        &self,
        account: &AccountId,
        op: &str,
        f: impl FnOnce(&AccountState) -> T,
    ) -> ProviderResult<T> {
        self.failures.check("state", account, op)?;
        let accounts = lock(&self.accounts);
        let default = AccountState::default();
        Ok(f(accounts.get(account).unwrap_or(&default)))
    }

    fn write(
        &self,
        account: &AccountId,
        op: &str,
        field: &'static str,
        f: impl FnOnce(&mut AccountState),
    ) -> ProviderResult<()> {
        self.failures.check("state", account, op)?;
        f(lock(&self.accounts).entry(account.clone()).or_default());
        *lock(&self.writes).entry((account.clone(), field)).or_default() += 1;
        self.log.push(format!("state:{op}:{account}"));
        Ok(())
    }
}

#[async_trait]
impl StateStore for FakeState {
    async fn is_authenticated(&self, account: &AccountId) -> ProviderResult<bool> {
        self.read(account, "is_authenticated", |s| s.authenticated)
    }

    async fn last_active(&self, account: &AccountId) -> ProviderResult<Option<DateTime<Utc>>> {
        self.read(account, "last_active", |s| s.last_active)
    }

    async fn set_last_active(&self, account: &AccountId, at: DateTime<Utc>) -> ProviderResult<()> {
        self.write(account, "set_last_active", "last_active", |s| {
            s.last_active = Some(at)
        })
    }

    async fn vault_timeout(&self, account: &AccountId) -> ProviderResult<Option<i64>> {
        self.read(account, "vault_timeout", |s| s.vault_timeout)
    }

    async fn set_vault_timeout(
        &self,
        account: &AccountId,
        minutes: Option<i64>,
    ) -> ProviderResult<()> {
        self.write(account, "set_vault_timeout", "vault_timeout", |s| {
            s.vault_timeout = minutes
        })
    }

    async fn vault_timeout_action(
        &self,
        account: &AccountId,
    ) -> ProviderResult<Option<TimeoutAction>> {
        self.read(account, "vault_timeout_action", |s| s.action)
    }

    async fn set_vault_timeout_action(
        &self,
        account: &AccountId,
        action: TimeoutAction,
    ) -> ProviderResult<()> {
        self.write(account, "set_vault_timeout_action", "action", |s| {
            s.action = Some(action)
        })
    }

    async fn ever_been_unlocked(&self, account: &AccountId) -> ProviderResult<bool> {
        self.read(account, "ever_been_unlocked", |s| s.ever_been_unlocked)
    }

    async fn set_ever_been_unlocked(&self, account: &AccountId, value: bool) -> ProviderResult<()> {
        self.write(account, "set_ever_been_unlocked", "ever_been_unlocked", |s| {
            s.ever_been_unlocked = value
        })
    }

    async fn set_biometric_locked(&self, account: &AccountId, value: bool) -> ProviderResult<()> {
        self.write(account, "set_biometric_locked", "biometric_locked", |s| {
            s.biometric_locked = value
        })
    }

    async fn biometric_unlock(&self, account: &AccountId) -> ProviderResult<bool> {
        self.read(account, "biometric_unlock", |s| s.biometric_unlock)
    }

    async fn protected_pin(&self, account: &AccountId) -> ProviderResult<Option<String>> {
        self.read(account, "protected_pin", |s| s.protected_pin.clone())
    }

    async fn set_protected_pin(
        &self,
        account: &AccountId,
        value: Option<String>,
    ) -> ProviderResult<()> {
        self.write(account, "set_protected_pin", "protected_pin", |s| {
            s.protected_pin = value
        })
    }

    async fn encrypted_pin_protected(
        &self,
        account: &AccountId,
    ) -> ProviderResult<Option<String>> {
        self.read(account, "encrypted_pin_protected", |s| {
            s.encrypted_pin_protected.clone()
        })
    }

    async fn set_decrypted_pin_protected(
        &self,
        account: &AccountId,
        value: Option<SymmetricKey>,
    ) -> ProviderResult<()> {
        self.write(
            account,
            "set_decrypted_pin_protected",
            "decrypted_pin_protected",
            |s| s.decrypted_pin_protected = value,
        )
    }

    async fn convert_account_to_key_connector(
        &self,
        account: &AccountId,
    ) -> ProviderResult<bool> {
        self.read(account, "convert_account_to_key_connector", |s| {
            s.key_connector
        })
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct KeySlots {
    pub user_key: Option<SymmetricKey>,
    pub org_keys: Vec<String>,
    pub key_pair: bool,
    pub enc_key: bool,
    pub persisted_org_keys: bool,
    pub persisted_key_pair: bool,
    pub persisted_enc_key: bool,
    /// Readable persisted auto key.
    pub auto: Option<SymmetricKey>,
    /// The store believes an auto key is persisted.
    pub auto_stored: bool,
    pub biometric: Option<SymmetricKey>,
}

impl KeySlots {
    pub fn org_keys_present(&self) -> bool {
        !self.org_keys.is_empty() || self.persisted_org_keys
    }
}

#[derive(Default)]
pub(crate) struct FakeKeys {
    slots: Mutex<HashMap<AccountId, KeySlots>>,
    failures: Failures,
    log: OpLog,
}

impl FakeKeys {
    pub fn with_log(log: OpLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    fn edit(&self, account: &AccountId, f: impl FnOnce(&mut KeySlots)) {
        f(lock(&self.slots).entry(account.clone()).or_default());
    }

    /// Simulate a successful unlock: every key present in memory and every
    /// persistable copy on disk.
    pub fn unlock(&self, account: &AccountId) {
        self.edit(account, |k| {
            k.user_key = Some(SymmetricKey::new(vec![0x11; 64]));
            k.org_keys = vec!["org-1".into()];
            k.key_pair = true;
            k.enc_key = true;
            k.persisted_org_keys = true;
            k.persisted_key_pair = true;
            k.persisted_enc_key = true;
        });
    }

    /// Drop the in-memory user key.
    pub fn lock(&self, account: &AccountId) {
        self.edit(account, |k| k.user_key = None);
    }

    pub fn persist_auto(&self, account: &AccountId) {
        self.edit(account, |k| {
            k.auto = Some(SymmetricKey::new(vec![0x22; 64]));
            k.auto_stored = true;
        });
    }

    /// Keep the "stored" marker but make the key itself unreadable.
    pub fn make_auto_unreadable(&self, account: &AccountId) {
        self.edit(account, |k| k.auto = None);
    }

    pub fn snapshot(&self, account: &AccountId) -> KeySlots {
        lock(&self.slots).get(account).cloned().unwrap_or_default()
    }

    pub fn fail_on(&self, op: &str) {
        self.failures.add(None, op);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    fn clear(
        &self,
        account: &AccountId,
        op: &str,
        scope: ClearScope,
        f: impl FnOnce(&mut KeySlots, bool),
    ) -> ProviderResult<()> {
        self.failures.check("keys", account, op)?;
        let persisted = scope == ClearScope::IncludingPersisted;
        self.edit(account, |k| f(k, persisted));
        let scope = if persisted { "all" } else { "memory" };
        self.log.push(format!("keys:{op}:{scope}:{account}"));
        Ok(())
    }
}

#[async_trait]
impl KeyStore for FakeKeys {
    async fn has_key_stored(
        &self,
        suffix: KeySuffix,
        account: &AccountId,
    ) -> ProviderResult<bool> {
        self.failures.check("keys", account, "has_key_stored")?;
        let slots = self.snapshot(account);
        Ok(match suffix {
            KeySuffix::Auto => slots.auto_stored,
            KeySuffix::Biometric => slots.biometric.is_some(),
        })
    }

    async fn get_key(
        &self,
        suffix: KeySuffix,
        account: &AccountId,
    ) -> ProviderResult<Option<SymmetricKey>> {
        self.failures.check("keys", account, "get_key")?;
        let slots = self.snapshot(account);
        Ok(match suffix {
            KeySuffix::Auto => slots.auto,
            KeySuffix::Biometric => slots.biometric,
        })
    }

    async fn has_key_in_memory(&self, account: &AccountId) -> ProviderResult<bool> {
        self.failures.check("keys", account, "has_key_in_memory")?;
        Ok(self.snapshot(account).user_key.is_some())
    }

    async fn clear_key(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        self.clear(account, "clear_key", scope, |k, persisted| {
            k.user_key = None;
            if persisted {
                k.auto = None;
                k.auto_stored = false;
                k.biometric = None;
            }
        })
    }

    async fn clear_org_keys(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        self.clear(account, "clear_org_keys", scope, |k, persisted| {
            k.org_keys.clear();
            if persisted {
                k.persisted_org_keys = false;
            }
        })
    }

    async fn clear_key_pair(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        self.clear(account, "clear_key_pair", scope, |k, persisted| {
            k.key_pair = false;
            if persisted {
                k.persisted_key_pair = false;
            }
        })
    }

    async fn clear_enc_key(&self, account: &AccountId, scope: ClearScope) -> ProviderResult<()> {
        self.clear(account, "clear_enc_key", scope, |k, persisted| {
            k.enc_key = false;
            if persisted {
                k.persisted_enc_key = false;
            }
        })
    }

    async fn toggle_key_persistence(
        &self,
        account: &AccountId,
        preference: &TimeoutPreference,
    ) -> ProviderResult<()> {
        self.failures.check("keys", account, "toggle_key_persistence")?;
        let keep_auto = preference.action == TimeoutAction::Lock && preference.is_never();
        self.edit(account, |k| {
            if keep_auto {
                k.auto = k.user_key.clone();
                k.auto_stored = k.auto.is_some();
            } else {
                k.auto = None;
                k.auto_stored = false;
            }
        });
        self.log
            .push(format!("keys:toggle_key_persistence:{account}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Caches and index
// ---------------------------------------------------------------------------

pub(crate) struct FakeCache {
    name: &'static str,
    filled: Mutex<HashSet<AccountId>>,
    clears: Mutex<HashMap<AccountId, usize>>,
    delay: Mutex<Option<std::time::Duration>>,
    fail: AtomicBool,
    log: OpLog,
}

impl FakeCache {
    pub fn new(name: &'static str, log: OpLog) -> Self {
        Self {
            name,
            filled: Mutex::default(),
            clears: Mutex::default(),
            delay: Mutex::default(),
            fail: AtomicBool::new(false),
            log,
        }
    }

    pub fn fill(&self, account: &AccountId) {
        lock(&self.filled).insert(account.clone());
    }

    pub fn holds(&self, account: &AccountId) -> bool {
        lock(&self.filled).contains(account)
    }

    pub fn clear_count(&self, account: &AccountId) -> usize {
        lock(&self.clears).get(account).copied().unwrap_or(0)
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountCache for FakeCache {
    fn name(&self) -> &str {
        self.name
    }

    async fn clear_cache(&self, account: &AccountId) -> ProviderResult<()> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(format!("{} cache unavailable", self.name).into());
        }
        lock(&self.filled).remove(account);
        *lock(&self.clears).entry(account.clone()).or_default() += 1;
        self.log
            .push(format!("cache:{}:clear:{account}", self.name));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeIndex {
    clears: AtomicUsize,
    log: OpLog,
}

impl FakeIndex {
    pub fn with_log(log: OpLog) -> Self {
        Self {
            clears: AtomicUsize::new(0),
            log,
        }
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for FakeIndex {
    async fn clear_index(&self) -> ProviderResult<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.log.push("index:clear");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Policies and tokens
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakePolicies {
    policies: Mutex<HashMap<AccountId, OrgTimeoutPolicy>>,
}

impl FakePolicies {
    pub fn set(&self, account: &AccountId, policy: OrgTimeoutPolicy) {
        lock(&self.policies).insert(account.clone(), policy);
    }
}

#[async_trait]
impl PolicySource for FakePolicies {
    async fn policy_applies(&self, _: PolicyKind, account: &AccountId) -> ProviderResult<bool> {
        Ok(lock(&self.policies).contains_key(account))
    }

    async fn policy_data(
        &self,
        _: PolicyKind,
        account: &AccountId,
    ) -> ProviderResult<Option<OrgTimeoutPolicy>> {
        Ok(lock(&self.policies).get(account).copied())
    }
}

#[derive(Default)]
pub(crate) struct FakeTokens {
    last: Mutex<HashMap<AccountId, TimeoutPreference>>,
    log: OpLog,
}

impl FakeTokens {
    pub fn with_log(log: OpLog) -> Self {
        Self {
            last: Mutex::default(),
            log,
        }
    }

    pub fn last_preference(&self, account: &AccountId) -> Option<TimeoutPreference> {
        lock(&self.last).get(account).copied()
    }
}

#[async_trait]
impl TokenStore for FakeTokens {
    async fn toggle_tokens(
        &self,
        account: &AccountId,
        preference: &TimeoutPreference,
    ) -> ProviderResult<()> {
        lock(&self.last).insert(account.clone(), *preference);
        self.log.push(format!("tokens:toggle_tokens:{account}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

pub(crate) struct RecordingHook {
    name: String,
    log: OpLog,
    fail: bool,
}

impl RecordingHook {
    pub fn new(name: &str, log: OpLog) -> Self {
        Self {
            name: name.to_owned(),
            log,
            fail: false,
        }
    }

    pub fn failing(name: &str, log: OpLog) -> Self {
        Self {
            fail: true,
            ..Self::new(name, log)
        }
    }

    fn record(&self, what: &str, account: &AccountId) -> ProviderResult<()> {
        self.log
            .push(format!("hook:{}:{what}:{account}", self.name));
        if self.fail {
            return Err(format!("{} hook refused", self.name).into());
        }
        Ok(())
    }
}

#[async_trait]
impl LockHook for RecordingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_locked(&self, account: &AccountId) -> ProviderResult<()> {
        self.record("locked", account)
    }

    async fn on_logged_out(&self, account: &AccountId) -> ProviderResult<()> {
        self.record("logged_out", account)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A fully wired service over fakes and a manual clock.
pub(crate) struct Harness {
    pub log: OpLog,
    pub clock: Arc<ManualClock>,
    pub state: Arc<FakeState>,
    pub keys: Arc<FakeKeys>,
    pub ciphers: Arc<FakeCache>,
    pub folders: Arc<FakeCache>,
    pub collections: Arc<FakeCache>,
    pub index: Arc<FakeIndex>,
    pub policies: Arc<FakePolicies>,
    pub tokens: Arc<FakeTokens>,
    pub view: Arc<ViewFlag>,
    pub registry: AccountRegistry,
    pub bus: IpcBus,
    pub service: VaultTimeoutService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_suppression(ViewSuppression::Global)
    }

    pub fn with_suppression(view_suppression: ViewSuppression) -> Self {
        let log = OpLog::default();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = Arc::new(FakeState::with_log(log.clone()));
        let keys = Arc::new(FakeKeys::with_log(log.clone()));
        let ciphers = Arc::new(FakeCache::new("ciphers", log.clone()));
        let folders = Arc::new(FakeCache::new("folders", log.clone()));
        let collections = Arc::new(FakeCache::new("collections", log.clone()));
        let index = Arc::new(FakeIndex::with_log(log.clone()));
        let policies = Arc::new(FakePolicies::default());
        let tokens = Arc::new(FakeTokens::with_log(log.clone()));
        let view = Arc::new(ViewFlag::default());
        let registry = AccountRegistry::new();
        let bus = IpcBus::new(64);

        let service = VaultTimeoutService::builder()
            .state(state.clone())
            .keys(keys.clone())
            .ciphers(ciphers.clone())
            .folders(folders.clone())
            .collections(collections.clone())
            .search_index(index.clone())
            .policies(policies.clone())
            .tokens(tokens.clone())
            .view(view.clone())
            .clock(clock.clone())
            .registry(registry.clone())
            .bus(bus.clone())
            .settings(TimeoutSettings {
                view_suppression,
                ..TimeoutSettings::default()
            })
            .build()
            .expect("harness wiring is complete");

        Self {
            log,
            clock,
            state,
            keys,
            ciphers,
            folders,
            collections,
            index,
            policies,
            tokens,
            view,
            registry,
            bus,
            service,
        }
    }

    /// Register an authenticated, unlocked account idle for `idle`, with
    /// data in every cache.
    pub fn add_unlocked(
        &self,
        id: &str,
        minutes: Option<i64>,
        action: Option<TimeoutAction>,
        idle: chrono::Duration,
    ) -> AccountId {
        let account = AccountId::from(id);
        self.registry.register(account.clone(), None);

        let last_active = self.clock.now() - idle;
        self.state.seed(&account, |s| {
            s.authenticated = true;
            s.vault_timeout = minutes;
            s.action = action;
            s.last_active = Some(last_active);
        });
        self.keys.unlock(&account);
        for cache in [&self.ciphers, &self.folders, &self.collections] {
            cache.fill(&account);
        }
        account
    }
}
