//! Lock and logout observers.
//!
//! Hosts register [`LockHook`]s to react once a lock teardown has committed
//! or once a logout is requested.  Hooks run in registration order.  A
//! failing hook does not stop the ones after it; the first failure is
//! returned to the caller once every hook has run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::account::AccountId;
use crate::error::{LockError, Result};
use crate::provider::ProviderResult;

/// Observer of lock transitions.
#[async_trait]
pub trait LockHook: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &str;

    /// Called after `account`'s lock teardown committed.
    async fn on_locked(&self, _account: &AccountId) -> ProviderResult<()> {
        Ok(())
    }

    /// Called when `account` is to be logged out.  The host performs the
    /// actual session teardown here.
    async fn on_logged_out(&self, _account: &AccountId) -> ProviderResult<()> {
        Ok(())
    }
}

/// Handle returned by [`HookRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

#[derive(Clone, Copy)]
enum Notification {
    Locked,
    LoggedOut,
}

impl Notification {
    fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// Ordered set of registered hooks.
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    hooks: RwLock<BTreeMap<HookId, Arc<dyn LockHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn LockHook>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(hook = hook.name(), "lock hook registered");
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, hook);
        id
    }

    /// Returns `true` if a hook was removed.
    pub fn unregister(&self, id: HookId) -> bool {
        let removed = self
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(hook) = &removed {
            tracing::debug!(hook = hook.name(), "lock hook unregistered");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn notify_locked(&self, account: &AccountId) -> Result<()> {
        self.notify(Notification::Locked, account).await
    }

    pub async fn notify_logged_out(&self, account: &AccountId) -> Result<()> {
        self.notify(Notification::LoggedOut, account).await
    }

    async fn notify(&self, notification: Notification, account: &AccountId) -> Result<()> {
        // Snapshot so no lock is held across the awaits below.
        let hooks: Vec<Arc<dyn LockHook>> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut first_failure = None;
        for hook in hooks {
            let result = match notification {
                Notification::Locked => hook.on_locked(account).await,
                Notification::LoggedOut => hook.on_logged_out(account).await,
            };

            if let Err(err) = result {
                tracing::warn!(
                    hook = hook.name(),
                    notification = notification.as_str(),
                    account_id = %account,
                    error = %err,
                    "lock hook failed"
                );
                first_failure.get_or_insert(LockError::Hook {
                    hook: hook.name().to_owned(),
                    account_id: account.to_string(),
                    reason: err.to_string(),
                });
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OpLog, RecordingHook};

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let log = OpLog::default();
        let registry = HookRegistry::new();
        registry.register(Arc::new(RecordingHook::new("first", log.clone())));
        registry.register(Arc::new(RecordingHook::new("second", log.clone())));

        registry
            .notify_locked(&AccountId::from("alice"))
            .await
            .unwrap();

        assert_eq!(
            log.entries(),
            vec!["hook:first:locked:alice", "hook:second:locked:alice"]
        );
    }

    #[tokio::test]
    async fn unregistered_hook_is_not_called() {
        let log = OpLog::default();
        let registry = HookRegistry::new();
        let id = registry.register(Arc::new(RecordingHook::new("gone", log.clone())));
        registry.register(Arc::new(RecordingHook::new("kept", log.clone())));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.len(), 1);

        registry
            .notify_logged_out(&AccountId::from("bob"))
            .await
            .unwrap();
        assert_eq!(log.entries(), vec!["hook:kept:logged_out:bob"]);
    }

    #[tokio::test]
    async fn failure_is_reported_after_all_hooks_ran() {
        let log = OpLog::default();
        let registry = HookRegistry::new();
        registry.register(Arc::new(RecordingHook::failing("broken", log.clone())));
        registry.register(Arc::new(RecordingHook::new("after", log.clone())));

        let err = registry
            .notify_locked(&AccountId::from("alice"))
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::Hook { ref hook, .. } if hook == "broken"));
        assert_eq!(
            log.entries(),
            vec!["hook:broken:locked:alice", "hook:after:locked:alice"]
        );
    }

    #[tokio::test]
    async fn empty_registry_is_ok() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
        registry
            .notify_locked(&AccountId::from("alice"))
            .await
            .unwrap();
    }
}
