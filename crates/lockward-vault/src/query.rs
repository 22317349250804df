//! Lock-state queries.
//!
//! "Locked" is not the same as "timed out".  A device may hold a persisted
//! auto key that keeps an account openable without any key in memory; until
//! the account completes its first real lock that persisted key counts as
//! proof of being unlocked.

use std::sync::Arc;

use crate::account::{AccountId, KeySuffix, PinLockStatus};
use crate::error::{LockError, Result};
use crate::executor::TeardownLedger;
use crate::provider::{KeyStore, StateStore};

/// Read-only lock-state answers for one account at a time.
#[derive(Clone)]
pub struct LockStateQuery {
    state: Arc<dyn StateStore>,
    keys: Arc<dyn KeyStore>,
    ledger: Arc<TeardownLedger>,
}

impl LockStateQuery {
    pub fn new(
        state: Arc<dyn StateStore>,
        keys: Arc<dyn KeyStore>,
        ledger: Arc<TeardownLedger>,
    ) -> Self {
        Self {
            state,
            keys,
            ledger,
        }
    }

    /// Whether `account` is locked.
    ///
    /// An account whose last teardown stopped part-way is reported as
    /// unlocked so that it gets torn down again.
    pub async fn is_locked(&self, account: &AccountId) -> Result<bool> {
        if self.ledger.is_incomplete(account) {
            return Ok(false);
        }

        if self.never_lock(account).await? {
            let auto_key = self
                .keys
                .get_key(KeySuffix::Auto, account)
                .await
                .map_err(|e| LockError::key_store(account, "get_key", e))?;
            return Ok(auto_key.is_none());
        }

        let in_memory = self
            .keys
            .has_key_in_memory(account)
            .await
            .map_err(|e| LockError::key_store(account, "has_key_in_memory", e))?;
        Ok(!in_memory)
    }

    /// A persisted auto key exists and the account never completed a lock.
    async fn never_lock(&self, account: &AccountId) -> Result<bool> {
        let auto_stored = self
            .keys
            .has_key_stored(KeySuffix::Auto, account)
            .await
            .map_err(|e| LockError::key_store(account, "has_key_stored", e))?;
        if !auto_stored {
            return Ok(false);
        }

        let ever_been_unlocked = self
            .state
            .ever_been_unlocked(account)
            .await
            .map_err(|e| LockError::state(account, "ever_been_unlocked", e))?;
        Ok(!ever_been_unlocked)
    }

    pub async fn is_pin_lock_set(&self, account: &AccountId) -> Result<PinLockStatus> {
        let protected_pin = self
            .state
            .protected_pin(account)
            .await
            .map_err(|e| LockError::state(account, "protected_pin", e))?;
        let pin_protected_key = self
            .state
            .encrypted_pin_protected(account)
            .await
            .map_err(|e| LockError::state(account, "encrypted_pin_protected", e))?;

        Ok(PinLockStatus {
            protected_pin: protected_pin.is_some(),
            pin_protected_key: pin_protected_key.is_some(),
        })
    }

    pub async fn is_biometric_lock_set(&self, account: &AccountId) -> Result<bool> {
        self.state
            .biometric_unlock(account)
            .await
            .map_err(|e| LockError::state(account, "biometric_unlock", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::SymmetricKey;
    use crate::testing::{FakeKeys, FakeState};

    fn query(state: &Arc<FakeState>, keys: &Arc<FakeKeys>) -> LockStateQuery {
        LockStateQuery::new(state.clone(), keys.clone(), Arc::new(TeardownLedger::new()))
    }

    #[tokio::test]
    async fn no_key_in_memory_is_locked() {
        let state = Arc::new(FakeState::default());
        let keys = Arc::new(FakeKeys::default());
        let alice = AccountId::from("alice");

        assert!(query(&state, &keys).is_locked(&alice).await.unwrap());

        keys.unlock(&alice);
        assert!(!query(&state, &keys).is_locked(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn persisted_auto_key_counts_as_unlocked_before_first_lock() {
        let state = Arc::new(FakeState::default());
        let keys = Arc::new(FakeKeys::default());
        let alice = AccountId::from("alice");
        keys.persist_auto(&alice);
        let q = query(&state, &keys);

        // No key in memory, but the persisted auto key is retrievable.
        assert!(!q.is_locked(&alice).await.unwrap());

        // Stored flag stays but the key itself can no longer be read.
        keys.make_auto_unreadable(&alice);
        assert!(q.is_locked(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn auto_key_is_ignored_after_first_lock() {
        let state = Arc::new(FakeState::default());
        let keys = Arc::new(FakeKeys::default());
        let alice = AccountId::from("alice");
        keys.persist_auto(&alice);
        state.seed(&alice, |s| s.ever_been_unlocked = true);

        assert!(query(&state, &keys).is_locked(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn pin_status_reports_both_halves() {
        let state = Arc::new(FakeState::default());
        let keys = Arc::new(FakeKeys::default());
        let alice = AccountId::from("alice");
        state.seed(&alice, |s| {
            s.protected_pin = Some("2.pin".into());
            s.decrypted_pin_protected = Some(SymmetricKey::new(vec![1; 32]));
        });

        let status = query(&state, &keys).is_pin_lock_set(&alice).await.unwrap();
        assert_eq!(
            status,
            PinLockStatus {
                protected_pin: true,
                pin_protected_key: false
            }
        );
    }

    #[tokio::test]
    async fn biometric_lock_reflects_preference() {
        let state = Arc::new(FakeState::default());
        let keys = Arc::new(FakeKeys::default());
        let alice = AccountId::from("alice");
        let q = query(&state, &keys);

        assert!(!q.is_biometric_lock_set(&alice).await.unwrap());
        state.seed(&alice, |s| s.biometric_unlock = true);
        assert!(q.is_biometric_lock_set(&alice).await.unwrap());
    }
}
