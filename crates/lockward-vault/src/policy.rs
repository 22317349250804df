//! Timeout policy resolution.
//!
//! An account's effective timeout is its stored preference, clamped by the
//! organization's `MaximumVaultTimeout` policy when one applies.
//!
//! # Resolution
//!
//! 1. No policy applies: the stored value is returned untouched (absent
//!    stays absent, negative sentinels stay negative).
//! 2. A policy applies: `min(stored, max)`, falling back to `max` when the
//!    stored value is absent or the minimum is negative.
//! 3. If the clamped value differs from the stored one it is written back,
//!    so every other reader of the stored preference sees the clamped value.

use std::sync::Arc;

use crate::account::{AccountId, PolicyKind};
use crate::error::{LockError, Result};
use crate::provider::{PolicySource, StateStore};

/// Clamp a stored timeout to an organization maximum.
///
/// Negative stored values ("never", "on restart") are not allowed under a
/// policy and resolve to the maximum.
pub fn clamp_timeout(stored: Option<i64>, max_minutes: i64) -> i64 {
    match stored {
        Some(minutes) => {
            let candidate = minutes.min(max_minutes);
            if candidate < 0 { max_minutes } else { candidate }
        }
        None => max_minutes,
    }
}

/// Resolves effective timeouts, persisting policy clamps.
#[derive(Clone)]
pub struct TimeoutResolver {
    state: Arc<dyn StateStore>,
    policies: Arc<dyn PolicySource>,
}

impl TimeoutResolver {
    pub fn new(state: Arc<dyn StateStore>, policies: Arc<dyn PolicySource>) -> Self {
        Self { state, policies }
    }

    /// Effective timeout in minutes for `account`.
    ///
    /// `None` or a negative value means the account never times out.
    pub async fn resolve(&self, account: &AccountId) -> Result<Option<i64>> {
        let stored = self
            .state
            .vault_timeout(account)
            .await
            .map_err(|e| LockError::state(account, "vault_timeout", e))?;

        let kind = PolicyKind::MaximumVaultTimeout;
        let applies = self
            .policies
            .policy_applies(kind, account)
            .await
            .map_err(|e| LockError::policy(account, e))?;
        if !applies {
            return Ok(stored);
        }

        let Some(policy) = self
            .policies
            .policy_data(kind, account)
            .await
            .map_err(|e| LockError::policy(account, e))?
        else {
            tracing::warn!(
                account_id = %account,
                policy = kind.as_str(),
                "policy applies but carries no data, using stored timeout"
            );
            return Ok(stored);
        };

        let effective = clamp_timeout(stored, policy.max_minutes);

        if stored != Some(effective) {
            self.state
                .set_vault_timeout(account, Some(effective))
                .await
                .map_err(|e| LockError::state(account, "set_vault_timeout", e))?;
            tracing::info!(
                account_id = %account,
                stored = ?stored,
                effective,
                "vault timeout clamped by organization policy"
            );
        }

        Ok(Some(effective))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::OrgTimeoutPolicy;
    use crate::testing::{FakePolicies, FakeState};

    #[test]
    fn clamp_takes_minimum_of_non_negative() {
        for t in [0, 1, 5, 10, 11, 30, 10_000] {
            for m in [1, 10, 60] {
                assert_eq!(clamp_timeout(Some(t), m), t.min(m), "t={t} m={m}");
            }
        }
    }

    #[test]
    fn clamp_replaces_negative_and_absent_with_max() {
        assert_eq!(clamp_timeout(Some(-1), 10), 10);
        assert_eq!(clamp_timeout(Some(-2), 10), 10);
        assert_eq!(clamp_timeout(None, 10), 10);
    }

    fn resolver(state: &Arc<FakeState>, policies: &Arc<FakePolicies>) -> TimeoutResolver {
        TimeoutResolver::new(state.clone(), policies.clone())
    }

    #[tokio::test]
    async fn without_policy_stored_value_is_returned() {
        let state = Arc::new(FakeState::default());
        let policies = Arc::new(FakePolicies::default());
        let alice = AccountId::from("alice");
        state.seed(&alice, |s| s.vault_timeout = Some(30));

        let resolved = resolver(&state, &policies).resolve(&alice).await.unwrap();
        assert_eq!(resolved, Some(30));
    }

    #[tokio::test]
    async fn without_policy_absent_and_negative_pass_through() {
        let state = Arc::new(FakeState::default());
        let policies = Arc::new(FakePolicies::default());
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        state.seed(&bob, |s| s.vault_timeout = Some(-1));

        let r = resolver(&state, &policies);
        assert_eq!(r.resolve(&alice).await.unwrap(), None);
        assert_eq!(r.resolve(&bob).await.unwrap(), Some(-1));
    }

    #[tokio::test]
    async fn policy_clamps_and_persists() {
        let state = Arc::new(FakeState::default());
        let policies = Arc::new(FakePolicies::default());
        let alice = AccountId::from("alice");
        state.seed(&alice, |s| s.vault_timeout = Some(30));
        policies.set(&alice, OrgTimeoutPolicy { max_minutes: 10 });

        let resolved = resolver(&state, &policies).resolve(&alice).await.unwrap();
        assert_eq!(resolved, Some(10));
        assert_eq!(state.snapshot(&alice).vault_timeout, Some(10));
    }

    #[tokio::test]
    async fn policy_replaces_never_with_max() {
        let state = Arc::new(FakeState::default());
        let policies = Arc::new(FakePolicies::default());
        let alice = AccountId::from("alice");
        state.seed(&alice, |s| s.vault_timeout = Some(-1));
        policies.set(&alice, OrgTimeoutPolicy { max_minutes: 60 });

        let resolved = resolver(&state, &policies).resolve(&alice).await.unwrap();
        assert_eq!(resolved, Some(60));
        assert_eq!(state.snapshot(&alice).vault_timeout, Some(60));
    }

    #[tokio::test]
    async fn compliant_value_is_not_rewritten() {
        let state = Arc::new(FakeState::default());
        let policies = Arc::new(FakePolicies::default());
        let alice = AccountId::from("alice");
        state.seed(&alice, |s| s.vault_timeout = Some(5));
        policies.set(&alice, OrgTimeoutPolicy { max_minutes: 10 });

        let resolved = resolver(&state, &policies).resolve(&alice).await.unwrap();
        assert_eq!(resolved, Some(5));
        assert_eq!(state.write_count(&alice, "vault_timeout"), 0);
    }

    #[tokio::test]
    async fn policy_is_looked_up_per_account() {
        let state = Arc::new(FakeState::default());
        let policies = Arc::new(FakePolicies::default());
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        state.seed(&alice, |s| s.vault_timeout = Some(30));
        state.seed(&bob, |s| s.vault_timeout = Some(30));
        policies.set(&alice, OrgTimeoutPolicy { max_minutes: 10 });

        let r = resolver(&state, &policies);
        assert_eq!(r.resolve(&alice).await.unwrap(), Some(10));
        assert_eq!(r.resolve(&bob).await.unwrap(), Some(30));
    }
}
