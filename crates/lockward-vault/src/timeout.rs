//! Timeout evaluation.
//!
//! One *tick* walks every registered account and locks or logs out those
//! whose inactivity timeout has elapsed.  Accounts are evaluated one after
//! another and independently: a skip or a failure for one account never stops
//! evaluation of the rest.  Ticks are serialized; a tick that starts while
//! another is running waits for it.
//!
//! [`TimeoutCheck`] adapts the tick to the kernel's [`RecurringJob`] so the
//! [`Scheduler`](lockward_kernel::Scheduler) can drive it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lockward_kernel::RecurringJob;
use serde::Serialize;

use crate::account::{AccountId, LockOutcome, TimeoutAction};
use crate::clock::is_expired;
use crate::config::ViewSuppression;
use crate::error::Result;
use crate::service::VaultTimeoutService;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Why an account was left alone during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotAuthenticated,
    Locked,
    /// No timeout is stored and no policy supplies one.
    NoTimeout,
    /// A negative sentinel such as "never" or "on restart".
    NeverTimesOut,
    NoActivityRecorded,
    NotExpired,
    ViewOpen,
    TeardownInProgress,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::Locked => "locked",
            Self::NoTimeout => "no_timeout",
            Self::NeverTimesOut => "never_times_out",
            Self::NoActivityRecorded => "no_activity_recorded",
            Self::NotExpired => "not_expired",
            Self::ViewOpen => "view_open",
            Self::TeardownInProgress => "teardown_in_progress",
        }
    }
}

/// What a tick did with one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum AccountOutcome {
    Locked,
    LoggedOut,
    Skipped(SkipReason),
    Failed(String),
}

/// Summary of one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    /// The whole tick was skipped because a vault view is open.
    pub suppressed: bool,
    pub outcomes: Vec<(AccountId, AccountOutcome)>,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            suppressed: false,
            outcomes: Vec::new(),
        }
    }

    pub fn outcome_for(&self, account: &AccountId) -> Option<&AccountOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == account)
            .map(|(_, outcome)| outcome)
    }

    pub fn locked(&self) -> Vec<&AccountId> {
        self.matching(|o| matches!(o, AccountOutcome::Locked))
    }

    pub fn logged_out(&self) -> Vec<&AccountId> {
        self.matching(|o| matches!(o, AccountOutcome::LoggedOut))
    }

    pub fn failed(&self) -> Vec<&AccountId> {
        self.matching(|o| matches!(o, AccountOutcome::Failed(_)))
    }

    fn matching(&self, pred: impl Fn(&AccountOutcome) -> bool) -> Vec<&AccountId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(id, _)| id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl VaultTimeoutService {
    /// Run one timeout check over every registered account.
    pub async fn check_vault_timeout(&self) -> TickReport {
        let _tick = self.inner.tick_gate.lock().await;
        let mut report = TickReport::new(self.inner.activity.now());

        let suppression = self.inner.settings.view_suppression;
        let view_open = match suppression {
            ViewSuppression::Disabled => false,
            _ => self.inner.view.is_view_open().await,
        };

        if view_open && suppression == ViewSuppression::Global {
            tracing::debug!("vault view open, skipping timeout check");
            report.suppressed = true;
            return report;
        }

        let active = self.inner.registry.active();
        for account in self.inner.registry.list_ids() {
            let protected = view_open && active.as_ref() == Some(&account);
            let outcome = match self.evaluate_account(&account, protected).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(account_id = %account, error = %err, "timeout check failed");
                    AccountOutcome::Failed(err.to_string())
                }
            };
            if let AccountOutcome::Skipped(reason) = &outcome {
                tracing::debug!(account_id = %account, reason = reason.as_str(), "account skipped");
            }
            report.outcomes.push((account, outcome));
        }

        tracing::debug!(
            accounts = report.outcomes.len(),
            locked = report.locked().len(),
            logged_out = report.logged_out().len(),
            failed = report.failed().len(),
            "timeout check complete"
        );
        report
    }

    async fn evaluate_account(
        &self,
        account: &AccountId,
        view_protected: bool,
    ) -> Result<AccountOutcome> {
        use AccountOutcome::Skipped;

        if !self.is_authenticated(account).await? {
            return Ok(Skipped(SkipReason::NotAuthenticated));
        }
        if view_protected {
            return Ok(Skipped(SkipReason::ViewOpen));
        }
        if self.inner.ledger.is_in_flight(account) {
            return Ok(Skipped(SkipReason::TeardownInProgress));
        }
        if self.is_locked(account).await? {
            return Ok(Skipped(SkipReason::Locked));
        }

        let minutes = match self.get_vault_timeout(account).await? {
            None => return Ok(Skipped(SkipReason::NoTimeout)),
            Some(m) if m < 0 => return Ok(Skipped(SkipReason::NeverTimesOut)),
            Some(m) => m,
        };

        let Some(idle) = self.inner.activity.idle_for(account).await? else {
            return Ok(Skipped(SkipReason::NoActivityRecorded));
        };
        if !is_expired(idle, minutes) {
            return Ok(Skipped(SkipReason::NotExpired));
        }

        match self.vault_timeout_action(account).await? {
            TimeoutAction::LogOut => {
                self.log_out(account).await?;
                Ok(AccountOutcome::LoggedOut)
            }
            TimeoutAction::Lock => Ok(match self.lock(account, true).await? {
                LockOutcome::Locked => AccountOutcome::Locked,
                LockOutcome::NotAuthenticated => Skipped(SkipReason::NotAuthenticated),
                LockOutcome::AlreadyLocked => Skipped(SkipReason::Locked),
                LockOutcome::InProgress => Skipped(SkipReason::TeardownInProgress),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Recurring job
// ---------------------------------------------------------------------------

/// Drives [`VaultTimeoutService::check_vault_timeout`] from the scheduler.
pub struct TimeoutCheck {
    service: VaultTimeoutService,
}

impl TimeoutCheck {
    pub fn new(service: VaultTimeoutService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RecurringJob for TimeoutCheck {
    fn name(&self) -> &str {
        "vault-timeout-check"
    }

    async fn run(&self) -> std::result::Result<(), String> {
        let report = self.service.check_vault_timeout().await;
        let failed = report.failed();
        if failed.is_empty() {
            Ok(())
        } else {
            let ids: Vec<&str> = failed.iter().map(|id| id.as_str()).collect();
            Err(format!("timeout check failed for: {}", ids.join(", ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
