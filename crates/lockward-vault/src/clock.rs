//! Activity clock.
//!
//! Answers "how long has this account been idle" from the persisted
//! last-activity timestamp and the current time.  The time source is a
//! [`Clock`] so tests can move time by hand.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::account::AccountId;
use crate::error::{LockError, Result};
use crate::provider::StateStore;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `true` once `idle` reaches `timeout_minutes`.
///
/// Compared at millisecond resolution, so an account idle for exactly its
/// timeout is expired.
pub fn is_expired(idle: Duration, timeout_minutes: i64) -> bool {
    idle.num_milliseconds() >= timeout_minutes.saturating_mul(60_000)
}

/// Reads idle time per account.
#[derive(Clone)]
pub struct ActivityClock {
    clock: Arc<dyn Clock>,
    state: Arc<dyn StateStore>,
}

impl ActivityClock {
    pub fn new(clock: Arc<dyn Clock>, state: Arc<dyn StateStore>) -> Self {
        Self { clock, state }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Time since the account's last recorded activity, or `None` when no
    /// activity has ever been recorded.
    pub async fn idle_for(&self, account: &AccountId) -> Result<Option<Duration>> {
        let last_active = self
            .state
            .last_active(account)
            .await
            .map_err(|e| LockError::state(account, "last_active", e))?;

        Ok(last_active.map(|at| self.clock.now() - at))
    }

    /// Record activity for `account` at the current time.
    pub async fn touch(&self, account: &AccountId) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        self.state
            .set_last_active(account, now)
            .await
            .map_err(|e| LockError::state(account, "set_last_active", e))?;
        tracing::trace!(account_id = %account, "activity recorded");
        Ok(now)
    }
}
