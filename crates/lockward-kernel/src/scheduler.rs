//! Recurring job scheduler.
//!
//! The scheduler drives a single [`RecurringJob`] on a fixed interval from a
//! background tokio task.  The first run happens immediately on start; later
//! runs follow the interval.
//!
//! # Run model
//!
//! ```text
//! start --> run --> wait(interval) --> run --> wait(interval) --> ...
//!                                                   \-> shutdown --> stopped
//! ```
//!
//! Runs never overlap: the worker awaits each run to completion before it
//! waits for the next tick, and a run that outlasts the interval delays the
//! next one instead of stacking a second run on top of it.  A shutdown
//! request cancels the run in flight at its next suspension point; the job is
//! expected to tolerate being dropped mid-way and to repair any partial work
//! on its next run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Work driven by the [`Scheduler`] once per interval.
#[async_trait]
pub trait RecurringJob: Send + Sync + 'static {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Perform one run.  Errors are logged by the scheduler and never stop
    /// the schedule.
    async fn run(&self) -> std::result::Result<(), String>;
}

/// Snapshot of the scheduler's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Runs that finished (successfully or not).
    pub runs_completed: u64,
    /// Runs that returned an error.
    pub runs_failed: u64,
    /// Runs dropped mid-way by a shutdown request.
    pub runs_cancelled: u64,
    /// When the most recent run finished.
    pub last_run_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval scheduler for one recurring job.
///
/// The scheduler is cheaply cloneable (`Arc`-backed) and safe to share across
/// threads and async tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    interval: Duration,

    /// Wakes the worker when shutdown is requested.
    notify: Notify,

    /// When `true` the worker exits and no new start is accepted.
    shutdown: AtomicBool,

    /// Set once the worker has been spawned.
    started: AtomicBool,

    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    /// Create a scheduler **without** starting the background worker.
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(KernelError::InvalidInterval {
                reason: "interval must be greater than zero".into(),
            });
        }

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                interval,
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
                started: AtomicBool::new(false),
                runs_completed: AtomicU64::new(0),
                runs_failed: AtomicU64::new(0),
                runs_cancelled: AtomicU64::new(0),
                last_run_at: Mutex::new(None),
            }),
        })
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Spawn the background worker driving `job`.
    ///
    /// A scheduler drives at most one worker; a second call fails with
    /// [`KernelError::SchedulerAlreadyStarted`].
    pub fn start(&self, job: Arc<dyn RecurringJob>) -> Result<JoinHandle<()>> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::SchedulerShutdown);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(KernelError::SchedulerAlreadyStarted);
        }

        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            tracing::info!(
                job = job.name(),
                interval_ms = inner.interval.as_millis() as u64,
                "scheduler worker started"
            );
            Self::worker_loop(&inner, job.as_ref()).await;
            tracing::info!(job = job.name(), "scheduler worker stopped");
        }))
    }

    /// Whether the worker has been started.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Request the worker to stop.  A run in flight is cancelled.
    pub fn shutdown(&self) {
        tracing::info!("scheduler shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot the run counters.
    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            runs_completed: self.inner.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.inner.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.inner.runs_cancelled.load(Ordering::Relaxed),
            last_run_at: *self.inner.last_run_at.lock().await,
        }
    }

    // -- Private helpers ----------------------------------------------------

    async fn worker_loop(inner: &SchedulerInner, job: &dyn RecurringJob) {
        let mut ticker = tokio::time::interval(inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick resolves immediately.
            tokio::select! {
                biased;
                _ = inner.notify.notified() => break,
                _ = ticker.tick() => {}
            }

            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            tokio::select! {
                biased;
                _ = inner.notify.notified() => {
                    inner.runs_cancelled.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(job = job.name(), "run cancelled by shutdown");
                    break;
                }
                result = job.run() => {
                    inner.runs_completed.fetch_add(1, Ordering::Relaxed);
                    *inner.last_run_at.lock().await = Some(Utc::now());
                    match result {
                        Ok(()) => tracing::debug!(job = job.name(), "run completed"),
                        Err(err) => {
                            inner.runs_failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(job = job.name(), error = %err, "run failed");
                        }
                    }
                }
            }

            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingJob {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl RecurringJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> std::result::Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".into())
            } else {
                Ok(())
            }
        }
    }

    struct SlowJob {
        started: AtomicU32,
        finished: AtomicU32,
    }

    #[async_trait]
    impl RecurringJob for SlowJob {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self) -> std::result::Result<(), String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting(fail: bool) -> Arc<CountingJob> {
        Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail,
        })
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = Scheduler::new(Duration::ZERO);
        assert!(matches!(result, Err(KernelError::InvalidInterval { .. })));
    }

    #[tokio::test]
    async fn first_run_is_immediate() {
        let scheduler = Scheduler::new(Duration::from_secs(3600)).unwrap();
        let job = counting(false);
        let handle = scheduler.start(job.clone()).expect("start");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        scheduler.shutdown();
        handle.await.expect("worker should exit cleanly");
    }

    #[tokio::test]
    async fn runs_repeat_on_interval() {
        let scheduler = Scheduler::new(Duration::from_millis(20)).unwrap();
        let job = counting(false);
        let handle = scheduler.start(job.clone()).expect("start");

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.shutdown();
        handle.await.expect("worker exit");

        assert!(job.runs.load(Ordering::SeqCst) >= 3);
        let stats = scheduler.stats().await;
        assert!(stats.runs_completed >= 3);
        assert!(stats.last_run_at.is_some());
    }

    #[tokio::test]
    async fn failed_runs_do_not_stop_the_schedule() {
        let scheduler = Scheduler::new(Duration::from_millis(20)).unwrap();
        let job = counting(true);
        let handle = scheduler.start(job.clone()).expect("start");

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.shutdown();
        handle.await.expect("worker exit");

        let stats = scheduler.stats().await;
        assert!(stats.runs_failed >= 2);
        assert_eq!(stats.runs_failed, stats.runs_completed);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let scheduler = Scheduler::new(Duration::from_secs(60)).unwrap();
        let handle = scheduler.start(counting(false)).expect("start");

        let again = scheduler.start(counting(false));
        assert!(matches!(again, Err(KernelError::SchedulerAlreadyStarted)));

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn start_after_shutdown_is_rejected() {
        let scheduler = Scheduler::new(Duration::from_secs(60)).unwrap();
        scheduler.shutdown();
        let result = scheduler.start(counting(false));
        assert!(matches!(result, Err(KernelError::SchedulerShutdown)));
    }

    #[tokio::test]
    async fn shutdown_cancels_run_in_flight() {
        let scheduler = Scheduler::new(Duration::from_millis(10)).unwrap();
        let job = Arc::new(SlowJob {
            started: AtomicU32::new(0),
            finished: AtomicU32::new(0),
        });
        let handle = scheduler.start(job.clone()).expect("start");

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .expect("worker exit");

        // The slow run never overlapped with a second one and never finished.
        assert_eq!(job.started.load(Ordering::SeqCst), 1);
        assert_eq!(job.finished.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().await.runs_cancelled, 1);
    }
}
