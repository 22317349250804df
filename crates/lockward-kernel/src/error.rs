//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.

/// Unified error type for the Lockward kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Scheduler errors ---------------------------------------------------
    /// The scheduler has been shut down and will not run new ticks.
    #[error("scheduler is shut down")]
    SchedulerShutdown,

    /// `start` was called on a scheduler whose worker is already running.
    #[error("scheduler already started")]
    SchedulerAlreadyStarted,

    /// The configured interval cannot drive a ticker.
    #[error("invalid scheduler interval: {reason}")]
    InvalidInterval { reason: String },

    // -- Registry errors ----------------------------------------------------
    /// The requested account is not registered.
    #[error("account not registered: {account_id}")]
    AccountNotFound { account_id: String },

    // -- IPC errors ---------------------------------------------------------
    /// Serializing an event payload failed.
    #[error("event payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
