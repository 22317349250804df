//! Lockward kernel.
//!
//! This crate provides the process-level services the vault lock core is
//! built on:
//!
//! - **[`ipc`]** -- Publish/subscribe event bus backed by
//!   [`tokio::sync::broadcast`]; carries `locked`, `lockedUrl`,
//!   `authBlocked` and friends to outer layers.
//! - **[`registry`]** -- Concurrent account registry using [`DashMap`], with
//!   explicit ownership of the active account.
//! - **[`scheduler`]** -- Fixed-interval driver for a single recurring job,
//!   with serialized runs and cancellation on shutdown.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.
//!
//! [`DashMap`]: dashmap::DashMap

pub mod error;
pub mod ipc;
pub mod registry;
pub mod scheduler;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{KernelError, Result};
pub use ipc::{Event, IpcBus};
pub use registry::{AccountEntry, AccountId, AccountRegistry};
pub use scheduler::{RecurringJob, Scheduler, SchedulerStats};
