//! In-process event bus.
//!
//! The bus provides a lightweight publish/subscribe mechanism built on top of
//! [`tokio::sync::broadcast`].  The vault core announces lock transitions
//! through it, and outer layers (route guards, UIs) subscribe to redirect or
//! redraw.
//!
//! Events are wrapped in [`Arc`] so that broadcasting to multiple subscribers
//! does not require cloning the payload.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use lockward_kernel::ipc::{IpcBus, Event};
//! # use lockward_kernel::AccountId;
//! # async fn example() {
//! let bus = IpcBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Event::locked(AccountId::from("alice"), true)).unwrap();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.name(), "locked");
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::registry::AccountId;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An event that flows through the bus.
///
/// Every variant carries enough context for subscribers to filter and dispatch
/// without needing to parse opaque blobs.  [`Event::name`] returns the stable
/// wire name subscribers match on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// An account's vault finished its lock teardown.
    Locked {
        /// The account that was locked.
        account_id: AccountId,
        /// `true` when the lock was timeout-triggered rather than requested
        /// by the user.
        soft: bool,
        /// When the teardown completed.
        timestamp: DateTime<Utc>,
    },

    /// A guarded destination was requested while the vault was locked.
    /// Subscribers remember the url to resume navigation after unlock.
    LockedUrl {
        account_id: Option<AccountId>,
        url: String,
    },

    /// A guarded destination was requested without an authenticated session.
    AuthBlocked { account_id: Option<AccountId> },

    /// Ownership of the process-wide search index moved to another account.
    ActiveAccountChanged {
        previous: Option<AccountId>,
        current: Option<AccountId>,
    },

    /// Generic system-level event for anything that does not fit the above.
    SystemEvent {
        /// A short, machine-readable event kind (e.g. "startup", "shutdown").
        kind: String,
        /// Human-readable description.
        message: String,
    },
}

impl Event {
    /// Build a [`Event::Locked`] stamped with the current time.
    pub fn locked(account_id: AccountId, soft: bool) -> Self {
        Self::Locked {
            account_id,
            soft,
            timestamp: Utc::now(),
        }
    }

    /// Stable event name, as seen by subscribers that dispatch on strings.
    pub fn name(&self) -> &str {
        match self {
            Self::Locked { .. } => "locked",
            Self::LockedUrl { .. } => "lockedUrl",
            Self::AuthBlocked { .. } => "authBlocked",
            Self::ActiveAccountChanged { .. } => "activeAccountChanged",
            Self::SystemEvent { kind, .. } => kind,
        }
    }

    /// The account this event concerns, if any.
    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            Self::Locked { account_id, .. } => Some(account_id),
            Self::LockedUrl { account_id, .. } | Self::AuthBlocked { account_id } => {
                account_id.as_ref()
            }
            Self::ActiveAccountChanged { current, .. } => current.as_ref(),
            Self::SystemEvent { .. } => None,
        }
    }

    /// JSON payload for subscribers living outside the process.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Publish/subscribe event bus backed by [`tokio::sync::broadcast`].
///
/// The bus is cheaply cloneable (`Arc`-backed) and `Send + Sync`.  Subscribers
/// receive [`Arc<Event>`] references, avoiding per-subscriber cloning of the
/// event payload.
#[derive(Clone)]
pub struct IpcBus {
    inner: Arc<IpcBusInner>,
}

struct IpcBusInner {
    sender: broadcast::Sender<Arc<Event>>,
}

impl IpcBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// If a subscriber falls behind by more than `capacity` events, it will
    /// receive a [`broadcast::error::RecvError::Lagged`] error indicating how
    /// many events were missed.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(IpcBusInner { sender }),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of receivers that will observe this event.  With no
    /// active subscribers the event is dropped and `0` is returned; a lock
    /// must not fail because nobody is listening.
    pub fn publish(&self, event: Event) -> Result<usize> {
        let name = event.name().to_owned();
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(event = %name, receivers = n, "event published");
                Ok(n)
            }
            Err(_) => {
                tracing::trace!(event = %name, "event published but no active receivers");
                Ok(0)
            }
        }
    }

    /// Create a new subscriber that will receive all future events.
    ///
    /// Events published *before* this call are **not** replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        tracing::trace!("new bus subscriber created");
        self.inner.sender.subscribe()
    }

    /// Return the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for IpcBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
