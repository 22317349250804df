//! Per-account lock data model.
//!
//! Accounts are identified by the kernel's [`AccountId`]; everything in this
//! module is state hanging off one account: its timeout preference, the
//! organization ceiling that may clamp it, and the key slots the lock
//! teardown empties.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use lockward_kernel::AccountId;

// ---------------------------------------------------------------------------
// Timeout preference
// ---------------------------------------------------------------------------

/// What happens to an account once its inactivity timeout elapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutAction {
    /// Purge decrypted state but keep the session.
    #[default]
    Lock,
    /// End the session entirely.
    LogOut,
}

impl TimeoutAction {
    /// Convert to the string stored in the state store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::LogOut => "logOut",
        }
    }

    /// Parse from the string stored in the state store.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lock" => Some(Self::Lock),
            "logOut" | "logout" => Some(Self::LogOut),
            _ => None,
        }
    }
}

impl fmt::Display for TimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's stored timeout choice.
///
/// `minutes == None` and negative minutes both mean the scheduler never
/// times the account out (negative values are sentinels such as "on
/// restart").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPreference {
    pub minutes: Option<i64>,
    pub action: TimeoutAction,
}

impl TimeoutPreference {
    pub fn new(minutes: Option<i64>, action: TimeoutAction) -> Self {
        Self { minutes, action }
    }

    /// `true` when no inactivity timeout is enforced.
    pub fn is_never(&self) -> bool {
        self.minutes.is_none_or(|m| m < 0)
    }
}

// ---------------------------------------------------------------------------
// Organization policy
// ---------------------------------------------------------------------------

/// Kinds of organization policy the lock core consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyKind {
    MaximumVaultTimeout,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaximumVaultTimeout => "maximumVaultTimeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "maximumVaultTimeout" => Some(Self::MaximumVaultTimeout),
            _ => None,
        }
    }
}

/// Data carried by a [`PolicyKind::MaximumVaultTimeout`] policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgTimeoutPolicy {
    /// Longest timeout, in minutes, members may configure.
    pub max_minutes: i64,
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Persisted key slots living outside normal in-memory key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeySuffix {
    /// Stored so the vault opens without any secret ("never lock").
    Auto,
    /// Stored behind a biometric prompt.
    Biometric,
}

impl KeySuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Biometric => "biometric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "biometric" => Some(Self::Biometric),
            _ => None,
        }
    }
}

/// How far a key-store clear reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    /// Drop the in-memory copy only; persisted slots survive.
    MemoryOnly,
    /// Drop the in-memory copy and every persisted copy.
    IncludingPersisted,
}

/// Raw symmetric key bytes, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Zeroizing<Vec<u8>>);

impl SymmetricKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([redacted; {}])", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// Which halves of a PIN unlock are configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinLockStatus {
    /// A protected PIN is stored.
    pub protected_pin: bool,
    /// A PIN-protected copy of the user key is stored.
    pub pin_protected_key: bool,
}

impl PinLockStatus {
    pub fn is_set(&self) -> bool {
        self.protected_pin || self.pin_protected_key
    }
}

/// Result of a lock request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOutcome {
    /// The full teardown ran.
    Locked,
    /// No session exists; nothing to lock.
    NotAuthenticated,
    /// The account was already locked; nothing was touched.
    AlreadyLocked,
    /// Another teardown for the same account is running.
    InProgress,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
