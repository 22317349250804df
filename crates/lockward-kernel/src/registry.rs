//! Account registry.
//!
//! The registry is the explicit set of accounts the process currently knows
//! about, plus the identity of the *active* account (the one whose vault is
//! on screen and which owns the process-wide search index).  The timeout
//! scheduler iterates it; nothing reaches into ambient state to enumerate
//! accounts.
//!
//! Internally the registry is backed by [`DashMap`] which provides lock-free
//! concurrent reads and fine-grained write locking.
//!
//! # Example
//!
//! ```rust
//! # use lockward_kernel::registry::{AccountId, AccountRegistry};
//! let registry = AccountRegistry::new();
//! registry.register("alice", Some("Alice"));
//! registry.set_active(&AccountId::from("alice")).unwrap();
//!
//! assert!(registry.is_active(&AccountId::from("alice")));
//! assert_eq!(registry.list_ids().len(), 1);
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Opaque account identifier, unique per authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Metadata about a registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: AccountId,
    /// Human-readable label (email, display name).
    pub label: Option<String>,
    /// When the account was registered with this process.
    pub registered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent account registry backed by [`DashMap`].
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct AccountRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    accounts: DashMap<AccountId, AccountEntry>,
    active: RwLock<Option<AccountId>>,
}

impl AccountRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                accounts: DashMap::new(),
                active: RwLock::new(None),
            }),
        }
    }

    /// Register an account.
    ///
    /// Re-registering an existing id refreshes its label but keeps the
    /// original registration time.
    pub fn register(&self, id: impl Into<AccountId>, label: Option<&str>) {
        let id = id.into();
        let label = label.map(str::to_owned);

        self.inner
            .accounts
            .entry(id.clone())
            .and_modify(|entry| entry.label = label.clone())
            .or_insert_with(|| {
                tracing::info!(account_id = %id, "account registered");
                AccountEntry {
                    id: id.clone(),
                    label,
                    registered_at: Utc::now(),
                }
            });
    }

    /// Remove an account from the registry.
    ///
    /// If it was the active account, the process is left with no active
    /// account.  Returns the removed entry if it existed.
    pub fn unregister(&self, id: &AccountId) -> Option<AccountEntry> {
        let removed = self.inner.accounts.remove(id).map(|(_, entry)| entry);
        if removed.is_some() {
            let mut active = self
                .inner
                .active
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if active.as_ref() == Some(id) {
                *active = None;
            }
            tracing::info!(account_id = %id, "account unregistered");
        }
        removed
    }

    /// Retrieve a snapshot of an account's entry.
    pub fn get(&self, id: &AccountId) -> Result<AccountEntry> {
        self.inner
            .accounts
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KernelError::AccountNotFound {
                account_id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.inner.accounts.contains_key(id)
    }

    /// All registered account ids, sorted so every pass over the registry
    /// visits accounts in the same order.
    pub fn list_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .inner
            .accounts
            .iter()
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of all registered accounts, sorted by id.
    pub fn list_all(&self) -> Vec<AccountEntry> {
        let mut entries: Vec<AccountEntry> = self
            .inner
            .accounts
            .iter()
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn count(&self) -> usize {
        self.inner.accounts.len()
    }

    // -- Active account -----------------------------------------------------

    /// The account currently owning the foreground (and the search index).
    pub fn active(&self) -> Option<AccountId> {
        self.inner
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self, id: &AccountId) -> bool {
        self.inner
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            == Some(id)
    }

    /// Make `id` the active account.  Returns the previously active account.
    pub fn set_active(&self, id: &AccountId) -> Result<Option<AccountId>> {
        if !self.contains(id) {
            return Err(KernelError::AccountNotFound {
                account_id: id.to_string(),
            });
        }

        let mut active = self
            .inner
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = active.replace(id.clone());

        tracing::debug!(
            account_id = %id,
            previous = ?previous.as_ref().map(AccountId::as_str),
            "active account changed"
        );

        Ok(previous)
    }

    /// Leave the process without an active account.
    pub fn clear_active(&self) -> Option<AccountId> {
        self.inner
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
