//! # lockward-store
//!
//! Storage backends for Lockward.
//!
//! Implements every collaborator trait the vault lock core needs, on top of
//! SQLite (WAL, `secure_delete`) and in-process caches:
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  VaultDataCaches (moka, per-account purge)  │
//! │  MemorySearchIndex (active account only)    │
//! ├─────────────────────────────────────────────┤
//! │  MemoryKeyStore   (memory + persisted slots)│
//! │  SqliteTokenStore (memory + optional disk)  │
//! │  SqliteStateStore (account_state rows)      │
//! │  SqlitePolicyStore (org_policies rows)      │
//! │  SessionTeardown  (logout hook)             │
//! ├─────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool)     │
//! │  Migrations (versioned, transactional)      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use lockward_store::Backends;
//! use lockward_vault::config::StoreSettings;
//!
//! let backends = Backends::open(&StoreSettings::default()).await?;
//! let service = backends.service_builder().build()?;
//! ```

pub mod backends;
pub mod cache;
pub mod db;
pub mod error;
pub mod keys;
pub mod logout;
pub mod migration;
pub mod models;
pub mod policy_store;
pub mod search;
pub mod state;
pub mod tokens;

// ── re-exports ───────────────────────────────────────────────────────

pub use backends::Backends;
pub use cache::{CacheStats, DecryptedCache, DecryptedCacheBuilder, VaultDataCaches};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use keys::{KeyPresence, MemoryKeyStore, UnlockedKeys};
pub use logout::SessionTeardown;
pub use models::{CipherView, CollectionView, FolderView};
pub use policy_store::SqlitePolicyStore;
pub use search::MemorySearchIndex;
pub use state::{AccountRow, SqliteStateStore};
pub use tokens::{SessionTokens, SqliteTokenStore};
