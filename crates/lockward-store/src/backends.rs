//! One-stop wiring of every store onto a single database.

use std::sync::Arc;

use lockward_vault::config::StoreSettings;
use lockward_vault::VaultTimeoutServiceBuilder;

use crate::cache::VaultDataCaches;
use crate::db::Database;
use crate::error::StoreResult;
use crate::keys::MemoryKeyStore;
use crate::policy_store::SqlitePolicyStore;
use crate::search::MemorySearchIndex;
use crate::state::SqliteStateStore;
use crate::tokens::SqliteTokenStore;

/// All concrete collaborators sharing one [`Database`].
#[derive(Clone)]
pub struct Backends {
    pub db: Database,
    pub state: Arc<SqliteStateStore>,
    pub keys: Arc<MemoryKeyStore>,
    pub tokens: Arc<SqliteTokenStore>,
    pub policies: Arc<SqlitePolicyStore>,
    pub caches: VaultDataCaches,
    pub search: Arc<MemorySearchIndex>,
}

impl Backends {
    /// Open the database named in `settings` and run migrations.
    pub async fn open(settings: &StoreSettings) -> StoreResult<Self> {
        let db = Database::open_and_migrate(settings.database.clone()).await?;
        Ok(Self::with_database(db, settings))
    }

    /// In-memory backends, useful for tests and dry runs.
    pub async fn in_memory(settings: &StoreSettings) -> StoreResult<Self> {
        let db = Database::in_memory_migrated().await?;
        Ok(Self::with_database(db, settings))
    }

    pub fn with_database(db: Database, settings: &StoreSettings) -> Self {
        Self {
            state: Arc::new(SqliteStateStore::new(db.clone())),
            keys: Arc::new(MemoryKeyStore::new(db.clone())),
            tokens: Arc::new(SqliteTokenStore::new(db.clone())),
            policies: Arc::new(SqlitePolicyStore::new(db.clone())),
            caches: VaultDataCaches::from_settings(settings),
            search: Arc::new(MemorySearchIndex::new()),
            db,
        }
    }

    /// A service builder with every collaborator slot filled.
    ///
    /// Clock, view signal, registry, bus and timeout settings keep the
    /// builder's defaults and can still be overridden.
    pub fn service_builder(&self) -> VaultTimeoutServiceBuilder {
        lockward_vault::VaultTimeoutService::builder()
            .state(self.state.clone())
            .keys(self.keys.clone())
            .ciphers(Arc::new(self.caches.ciphers.clone()))
            .folders(Arc::new(self.caches.folders.clone()))
            .collections(Arc::new(self.caches.collections.clone()))
            .search_index(self.search.clone())
            .policies(self.policies.clone())
            .tokens(self.tokens.clone())
    }
}
