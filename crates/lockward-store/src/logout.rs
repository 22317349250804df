//! Session teardown on logout.
//!
//! The lock core only announces a logout; [`SessionTeardown`] is the hook
//! that actually ends the session against these stores.

use std::sync::Arc;

use async_trait::async_trait;
use lockward_vault::provider::AccountCache;
use lockward_vault::{AccountId, LockHook, ProviderResult};
use tracing::info;

use crate::backends::Backends;
use crate::cache::VaultDataCaches;
use crate::keys::MemoryKeyStore;
use crate::state::SqliteStateStore;
use crate::tokens::SqliteTokenStore;

/// Drops authentication, keys, tokens and cached views for a logged-out
/// account.  The account row itself is kept so its preferences survive the
/// next sign-in.
pub struct SessionTeardown {
    state: Arc<SqliteStateStore>,
    keys: Arc<MemoryKeyStore>,
    tokens: Arc<SqliteTokenStore>,
    caches: VaultDataCaches,
}

impl SessionTeardown {
    pub fn new(backends: &Backends) -> Self {
        Self {
            state: backends.state.clone(),
            keys: backends.keys.clone(),
            tokens: backends.tokens.clone(),
            caches: backends.caches.clone(),
        }
    }
}

#[async_trait]
impl LockHook for SessionTeardown {
    fn name(&self) -> &str {
        "session-teardown"
    }

    async fn on_logged_out(&self, account: &AccountId) -> ProviderResult<()> {
        self.state.set_authenticated(account, false).await?;
        self.keys.forget(account).await?;
        self.tokens.clear(account).await?;
        self.caches.ciphers.clear_cache(account).await?;
        self.caches.folders.clear_cache(account).await?;
        self.caches.collections.clear_cache(account).await?;
        info!(account_id = %account, "session ended");
        Ok(())
    }
}
