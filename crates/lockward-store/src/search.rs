//! In-memory search index over the active account's ciphers.
//!
//! Only one account's vault is indexed at a time.  Indexing a different
//! account replaces the previous contents; clearing empties it.

use std::sync::RwLock;

use async_trait::async_trait;
use lockward_vault::provider::SearchIndex;
use lockward_vault::{AccountId, ProviderResult};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::models::CipherView;

#[derive(Default)]
struct IndexState {
    owner: Option<AccountId>,
    entries: Vec<(String, String)>,
}

/// Substring search over cipher names, URIs and notes.
#[derive(Default)]
pub struct MemorySearchIndex {
    state: RwLock<IndexState>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with `ciphers` belonging to `account`.
    pub fn index(&self, account: &AccountId, ciphers: &[CipherView]) -> StoreResult<()> {
        let entries = ciphers
            .iter()
            .map(|c| (c.id.clone(), c.search_text()))
            .collect::<Vec<_>>();
        let mut state = self.write()?;
        state.owner = Some(account.clone());
        state.entries = entries;
        debug!(account_id = %account, entries = state.entries.len(), "search index built");
        Ok(())
    }

    /// Ids of ciphers whose text contains `query` (case-insensitive).
    pub fn search(&self, query: &str) -> StoreResult<Vec<String>> {
        let needle = query.to_lowercase();
        let state = self.read()?;
        Ok(state
            .entries
            .iter()
            .filter(|(_, text)| text.contains(&needle))
            .map(|(id, _)| id.clone())
            .collect())
    }

    /// Account whose vault is currently indexed.
    pub fn indexed_account(&self) -> StoreResult<Option<AccountId>> {
        Ok(self.read()?.owner.clone())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read()?.entries.is_empty())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|e| StoreError::Cache(format!("search index lock poisoned: {e}")))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|e| StoreError::Cache(format!("search index lock poisoned: {e}")))
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn clear_index(&self) -> ProviderResult<()> {
        let mut state = self.write()?;
        let dropped = state.entries.len();
        state.owner = None;
        state.entries.clear();
        debug!(dropped, "search index cleared");
        Ok(())
    }
}
