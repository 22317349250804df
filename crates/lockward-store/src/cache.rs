//! Per-account decrypted caches using [`moka`].
//!
//! A [`DecryptedCache`] holds decrypted views for every unlocked account in
//! one bounded, TTL-expiring moka cache.  A lock purges one account's
//! entries through an invalidation predicate on the account half of the key,
//! leaving every other account untouched.  A side index tracks the keys each
//! account holds.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lockward_vault::config::StoreSettings;
use lockward_vault::provider::AccountCache;
use lockward_vault::{AccountId, ProviderResult};
use moka::future::Cache;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::models::{CipherView, CollectionView, FolderView};

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    purges: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_purge(&self) {
        self.purges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of per-account purges (locks) served.
    pub fn purges(&self) -> u64 {
        self.purges.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} purges={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.purges(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── cache ────────────────────────────────────────────────────────────

type EntryKey = (AccountId, String);

/// Decrypted views of type `T`, partitioned by account.
pub struct DecryptedCache<T> {
    name: &'static str,
    inner: Cache<EntryKey, T>,
    keys: Arc<DashMap<AccountId, HashSet<String>>>,
    stats: Arc<CacheStats>,
}

impl<T> Clone for DecryptedCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            keys: Arc::clone(&self.keys),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> DecryptedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn builder(name: &'static str) -> DecryptedCacheBuilder<T> {
        DecryptedCacheBuilder {
            name,
            max_capacity: 10_000,
            ttl_seconds: 3600,
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn get(&self, account: &AccountId, key: &str) -> Option<T> {
        let found = self
            .inner
            .get(&(account.clone(), key.to_owned()))
            .await;
        match &found {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        found
    }

    pub async fn insert(&self, account: &AccountId, key: &str, value: T) {
        self.inner
            .insert((account.clone(), key.to_owned()), value)
            .await;
        self.keys
            .entry(account.clone())
            .or_default()
            .insert(key.to_owned());
        debug!(cache = self.name, account_id = %account, key, "cache insert");
    }

    pub async fn invalidate(&self, account: &AccountId, key: &str) {
        if let Some(mut keys) = self.keys.get_mut(account) {
            keys.remove(key);
        }
        self.inner.invalidate(&(account.clone(), key.to_owned())).await;
    }

    /// Try the cache, and on a miss run `loader`, cache and return its value.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        account: &AccountId,
        key: &str,
        loader: F,
    ) -> StoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        if let Some(cached) = self.get(account, key).await {
            return Ok(cached);
        }
        let value = loader().await?;
        self.insert(account, key, value.clone()).await;
        Ok(value)
    }

    /// Drop every entry belonging to `account`.  Returns how many keys were
    /// tracked for it.
    ///
    /// Entries are matched on the account half of the cache key, so an
    /// entry whose key was not yet tracked when the purge ran is dropped too.
    pub async fn purge_account(&self, account: &AccountId) -> StoreResult<usize> {
        let count = self
            .keys
            .remove(account)
            .map(|(_, keys)| keys.len())
            .unwrap_or(0);

        let owner = account.clone();
        self.inner
            .invalidate_entries_if(move |(id, _), _| *id == owner)
            .map_err(|e| StoreError::Cache(format!("{} purge failed: {e}", self.name)))?;

        if count > 0 {
            self.stats.record_purge();
        }
        debug!(cache = self.name, account_id = %account, entries = count, "account purged");
        Ok(count)
    }

    /// Number of live keys tracked for `account`.
    pub fn account_entries(&self, account: &AccountId) -> usize {
        self.keys.get(account).map(|k| k.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl<T> AccountCache for DecryptedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn clear_cache(&self, account: &AccountId) -> ProviderResult<()> {
        self.purge_account(account).await?;
        Ok(())
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`DecryptedCache`].
pub struct DecryptedCacheBuilder<T> {
    name: &'static str,
    max_capacity: u64,
    ttl_seconds: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T> DecryptedCacheBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    pub fn ttl_seconds(mut self, secs: u64) -> Self {
        self.ttl_seconds = secs;
        self
    }

    pub fn build(self) -> DecryptedCache<T> {
        let inner = Cache::builder()
            .max_capacity(self.max_capacity)
            .time_to_live(Duration::from_secs(self.ttl_seconds))
            .support_invalidation_closures()
            .build();

        debug!(
            name = self.name,
            max_capacity = self.max_capacity,
            ttl_seconds = self.ttl_seconds,
            "decrypted cache created"
        );

        DecryptedCache {
            name: self.name,
            inner,
            keys: Arc::new(DashMap::new()),
            stats: Arc::new(CacheStats::default()),
        }
    }
}

// ── vault caches ─────────────────────────────────────────────────────

/// The three caches a lock purges.
#[derive(Clone)]
pub struct VaultDataCaches {
    pub ciphers: DecryptedCache<CipherView>,
    pub folders: DecryptedCache<FolderView>,
    pub collections: DecryptedCache<CollectionView>,
}

impl VaultDataCaches {
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            ciphers: DecryptedCache::builder("ciphers")
                .max_capacity(settings.cache_capacity)
                .ttl_seconds(settings.cache_ttl_secs)
                .build(),
            folders: DecryptedCache::builder("folders")
                .max_capacity(settings.cache_capacity)
                .ttl_seconds(settings.cache_ttl_secs)
                .build(),
            collections: DecryptedCache::builder("collections")
                .max_capacity(settings.cache_capacity)
                .ttl_seconds(settings.cache_ttl_secs)
                .build(),
        }
    }

    /// `true` if any of the three caches holds data for `account`.
    pub fn holds(&self, account: &AccountId) -> bool {
        self.ciphers.account_entries(account) > 0
            || self.folders.account_entries(account) > 0
            || self.collections.account_entries(account) > 0
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache() -> DecryptedCache<CipherView> {
        DecryptedCache::builder("ciphers")
            .max_capacity(100)
            .ttl_seconds(60)
            .build()
    }

    #[tokio::test]
    async fn entries_are_partitioned_by_account() {
        let cache = make_cache();
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");

        cache.insert(&alice, "c1", CipherView::new("c1", "Mail")).await;
        cache.insert(&bob, "c1", CipherView::new("c1", "Bank")).await;

        assert_eq!(cache.get(&alice, "c1").await.unwrap().name, "Mail");
        assert_eq!(cache.get(&bob, "c1").await.unwrap().name, "Bank");
    }

    #[tokio::test]
    async fn purge_drops_only_that_account() {
        let cache = make_cache();
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        cache.insert(&alice, "c1", CipherView::new("c1", "Mail")).await;
        cache.insert(&alice, "c2", CipherView::new("c2", "Chat")).await;
        cache.insert(&bob, "c3", CipherView::new("c3", "Bank")).await;

        cache.clear_cache(&alice).await.unwrap();

        assert!(cache.get(&alice, "c1").await.is_none());
        assert!(cache.get(&alice, "c2").await.is_none());
        assert_eq!(cache.account_entries(&alice), 0);
        assert!(cache.get(&bob, "c3").await.is_some());
        assert_eq!(cache.stats().purges(), 1);
    }

    #[tokio::test]
    async fn purging_unknown_account_is_a_no_op() {
        let cache = make_cache();
        assert_eq!(cache.purge_account(&AccountId::from("ghost")).await.unwrap(), 0);
        assert_eq!(cache.stats().purges(), 0);
    }

    #[tokio::test]
    async fn purge_drops_entries_the_index_missed() {
        let cache = make_cache();
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        cache.insert(&alice, "c1", CipherView::new("c1", "Mail")).await;
        cache.insert(&bob, "c2", CipherView::new("c2", "Bank")).await;
        // The entry landed in moka but its key was never recorded.
        cache.keys.remove(&alice);

        cache.clear_cache(&alice).await.unwrap();

        assert!(cache.get(&alice, "c1").await.is_none());
        assert!(cache.get(&bob, "c2").await.is_some());

        // Entries written after the purge are kept.
        cache.insert(&alice, "c3", CipherView::new("c3", "Chat")).await;
        assert!(cache.get(&alice, "c3").await.is_some());
    }

    #[tokio::test]
    async fn get_or_insert_with_loads_once() {
        let cache = make_cache();
        let alice = AccountId::from("alice");

        let first = cache
            .get_or_insert_with(&alice, "c1", || async { Ok(CipherView::new("c1", "Mail")) })
            .await
            .unwrap();
        let second = cache
            .get_or_insert_with(&alice, "c1", || async {
                Ok(CipherView::new("c1", "should not load"))
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn invalidate_untracks_key() {
        let cache = make_cache();
        let alice = AccountId::from("alice");
        cache.insert(&alice, "c1", CipherView::new("c1", "Mail")).await;

        cache.invalidate(&alice, "c1").await;

        assert!(cache.get(&alice, "c1").await.is_none());
        assert_eq!(cache.account_entries(&alice), 0);
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::default();
        stats.record_hit();
        stats.record_miss();
        let display = format!("{stats}");
        assert!(display.contains("hits=1"));
        assert!(display.contains("50.00%"));
    }
}
