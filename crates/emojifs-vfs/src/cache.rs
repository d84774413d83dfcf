//! TTL cache for remote listings.

use dashmap::DashMap;
use moka::future::Cache;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::vfs::VfsResult;

/// How long a listing stays fresh.
pub const METADATA_TTL: Duration = Duration::from_secs(600);

/// Time-bounded memo of listing results, keyed by `K`.
///
/// Concurrent misses on one key share a single refresh. A failed refresh
/// caches nothing, so the next caller tries again.
///
/// Every stored value carries the generation it was fetched under.
/// [`invalidate`](Self::invalidate) bumps the generation, so a refresh that
/// was already in flight when a mutation landed can never satisfy a later
/// lookup.
pub struct MetadataCache<K, V> {
    label: &'static str,
    inner: Cache<K, (u64, V)>,
    generations: DashMap<K, u64>,
    /// Bumped by [`invalidate_all`](Self::invalidate_all); part of every generation.
    epoch: AtomicU64,
}

impl<K, V> MetadataCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(label: &'static str, capacity: u64, ttl: Duration) -> Self {
        Self {
            label,
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    fn generation(&self, key: &K) -> u64 {
        let per_key = self.generations.get(key).map(|g| *g).unwrap_or(0);
        // Epoch in the high half; neither counter gets near 2^32 in practice.
        (self.epoch.load(Ordering::SeqCst) << 32).wrapping_add(per_key)
    }

    /// The cached value for `key`, calling `refresh` on a miss.
    ///
    /// `refresh` runs again if `key` was invalidated while it was running.
    pub async fn get_or_refresh<F, Fut>(&self, key: K, refresh: F) -> VfsResult<V>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = VfsResult<V>>,
    {
        loop {
            let generation = self.generation(&key);
            let (fetched_under, value) = match self.inner.get(&key).await {
                Some(entry) => entry,
                None => {
                    tracing::debug!(cache = self.label, key = ?key, "refreshing");
                    self.inner
                        .try_get_with(key.clone(), async {
                            refresh().await.map(|value| (generation, value))
                        })
                        .await
                        .map_err(|e| (*e).clone())?
                }
            };
            if fetched_under == self.generation(&key) {
                return Ok(value);
            }
            tracing::debug!(cache = self.label, key = ?key, "discarding stale refresh");
            self.inner.invalidate(&key).await;
        }
    }

    /// Drop one entry; the next lookup refreshes.
    pub async fn invalidate(&self, key: &K) {
        tracing::debug!(cache = self.label, key = ?key, "invalidated");
        *self.generations.entry(key.clone()).or_insert(0) += 1;
        self.inner.invalidate(key).await;
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_all();
    }
}
