//! Shared in-flight promises, LRU pruning, and ETag invalidation (spec.md §4.H).
//!
//! Generalizes the teacher's `HashMapCacheV2`/`CacheSlot` two-level-locking
//! singleflight pattern (global map lock to find-or-insert a slot, then a
//! per-slot lock to coalesce concurrent fetches) from directories alone to
//! headers, resources, bundle directories, and subdivided tiles.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::bundle::BundleDirectory;
use crate::error::TpkResult;
use crate::header::Header;

#[derive(Default)]
enum SlotState<V> {
    #[default]
    Empty,
    Filled(V),
}

struct Slot<V> {
    state: RwLock<SlotState<V>>,
    last_used: AtomicU64,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            state: RwLock::new(SlotState::Empty),
            last_used: AtomicU64::new(0),
        }
    }
}

impl<V: Clone> Slot<V> {
    async fn get_or_insert<F, Fut>(&self, fetcher: F) -> TpkResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TpkResult<V>>,
    {
        {
            let existing = self.state.read().await;
            if let SlotState::Filled(v) = &*existing {
                return Ok(v.clone());
            }
        }
        let mut slot_state = self.state.write().await;
        if let SlotState::Empty = *slot_state {
            let value = fetcher().await?;
            *slot_state = SlotState::Filled(value.clone());
            return Ok(value);
        }
        match &*slot_state {
            SlotState::Filled(v) => Ok(v.clone()),
            SlotState::Empty => unreachable!("just filled above"),
        }
    }
}

/// A keyed store of singleflight slots with single-victim LRU eviction,
/// generalizing the teacher's `HashMapCacheV2` (spec.md §4.H "each slot
/// holds a shared pending result... evict the single least-recently-used
/// slot per insertion").
struct Store<K, V> {
    slots: RwLock<HashMap<K, Arc<Slot<V>>>>,
    max_entries: usize,
    clock: AtomicU64,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(max_entries: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_entries,
            clock: AtomicU64::new(0),
        }
    }

    async fn slot_for(&self, key: &K) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }
        let slot = Arc::new(Slot::default());
        slots.insert(key.clone(), slot.clone());
        self.evict_one_if_over_capacity(&mut slots);
        slot
    }

    fn evict_one_if_over_capacity(&self, slots: &mut HashMap<K, Arc<Slot<V>>>) {
        if slots.len() <= self.max_entries {
            return;
        }
        if let Some(victim) = slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_used.load(Ordering::SeqCst))
            .map(|(k, _)| k.clone())
        {
            slots.remove(&victim);
        }
    }

    async fn get_or_insert<F, Fut>(&self, key: K, fetcher: F) -> TpkResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TpkResult<V>>,
    {
        let slot = self.slot_for(&key).await;
        slot.last_used
            .store(self.clock.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        slot.get_or_insert(fetcher).await
    }

    async fn invalidate(&self, key: &K) {
        self.slots.write().await.remove(key);
    }
}

/// Subdivided-tile store: no per-entry recency tracking. Once the population
/// exceeds `2 * max_entries`, the first half of entries in iteration order
/// are dropped (spec.md §4.H).
struct TileStore {
    slots: RwLock<HashMap<(String, u8, u64, u64), Bytes>>,
    max_entries: usize,
}

impl TileStore {
    fn new(max_entries: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    async fn get(&self, key: &(String, u8, u64, u64)) -> Option<Bytes> {
        self.slots.read().await.get(key).cloned()
    }

    async fn insert(&self, key: (String, u8, u64, u64), bytes: Bytes) {
        let mut slots = self.slots.write().await;
        slots.insert(key, bytes);
        if slots.len() > 2 * self.max_entries {
            let drop_half = slots.len() / 2;
            let victims: Vec<_> = slots.keys().take(drop_half).cloned().collect();
            for victim in victims {
                slots.remove(&victim);
            }
        }
    }
}

/// Which archive-relative item a resource/directory cache key names.
type ResourceKey = (String, Option<String>, String);

/// The process-local cache backing one or more open archives (spec.md §4.H).
///
/// All sub-stores key on `archive_key`, an opaque identifier the caller
/// assigns per open archive (e.g. its path or URL), so one `Cache` can serve
/// multiple archives.
pub struct Cache {
    headers: Store<String, Arc<Header>>,
    directories: Store<ResourceKey, Arc<BundleDirectory>>,
    resources: Store<ResourceKey, Bytes>,
    tiles: TileStore,
}

impl Cache {
    /// Builds an empty cache sized per `max_cache_entries` from [`crate::config::PackageOptions`].
    #[must_use]
    pub fn new(max_cache_entries: usize) -> Self {
        Self {
            headers: Store::new(max_cache_entries),
            directories: Store::new(max_cache_entries),
            resources: Store::new(max_cache_entries),
            tiles: TileStore::new(max_cache_entries),
        }
    }

    /// Returns the cached header for `archive_key`, building it via `fetcher` on a miss.
    /// Concurrent callers for the same `archive_key` coalesce onto one fetch.
    pub async fn get_header<F, Fut>(&self, archive_key: &str, fetcher: F) -> TpkResult<Arc<Header>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TpkResult<Header>>,
    {
        self.headers
            .get_or_insert(archive_key.to_string(), || async move {
                fetcher().await.map(Arc::new)
            })
            .await
    }

    /// Evicts the header slot for `archive_key` (spec.md §4.H "on EtagMismatch, evict the
    /// Header slot and re-issue header load"). Concurrent invalidations coalesce: the next
    /// caller to request the header after this triggers exactly one refresh.
    pub async fn invalidate_header(&self, archive_key: &str) {
        self.headers.invalidate(&archive_key.to_string()).await;
    }

    /// Returns the cached bundle directory at `path`, building it via `fetcher` on a miss.
    pub async fn get_directory<F, Fut>(
        &self,
        archive_key: &str,
        etag: Option<&str>,
        path: &str,
        fetcher: F,
    ) -> TpkResult<Arc<BundleDirectory>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TpkResult<BundleDirectory>>,
    {
        let key = (archive_key.to_string(), etag.map(str::to_string), path.to_string());
        self.directories
            .get_or_insert(key, || async move { fetcher().await.map(Arc::new) })
            .await
    }

    /// Returns the cached bytes of resource `path`, building it via `fetcher` on a miss.
    pub async fn get_resource<F, Fut>(
        &self,
        archive_key: &str,
        etag: Option<&str>,
        path: &str,
        fetcher: F,
    ) -> TpkResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TpkResult<Bytes>>,
    {
        let key = (archive_key.to_string(), etag.map(str::to_string), path.to_string());
        self.resources.get_or_insert(key, fetcher).await
    }

    /// Looks up a previously memoized subdivision result.
    pub async fn get_subdivided_tile(&self, archive_key: &str, z: u8, x: u64, y: u64) -> Option<Bytes> {
        self.tiles.get(&(archive_key.to_string(), z, x, y)).await
    }

    /// Memoizes a subdivision result.
    pub async fn insert_subdivided_tile(&self, archive_key: &str, z: u8, x: u64, y: u64, bytes: Bytes) {
        self.tiles
            .insert((archive_key.to_string(), z, x, y), bytes)
            .await;
    }
}
