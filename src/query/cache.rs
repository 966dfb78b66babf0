//! The filtered-tile cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::array::StoredTile;

type TileCacheKey = (String, String, Vec<u64>);

/// An LRU cache of filtered tile bytes keyed by
/// (fragment uri, attribute name, space-tile coordinates).
///
/// Read strategies consult the cache before fetching tile bytes from a
/// fragment; a query's `disable_cache` flag bypasses it entirely.
pub struct TileCache {
    cache: Mutex<LruCache<TileCacheKey, Arc<StoredTile>>>,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl TileCache {
    /// Create a cache retaining `capacity` tiles.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached tile for a key, if any.
    #[must_use]
    pub fn retrieve(&self, uri: &str, name: &str, tile_coords: &[u64]) -> Option<Arc<StoredTile>> {
        self.cache
            .lock()
            .get(&(uri.to_string(), name.to_string(), tile_coords.to_vec()))
            .cloned()
    }

    /// Insert a tile.
    pub fn insert(&self, uri: &str, name: &str, tile_coords: &[u64], tile: Arc<StoredTile>) {
        self.cache.lock().put(
            (uri.to_string(), name.to_string(), tile_coords.to_vec()),
            tile,
        );
    }

    /// The number of cached tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
