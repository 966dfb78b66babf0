//! Global configuration options.
//!
//! Retrieve the global [`Config`] with [`global_config`] and modify it with
//! [`global_config_mut`].
//!
//! ## Concurrency Level
//! > default: [`std::thread::available_parallelism`]`()`
//!
//! The default concurrency level used when a thread pool is created without
//! an explicit level. The query thread counts towards the level, so a pool
//! spawns one fewer worker thread.
//!
//! ## Disable Tile Cache
//! > default: `false`
//!
//! If enabled, read strategies bypass the filtered-tile cache for both the
//! fetch and the unfilter steps. Intended for correctness testing and for
//! workloads whose tiles are never revisited.
//!
//! ## Tile Cache Capacity
//! > default: `64`
//!
//! The number of filtered tiles retained by a read strategy's cache.

use std::num::NonZeroUsize;
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for the `tilestore` crate.
#[derive(Debug, Clone)]
pub struct Config {
    concurrency_level: usize,
    disable_tile_cache: bool,
    tile_cache_capacity: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrency_level: std::thread::available_parallelism().map_or(1, Into::into),
            disable_tile_cache: false,
            tile_cache_capacity: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl Config {
    /// Get the [concurrency level](index.html#concurrency-level) configuration.
    #[must_use]
    pub fn concurrency_level(&self) -> usize {
        self.concurrency_level
    }

    /// Set the [concurrency level](index.html#concurrency-level) configuration.
    pub fn set_concurrency_level(&mut self, concurrency_level: usize) {
        self.concurrency_level = concurrency_level;
    }

    /// Get the [disable tile cache](index.html#disable-tile-cache) configuration.
    #[must_use]
    pub fn disable_tile_cache(&self) -> bool {
        self.disable_tile_cache
    }

    /// Set the [disable tile cache](index.html#disable-tile-cache) configuration.
    pub fn set_disable_tile_cache(&mut self, disable_tile_cache: bool) {
        self.disable_tile_cache = disable_tile_cache;
    }

    /// Get the [tile cache capacity](index.html#tile-cache-capacity) configuration.
    #[must_use]
    pub fn tile_cache_capacity(&self) -> NonZeroUsize {
        self.tile_cache_capacity
    }

    /// Set the [tile cache capacity](index.html#tile-cache-capacity) configuration.
    pub fn set_tile_cache_capacity(&mut self, tile_cache_capacity: NonZeroUsize) {
        self.tile_cache_capacity = tile_cache_capacity;
    }
}

fn global_config_lock() -> &'static RwLock<Config> {
    static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(Config::default()))
}

/// Returns a reference to the global configuration.
///
/// # Panics
/// Panics if the underlying lock is poisoned.
#[must_use]
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    global_config_lock().read().unwrap()
}

/// Returns a mutable reference to the global configuration.
///
/// # Panics
/// Panics if the underlying lock is poisoned.
#[must_use]
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    global_config_lock().write().unwrap()
}
