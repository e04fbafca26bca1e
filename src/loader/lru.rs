//! Bounded in-memory tile cache with least-recently-used eviction.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use super::{ensure_zoom, TileCache, TileLoader};
use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::tile::{Tile, TileKey};

/// In-memory cache holding at most `capacity` decoded tiles.
///
/// `load` promotes the entry to most-recently-used; `save` inserts or
/// overwrites and evicts from the cold end until the bound holds again.
/// A bound violation after `save` is a programming error and panics.
pub struct LruTileCache {
    layout: Layout,
    min_zoom: u32,
    max_zoom: u32,
    capacity: NonZeroUsize,
    entries: Mutex<LruCache<TileKey, Tile>>,
}

impl LruTileCache {
    /// Create a cache over `layout` holding up to `capacity` tiles.
    ///
    /// The zoom band defaults to `0..=31` and only matters when the cache
    /// stands alone as a loader; [`super::CachedTileLoader`] reports its
    /// inner loader's band.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(layout: Layout, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("LRU capacity must be nonzero");
        Self {
            layout,
            min_zoom: 0,
            max_zoom: 31,
            capacity,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Restrict the zoom band reported by the loader interface.
    #[must_use]
    pub fn with_zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Number of tiles currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of tiles held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl TileLoader for LruTileCache {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn min_zoom(&self) -> u32 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    fn load(&self, key: TileKey) -> Result<Tile> {
        ensure_zoom(key.zoom, self.min_zoom, self.max_zoom)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).cloned().ok_or(TileError::CacheMiss)
    }
}

impl TileCache for LruTileCache {
    fn contains(&self, key: TileKey) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }

    fn save(&self, tile: &Tile, key: TileKey) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((evicted, _)) = entries.push(key, tile.clone()) {
            if evicted != key {
                debug!(%evicted, "evicted tile");
            }
        }
        assert!(
            entries.len() <= self.capacity.get(),
            "LRU bound violated: {} entries over capacity {}",
            entries.len(),
            self.capacity
        );
        Ok(())
    }
}
