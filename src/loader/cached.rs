//! Cache composition: look aside before delegating to an inner loader.

use std::sync::Arc;

use image::imageops;
use nalgebra::Vector2;
use tracing::{debug, warn};

use super::{ensure_zoom, DiskCache, LruTileCache, TileCache, TileLoader};
use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::tile::{Tile, TileKey};

/// Serves from `cache` when possible, otherwise fetches from `loader` and
/// populates the cache.
///
/// Races between `contains` and `load` are tolerated: a losing reader falls
/// through, refetches and overwrites the entry.
pub struct CachedTileLoader {
    loader: Arc<dyn TileLoader>,
    cache: Arc<dyn TileCache>,
}

impl CachedTileLoader {
    #[must_use]
    pub fn new(loader: Arc<dyn TileLoader>, cache: Arc<dyn TileCache>) -> Self {
        Self { loader, cache }
    }

    /// Wrap `loader` with an on-disk cache at `path`, mirroring the
    /// loader's layout and zoom band.
    #[must_use]
    pub fn disk_cached(loader: Arc<dyn TileLoader>, path: impl AsRef<std::path::Path>) -> Self {
        let cache = DiskCache::new(
            path,
            loader.layout().clone(),
            loader.min_zoom(),
            loader.max_zoom(),
        );
        Self::new(loader, Arc::new(cache))
    }

    /// Wrap `loader` with an in-memory LRU cache of `capacity` tiles.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn lru_cached(loader: Arc<dyn TileLoader>, capacity: usize) -> Self {
        let cache = LruTileCache::new(loader.layout().clone(), capacity)
            .with_zoom_range(loader.min_zoom(), loader.max_zoom());
        Self::new(loader, Arc::new(cache))
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn TileCache> {
        &self.cache
    }
}

impl TileLoader for CachedTileLoader {
    fn layout(&self) -> &Layout {
        self.loader.layout()
    }

    fn min_zoom(&self) -> u32 {
        self.loader.min_zoom()
    }

    fn max_zoom(&self) -> u32 {
        self.loader.max_zoom()
    }

    fn load(&self, key: TileKey) -> Result<Tile> {
        if self.cache.contains(key) {
            match self.cache.load(key) {
                Ok(tile) => return Ok(tile),
                Err(err) if err.is_cache_failure() => {
                    debug!(%key, error = %err, "cache entry unusable, refetching");
                }
                Err(err) => return Err(err),
            }
        }

        let tile = self.loader.load(key)?;
        self.cache.save(&tile, key)?;
        Ok(tile)
    }

    fn reset_after_fork(&self) {
        self.loader.reset_after_fork();
        self.cache.reset_after_fork();
    }
}

/// Cache composition over a coarser inner loader: a miss on tile
/// `(x, y, z)` fetches the single multitile `(x / f, y / f, z - k)` whose
/// raster covers `f * f` cache tiles (`f = 2^k`), splits it, saves every
/// sub-tile and returns the requested one.
pub struct ZoomUpCachedLoader {
    loader: Arc<dyn TileLoader>,
    cache: Arc<dyn TileCache>,
    zoom_up: u32,
}

impl ZoomUpCachedLoader {
    /// Compose a coarse loader with a fine cache.
    ///
    /// # Errors
    /// Fails with [`TileError::InvalidLayout`] unless the loader's tile
    /// edge is a power-of-two multiple of the cache's tile edge.
    pub fn new(loader: Arc<dyn TileLoader>, cache: Arc<dyn TileCache>) -> Result<Self> {
        let loader_edge = loader.layout().tile_edge_px();
        let cache_edge = cache.layout().tile_edge_px();
        if loader_edge <= cache_edge || loader_edge % cache_edge != 0 {
            return Err(TileError::InvalidLayout(format!(
                "loader tile edge {loader_edge} is not a multiple of cache tile edge {cache_edge}"
            )));
        }
        let factor = loader_edge / cache_edge;
        if !factor.is_power_of_two() {
            return Err(TileError::InvalidLayout(format!(
                "tile edge ratio {factor} is not a power of two"
            )));
        }
        Ok(Self {
            loader,
            cache,
            zoom_up: factor.trailing_zeros(),
        })
    }

    /// Zoom levels between a cache tile and its multitile.
    #[must_use]
    pub fn zoom_up(&self) -> u32 {
        self.zoom_up
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn TileCache> {
        &self.cache
    }

    fn split_and_save(&self, multitile: &Tile, key: TileKey) -> Result<Tile> {
        let layout = self.cache.layout();
        let factor = 1u32 << self.zoom_up;
        let base_x = key.x / factor * factor;
        let base_y = key.y / factor * factor;

        let block_min = {
            let c1 = layout.tile_to_pixel(
                &Vector2::new(f64::from(base_x), f64::from(base_y)),
                key.zoom,
            );
            let c2 = layout.tile_to_pixel(
                &Vector2::new(f64::from(base_x + factor), f64::from(base_y + factor)),
                key.zoom,
            );
            c1.inf(&c2)
        };

        let mut requested = None;
        for sub_x in base_x..base_x + factor {
            for sub_y in base_y..base_y + factor {
                let t = Vector2::new(f64::from(sub_x), f64::from(sub_y));
                let c1 = layout.tile_to_pixel(&t, key.zoom);
                let c2 = layout.tile_to_pixel(&(t + Vector2::new(1.0, 1.0)), key.zoom);
                let lo = c1.inf(&c2) - block_min;
                let hi = c1.sup(&c2) - block_min;

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let sub_tile = imageops::crop_imm(
                    multitile,
                    lo.y.round() as u32,
                    lo.x.round() as u32,
                    (hi.y - lo.y).round() as u32,
                    (hi.x - lo.x).round() as u32,
                )
                .to_image();

                let sub_key = TileKey::new(sub_x, sub_y, key.zoom);
                self.cache.save(&sub_tile, sub_key)?;
                if sub_key == key {
                    requested = Some(sub_tile);
                }
            }
        }
        requested.ok_or_else(|| {
            TileError::InvalidTile(format!("multitile split did not cover {key}"))
        })
    }
}

impl TileLoader for ZoomUpCachedLoader {
    /// Tiles served by this loader have the cache's layout.
    fn layout(&self) -> &Layout {
        self.cache.layout()
    }

    fn min_zoom(&self) -> u32 {
        self.loader.min_zoom() + self.zoom_up
    }

    fn max_zoom(&self) -> u32 {
        self.loader.max_zoom().saturating_add(self.zoom_up)
    }

    fn load(&self, key: TileKey) -> Result<Tile> {
        ensure_zoom(key.zoom, self.min_zoom(), self.max_zoom())?;

        if self.cache.contains(key) {
            match self.cache.load(key) {
                Ok(tile) => return Ok(tile),
                Err(err) if err.is_cache_failure() => {
                    warn!(%key, error = %err, "cache entry unusable, refetching multitile");
                }
                Err(err) => return Err(err),
            }
        }

        let multi_key = TileKey::new(
            key.x >> self.zoom_up,
            key.y >> self.zoom_up,
            key.zoom - self.zoom_up,
        );
        let multitile = self.loader.load(multi_key)?;
        debug!(%key, %multi_key, "splitting multitile");
        self.split_and_save(&multitile, key)
    }

    fn reset_after_fork(&self) {
        self.loader.reset_after_fork();
        self.cache.reset_after_fork();
    }
}
