//! The tile loader capability and its composable implementations.
//!
//! Every source and cache exposes the same three operations (`load` plus
//! the layout and zoom-band accessors); decorators wrap an inner loader
//! behind a shared handle. Composition is acyclic: decorators form a chain
//! ending in a concrete source.

pub mod cached;
pub mod default;
pub mod disk;
pub mod http;
pub mod lru;
pub mod pack;

use image::RgbImage;
use nalgebra::Vector2;

use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::tile::{Tile, TileKey};

pub use cached::{CachedTileLoader, ZoomUpCachedLoader};
pub use default::WithDefault;
pub use disk::DiskCache;
pub use http::{HttpSource, HttpSourceBuilder};
pub use lru::LruTileCache;
pub use pack::{write_pack, PackReader};

/// Loads raster tiles addressed by [`TileKey`] within one [`Layout`].
///
/// Implementations are safe to call from multiple threads; blocking
/// operations (network, disk, retry sleeps) happen inside `load`.
pub trait TileLoader: Send + Sync {
    /// The layout all tiles of this loader live in.
    fn layout(&self) -> &Layout;

    /// Lowest zoom level this loader serves.
    fn min_zoom(&self) -> u32;

    /// Highest zoom level this loader serves.
    fn max_zoom(&self) -> u32;

    /// Load one tile.
    ///
    /// # Errors
    /// [`TileError::ZoomOutOfRange`] outside the zoom band; otherwise the
    /// source-specific failures (`NotFound`, `Transport`, `Decode`,
    /// `InvalidTile`, cache errors).
    fn load(&self, key: TileKey) -> Result<Tile>;

    /// Drop process-wide resources (file descriptors) that must not be
    /// shared across a fork. Default: nothing to release.
    fn reset_after_fork(&self) {}

    /// The smallest zoom level whose native resolution at `latlon` is
    /// finer than half of `meters_per_pixel`, clamped to the zoom band.
    ///
    /// # Errors
    /// Propagates projection failures.
    fn zoom_for(&self, latlon: &Vector2<f64>, meters_per_pixel: f64) -> Result<u32> {
        let mut zoom = self.min_zoom();
        while zoom < self.max_zoom() {
            let pixels_per_meter = self.layout().pixels_per_meter_at_latlon(latlon, zoom)?;
            if 1.0 / pixels_per_meter.max() >= 0.5 * meters_per_pixel {
                zoom += 1;
            } else {
                break;
            }
        }
        Ok(zoom)
    }
}

/// A [`TileLoader`] that can also answer membership queries and accept
/// tiles, making it usable as a cache level.
pub trait TileCache: TileLoader {
    /// Whether a tile is present. No atomicity with a following `load` is
    /// guaranteed; callers tolerate the race.
    fn contains(&self, key: TileKey) -> bool;

    /// Store a tile, overwriting any previous entry.
    ///
    /// # Errors
    /// Storage-specific write failures.
    fn save(&self, tile: &Tile, key: TileKey) -> Result<()>;
}

/// Bounds check shared by the concrete loaders.
pub(crate) fn ensure_zoom(zoom: u32, min_zoom: u32, max_zoom: u32) -> Result<()> {
    if zoom < min_zoom || zoom > max_zoom {
        return Err(TileError::zoom_out_of_range(zoom, min_zoom, max_zoom));
    }
    Ok(())
}

/// Load the half-open tile rectangle `[min_tile, max_tile)` at `zoom` and
/// paste the tiles into one mosaic, pixel-aligned to the layout.
///
/// # Errors
/// Propagates the first tile failure.
pub fn load_rect(
    loader: &dyn TileLoader,
    min_tile: (u32, u32),
    max_tile: (u32, u32),
    zoom: u32,
) -> Result<RgbImage> {
    let layout = loader.layout();
    if min_tile.0 >= max_tile.0 || min_tile.1 >= max_tile.1 {
        return Ok(RgbImage::new(0, 0));
    }

    let min_vec = Vector2::new(f64::from(min_tile.0), f64::from(min_tile.1));
    let max_vec = Vector2::new(f64::from(max_tile.0), f64::from(max_tile.1));
    let corner1 = layout.tile_to_pixel(&min_vec, zoom);
    let corner2 = layout.tile_to_pixel(&max_vec, zoom);
    let image_min_pixel = corner1.inf(&corner2);
    let size = corner1.sup(&corner2) - image_min_pixel;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut mosaic = RgbImage::new(size.y.round() as u32, size.x.round() as u32);

    for tile_x in min_tile.0..max_tile.0 {
        for tile_y in min_tile.1..max_tile.1 {
            let tile = loader.load(TileKey::new(tile_x, tile_y, zoom))?;

            let t = Vector2::new(f64::from(tile_x), f64::from(tile_y));
            let c1 = layout.tile_to_pixel(&t, zoom);
            let c2 = layout.tile_to_pixel(&(t + Vector2::new(1.0, 1.0)), zoom);
            let offset = c1.inf(&c2) - image_min_pixel;

            #[allow(clippy::cast_possible_truncation)]
            image::imageops::replace(
                &mut mosaic,
                &tile,
                offset.y.round() as i64,
                offset.x.round() as i64,
            );
        }
    }

    Ok(mosaic)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared in-memory loader used by the decorator tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::tile::filled_tile;

    /// Serves synthetically colored tiles and counts the loads.
    pub struct StaticLoader {
        pub layout: Layout,
        pub min_zoom: u32,
        pub max_zoom: u32,
        pub loads: AtomicUsize,
        pub fail_with: Option<fn(TileKey) -> TileError>,
    }

    impl StaticLoader {
        pub fn xyz(min_zoom: u32, max_zoom: u32) -> Self {
            Self {
                layout: Layout::xyz().expect("bundled layout"),
                min_zoom,
                max_zoom,
                loads: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        pub fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        /// Deterministic per-key fill color so tests can tell tiles apart.
        pub fn color_for(key: TileKey) -> [u8; 3] {
            [
                (key.x % 251) as u8,
                (key.y % 251) as u8,
                (key.zoom % 251) as u8,
            ]
        }
    }

    impl TileLoader for StaticLoader {
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
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail_with {
                return Err(fail(key));
            }
            Ok(filled_tile(
                self.layout.tile_edge_px(),
                Self::color_for(key),
            ))
        }
    }

    #[test]
    fn test_load_rect_mosaic_dimensions() {
        let loader = StaticLoader::xyz(0, 20);
        let mosaic = load_rect(&loader, (4, 10), (7, 12), 5).unwrap();
        assert_eq!(mosaic.dimensions(), (3 * 256, 2 * 256));
        assert_eq!(loader.load_count(), 6);
    }

    #[test]
    fn test_load_rect_places_tiles() {
        let loader = StaticLoader::xyz(0, 20);
        let mosaic = load_rect(&loader, (4, 10), (6, 12), 5).unwrap();
        // Top-left pixel belongs to tile (4, 10), bottom-right to (5, 11).
        assert_eq!(
            mosaic.get_pixel(0, 0).0,
            StaticLoader::color_for(TileKey::new(4, 10, 5))
        );
        assert_eq!(
            mosaic.get_pixel(511, 511).0,
            StaticLoader::color_for(TileKey::new(5, 11, 5))
        );
    }

    #[test]
    fn test_load_rect_empty_range() {
        let loader = StaticLoader::xyz(0, 20);
        let mosaic = load_rect(&loader, (4, 10), (4, 12), 5).unwrap();
        assert_eq!(mosaic.dimensions(), (0, 0));
    }

    #[test]
    fn test_zoom_for_picks_native_resolution() {
        let loader = StaticLoader::xyz(0, 20);
        let paris = Vector2::new(48.8566, 2.3522);
        // Roughly 0.3 m/px exists around zoom 19 at this latitude.
        let zoom = loader.zoom_for(&paris, 0.3).unwrap();
        assert!((18..=20).contains(&zoom), "got zoom {zoom}");
        // A coarse request stays coarse.
        let coarse = loader.zoom_for(&paris, 5000.0).unwrap();
        assert!((5..=7).contains(&coarse), "got zoom {coarse}");
        // The band clamps the answer.
        let clamped = StaticLoader::xyz(0, 3).zoom_for(&paris, 0.1).unwrap();
        assert_eq!(clamped, 3);
    }
}
