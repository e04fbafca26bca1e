//! Metric crops: resolution- and bearing-controlled image extraction.
//!
//! [`load_metric`] assembles the native-tile mosaic covering a requested
//! ground footprint, optionally pre-filters it, and resamples it through a
//! composed affine into the destination frame: an image centered on a
//! lat/lon anchor, rotated to a compass bearing, at a fixed ground
//! resolution in meters per pixel.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, SQRT_2};

use image::RgbImage;
use nalgebra::Vector2;
use tracing::debug;

use crate::affine::ScaledRigid2;
use crate::error::Result;
use crate::loader::{ensure_zoom, load_rect, TileLoader};

/// Sample `image` at a fractional `(row, col)` with bilinear weights and a
/// black border constant.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_bilinear(image: &RgbImage, row: f64, col: f64) -> [u8; 3] {
    let (width, height) = image.dimensions();
    let r0 = row.floor();
    let c0 = col.floor();
    let fr = row - r0;
    let fc = col - c0;

    let mut accum = [0.0f64; 3];
    for (dr, dc, weight) in [
        (0.0, 0.0, (1.0 - fr) * (1.0 - fc)),
        (0.0, 1.0, (1.0 - fr) * fc),
        (1.0, 0.0, fr * (1.0 - fc)),
        (1.0, 1.0, fr * fc),
    ] {
        if weight == 0.0 {
            continue;
        }
        let r = r0 + dr;
        let c = c0 + dc;
        if r < 0.0 || c < 0.0 || r >= f64::from(height) || c >= f64::from(width) {
            continue;
        }
        let pixel = image.get_pixel(c as u32, r as u32).0;
        for (acc, sample) in accum.iter_mut().zip(pixel) {
            *acc += weight * f64::from(sample);
        }
    }
    accum.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

/// Inflation factor keeping the rotated destination rectangle inside the
/// fetched source rectangle.
fn rotation_inflation(bearing_rad: f64) -> f64 {
    let mut remainder = bearing_rad % FRAC_PI_2;
    if remainder < 0.0 {
        remainder += FRAC_PI_2;
    }
    SQRT_2 * (remainder + FRAC_PI_4).sin()
}

/// Load an image in metric pose from `loader`.
///
/// # Arguments
/// * `latlon` - `(lat, lon)` degrees, center of the returned image.
/// * `bearing` - orientation of the returned image, degrees clockwise from
///   north.
/// * `meters_per_pixel` - ground resolution of the returned image.
/// * `shape` - `(height, width)` of the returned image in pixels.
/// * `zoom` - source zoom level; picked from the resolution when `None`.
///
/// # Errors
/// Fails with [`crate::TileError::ZoomOutOfRange`] for an explicit zoom
/// outside the loader's band and propagates tile and projection failures.
pub fn load_metric(
    loader: &dyn TileLoader,
    latlon: &Vector2<f64>,
    bearing: f64,
    meters_per_pixel: f64,
    shape: (u32, u32),
    zoom: Option<u32>,
) -> Result<RgbImage> {
    let (height, width) = shape;
    if height == 0 || width == 0 {
        return Ok(RgbImage::new(width, height));
    }

    let zoom = match zoom {
        Some(zoom) => {
            ensure_zoom(zoom, loader.min_zoom(), loader.max_zoom())?;
            zoom
        }
        None => loader.zoom_for(latlon, meters_per_pixel)?,
    };
    let layout = loader.layout();

    // Treat the source resolution as isotropic around the anchor.
    let pixels_per_meter = layout.pixels_per_meter_at_latlon(latlon, zoom)?;
    let pixels_per_meter = 0.5 * (pixels_per_meter.x + pixels_per_meter.y);

    let dest_pixels = Vector2::new(f64::from(height), f64::from(width));
    let src_meters = dest_pixels * meters_per_pixel;
    let src_pixels = src_meters * pixels_per_meter * rotation_inflation(bearing.to_radians());

    let center_pixel = layout.epsg4326_to_pixel(latlon, zoom)?;
    let corner1 = layout.pixel_to_tile(&(center_pixel - src_pixels / 2.0), zoom);
    let corner2 = layout.pixel_to_tile(&(center_pixel + src_pixels / 2.0), zoom);
    let world_tiles = f64::from(1u32 << zoom.min(31));
    let clamp = |v: f64| v.clamp(0.0, world_tiles);
    let lower = corner1.inf(&corner2).map(clamp);
    let upper = corner1.sup(&corner2).map(clamp);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let min_tile = (lower.x.floor() as u32, lower.y.floor() as u32);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_tile = (
        (upper.x.floor() as u32 + 1).min(1u32 << zoom.min(31)),
        (upper.y.floor() as u32 + 1).min(1u32 << zoom.min(31)),
    );
    if min_tile.0 >= max_tile.0 || min_tile.1 >= max_tile.1 {
        return Ok(RgbImage::new(width, height));
    }

    debug!(
        lat = latlon.x,
        lon = latlon.y,
        zoom,
        tiles_x = max_tile.0 - min_tile.0,
        tiles_y = max_tile.1 - min_tile.1,
        "assembling metric crop"
    );
    let mut source = load_rect(loader, min_tile, max_tile, zoom)?;

    // Pre-filter before downsampling.
    if pixels_per_meter > 1.0 / meters_per_pixel {
        let sigma = (pixels_per_meter * meters_per_pixel - 1.0) / 2.0;
        if sigma > 1e-3 {
            #[allow(clippy::cast_possible_truncation)]
            {
                source = image::imageops::blur(&source, sigma as f32);
            }
        }
    }

    let min_vec = Vector2::new(f64::from(min_tile.0), f64::from(min_tile.1));
    let max_vec = Vector2::new(f64::from(max_tile.0), f64::from(max_tile.1));
    let source_min_pixel = layout
        .tile_to_pixel(&min_vec, zoom)
        .inf(&layout.tile_to_pixel(&max_vec, zoom));

    let dest_center = dest_pixels / 2.0;
    let source_center = center_pixel - source_min_pixel;
    let angle = -bearing.to_radians() + layout.meridian_convergence(latlon)?;

    let transform = ScaledRigid2::from_translation(source_center)
        * ScaledRigid2::from_scale(Vector2::repeat(pixels_per_meter))
        * ScaledRigid2::from_angle(angle, Vector2::zeros(), Vector2::repeat(1.0))
        * ScaledRigid2::from_uniform_scale(meters_per_pixel)
        * ScaledRigid2::from_translation(-dest_center);
    let matrix = transform.to_matrix();

    let mut dest = RgbImage::new(width, height);
    for row in 0..height {
        let r = f64::from(row);
        let row_term_0 = matrix[(0, 0)] * r + matrix[(0, 2)];
        let row_term_1 = matrix[(1, 0)] * r + matrix[(1, 2)];
        for col in 0..width {
            let c = f64::from(col);
            let src_row = row_term_0 + matrix[(0, 1)] * c;
            let src_col = row_term_1 + matrix[(1, 1)] * c;
            dest.put_pixel(col, row, image::Rgb(sample_bilinear(&source, src_row, src_col)));
        }
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TileError;
    use crate::layout::Layout;
    use crate::loader::testing::StaticLoader;
    use crate::loader::TileLoader;
    use crate::tile::{Tile, TileKey};
    use std::sync::atomic::AtomicUsize;

    /// Tiles whose red/green channels encode the in-tile row/column.
    struct RampLoader {
        layout: Layout,
    }

    impl TileLoader for RampLoader {
        fn layout(&self) -> &Layout {
            &self.layout
        }
        fn min_zoom(&self) -> u32 {
            0
        }
        fn max_zoom(&self) -> u32 {
            20
        }
        fn load(&self, _key: TileKey) -> crate::error::Result<Tile> {
            let mut tile = Tile::new(256, 256);
            for (col, row, pixel) in tile.enumerate_pixels_mut() {
                *pixel = image::Rgb([row as u8, col as u8, 0]);
            }
            Ok(tile)
        }
    }

    #[test]
    fn test_rotation_inflation_bounds() {
        // Axis-aligned bearings need no inflation; 45 degrees needs sqrt 2.
        for bearing in [0.0, 90.0f64, 180.0, -90.0] {
            let f = rotation_inflation(bearing.to_radians());
            assert!((f - 1.0).abs() < 1e-9, "bearing {bearing}: {f}");
        }
        let f45 = rotation_inflation(45.0f64.to_radians());
        assert!((f45 - SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_shape_yields_empty_image() {
        let loader = StaticLoader::xyz(0, 20);
        let image = load_metric(
            &loader,
            &Vector2::new(48.8566, 2.3522),
            0.0,
            1.0,
            (0, 64),
            Some(15),
        )
        .unwrap();
        assert_eq!(image.dimensions(), (64, 0));
    }

    #[test]
    fn test_explicit_zoom_out_of_range() {
        let loader = StaticLoader::xyz(0, 10);
        let err = load_metric(
            &loader,
            &Vector2::new(48.8566, 2.3522),
            0.0,
            1.0,
            (64, 64),
            Some(15),
        )
        .unwrap_err();
        assert!(matches!(err, TileError::ZoomOutOfRange { .. }));
    }

    #[test]
    fn test_native_resolution_crop_is_pixel_aligned() {
        let loader = RampLoader {
            layout: Layout::xyz().unwrap(),
        };
        let zoom = 15;
        // Anchor exactly on a tile center so the source grid aligns.
        let layout = loader.layout().clone();
        let anchor_tile = layout
            .epsg4326_to_tile(&Vector2::new(48.8566, 2.3522), zoom)
            .unwrap()
            .map(f64::floor)
            + Vector2::new(0.5, 0.5);
        let latlon = layout.tile_to_epsg4326(&anchor_tile, zoom).unwrap();

        let ppm = layout.pixels_per_meter_at_latlon(&latlon, zoom).unwrap();
        let meters_per_pixel = 2.0 / (ppm.x + ppm.y);

        let crop = load_metric(&loader, &latlon, 0.0, meters_per_pixel, (64, 64), Some(zoom))
            .unwrap();
        assert_eq!(crop.dimensions(), (64, 64));

        // At native resolution and bearing 0 the crop is a pure window:
        // in-tile row 128 - 32 + r, column 128 - 32 + c.
        for (r, c) in [(0u32, 0u32), (13, 40), (63, 63)] {
            let pixel = crop.get_pixel(c, r).0;
            let expected_row = 96 + r;
            let expected_col = 96 + c;
            assert!(
                (i32::from(pixel[0]) - expected_row as i32).abs() <= 1,
                "row channel at ({r},{c}): {pixel:?}, expected {expected_row}"
            );
            assert!(
                (i32::from(pixel[1]) - expected_col as i32).abs() <= 1,
                "col channel at ({r},{c}): {pixel:?}, expected {expected_col}"
            );
        }
    }

    #[test]
    fn test_rotated_crop_shape_and_coverage() {
        let loader = StaticLoader {
            layout: Layout::xyz().unwrap(),
            min_zoom: 0,
            max_zoom: 20,
            loads: AtomicUsize::new(0),
            fail_with: None,
        };
        let crop = load_metric(
            &loader,
            &Vector2::new(48.8566, 2.3522),
            37.0,
            2.0,
            (96, 128),
            Some(15),
        )
        .unwrap();
        assert_eq!(crop.dimensions(), (128, 96));
        // The anchor sits mid-image on a real tile, never on border fill.
        let center = crop.get_pixel(64, 48).0;
        assert_ne!(center, [0, 0, 0]);
    }

    #[test]
    fn test_zoom_picked_from_resolution() {
        let loader = StaticLoader::xyz(0, 20);
        let crop = load_metric(
            &loader,
            &Vector2::new(48.8566, 2.3522),
            0.0,
            1000.0,
            (16, 16),
            None,
        )
        .unwrap();
        assert_eq!(crop.dimensions(), (16, 16));
    }
}
