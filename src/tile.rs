//! The raster tile type and its addressing key.

use std::fmt;

use image::{DynamicImage, RgbImage};

use crate::error::{Result, TileError};

/// A raster map tile: `tile_edge_px x tile_edge_px` RGB samples.
pub type Tile = RgbImage;

/// Address of a tile within a layout: column, row and zoom level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
    pub zoom: u32,
}

impl TileKey {
    #[must_use]
    pub fn new(x: u32, y: u32, zoom: u32) -> Self {
        Self { x, y, zoom }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Convert a decoded image into a tile, enforcing the layout's edge length.
///
/// Accepts 3- and 4-channel sources and drops alpha; anything else is an
/// invalid tile.
///
/// # Errors
/// Fails with [`TileError::InvalidTile`] on wrong dimensions or an
/// unsupported channel count.
pub fn to_tile(image: DynamicImage, tile_edge_px: u32) -> Result<Tile> {
    let channels = image.color().channel_count();
    if channels != 3 && channels != 4 {
        return Err(TileError::InvalidTile(format!(
            "expected 3 or 4 color channels, got {channels}"
        )));
    }
    if image.width() != tile_edge_px || image.height() != tile_edge_px {
        return Err(TileError::InvalidTile(format!(
            "expected tile shape {tile_edge_px}x{tile_edge_px}, got {}x{}",
            image.width(),
            image.height()
        )));
    }
    Ok(image.to_rgb8())
}

/// Decode raw encoded bytes into a tile of the expected edge length.
///
/// # Errors
/// Fails with [`TileError::Decode`] if the bytes are not a decodable image
/// and [`TileError::InvalidTile`] if the decoded raster has the wrong shape.
pub fn decode_tile(bytes: &[u8], tile_edge_px: u32) -> Result<Tile> {
    let image = image::load_from_memory(bytes).map_err(|e| TileError::Decode(e.to_string()))?;
    to_tile(image, tile_edge_px)
}

/// A tile filled with one color.
#[must_use]
pub fn filled_tile(tile_edge_px: u32, color: [u8; 3]) -> Tile {
    RgbImage::from_pixel(tile_edge_px, tile_edge_px, image::Rgb(color))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(TileKey::new(5, 7, 12).to_string(), "12/5/7");
    }

    #[test]
    fn test_to_tile_drops_alpha() {
        let rgba = image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 128]));
        let tile = to_tile(DynamicImage::ImageRgba8(rgba), 8).unwrap();
        assert_eq!(tile.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_to_tile_rejects_wrong_shape() {
        let rgb = RgbImage::new(8, 4);
        let err = to_tile(DynamicImage::ImageRgb8(rgb), 8).unwrap_err();
        assert!(matches!(err, TileError::InvalidTile(_)));
    }

    #[test]
    fn test_to_tile_rejects_single_channel() {
        let gray = image::GrayImage::new(8, 8);
        let err = to_tile(DynamicImage::ImageLuma8(gray), 8).unwrap_err();
        assert!(matches!(err, TileError::InvalidTile(_)));
    }

    #[test]
    fn test_decode_tile_rejects_garbage() {
        let err = decode_tile(&[0, 1, 2, 3], 8).unwrap_err();
        assert!(matches!(err, TileError::Decode(_)));
    }

    #[test]
    fn test_filled_tile() {
        let tile = filled_tile(4, [255, 255, 255]);
        assert_eq!(tile.dimensions(), (4, 4));
        assert!(tile.pixels().all(|p| p.0 == [255, 255, 255]));
    }
}
