//! Error taxonomy shared by every loader, cache and conversion in the crate.

use std::path::PathBuf;

use crate::tile::TileKey;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TileError>;

/// All failure modes of the tile pipeline.
///
/// Cache decorators recover from [`TileError::CacheMiss`],
/// [`TileError::LoadFile`] and [`TileError::Decode`] by falling through to
/// their inner loader; [`crate::loader::WithDefault`] additionally recovers
/// from [`TileError::NotFound`] by substituting a fill tile. Everything else
/// surfaces to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("zoom level {zoom} is outside the supported range [{min_zoom}, {max_zoom}]")]
    ZoomOutOfRange {
        zoom: u32,
        min_zoom: u32,
        max_zoom: u32,
    },

    #[error("tile {key} not found in this source")]
    NotFound { key: TileKey },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("failed to decode tile image: {0}")]
    Decode(String),

    #[error("invalid tile: {0}")]
    InvalidTile(String),

    #[error("cache answered for a tile it could not produce")]
    CacheMiss,

    #[error("failed to write {path}: {message}")]
    WriteFile { path: PathBuf, message: String },

    #[error("failed to load {path}: {message}")]
    LoadFile { path: PathBuf, message: String },

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    #[error("invalid compass direction: {0}")]
    InvalidAxis(String),

    #[error("named axes do not correspond: {0}")]
    IncompatibleAxes(String),

    #[error("projection error: {0}")]
    Projection(String),
}

impl TileError {
    /// Build a [`TileError::ZoomOutOfRange`] after a bounds check.
    #[must_use]
    pub fn zoom_out_of_range(zoom: u32, min_zoom: u32, max_zoom: u32) -> Self {
        TileError::ZoomOutOfRange {
            zoom,
            min_zoom,
            max_zoom,
        }
    }

    /// True for the failures a fill-tile fallback may absorb: the source
    /// answered but has no usable tile.
    #[must_use]
    pub fn is_missing_tile(&self) -> bool {
        matches!(
            self,
            TileError::NotFound { .. }
                | TileError::Decode(_)
                | TileError::LoadFile { .. }
                | TileError::CacheMiss
        )
    }

    /// True for failures a cache decorator treats as "entry unusable, refetch".
    #[must_use]
    pub fn is_cache_failure(&self) -> bool {
        matches!(
            self,
            TileError::CacheMiss | TileError::LoadFile { .. } | TileError::Decode(_)
        )
    }
}

impl From<image::ImageError> for TileError {
    fn from(err: image::ImageError) -> Self {
        TileError::Decode(err.to_string())
    }
}
