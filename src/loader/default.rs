//! Fallback decorator substituting a fill tile for missing imagery.

use std::sync::Arc;

use tracing::debug;

use super::{ensure_zoom, TileLoader};
use crate::error::Result;
use crate::layout::Layout;
use crate::tile::{filled_tile, Tile, TileKey};

/// Wraps a loader and turns "no usable tile here" answers (`NotFound`,
/// `Decode`, `LoadFile`, `CacheMiss`) into a solid-color tile.
///
/// Zoom-band violations and transport failures still propagate.
pub struct WithDefault {
    loader: Arc<dyn TileLoader>,
    color: [u8; 3],
}

impl WithDefault {
    /// Wrap `loader`, filling gaps with white.
    #[must_use]
    pub fn new(loader: Arc<dyn TileLoader>) -> Self {
        Self {
            loader,
            color: [255, 255, 255],
        }
    }

    /// Use a different fill color.
    #[must_use]
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn color(&self) -> [u8; 3] {
        self.color
    }
}

impl TileLoader for WithDefault {
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
        ensure_zoom(key.zoom, self.min_zoom(), self.max_zoom())?;
        match self.loader.load(key) {
            Ok(tile) => Ok(tile),
            Err(err) if err.is_missing_tile() => {
                debug!(%key, error = %err, "substituting fill tile");
                Ok(filled_tile(self.layout().tile_edge_px(), self.color))
            }
            Err(err) => Err(err),
        }
    }

    fn reset_after_fork(&self) {
        self.loader.reset_after_fork();
    }
}
