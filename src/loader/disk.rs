//! On-disk persistent tile cache with templated paths and atomic writes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, SystemTime};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::ImageEncoder;
use tracing::debug;

use super::{ensure_zoom, TileCache, TileLoader};
use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::tile::{decode_tile, Tile, TileKey};
use crate::url::expand_template;

const JPEG_QUALITY: u8 = 90;

/// Tiles stored as individual encoded images under a templated path.
///
/// A path without placeholders gets `{zoom}/{x}/{y}.jpg` appended; paths
/// with placeholders honor the full vocabulary of [`crate::url`]. Writes
/// are atomic (temp file + rename) and serialized against reads through a
/// reader-writer lock; a freshly modified file is not read until
/// `wait_after_last_modified` has passed, which debounces concurrent
/// writers in other processes.
pub struct DiskCache {
    path_template: String,
    layout: Layout,
    min_zoom: u32,
    max_zoom: u32,
    wait_after_last_modified: Duration,
    lock: RwLock<()>,
}

impl DiskCache {
    /// Create a cache rooted at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, layout: Layout, min_zoom: u32, max_zoom: u32) -> Self {
        let path = path.as_ref();
        let path_template = if path.to_string_lossy().contains('{') {
            path.to_string_lossy().into_owned()
        } else {
            path.join("{zoom}")
                .join("{x}")
                .join("{y}.jpg")
                .to_string_lossy()
                .into_owned()
        };
        Self {
            path_template,
            layout,
            min_zoom,
            max_zoom,
            wait_after_last_modified: Duration::from_secs(1),
            lock: RwLock::new(()),
        }
    }

    /// Override the modification-time debounce (default one second).
    #[must_use]
    pub fn with_wait_after_last_modified(mut self, wait: Duration) -> Self {
        self.wait_after_last_modified = wait;
        self
    }

    /// The expanded storage path of one tile.
    #[must_use]
    pub fn path_for(&self, key: TileKey) -> PathBuf {
        PathBuf::from(expand_template(&self.path_template, &self.layout, key))
    }

    /// The configured path template.
    #[must_use]
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    fn debounce(&self, path: &Path) {
        let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
            return;
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age < self.wait_after_last_modified {
            thread::sleep(self.wait_after_last_modified - age);
        }
    }

    fn read_validated(&self, path: &Path) -> Result<Vec<u8>> {
        let bytes = fs::read(path).map_err(|e| TileError::LoadFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if extension == "jpg" || extension == "jpeg" {
            if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
                return Err(TileError::Decode(format!(
                    "jpeg {} has invalid start marker {:02x} {:02x}",
                    path.display(),
                    bytes.first().copied().unwrap_or(0),
                    bytes.get(1).copied().unwrap_or(0),
                )));
            }
            if bytes[bytes.len() - 2] != 0xFF || bytes[bytes.len() - 1] != 0xD9 {
                return Err(TileError::Decode(format!(
                    "jpeg {} has invalid end marker {:02x} {:02x}",
                    path.display(),
                    bytes[bytes.len() - 2],
                    bytes[bytes.len() - 1],
                )));
            }
        }
        Ok(bytes)
    }

    fn encode(&self, tile: &Tile, path: &Path) -> Result<Vec<u8>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mut buffer = Vec::new();
        let (width, height) = tile.dimensions();
        let encode_result = if extension == "png" {
            PngEncoder::new(&mut buffer).write_image(
                tile.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )
        } else {
            JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).write_image(
                tile.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )
        };
        encode_result.map_err(|e| TileError::WriteFile {
            path: path.to_path_buf(),
            message: format!("encoding failed: {e}"),
        })?;
        Ok(buffer)
    }
}

impl TileLoader for DiskCache {
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
        let path = self.path_for(key);

        let _read = self.lock.read().unwrap_or_else(|e| e.into_inner());
        let bytes = self.read_validated(&path)?;
        self.debounce(&path);
        decode_tile(&bytes, self.layout.tile_edge_px())
    }
}

impl TileCache for DiskCache {
    fn contains(&self, key: TileKey) -> bool {
        self.path_for(key).exists()
    }

    fn save(&self, tile: &Tile, key: TileKey) -> Result<()> {
        let path = self.path_for(key);
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let encoded = self.encode(tile, &path)?;

        let _write = self.lock.write().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&parent).map_err(|e| TileError::WriteFile {
            path: path.clone(),
            message: format!("cannot create parent directory: {e}"),
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| {
            TileError::WriteFile {
                path: path.clone(),
                message: format!("cannot create temp file: {e}"),
            }
        })?;
        temp.write_all(&encoded).map_err(|e| TileError::WriteFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        temp.persist(&path).map_err(|e| TileError::WriteFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), key = %key, "saved tile");
        Ok(())
    }
}
