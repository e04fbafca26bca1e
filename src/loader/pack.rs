//! Pack files: many encoded tiles concatenated into one `images.dat` with
//! a sidecar `images-meta.npz` index.
//!
//! The sidecar is a NumPy archive with four little-endian `int64` arrays:
//! `zoom`, `x`, `y` (length `N`) and `offset` (length `N + 1`); tile `i`
//! occupies bytes `[offset[i], offset[i + 1])` of the data file.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{ensure_zoom, TileLoader};
use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::tile::{decode_tile, Tile, TileKey};

const DATA_FILE: &str = "images.dat";
const META_FILE: &str = "images-meta.npz";

fn load_file_error(path: &Path, message: impl Into<String>) -> TileError {
    TileError::LoadFile {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn write_file_error(path: &Path, message: impl Into<String>) -> TileError {
    TileError::WriteFile {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Parse one little-endian `int64` `.npy` member.
fn read_npy_i64<R: Read>(mut reader: R, path: &Path, name: &str) -> Result<Vec<i64>> {
    let err = |message: String| load_file_error(path, format!("{name}: {message}"));

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(|e| err(e.to_string()))?;
    if &magic[..6] != b"\x93NUMPY" {
        return Err(err("not an npy array".into()));
    }
    let header_len = if magic[6] == 1 {
        u64::from(
            reader
                .read_u16::<LittleEndian>()
                .map_err(|e| err(e.to_string()))?,
        )
    } else {
        u64::from(
            reader
                .read_u32::<LittleEndian>()
                .map_err(|e| err(e.to_string()))?,
        )
    };

    let mut header = vec![0u8; header_len as usize];
    reader
        .read_exact(&mut header)
        .map_err(|e| err(e.to_string()))?;
    let header = String::from_utf8_lossy(&header);
    if !header.contains("'<i8'") {
        return Err(err(format!("expected little-endian int64 data, got {header}")));
    }
    if header.contains("'fortran_order': True") {
        return Err(err("fortran-ordered arrays are not supported".into()));
    }
    let count: usize = header
        .split('(')
        .nth(1)
        .and_then(|rest| rest.split([',', ')']).next())
        .and_then(|digits| digits.trim().parse().ok())
        .ok_or_else(|| err(format!("cannot parse shape from header {header}")))?;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(
            reader
                .read_i64::<LittleEndian>()
                .map_err(|e| err(e.to_string()))?,
        );
    }
    Ok(values)
}

/// Serialize one little-endian `int64` `.npy` member.
fn write_npy_i64<W: Write>(mut writer: W, values: &[i64]) -> std::io::Result<()> {
    let header_body = format!(
        "{{'descr': '<i8', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // Pad the 10-byte preamble plus header to a 64-byte boundary.
    let unpadded = 10 + header_body.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header = format!("{header_body}{}\n", " ".repeat(padding));

    writer.write_all(b"\x93NUMPY\x01\x00")?;
    writer.write_u16::<LittleEndian>(header.len() as u16)?;
    writer.write_all(header.as_bytes())?;
    for value in values {
        writer.write_i64::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Random-access reader over a pack directory.
///
/// The backing data file is opened lazily on the first `load` and guarded
/// by a mutex; [`PackReader::reset_after_fork`] drops the descriptor so a
/// forked child reopens its own.
#[derive(Debug)]
pub struct PackReader {
    dir: PathBuf,
    layout: Layout,
    index: AHashMap<TileKey, (u64, u64)>,
    min_zoom: u32,
    max_zoom: u32,
    file: Mutex<Option<File>>,
}

impl PackReader {
    /// Parse the pack metadata under `dir`.
    ///
    /// # Errors
    /// Fails with [`TileError::LoadFile`] on a missing data file, an
    /// unreadable archive, or an index that is empty, negative or not
    /// strictly increasing.
    pub fn new(dir: impl Into<PathBuf>, layout: Layout) -> Result<Self> {
        let dir = dir.into();
        let data_path = dir.join(DATA_FILE);
        if !data_path.exists() {
            return Err(load_file_error(&data_path, "file not found"));
        }

        let meta_path = dir.join(META_FILE);
        let meta_file =
            File::open(&meta_path).map_err(|e| load_file_error(&meta_path, e.to_string()))?;
        let mut archive =
            ZipArchive::new(meta_file).map_err(|e| load_file_error(&meta_path, e.to_string()))?;

        let mut member = |name: &str| -> Result<Vec<i64>> {
            let entry = archive
                .by_name(name)
                .map_err(|e| load_file_error(&meta_path, format!("{name}: {e}")))?;
            read_npy_i64(entry, &meta_path, name)
        };
        let zoom = member("zoom.npy")?;
        let x = member("x.npy")?;
        let y = member("y.npy")?;
        let offset = member("offset.npy")?;

        if zoom.is_empty() {
            return Err(load_file_error(&meta_path, "pack contains no tiles"));
        }
        if zoom.len() != x.len() || zoom.len() != y.len() || offset.len() != zoom.len() + 1 {
            return Err(load_file_error(
                &meta_path,
                format!(
                    "array lengths disagree: zoom={} x={} y={} offset={}",
                    zoom.len(),
                    x.len(),
                    y.len(),
                    offset.len()
                ),
            ));
        }

        let as_coord = |value: i64, name: &str| -> Result<u32> {
            u32::try_from(value)
                .map_err(|_| load_file_error(&meta_path, format!("{name} value {value} out of range")))
        };

        let mut index = AHashMap::with_capacity(zoom.len());
        let mut min_zoom = u32::MAX;
        let mut max_zoom = 0;
        for i in 0..zoom.len() {
            if offset[i + 1] <= offset[i] || offset[i] < 0 {
                return Err(load_file_error(
                    &meta_path,
                    format!("offsets are not strictly increasing at index {i}"),
                ));
            }
            let key = TileKey::new(
                as_coord(x[i], "x")?,
                as_coord(y[i], "y")?,
                as_coord(zoom[i], "zoom")?,
            );
            min_zoom = min_zoom.min(key.zoom);
            max_zoom = max_zoom.max(key.zoom);
            #[allow(clippy::cast_sign_loss)]
            index.insert(key, (offset[i] as u64, (offset[i + 1] - offset[i]) as u64));
        }
        debug!(tiles = index.len(), min_zoom, max_zoom, dir = %dir.display(), "opened pack");

        Ok(Self {
            dir,
            layout,
            index,
            min_zoom,
            max_zoom,
            file: Mutex::new(None),
        })
    }

    /// Whether the pack holds a tile.
    #[must_use]
    pub fn contains(&self, key: TileKey) -> bool {
        self.index.contains_key(&key)
    }

    /// Number of tiles in the pack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn read_bytes(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let data_path = self.dir.join(DATA_FILE);
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard =
                Some(File::open(&data_path).map_err(|e| load_file_error(&data_path, e.to_string()))?);
        }
        let file = guard.as_mut().expect("handle was just opened");

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| load_file_error(&data_path, format!("seek to {offset} failed: {e}")))?;
        #[allow(clippy::cast_possible_truncation)]
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).map_err(|e| {
            load_file_error(
                &data_path,
                format!("reading {length} bytes at {offset} failed: {e}"),
            )
        })?;
        Ok(buffer)
    }
}

impl TileLoader for PackReader {
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
        let (offset, length) = *self
            .index
            .get(&key)
            .ok_or(TileError::NotFound { key })?;
        let bytes = self.read_bytes(offset, length)?;
        decode_tile(&bytes, self.layout.tile_edge_px())
    }

    fn reset_after_fork(&self) {
        *self.file.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Build a pack from a `{zoom}/{x}/{y}.<ext>` tile tree.
///
/// Tiles are sorted by `(zoom, x, y)` and concatenated verbatim; the
/// returned count is the number of packed tiles.
///
/// # Errors
/// Fails with [`TileError::LoadFile`] / [`TileError::WriteFile`] on I/O
/// problems and when no tiles are found.
pub fn write_pack(input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<usize> {
    let input_dir = input_dir.as_ref();
    let output_dir = output_dir.as_ref();

    let mut tiles: Vec<(TileKey, PathBuf)> = Vec::new();
    for entry in WalkDir::new(input_dir).min_depth(3).max_depth(3) {
        let entry = entry.map_err(|e| load_file_error(input_dir, e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let parsed = (|| {
            let y = path.file_stem()?.to_str()?.parse().ok()?;
            let x = path.parent()?.file_name()?.to_str()?.parse().ok()?;
            let zoom = path.parent()?.parent()?.file_name()?.to_str()?.parse().ok()?;
            Some(TileKey::new(x, y, zoom))
        })();
        match parsed {
            Some(key) => tiles.push((key, path.to_path_buf())),
            None => warn!(path = %path.display(), "skipping file outside the zoom/x/y scheme"),
        }
    }
    if tiles.is_empty() {
        return Err(load_file_error(input_dir, "no tiles found"));
    }
    tiles.sort_by_key(|(key, _)| (key.zoom, key.x, key.y));

    fs::create_dir_all(output_dir).map_err(|e| write_file_error(output_dir, e.to_string()))?;
    let data_path = output_dir.join(DATA_FILE);
    let mut data_file =
        File::create(&data_path).map_err(|e| write_file_error(&data_path, e.to_string()))?;

    let mut offsets: Vec<i64> = Vec::with_capacity(tiles.len() + 1);
    offsets.push(0);
    for (_, path) in &tiles {
        let bytes = fs::read(path).map_err(|e| load_file_error(path, e.to_string()))?;
        data_file
            .write_all(&bytes)
            .map_err(|e| write_file_error(&data_path, e.to_string()))?;
        offsets.push(offsets.last().expect("offsets start non-empty") + bytes.len() as i64);
    }

    let meta_path = output_dir.join(META_FILE);
    let meta_file =
        File::create(&meta_path).map_err(|e| write_file_error(&meta_path, e.to_string()))?;
    let mut archive = ZipWriter::new(meta_file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut member = |name: &str, values: &[i64]| -> Result<()> {
        archive
            .start_file(name, options)
            .map_err(|e| write_file_error(&meta_path, format!("{name}: {e}")))?;
        write_npy_i64(&mut archive, values)
            .map_err(|e| write_file_error(&meta_path, format!("{name}: {e}")))
    };
    member(
        "zoom.npy",
        &tiles.iter().map(|(k, _)| i64::from(k.zoom)).collect::<Vec<_>>(),
    )?;
    member(
        "x.npy",
        &tiles.iter().map(|(k, _)| i64::from(k.x)).collect::<Vec<_>>(),
    )?;
    member(
        "y.npy",
        &tiles.iter().map(|(k, _)| i64::from(k.y)).collect::<Vec<_>>(),
    )?;
    member("offset.npy", &offsets)?;
    archive
        .finish()
        .map_err(|e| write_file_error(&meta_path, e.to_string()))?;

    debug!(tiles = tiles.len(), output = %output_dir.display(), "wrote pack");
    Ok(tiles.len())
}
