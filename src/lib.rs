#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`layout`]: Tile <-> CRS <-> pixel <-> lat/lon conversions
//! - [`loader`]: [`TileLoader`] capability, sources, caches and decorators
//! - [`crop`]: Metric crop assembly via [`load_metric`]
//! - [`url`]: Tile URL/path template expansion
//! - [`projection`]: EPSG-described CRS values backed by `proj4rs`
//! - [`geo`]: Compass frames and small-scale geodesy helpers
//! - [`affine`]: 2-D/3-D rotation, rigid and scaled-rigid transforms
//! - [`config`]: Declarative pipeline configuration
//! - [`tile`]: The raster tile type and its addressing key
//! - [`error`]: The shared error taxonomy

// ============================================================================
// Public modules
// ============================================================================

pub mod affine;
pub mod config;
pub mod crop;
pub mod error;
pub mod geo;
pub mod layout;
pub mod loader;
pub mod projection;
pub mod tile;
pub mod url;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Result, TileError};

// ============================================================================
// Core Types
// ============================================================================

pub use layout::Layout;
pub use tile::{Tile, TileKey};

// ============================================================================
// Loaders & Caches
// ============================================================================
// Primary API: HttpSource::builder(url, layout).build() plus the cache
// decorators in `loader`.

pub use loader::{
    load_rect, write_pack, CachedTileLoader, DiskCache, HttpSource, LruTileCache, PackReader,
    TileCache, TileLoader, WithDefault, ZoomUpCachedLoader,
};

// ============================================================================
// Metric Crops
// ============================================================================

pub use crop::load_metric;

// ============================================================================
// Projections & Frames
// ============================================================================

pub use geo::{CompassAxes, CompassDirection, NamedAxesTransformation};
pub use projection::{AreaOfUse, Projection};

// ============================================================================
// Affine Transforms
// ============================================================================

pub use affine::{Rigid2, Rigid3, Rotation2, Rotation3, ScaledRigid2, ScaledRigid3};

// ============================================================================
// URL Templates
// ============================================================================

pub use url::{expand_template, quadkey};

// ============================================================================
// Configuration
// ============================================================================

pub use config::PipelineConfig;
