//! Declarative pipeline configuration.
//!
//! A JSON document names tile sources and the cache/fallback wiring around
//! them; [`PipelineConfig::build`] assembles the loader chains. Example:
//!
//! ```json
//! {
//!   "headers": { "User-Agent": "metrotile-demo" },
//!   "sources": {
//!     "osm": {
//!       "url": "https://tile.openstreetmap.org/{zoom}/{x}/{y}.png",
//!       "min_zoom": 0,
//!       "max_zoom": 19,
//!       "disk_cache": "/var/tiles/osm",
//!       "lru_capacity": 256,
//!       "fill_color": [255, 255, 255]
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::loader::{CachedTileLoader, HttpSource, TileLoader, WithDefault};

/// One configured HTTP tile source and its cache wiring.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// URL template with `{...}` placeholders.
    pub url: String,
    #[serde(default)]
    pub min_zoom: u32,
    /// Highest served zoom level.
    pub max_zoom: u32,
    /// Total request attempts per tile.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Seconds between attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Extra request headers for this source only.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Root of an on-disk cache; no disk level when absent.
    #[serde(default)]
    pub disk_cache: Option<String>,
    /// Size of an in-memory LRU level; no memory level when absent.
    #[serde(default)]
    pub lru_capacity: Option<usize>,
    /// Substitute a fill tile of this color for missing imagery.
    #[serde(default)]
    pub fill_color: Option<[u8; 3]>,
}

fn default_retries() -> u32 {
    10
}

fn default_retry_delay() -> f64 {
    1.5
}

/// A set of named sources sharing optional default headers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl PipelineConfig {
    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    /// Fails with [`TileError::InvalidLayout`] on malformed JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| TileError::InvalidLayout(format!("invalid pipeline config: {e}")))
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// Fails with [`TileError::LoadFile`] when the file cannot be read and
    /// [`TileError::InvalidLayout`] on malformed JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TileError::LoadFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Build every configured loader chain over the XYZ layout, keyed by
    /// source name.
    ///
    /// # Errors
    /// Propagates layout and client construction failures.
    pub fn build(&self) -> Result<BTreeMap<String, Arc<dyn TileLoader>>> {
        let mut loaders: BTreeMap<String, Arc<dyn TileLoader>> = BTreeMap::new();
        for (name, source) in &self.sources {
            loaders.insert(name.clone(), self.build_source(source)?);
        }
        Ok(loaders)
    }

    fn build_source(&self, source: &SourceConfig) -> Result<Arc<dyn TileLoader>> {
        let mut builder = HttpSource::builder(source.url.clone(), Layout::xyz()?)
            .zoom_range(source.min_zoom, source.max_zoom)
            .retries(source.retries)
            .retry_delay(std::time::Duration::from_secs_f64(source.retry_delay));
        for (header_name, value) in self.headers.iter().chain(&source.headers) {
            builder = builder.header(header_name, value)?;
        }

        let mut loader: Arc<dyn TileLoader> = Arc::new(builder.build()?);
        if let Some(path) = &source.disk_cache {
            loader = Arc::new(CachedTileLoader::disk_cached(loader, path));
        }
        if let Some(capacity) = source.lru_capacity {
            loader = Arc::new(CachedTileLoader::lru_cached(loader, capacity));
        }
        if let Some(color) = source.fill_color {
            loader = Arc::new(WithDefault::new(loader).with_color(color));
        }
        Ok(loader)
    }
}

/// Rewrite a Bing imagery-metadata URL into this crate's template
/// vocabulary: the documented `{quadkey}` placeholder becomes `{quad}` and
/// a `{subdomain}` placeholder is pinned to the given value.
#[must_use]
pub fn bing_quadkey_url(image_url: &str, subdomain: &str) -> String {
    image_url
        .replace("{subdomain}", subdomain)
        .replace("{quadkey}", "{quad}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
        "headers": { "User-Agent": "metrotile-test" },
        "sources": {
            "osm": {
                "url": "https://tile.openstreetmap.org/{zoom}/{x}/{y}.png",
                "max_zoom": 19,
                "lru_capacity": 64
            },
            "aerial": {
                "url": "https://host/wms?bbox={bbox}",
                "min_zoom": 10,
                "max_zoom": 21,
                "retries": 3,
                "retry_delay": 0.25,
                "fill_color": [255, 255, 255]
            }
        }
    }"#;

    #[test]
    fn test_parse_and_defaults() {
        let config = PipelineConfig::from_json(EXAMPLE).unwrap();
        assert_eq!(config.sources.len(), 2);
        let osm = &config.sources["osm"];
        assert_eq!(osm.min_zoom, 0);
        assert_eq!(osm.retries, 10);
        assert!((osm.retry_delay - 1.5).abs() < f64::EPSILON);
        let aerial = &config.sources["aerial"];
        assert_eq!(aerial.retries, 3);
        assert_eq!(aerial.fill_color, Some([255, 255, 255]));
    }

    #[test]
    fn test_build_reports_zoom_bands() {
        let config = PipelineConfig::from_json(EXAMPLE).unwrap();
        let loaders = config.build().unwrap();
        assert_eq!(loaders["osm"].min_zoom(), 0);
        assert_eq!(loaders["osm"].max_zoom(), 19);
        assert_eq!(loaders["aerial"].min_zoom(), 10);
        assert_eq!(loaders["aerial"].max_zoom(), 21);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            PipelineConfig::from_json("{"),
            Err(TileError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = PipelineConfig::from_json(EXAMPLE).unwrap();
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(PipelineConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn test_bing_quadkey_url() {
        let url = bing_quadkey_url(
            "http://ak.dynamic.{subdomain}.tiles.virtualearth.net/comp/ch/{quadkey}?mkt=en-US",
            "t0",
        );
        assert_eq!(
            url,
            "http://ak.dynamic.t0.tiles.virtualearth.net/comp/ch/{quad}?mkt=en-US"
        );
    }
}
