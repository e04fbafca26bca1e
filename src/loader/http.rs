//! HTTP tile source: URL templating, bounded retries, optional transport
//! serialization.

use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use super::{ensure_zoom, TileLoader};
use crate::error::{Result, TileError};
use crate::layout::Layout;
use crate::tile::{decode_tile, Tile, TileKey};
use crate::url::expand_template;

/// Builder for [`HttpSource`].
///
/// # Example
///
/// ```rust,no_run
/// use metrotile::{HttpSource, Layout};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let source = HttpSource::builder(
///         "https://tile.openstreetmap.org/{zoom}/{x}/{y}.png",
///         Layout::xyz()?,
///     )
///     .zoom_range(0, 19)
///     .header("User-Agent", "metrotile-demo")?
///     .build()?;
///     Ok(())
/// }
/// ```
pub struct HttpSourceBuilder {
    url_template: String,
    layout: Layout,
    min_zoom: u32,
    max_zoom: u32,
    retries: u32,
    retry_delay: Duration,
    verify_tls: bool,
    ca_file: Option<PathBuf>,
    ca_path: Option<PathBuf>,
    headers: HeaderMap,
    allow_multithreading: bool,
}

impl HttpSourceBuilder {
    /// Zoom band served by the remote source.
    #[must_use]
    pub fn zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Total request attempts per tile (at least one).
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Sleep between attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Toggle TLS certificate verification.
    #[must_use]
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Trust the PEM certificate(s) in one file.
    #[must_use]
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Trust every `.pem`/`.crt` certificate found in a directory.
    #[must_use]
    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Add a request header sent with every tile fetch.
    ///
    /// # Errors
    /// Fails with [`TileError::Transport`] on names or values that are not
    /// legal HTTP header tokens.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = name
            .parse::<HeaderName>()
            .map_err(|e| self.header_error(name, &e.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| self.header_error(name.as_str(), &e.to_string()))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Declare the transport reentrant; `load` calls are no longer
    /// serialized through a per-instance lock.
    #[must_use]
    pub fn allow_multithreading(mut self, allow: bool) -> Self {
        self.allow_multithreading = allow;
        self
    }

    fn header_error(&self, name: &str, message: &str) -> TileError {
        TileError::Transport {
            url: self.url_template.clone(),
            message: format!("invalid header {name}: {message}"),
        }
    }

    /// Construct the source and its HTTP client.
    ///
    /// # Errors
    /// Fails with [`TileError::Transport`] if the client cannot be built or
    /// a configured CA certificate cannot be read.
    pub fn build(self) -> Result<HttpSource> {
        let transport_err = |message: String| TileError::Transport {
            url: self.url_template.clone(),
            message,
        };

        let mut builder = Client::builder().default_headers(self.headers.clone());
        if !self.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let mut ca_files: Vec<PathBuf> = Vec::new();
        if let Some(file) = &self.ca_file {
            ca_files.push(file.clone());
        }
        if let Some(dir) = &self.ca_path {
            let entries = std::fs::read_dir(dir)
                .map_err(|e| transport_err(format!("cannot read CA path {}: {e}", dir.display())))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| transport_err(format!("cannot read CA path entry: {e}")))?
                    .path();
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                if ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("crt") {
                    ca_files.push(path);
                }
            }
        }
        for path in ca_files {
            let pem = std::fs::read(&path)
                .map_err(|e| transport_err(format!("cannot read CA file {}: {e}", path.display())))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| transport_err(format!("invalid CA file {}: {e}", path.display())))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| transport_err(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpSource {
            url_template: self.url_template,
            layout: self.layout,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            retries: self.retries,
            retry_delay: self.retry_delay,
            allow_multithreading: self.allow_multithreading,
            client,
            serial: Mutex::new(()),
        })
    }
}

/// Fetches tiles over HTTP from a templated URL (see [`crate::url`] for the
/// placeholder vocabulary).
pub struct HttpSource {
    url_template: String,
    layout: Layout,
    min_zoom: u32,
    max_zoom: u32,
    retries: u32,
    retry_delay: Duration,
    allow_multithreading: bool,
    client: Client,
    serial: Mutex<()>,
}

impl HttpSource {
    /// Start building a source for `url_template` over `layout`.
    ///
    /// Defaults: zoom band 0..=20, 10 attempts, 1.5 s between attempts,
    /// TLS verification on, serialized transport.
    #[must_use]
    pub fn builder(url_template: impl Into<String>, layout: Layout) -> HttpSourceBuilder {
        HttpSourceBuilder {
            url_template: url_template.into(),
            layout,
            min_zoom: 0,
            max_zoom: 20,
            retries: 10,
            retry_delay: Duration::from_secs_f64(1.5),
            verify_tls: true,
            ca_file: None,
            ca_path: None,
            headers: HeaderMap::new(),
            allow_multithreading: false,
        }
    }

    /// The fully expanded request URL for one tile.
    ///
    /// # Errors
    /// Fails with [`TileError::ZoomOutOfRange`] outside the zoom band.
    pub fn url_for(&self, key: TileKey) -> Result<String> {
        ensure_zoom(key.zoom, self.min_zoom, self.max_zoom)?;
        Ok(expand_template(&self.url_template, &self.layout, key))
    }

    fn fetch_once(&self, url: &str) -> Result<Tile> {
        let transport_err = |message: String| TileError::Transport {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| transport_err(e.to_string()))?;
        let body = response
            .bytes()
            .map_err(|e| transport_err(format!("failed to read body: {e}")))?;
        if body.is_empty() {
            return Err(transport_err("received no data".into()));
        }
        decode_tile(&body, self.layout.tile_edge_px())
    }
}

impl TileLoader for HttpSource {
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
        let url = self.url_for(key)?;
        let _serial = if self.allow_multithreading {
            None
        } else {
            Some(self.serial.lock().unwrap_or_else(|e| e.into_inner()))
        };

        let mut last_error = None;
        for attempt in 0..self.retries {
            if attempt > 0 {
                thread::sleep(self.retry_delay);
            }
            match self.fetch_once(&url) {
                Ok(tile) => {
                    debug!(%url, attempt, "fetched tile");
                    return Ok(tile);
                }
                Err(err)
                    if matches!(
                        err,
                        TileError::Transport { .. }
                            | TileError::Decode(_)
                            | TileError::InvalidTile(_)
                    ) =>
                {
                    warn!(%url, attempt, error = %err, "tile fetch failed");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| TileError::Transport {
            url,
            message: "no request attempts were made".into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> HttpSource {
        HttpSource::builder(
            "https://host/tms/1.0.0/x/{zoom}/{x}/{y}",
            Layout::xyz().unwrap(),
        )
        .zoom_range(0, 20)
        .retries(2)
        .retry_delay(Duration::from_millis(1))
        .build()
        .unwrap()
    }

    #[test]
    fn test_url_rendering() {
        let url = source().url_for(TileKey::new(519_997, 383_334, 20)).unwrap();
        assert_eq!(url, "https://host/tms/1.0.0/x/20/519997/383334");
    }

    #[test]
    fn test_url_for_checks_zoom() {
        let err = source().url_for(TileKey::new(0, 0, 25)).unwrap_err();
        assert!(matches!(err, TileError::ZoomOutOfRange { zoom: 25, .. }));
    }

    #[test]
    fn test_load_checks_zoom_before_network() {
        let err = source().load(TileKey::new(0, 0, 21)).unwrap_err();
        assert!(matches!(err, TileError::ZoomOutOfRange { .. }));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let result = HttpSource::builder("https://host/{z}/{x}/{y}", Layout::xyz().unwrap())
            .header("bad header name", "x");
        assert!(result.is_err());
    }

    #[test]
    fn test_retries_clamped_to_one() {
        let source = HttpSource::builder("https://host/{z}/{x}/{y}", Layout::xyz().unwrap())
            .retries(0)
            .build()
            .unwrap();
        assert_eq!(source.retries, 1);
    }
}
