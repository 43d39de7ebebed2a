//! Cache configuration.
//!
//! Built once at startup from the `[cache]` section of `pagefreeze.toml` and
//! shared read-only by every request.

use std::path::PathBuf;

use serde::Deserialize;

use super::{
    capture::CaptureMode,
    codec::{CompressionEffort, Encoding},
    keys::KeyPolicy,
    minify::MinifyMode,
};

pub(crate) const DEFAULT_TEST_MARKER: &str = "__test__";
pub(crate) const DEFAULT_UPDATE_MARKER: &str = "__update__";
pub(crate) const DEFAULT_EXPIRE_MINUTES: u32 = 1;
pub(crate) const DEFAULT_OUTPUT_DIR_NAME: &str = "html";
pub(crate) const DEFAULT_MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

/// Static page cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve everything live; never read or write artifacts.
    pub development_mode: bool,
    /// Fold query parameters into the artifact path.
    pub include_query: bool,
    /// Client-side lifetime advertised via `Cache-Control` and `Expires`.
    pub expire_minutes: u32,
    /// Root directory for stored pages.
    pub output_dir: PathBuf,
    /// Store and serve `.html.gz` siblings.
    pub gzip: bool,
    /// Store and serve `.html.br` siblings.
    pub brotli: bool,
    pub compression_effort: CompressionEffort,
    /// Query key that serves live without touching storage.
    pub test_marker: String,
    /// Query key that re-renders and overwrites the stored page.
    pub update_marker: String,
    pub minify: MinifyMode,
    pub capture: CaptureMode,
    /// Responses larger than this are delivered but not stored.
    pub max_capture_bytes: usize,
    /// Let only one request per key render on a miss.
    pub serialize_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            development_mode: false,
            include_query: false,
            expire_minutes: DEFAULT_EXPIRE_MINUTES,
            output_dir: default_output_dir(),
            gzip: false,
            brotli: false,
            compression_effort: CompressionEffort::default(),
            test_marker: DEFAULT_TEST_MARKER.to_string(),
            update_marker: DEFAULT_UPDATE_MARKER.to_string(),
            minify: MinifyMode::default(),
            capture: CaptureMode::default(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            serialize_misses: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            development_mode: settings.development_mode,
            include_query: settings.include_query,
            expire_minutes: settings.expire_minutes,
            output_dir: settings.output_dir.clone(),
            gzip: settings.gzip,
            brotli: settings.brotli,
            compression_effort: settings.compression_effort,
            test_marker: settings.test_marker.clone(),
            update_marker: settings.update_marker.clone(),
            minify: settings.minify,
            capture: settings.capture,
            max_capture_bytes: settings.max_capture_bytes.get(),
            serialize_misses: settings.serialize_misses,
        }
    }
}

impl CacheConfig {
    /// `max-age` in seconds.
    pub fn max_age_seconds(&self) -> u64 {
        u64::from(self.expire_minutes) * 60
    }

    pub fn is_encoding_enabled(&self, encoding: Encoding) -> bool {
        match encoding {
            Encoding::Gzip => self.gzip,
            Encoding::Brotli => self.brotli,
        }
    }

    /// Returns true if any precompressed variant is produced.
    pub fn compression_enabled(&self) -> bool {
        self.gzip || self.brotli
    }

    pub fn key_policy(&self) -> KeyPolicy<'_> {
        KeyPolicy {
            include_query: self.include_query,
            test_marker: &self.test_marker,
            update_marker: &self.update_marker,
        }
    }
}

/// `html/` beside the running executable, or under the working directory when
/// the executable location is unknown.
pub fn default_output_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_OUTPUT_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR_NAME))
}
