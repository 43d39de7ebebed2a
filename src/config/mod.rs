//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    CaptureMode, CompressionEffort, MinifyMode,
    config::{
        DEFAULT_EXPIRE_MINUTES, DEFAULT_MAX_CAPTURE_BYTES, DEFAULT_TEST_MARKER,
        DEFAULT_UPDATE_MARKER,
    },
    default_output_dir,
};

pub use cli::{CacheOverrides, CliArgs, Command, PurgeArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagefreeze";
const ENV_PREFIX: &str = "PAGEFREEZE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub development_mode: bool,
    pub include_query: bool,
    pub expire_minutes: u32,
    pub output_dir: PathBuf,
    pub gzip: bool,
    pub brotli: bool,
    pub compression_effort: CompressionEffort,
    pub test_marker: String,
    pub update_marker: String,
    pub minify: MinifyMode,
    pub capture: CaptureMode,
    pub max_capture_bytes: NonZeroUsize,
    pub serialize_misses: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(value) = overrides.cache_development_mode {
            self.cache.development_mode = Some(value);
        }
        if let Some(value) = overrides.cache_expire_minutes {
            self.cache.expire_minutes = Some(value);
        }
        if let Some(value) = overrides.cache_gzip {
            self.cache.gzip = Some(value);
        }
        if let Some(value) = overrides.cache_brotli {
            self.cache.brotli = Some(value);
        }
        if let Some(value) = overrides.cache_compression_effort {
            self.cache.compression_effort = Some(value);
        }
        if let Some(value) = overrides.cache_minify {
            self.cache.minify = Some(value);
        }
        if let Some(value) = overrides.cache_capture {
            self.cache.capture = Some(value);
        }
        if let Some(value) = overrides.cache_max_capture_bytes {
            self.cache.max_capture_bytes = Some(value);
        }
        if let Some(value) = overrides.cache_serialize_misses {
            self.cache.serialize_misses = Some(value);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.cache.output_dir = Some(dir.clone());
        }
        if let Some(value) = overrides.include_query {
            self.cache.include_query = Some(value);
        }
        if let Some(marker) = overrides.test_marker.as_ref() {
            self.cache.test_marker = Some(marker.clone());
        }
        if let Some(marker) = overrides.update_marker.as_ref() {
            self.cache.update_marker = Some(marker.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let output_dir = cache.output_dir.unwrap_or_else(default_output_dir);
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.output_dir",
            "path must not be empty",
        ));
    }

    let test_marker = marker(cache.test_marker, DEFAULT_TEST_MARKER, "cache.test_marker")?;
    let update_marker = marker(
        cache.update_marker,
        DEFAULT_UPDATE_MARKER,
        "cache.update_marker",
    )?;
    if test_marker == update_marker {
        return Err(LoadError::invalid(
            "cache.update_marker",
            "must differ from cache.test_marker",
        ));
    }

    let max_capture_usize = match cache.max_capture_bytes {
        Some(value) => usize::try_from(value).map_err(|_| {
            LoadError::invalid(
                "cache.max_capture_bytes",
                "value exceeds supported range for usize",
            )
        })?,
        None => DEFAULT_MAX_CAPTURE_BYTES,
    };
    let max_capture_bytes = NonZeroUsize::new(max_capture_usize).ok_or_else(|| {
        LoadError::invalid("cache.max_capture_bytes", "must be greater than zero")
    })?;

    Ok(CacheSettings {
        development_mode: cache.development_mode.unwrap_or(false),
        include_query: cache.include_query.unwrap_or(false),
        expire_minutes: cache.expire_minutes.unwrap_or(DEFAULT_EXPIRE_MINUTES),
        output_dir,
        gzip: cache.gzip.unwrap_or(false),
        brotli: cache.brotli.unwrap_or(false),
        compression_effort: cache.compression_effort.unwrap_or_default(),
        test_marker,
        update_marker,
        minify: cache.minify.unwrap_or_default(),
        capture: cache.capture.unwrap_or_default(),
        max_capture_bytes,
        serialize_misses: cache.serialize_misses.unwrap_or(false),
    })
}

fn marker(value: Option<String>, default: &str, key: &'static str) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "marker must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    development_mode: Option<bool>,
    include_query: Option<bool>,
    expire_minutes: Option<u32>,
    output_dir: Option<PathBuf>,
    gzip: Option<bool>,
    brotli: Option<bool>,
    compression_effort: Option<CompressionEffort>,
    test_marker: Option<String>,
    update_marker: Option<String>,
    minify: Option<MinifyMode>,
    capture: Option<CaptureMode>,
    max_capture_bytes: Option<u64>,
    serialize_misses: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
