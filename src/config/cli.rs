use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::{CaptureMode, CompressionEffort, MinifyMode};

/// Command-line arguments for the pagefreeze binary.
#[derive(Debug, Parser)]
#[command(name = "pagefreeze", version, about = "Static page cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGEFREEZE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the site behind the static page cache.
    Serve(Box<ServeArgs>),
    /// Delete the stored page a request would be answered from.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the directory stored pages are written to.
    #[arg(long = "cache-output-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// Fold query parameters into stored page names.
    #[arg(
        long = "cache-include-query",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub include_query: Option<bool>,

    /// Override the test marker query key.
    #[arg(long = "cache-test-marker", value_name = "KEY")]
    pub test_marker: Option<String>,

    /// Override the force-refresh marker query key.
    #[arg(long = "cache-update-marker", value_name = "KEY")]
    pub update_marker: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Serve every page live without reading or writing stored pages.
    #[arg(
        long = "cache-development-mode",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_development_mode: Option<bool>,

    /// Override the client-side lifetime in minutes.
    #[arg(long = "cache-expire-minutes", value_name = "MINUTES")]
    pub cache_expire_minutes: Option<u32>,

    /// Toggle `.gz` siblings.
    #[arg(
        long = "cache-gzip",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_gzip: Option<bool>,

    /// Toggle `.br` siblings.
    #[arg(
        long = "cache-brotli",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_brotli: Option<bool>,

    /// Override the compression effort.
    #[arg(long = "cache-compression-effort", value_name = "EFFORT", value_enum)]
    pub cache_compression_effort: Option<CompressionEffort>,

    /// Override the minifier.
    #[arg(long = "cache-minify", value_name = "MODE", value_enum)]
    pub cache_minify: Option<MinifyMode>,

    /// Override the capture strategy.
    #[arg(long = "cache-capture", value_name = "MODE", value_enum)]
    pub cache_capture: Option<CaptureMode>,

    /// Override the largest response that is stored.
    #[arg(long = "cache-max-capture-bytes", value_name = "BYTES")]
    pub cache_max_capture_bytes: Option<u64>,

    /// Let a single request render each missing page.
    #[arg(
        long = "cache-serialize-misses",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_serialize_misses: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Request path whose stored page should be removed, e.g. `/reports/`.
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Raw query string of the request, without the leading `?`.
    #[arg(long, value_name = "QUERY")]
    pub query: Option<String>,
}
