use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for the static page cache metrics.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagefreeze_cache_hit_total",
            Unit::Count,
            "Requests answered from a stored page."
        );
        describe_counter!(
            "pagefreeze_cache_miss_total",
            Unit::Count,
            "Requests that ran the page handler."
        );
        describe_counter!(
            "pagefreeze_cache_not_modified_total",
            Unit::Count,
            "Conditional requests answered with 304."
        );
        describe_counter!(
            "pagefreeze_cache_bypass_total",
            Unit::Count,
            "Requests served live in development mode or with the test marker."
        );
        describe_counter!(
            "pagefreeze_cache_write_total",
            Unit::Count,
            "Rendered pages written to the output directory."
        );
        describe_counter!(
            "pagefreeze_cache_write_error_total",
            Unit::Count,
            "Rendered pages that could not be written."
        );
        describe_histogram!(
            "pagefreeze_cache_write_ms",
            Unit::Milliseconds,
            "Time spent minifying, compressing and writing a rendered page."
        );
    });
}
