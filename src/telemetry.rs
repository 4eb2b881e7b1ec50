//! Structured logging for the relay
//!
//! Events go to stdout through `tracing-subscriber`, as text lines or as one
//! JSON object per event depending on `[observability] log_format`.

use crate::config::{LogFormat, ObservabilityConfig};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
///
/// Request spans from the trace layer are emitted at debug level, so
/// `tower_http` follows the relay's level only when it is more verbose.
pub fn default_filter(level: &str) -> String {
    let http_level = match level {
        "trace" => "trace",
        _ => "debug",
    };
    format!("chatrelay={},tower_http={}", level, http_level)
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Returns `false` when a
/// subscriber was already installed, which leaves the existing one in place.
pub fn init(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let output = match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .is_ok()
}
