//! Prometheus metrics collection for chatrelay
//!
//! This module provides metrics instrumentation for tracking:
//! - Chat requests by mode and outcome
//! - Upstream call latency
//! - Streamed deltas and interrupted streams
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Response mode label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Complete,
    Stream,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Complete => "complete",
            Mode::Stream => "stream",
        }
    }
}

/// Request outcome label
///
/// Enum labels keep cardinality fixed at 2 modes × 3 outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientError,
    UpstreamError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::UpstreamError => "upstream_error",
        }
    }
}

/// Metrics collector for chatrelay
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    upstream_duration: HistogramVec,
    stream_deltas: IntCounter,
    stream_interruptions: IntCounter,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "chatrelay_requests_total",
                "Total number of chat requests by response mode and outcome",
            ),
            &["mode", "outcome"],
        )?;

        // Streaming durations measure time to the upstream's first byte only
        let upstream_duration = HistogramVec::new(
            HistogramOpts::new(
                "chatrelay_upstream_duration_seconds",
                "Upstream provider call latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["mode"],
        )?;

        let stream_deltas = IntCounter::with_opts(Opts::new(
            "chatrelay_stream_deltas_total",
            "Total number of non-empty deltas written to NDJSON streams",
        ))?;

        let stream_interruptions = IntCounter::with_opts(Opts::new(
            "chatrelay_stream_interruptions_total",
            "Total number of NDJSON streams aborted by an upstream failure",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(upstream_duration.clone()))?;
        registry.register(Box::new(stream_deltas.clone()))?;
        registry.register(Box::new(stream_interruptions.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            upstream_duration,
            stream_deltas,
            stream_interruptions,
        })
    }

    /// Record a finished request
    pub fn record_request(&self, mode: Mode, outcome: Outcome) {
        self.requests_total
            .with_label_values(&[mode.as_str(), outcome.as_str()])
            .inc();
    }

    /// Record upstream latency; non-finite or negative values are dropped
    pub fn record_upstream_duration(&self, mode: Mode, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            tracing::warn!(seconds, mode = mode.as_str(), "Ignoring invalid duration sample");
            return;
        }
        self.upstream_duration
            .with_label_values(&[mode.as_str()])
            .observe(seconds);
    }

    pub fn record_stream_delta(&self) {
        self.stream_deltas.inc();
    }

    pub fn record_stream_interruption(&self) {
        self.stream_interruptions.inc();
    }

    pub fn stream_deltas_count(&self) -> u64 {
        self.stream_deltas.get()
    }

    pub fn requests_count(&self, mode: Mode, outcome: Outcome) -> u64 {
        self.requests_total
            .with_label_values(&[mode.as_str(), outcome.as_str()])
            .get()
    }

    /// Encode all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
