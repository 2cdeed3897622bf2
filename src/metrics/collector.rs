//! Metrics collection and registry.

use crate::capture::FrameLedger;
use crate::error::CaptureErrorKind;
use crate::session::CaptureStats;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of pipeline state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether a capture session is bound.
    pub session_bound: bool,
    /// Hardware sessions opened.
    pub sessions_opened: u64,
    /// Stills delivered.
    pub captures_delivered: u64,
    /// Failed attempts by kind.
    pub failures: HashMap<CaptureErrorKind, u64>,
    /// Results discarded after teardown.
    pub dropped: u64,
    /// Preview frames rendered.
    pub preview_frames: u64,
    /// Hardware frames handed out by the backend.
    pub frames_acquired: u64,
    /// Hardware frames returned to the backend.
    pub frames_released: u64,
    /// Latest successful capture latency in seconds.
    pub last_capture_seconds: Option<f64>,
}

/// Prometheus metrics registry for the capture pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    // Session metrics
    session_bound: IntGauge,
    sessions_opened: IntCounter,

    // Capture metrics
    captures_total: IntCounter,
    failures_total: IntCounterVec,
    dropped_total: IntCounter,
    last_capture_seconds: Gauge,

    // Frame metrics
    preview_frames_total: IntCounter,
    frames_acquired_total: IntCounter,
    frames_released_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let session_bound = IntGauge::new(
            "still_capture_session_bound",
            "Whether a capture session is bound (1=bound, 0=unbound)",
        )?;
        let sessions_opened = IntCounter::new(
            "still_capture_sessions_opened_total",
            "Total hardware sessions opened",
        )?;

        let captures_total = IntCounter::new(
            "still_capture_captures_total",
            "Total stills delivered to the consumer",
        )?;
        let failures_total = IntCounterVec::new(
            Opts::new("still_capture_failures_total", "Failed capture attempts by kind"),
            &["kind"],
        )?;
        let dropped_total = IntCounter::new(
            "still_capture_dropped_total",
            "Capture results discarded because the session was torn down",
        )?;
        let last_capture_seconds = Gauge::new(
            "still_capture_last_capture_seconds",
            "Latency of the most recent successful capture",
        )?;

        let preview_frames_total = IntCounter::new(
            "still_capture_preview_frames_total",
            "Total preview frames rendered",
        )?;
        let frames_acquired_total = IntCounter::new(
            "still_capture_frames_acquired_total",
            "Total hardware frames acquired",
        )?;
        let frames_released_total = IntCounter::new(
            "still_capture_frames_released_total",
            "Total hardware frames released",
        )?;

        registry.register(Box::new(session_bound.clone()))?;
        registry.register(Box::new(sessions_opened.clone()))?;
        registry.register(Box::new(captures_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(dropped_total.clone()))?;
        registry.register(Box::new(last_capture_seconds.clone()))?;
        registry.register(Box::new(preview_frames_total.clone()))?;
        registry.register(Box::new(frames_acquired_total.clone()))?;
        registry.register(Box::new(frames_released_total.clone()))?;

        Ok(Self {
            registry,
            session_bound,
            sessions_opened,
            captures_total,
            failures_total,
            dropped_total,
            last_capture_seconds,
            preview_frames_total,
            frames_acquired_total,
            frames_released_total,
        })
    }

    /// Updates all metrics from a snapshot of pipeline state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.session_bound
            .set(if snapshot.session_bound { 1 } else { 0 });

        // Counters only move forward by the difference
        advance(&self.sessions_opened, snapshot.sessions_opened);
        advance(&self.captures_total, snapshot.captures_delivered);
        advance(&self.dropped_total, snapshot.dropped);
        advance(&self.preview_frames_total, snapshot.preview_frames);
        advance(&self.frames_acquired_total, snapshot.frames_acquired);
        advance(&self.frames_released_total, snapshot.frames_released);

        for (kind, count) in &snapshot.failures {
            advance(
                &self.failures_total.with_label_values(&[kind.as_str()]),
                *count,
            );
        }

        if let Some(seconds) = snapshot.last_capture_seconds {
            self.last_capture_seconds.set(seconds);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from controller stats and, if available, the
    /// backend's frame ledger.
    pub fn from_components(stats: &CaptureStats, ledger: Option<&FrameLedger>) -> Self {
        Self {
            session_bound: stats.bound,
            sessions_opened: stats.sessions_opened,
            captures_delivered: stats.captures_delivered,
            failures: stats.failures.clone(),
            dropped: stats.dropped,
            preview_frames: stats.preview_frames,
            frames_acquired: ledger.map_or(0, FrameLedger::acquired),
            frames_released: ledger.map_or(0, FrameLedger::released),
            last_capture_seconds: stats.last_capture.map(|d| d.as_secs_f64()),
        }
    }
}
