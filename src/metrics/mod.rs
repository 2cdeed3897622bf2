//! Prometheus metrics exporter for the capture pipeline.
//!
//! # Metrics Exposed
//!
//! ## Session Metrics
//! - `still_capture_session_bound` - Whether a session is bound (1=bound, 0=unbound)
//! - `still_capture_sessions_opened_total` - Hardware sessions opened
//!
//! ## Capture Metrics
//! - `still_capture_captures_total` - Stills delivered to the consumer
//! - `still_capture_failures_total{kind}` - Failed attempts by error kind
//! - `still_capture_dropped_total` - Results discarded after teardown
//! - `still_capture_last_capture_seconds` - Latency of the latest capture
//!
//! ## Frame Metrics
//! - `still_capture_preview_frames_total` - Preview frames rendered
//! - `still_capture_frames_acquired_total` - Hardware frames acquired
//! - `still_capture_frames_released_total` - Hardware frames released
//!
//! # Example
//!
//! ```no_run
//! use still_capture::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     session_bound: true,
//!     captures_delivered: 3,
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
