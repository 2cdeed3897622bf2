//! Live preview delivery.
//!
//! A [`PreviewSurface`] only ever receives frames. It gets no handle to the
//! controller, so it has no way to start a still capture.

use super::controller::{lock_backend, SharedBackend};
use crate::capture::{decode, CapturedImage};
use crate::error::CaptureError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Render target for live camera frames.
pub trait PreviewSurface: Send + Sync {
    /// Draws one decoded preview frame.
    fn render(&self, frame: &CapturedImage);

    /// Called once when the surface stops receiving frames.
    fn on_detached(&self) {}
}

/// Resolves once the session epoch moves past `epoch`, or the controller
/// is gone.
pub(crate) async fn torn_down(rx: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *rx.borrow_and_update() != epoch {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Pushes preview frames to one surface for one session epoch.
pub(crate) struct PreviewPump {
    pub(crate) backend: SharedBackend,
    pub(crate) surface: Arc<dyn PreviewSurface>,
    pub(crate) interval: Duration,
    pub(crate) apply_rotation: bool,
    pub(crate) epoch: u64,
    pub(crate) epoch_rx: watch::Receiver<u64>,
    pub(crate) rendered: Arc<AtomicU64>,
}

impl PreviewPump {
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(epoch = self.epoch, "Preview started");

        loop {
            tokio::select! {
                _ = torn_down(&mut self.epoch_rx, self.epoch) => break,
                _ = ticker.tick() => {}
            }

            let backend = Arc::clone(&self.backend);
            let apply_rotation = self.apply_rotation;
            let job = tokio::task::spawn_blocking(move || next_frame(&backend, apply_rotation));

            let result = tokio::select! {
                _ = torn_down(&mut self.epoch_rx, self.epoch) => break,
                result = job => result,
            };

            match result {
                Ok(Ok(frame)) => {
                    if *self.epoch_rx.borrow() != self.epoch {
                        break;
                    }
                    self.surface.render(&frame);
                    self.rendered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => tracing::debug!(error = %e, "Preview frame skipped"),
                Err(e) => {
                    tracing::warn!(error = %e, "Preview worker failed");
                    break;
                }
            }
        }

        tracing::debug!(epoch = self.epoch, "Preview stopped");
    }
}

fn next_frame(backend: &SharedBackend, apply_rotation: bool) -> Result<CapturedImage, CaptureError> {
    let frame = lock_backend(backend)?.acquire_preview()?;
    let decoded = decode(&frame, apply_rotation);
    frame.release();
    Ok(decoded?)
}
