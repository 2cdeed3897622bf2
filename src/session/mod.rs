//! Capture session: controller, lifecycle binding, preview and the
//! user-triggered capture flow.
//!
//! ```text
//! PermissionGate ─grant─▶ LifecycleBinding ─bind─▶ CaptureController
//!                                                    │         │
//!                                             preview pump   capture()
//!                                                    ▼         ▼
//!                                           PreviewSurface  CaptureOrchestrator
//!                                                            ├▶ ImageConsumer
//!                                                            └▶ ErrorReporter
//! ```

mod controller;
mod lease;
mod lifecycle;
mod orchestrator;
mod preview;

pub use controller::{CaptureController, CaptureStats, ControllerState};
pub use lifecycle::{LifecycleBinding, LifecycleHandle};
pub use orchestrator::{CaptureOrchestrator, ErrorReporter, ImageConsumer, LogReporter, TriggerOutcome};
pub use preview::PreviewSurface;

#[cfg(test)]
pub(crate) mod testing {
    use super::PreviewSurface;
    use crate::capture::{CaptureConfig, CapturedImage, PreviewConfig};
    use crate::permission::{CameraAccess, FixedPermission, PermissionGate};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Small frames and a device id no other test uses, so tests running in
    /// parallel never contend for the same device lease.
    pub(crate) fn test_configs() -> (CaptureConfig, PreviewConfig) {
        static NEXT_DEVICE: AtomicU32 = AtomicU32::new(1_000);
        let capture = CaptureConfig {
            device_id: NEXT_DEVICE.fetch_add(1, Ordering::Relaxed),
            width: 16,
            height: 12,
            ..Default::default()
        };
        let preview = PreviewConfig {
            width: 8,
            height: 6,
            fps: 100,
            ..Default::default()
        };
        (capture, preview)
    }

    pub(crate) fn granted_access() -> CameraAccess {
        PermissionGate::new(Arc::new(FixedPermission::granted()))
            .camera_access()
            .expect("fixed grant")
    }

    /// Polls `done` for up to two seconds.
    pub(crate) async fn settle(done: impl Fn() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct CountingSurface {
        rendered: AtomicU64,
        detached: AtomicU64,
    }

    impl CountingSurface {
        pub(crate) fn rendered(&self) -> u64 {
            self.rendered.load(Ordering::SeqCst)
        }

        pub(crate) fn detached(&self) -> u64 {
            self.detached.load(Ordering::SeqCst)
        }
    }

    impl PreviewSurface for CountingSurface {
        fn render(&self, frame: &CapturedImage) {
            assert!(frame.is_valid());
            self.rendered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_detached(&self) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }
    }
}
