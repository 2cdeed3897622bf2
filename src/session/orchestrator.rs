//! User-triggered capture flow.

use super::controller::CaptureController;
use crate::capture::CapturedImage;
use crate::error::{CaptureError, CaptureErrorKind};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Downstream consumer of captured stills.
pub trait ImageConsumer: Send + Sync {
    /// Takes ownership of one captured still.
    fn on_image(&self, image: CapturedImage);
}

impl<F> ImageConsumer for F
where
    F: Fn(CapturedImage) + Send + Sync,
{
    fn on_image(&self, image: CapturedImage) {
        self(image)
    }
}

/// Receives failed capture attempts.
///
/// Retrying, or telling the user, is up to the implementation; the pipeline
/// never retries on its own.
pub trait ErrorReporter: Send + Sync {
    /// Called once per failed attempt.
    fn report(&self, error: &CaptureError);
}

impl<F> ErrorReporter for F
where
    F: Fn(&CaptureError) + Send + Sync,
{
    fn report(&self, error: &CaptureError) {
        self(error)
    }
}

/// Reports failures as a warning in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &CaptureError) {
        tracing::warn!(kind = error.kind().as_str(), "Camera error: {}", error);
    }
}

/// What happened to one user trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The consumer received an image.
    Delivered,
    /// The reporter received an error of this kind.
    Failed(CaptureErrorKind),
    /// The session was torn down first; nobody was called.
    Dropped,
}

/// Glue between the user action and the capture pipeline.
///
/// Callbacks run on the task that awaited the capture, never on the
/// blocking pool where acquisition and decode happen.
#[derive(Clone)]
pub struct CaptureOrchestrator {
    controller: CaptureController,
    consumer: Arc<dyn ImageConsumer>,
    reporter: Arc<dyn ErrorReporter>,
}

impl CaptureOrchestrator {
    /// Creates an orchestrator that logs failures.
    pub fn new(controller: CaptureController, consumer: Arc<dyn ImageConsumer>) -> Self {
        Self {
            controller,
            consumer,
            reporter: Arc::new(LogReporter),
        }
    }

    /// Replaces the error reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Handles the user action: starts a capture and returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_user_trigger(&self) -> JoinHandle<TriggerOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.trigger().await })
    }

    /// Captures one still and routes the result to the consumer or reporter.
    ///
    /// The session epoch is compared once the capture returns and the
    /// callback runs right after, with no lock held in between. Lifecycle
    /// events must therefore arrive on the same thread that drives this
    /// future (the UI thread); a teardown issued from another thread
    /// between the check and the callback can still see one delivery.
    pub async fn trigger(&self) -> TriggerOutcome {
        let epoch = self.controller.epoch();
        let result = self.controller.capture().await;

        if self.controller.epoch() != epoch {
            tracing::debug!(epoch, "Session changed during capture; result dropped");
            return TriggerOutcome::Dropped;
        }

        match result {
            Ok(image) => {
                tracing::info!(
                    width = image.width(),
                    height = image.height(),
                    "Captured image of size {}x{}",
                    image.width(),
                    image.height()
                );
                self.consumer.on_image(image);
                TriggerOutcome::Delivered
            }
            Err(CaptureError::SessionClosed) => {
                tracing::debug!("Capture cancelled by teardown");
                TriggerOutcome::Dropped
            }
            Err(error) => {
                self.reporter.report(&error);
                TriggerOutcome::Failed(error.kind())
            }
        }
    }

    /// The controller captures are taken from.
    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraBackend, MockCamera, MockControl};
    use crate::permission::{FixedPermission, PermissionGate};
    use crate::session::lifecycle::{LifecycleBinding, LifecycleHandle};
    use crate::session::preview::PreviewSurface;
    use crate::session::testing::{settle, test_configs, CountingSurface};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        images: Mutex<Vec<(u32, u32)>>,
        errors: Mutex<Vec<CaptureErrorKind>>,
    }

    impl Recorder {
        fn images(&self) -> Vec<(u32, u32)> {
            self.images.lock().unwrap().clone()
        }

        fn errors(&self) -> Vec<CaptureErrorKind> {
            self.errors.lock().unwrap().clone()
        }
    }

    impl ImageConsumer for Recorder {
        fn on_image(&self, image: CapturedImage) {
            self.images.lock().unwrap().push((image.width(), image.height()));
        }
    }

    impl ErrorReporter for Recorder {
        fn report(&self, error: &CaptureError) {
            self.errors.lock().unwrap().push(error.kind());
        }
    }

    struct Fixture {
        binding: LifecycleBinding,
        control: MockControl,
        recorder: Arc<Recorder>,
        handle: LifecycleHandle,
    }

    fn fixture(provider: FixedPermission) -> Fixture {
        let camera = MockCamera::new();
        let control = camera.control();
        let mut camera = Some(camera);
        let (capture, preview) = test_configs();
        let binding = LifecycleBinding::new(
            PermissionGate::new(Arc::new(provider)),
            capture,
            preview,
            move || {
                camera
                    .take()
                    .map(|c| Box::new(c) as Box<dyn CameraBackend>)
                    .ok_or_else(|| crate::capture::CameraError::NotInitialized)
            },
        );
        Fixture {
            binding,
            control,
            recorder: Arc::new(Recorder::default()),
            handle: LifecycleHandle::new(),
        }
    }

    fn orchestrator(controller: CaptureController, recorder: &Arc<Recorder>) -> CaptureOrchestrator {
        CaptureOrchestrator::new(controller, recorder.clone()).with_reporter(recorder.clone())
    }

    #[tokio::test]
    async fn test_granted_capture_delivers_image() {
        let mut fx = fixture(FixedPermission::granted());
        let controller = fx.binding.on_visible(fx.handle, None).unwrap();
        let orchestrator = orchestrator(controller, &fx.recorder);

        let outcome = orchestrator.on_user_trigger().await.unwrap();

        assert_eq!(outcome, TriggerOutcome::Delivered);
        let images = fx.recorder.images();
        assert_eq!(images.len(), 1);
        assert!(images[0].0 > 0 && images[0].1 > 0);
        assert!(fx.recorder.errors().is_empty());
        assert_eq!(fx.control.ledger().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_denied_permission_keeps_capture_unreachable() {
        let mut fx = fixture(FixedPermission::denied());

        let result = fx.binding.on_visible(fx.handle, None);
        assert!(matches!(result, Err(CaptureError::PermissionDenied)));
        assert!(fx.binding.controller().is_none());
        assert_eq!(fx.control.still_count(), 0);
        assert_eq!(fx.control.open_count(), 0);
    }

    #[tokio::test]
    async fn test_unbound_trigger_reports_binding_unavailable() {
        let mut fx = fixture(FixedPermission::granted());
        let controller = fx.binding.on_visible(fx.handle, None).unwrap();
        fx.binding.on_hidden(fx.handle);
        let orchestrator = orchestrator(controller, &fx.recorder);

        let outcome = orchestrator.trigger().await;

        assert_eq!(
            outcome,
            TriggerOutcome::Failed(CaptureErrorKind::BindingUnavailable)
        );
        assert_eq!(
            fx.recorder.errors(),
            vec![CaptureErrorKind::BindingUnavailable]
        );
        assert!(fx.recorder.images().is_empty());
    }

    #[tokio::test]
    async fn test_hardware_failure_reported_once_then_recovers() {
        let mut fx = fixture(FixedPermission::granted());
        let controller = fx.binding.on_visible(fx.handle, None).unwrap();
        let orchestrator = orchestrator(controller.clone(), &fx.recorder);

        fx.control.fail_next_capture();
        let outcome = orchestrator.trigger().await;

        assert_eq!(
            outcome,
            TriggerOutcome::Failed(CaptureErrorKind::HardwareCaptureFailure)
        );
        assert_eq!(
            fx.recorder.errors(),
            vec![CaptureErrorKind::HardwareCaptureFailure]
        );
        assert_eq!(
            controller.state(),
            crate::session::ControllerState::Idle
        );

        assert_eq!(orchestrator.trigger().await, TriggerOutcome::Delivered);
        assert_eq!(fx.recorder.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_during_capture_suppresses_callbacks() {
        let mut fx = fixture(FixedPermission::granted());
        let controller = fx.binding.on_visible(fx.handle, None).unwrap();
        let orchestrator = orchestrator(controller, &fx.recorder);
        fx.control.set_latency(Duration::from_millis(50));

        let pending = orchestrator.on_user_trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.binding.on_destroyed(fx.handle);

        assert_eq!(pending.await.unwrap(), TriggerOutcome::Dropped);

        assert!(fx.recorder.images().is_empty());
        assert!(fx.recorder.errors().is_empty());
        assert_eq!(fx.control.ledger().acquired(), 1);
        assert_eq!(fx.control.ledger().released(), 1);
    }

    #[tokio::test]
    async fn test_preview_never_triggers_capture() {
        let mut fx = fixture(FixedPermission::granted());
        let surface = Arc::new(CountingSurface::default());
        fx.binding
            .on_visible(fx.handle, Some(surface.clone() as Arc<dyn PreviewSurface>))
            .unwrap();

        settle(|| surface.rendered() >= 3).await;
        assert!(surface.rendered() >= 3);
        assert_eq!(fx.control.still_count(), 0);

        fx.binding.on_destroyed(fx.handle);
        let after_teardown = surface.rendered();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(surface.rendered(), after_teardown);
        assert_eq!(surface.detached(), 1);
    }

    #[tokio::test]
    async fn test_closure_callbacks() {
        let mut fx = fixture(FixedPermission::granted());
        let controller = fx.binding.on_visible(fx.handle, None).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);

        let orchestrator = CaptureOrchestrator::new(
            controller,
            Arc::new(move |image: CapturedImage| {
                assert!(image.is_valid());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(orchestrator.trigger().await, TriggerOutcome::Delivered);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
