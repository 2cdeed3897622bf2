//! Binds the capture session to a UI surface's visible lifetime.
//!
//! The host UI reports visibility transitions; this module turns them into
//! controller construction, bind and unbind. The UI toolkit itself is not
//! assumed: anything that can say "visible" and "gone" can drive it.

use super::controller::CaptureController;
use super::preview::PreviewSurface;
use crate::capture::{CameraBackend, CameraError, CaptureConfig, PreviewConfig};
use crate::error::CaptureError;
use crate::permission::{PermissionGate, PermissionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one UI surface lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LifecycleHandle(u64);

impl LifecycleHandle {
    /// Allocates a process-unique handle.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric id, for logs.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new()
    }
}

type BackendFactory = Box<dyn FnMut() -> Result<Box<dyn CameraBackend>, CameraError> + Send>;

/// Drives a [`CaptureController`] from UI visibility events.
///
/// The controller is built lazily on the first visible event, and only if
/// camera permission is granted. No session outlives the surface it was
/// bound for: hiding or destroying the surface unbinds it, and so does
/// dropping the binding.
pub struct LifecycleBinding {
    gate: PermissionGate,
    factory: BackendFactory,
    capture: CaptureConfig,
    preview: PreviewConfig,
    controller: Option<CaptureController>,
}

impl LifecycleBinding {
    /// Creates a binding; `factory` builds the backend on first grant.
    pub fn new<F>(
        gate: PermissionGate,
        capture: CaptureConfig,
        preview: PreviewConfig,
        factory: F,
    ) -> Self
    where
        F: FnMut() -> Result<Box<dyn CameraBackend>, CameraError> + Send + 'static,
    {
        Self {
            gate,
            factory: Box::new(factory),
            capture,
            preview,
            controller: None,
        }
    }

    /// The surface became visible.
    ///
    /// Returns the bound controller. With permission denied, no backend is
    /// created and [`CaptureError::PermissionDenied`] is returned after the
    /// gate's denied hook has run.
    pub fn on_visible(
        &mut self,
        handle: LifecycleHandle,
        surface: Option<Arc<dyn PreviewSurface>>,
    ) -> Result<CaptureController, CaptureError> {
        let controller = match &self.controller {
            Some(controller) => controller.clone(),
            None => {
                let access = self.gate.camera_access()?;
                let backend = (self.factory)()?;
                let controller = CaptureController::new(
                    access,
                    backend,
                    self.capture.clone(),
                    self.preview.clone(),
                )?;
                self.controller = Some(controller.clone());
                controller
            }
        };

        controller.bind(handle, surface)?;
        Ok(controller)
    }

    /// The surface is no longer visible. The controller is kept for reuse.
    pub fn on_hidden(&mut self, handle: LifecycleHandle) {
        if let Some(controller) = &self.controller {
            if controller.unbind_handle(handle) {
                tracing::debug!(handle = handle.id(), "Surface hidden");
            }
        }
    }

    /// The surface is gone for good.
    pub fn on_destroyed(&mut self, handle: LifecycleHandle) {
        let owned = self
            .controller
            .as_ref()
            .is_some_and(|c| c.bound_handle().map_or(true, |bound| bound == handle));
        if owned {
            if let Some(controller) = self.controller.take() {
                controller.unbind();
                tracing::debug!(handle = handle.id(), "Surface destroyed");
            }
        }
    }

    /// The controller, once one has been built.
    pub fn controller(&self) -> Option<&CaptureController> {
        self.controller.as_ref()
    }

    /// Last observed camera permission.
    pub fn permission(&self) -> PermissionState {
        self.gate.state()
    }
}

impl Drop for LifecycleBinding {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.take() {
            controller.unbind();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockCamera;
    use crate::permission::FixedPermission;
    use crate::session::controller::ControllerState;
    use crate::session::testing::{settle, test_configs, CountingSurface};
    use std::sync::atomic::AtomicUsize;

    fn binding(
        gate: PermissionGate,
    ) -> (LifecycleBinding, Arc<AtomicUsize>, crate::capture::MockControl) {
        let built = Arc::new(AtomicUsize::new(0));
        let camera = MockCamera::new();
        let control = camera.control();
        let mut camera = Some(camera);
        let factory_built = Arc::clone(&built);
        let (capture, preview) = test_configs();

        let binding = LifecycleBinding::new(gate, capture, preview, move || {
            factory_built.fetch_add(1, Ordering::SeqCst);
            camera
                .take()
                .map(|c| Box::new(c) as Box<dyn CameraBackend>)
                .ok_or_else(|| CameraError::DeviceNotFound("mock already taken".into()))
        });
        (binding, built, control)
    }

    #[tokio::test]
    async fn test_denied_never_builds_backend() {
        let provider = Arc::new(FixedPermission::denied());
        let (mut binding, built, _) = binding(PermissionGate::new(provider));

        let result = binding.on_visible(LifecycleHandle::new(), None);
        assert!(matches!(result, Err(CaptureError::PermissionDenied)));
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(binding.controller().is_none());
        assert_eq!(binding.permission(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_visible_hidden_visible_reuses_controller() {
        let provider = Arc::new(FixedPermission::granted());
        let (mut binding, built, control) = binding(PermissionGate::new(provider.clone()));
        let handle = LifecycleHandle::new();

        let controller = binding.on_visible(handle, None).unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);

        binding.on_hidden(handle);
        assert_eq!(controller.state(), ControllerState::Unbound);
        settle(|| control.close_count() == 1).await;
        assert_eq!(control.close_count(), 1);

        binding.on_visible(handle, None).unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(provider.prompts(), 1);
        assert_eq!(control.open_count(), 2);
    }

    #[tokio::test]
    async fn test_hidden_for_other_handle_is_ignored() {
        let (mut binding, _, control) =
            binding(PermissionGate::new(Arc::new(FixedPermission::granted())));
        let shown = LifecycleHandle::new();

        let controller = binding.on_visible(shown, None).unwrap();
        binding.on_hidden(LifecycleHandle::new());

        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(control.close_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_releases_hardware() {
        let (mut binding, _, control) =
            binding(PermissionGate::new(Arc::new(FixedPermission::granted())));
        let handle = LifecycleHandle::new();
        let surface = Arc::new(CountingSurface::default());

        let controller = binding
            .on_visible(handle, Some(surface.clone() as Arc<dyn PreviewSurface>))
            .unwrap();
        binding.on_destroyed(handle);

        assert!(binding.controller().is_none());
        assert_eq!(controller.state(), ControllerState::Unbound);
        assert_eq!(surface.detached(), 1);
        settle(|| control.close_count() == 1).await;
        assert_eq!(control.close_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_unbinds() {
        let (mut binding, _, control) =
            binding(PermissionGate::new(Arc::new(FixedPermission::granted())));
        let controller = binding.on_visible(LifecycleHandle::new(), None).unwrap();

        drop(binding);
        assert_eq!(controller.state(), ControllerState::Unbound);
        settle(|| control.close_count() == 1).await;
        assert_eq!(control.close_count(), 1);
    }
}
