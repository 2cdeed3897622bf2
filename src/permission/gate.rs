//! Permission gate and the grant token.

use crate::error::CaptureError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Platform permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    /// Never asked in this process.
    #[default]
    Unrequested,
    /// The user allowed camera access.
    Granted,
    /// The user refused camera access.
    Denied,
}

/// Kinds of permission this crate asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    /// Camera access.
    Camera,
}

/// The platform permission subsystem.
pub trait PermissionProvider: Send + Sync {
    /// Reads the current state without prompting.
    fn check(&self, kind: PermissionKind) -> PermissionState;

    /// Asks for the permission, possibly prompting the user.
    fn request(&self, kind: PermissionKind) -> PermissionState;
}

/// Called when camera access is refused.
///
/// What happens next (rationale screen, settings link) is the host UI's
/// business.
pub trait PermissionDeniedHook: Send + Sync {
    /// Called each time camera access is refused.
    fn on_permission_denied(&self);
}

/// Default hook: a diagnostic log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeniedHook;

impl PermissionDeniedHook for LogDeniedHook {
    fn on_permission_denied(&self) {
        tracing::warn!("Camera permission denied; capture is unavailable");
    }
}

impl<F> PermissionDeniedHook for F
where
    F: Fn() + Send + Sync,
{
    fn on_permission_denied(&self) {
        self()
    }
}

/// Proof that camera permission was granted.
///
/// Only [`PermissionGate`] hands these out, so anything that takes one can
/// rely on the grant having happened.
#[derive(Debug, Clone)]
pub struct CameraAccess {
    _granted: (),
}

/// Provider with a fixed answer.
///
/// Reports `Unrequested` until the first request, then the configured
/// answer. Useful for tests and for hosts without a permission model.
#[derive(Debug)]
pub struct FixedPermission {
    answer: PermissionState,
    current: Mutex<PermissionState>,
    prompts: AtomicU64,
}

impl FixedPermission {
    /// Provider that always answers `answer` once asked.
    pub fn new(answer: PermissionState) -> Self {
        Self {
            answer,
            current: Mutex::new(PermissionState::Unrequested),
            prompts: AtomicU64::new(0),
        }
    }

    /// Provider that grants on request.
    pub fn granted() -> Self {
        Self::new(PermissionState::Granted)
    }

    /// Provider that denies on request.
    pub fn denied() -> Self {
        Self::new(PermissionState::Denied)
    }

    /// Number of times the user would have been prompted.
    pub fn prompts(&self) -> u64 {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl PermissionProvider for FixedPermission {
    fn check(&self, _kind: PermissionKind) -> PermissionState {
        self.current
            .lock()
            .map(|state| *state)
            .unwrap_or(PermissionState::Denied)
    }

    fn request(&self, _kind: PermissionKind) -> PermissionState {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut state) = self.current.lock() {
            *state = self.answer;
        }
        self.answer
    }
}

/// Asks for camera access before any camera resource exists.
///
/// The platform is prompted at most once per gate; create one gate per
/// process. Later calls only re-read the platform state.
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
    denied_hook: Arc<dyn PermissionDeniedHook>,
    state: PermissionState,
    prompted: bool,
}

impl PermissionGate {
    /// Creates a gate in front of `provider` with the logging denied hook.
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        Self {
            provider,
            denied_hook: Arc::new(LogDeniedHook),
            state: PermissionState::Unrequested,
            prompted: false,
        }
    }

    /// Replaces the hook called when access is denied.
    pub fn with_denied_hook(mut self, hook: Arc<dyn PermissionDeniedHook>) -> Self {
        self.denied_hook = hook;
        self
    }

    /// Requests camera access, prompting only on the first call.
    pub fn request_camera_access(&mut self) -> PermissionState {
        self.state = if self.prompted {
            self.provider.check(PermissionKind::Camera)
        } else {
            self.prompted = true;
            tracing::debug!("Requesting camera permission");
            self.provider.request(PermissionKind::Camera)
        };
        tracing::debug!(state = ?self.state, "Camera permission state");
        self.state
    }

    /// Last observed permission state.
    pub fn state(&self) -> PermissionState {
        self.state
    }

    /// Returns a grant token, or fires the denied hook.
    pub fn camera_access(&mut self) -> Result<CameraAccess, CaptureError> {
        match self.request_camera_access() {
            PermissionState::Granted => Ok(CameraAccess { _granted: () }),
            _ => {
                self.denied_hook.on_permission_denied();
                Err(CaptureError::PermissionDenied)
            }
        }
    }
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("state", &self.state)
            .field("prompted", &self.prompted)
            .finish()
    }
}
