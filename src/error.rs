//! Capture pipeline errors.

use crate::capture::{CameraError, ConfigError, DecodeError};
use thiserror::Error;

/// Errors surfaced by the capture pipeline.
///
/// Every variant is terminal for the attempt that produced it. Nothing in
/// the pipeline retries; the controller is back to idle afterwards.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// Camera permission is not granted.
    #[error("camera permission not granted")]
    PermissionDenied,
    /// No session is bound to a UI lifetime.
    #[error("no capture session is bound")]
    BindingUnavailable,
    /// The camera failed or did not deliver a frame in time.
    #[error("camera hardware failure: {0}")]
    HardwareCaptureFailure(String),
    /// The frame arrived but could not be decoded.
    #[error("failed to decode captured frame: {0}")]
    DecodeFailure(String),
    /// Another capture is still in flight.
    #[error("a capture is already in flight")]
    Busy,
    /// The session was torn down while the capture was pending.
    #[error("capture session was torn down")]
    SessionClosed,
    /// Another controller holds the device.
    #[error("camera device {device_id} is bound by another controller")]
    DeviceInUse {
        /// The contested device.
        device_id: u32,
    },
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Flat classification of [`CaptureError`], for metrics and outcomes.
///
/// One kind per [`CaptureError`] variant, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureErrorKind {
    /// [`CaptureError::PermissionDenied`].
    PermissionDenied,
    /// [`CaptureError::BindingUnavailable`].
    BindingUnavailable,
    /// [`CaptureError::HardwareCaptureFailure`].
    HardwareCaptureFailure,
    /// [`CaptureError::DecodeFailure`].
    DecodeFailure,
    /// [`CaptureError::Busy`].
    Busy,
    /// [`CaptureError::SessionClosed`].
    SessionClosed,
    /// [`CaptureError::DeviceInUse`].
    DeviceInUse,
    /// [`CaptureError::Config`].
    Config,
}

impl CaptureErrorKind {
    /// Stable label used in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureErrorKind::PermissionDenied => "permission_denied",
            CaptureErrorKind::BindingUnavailable => "binding_unavailable",
            CaptureErrorKind::HardwareCaptureFailure => "hardware",
            CaptureErrorKind::DecodeFailure => "decode",
            CaptureErrorKind::Busy => "busy",
            CaptureErrorKind::SessionClosed => "session_closed",
            CaptureErrorKind::DeviceInUse => "device_in_use",
            CaptureErrorKind::Config => "config",
        }
    }
}

impl CaptureError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> CaptureErrorKind {
        match self {
            CaptureError::PermissionDenied => CaptureErrorKind::PermissionDenied,
            CaptureError::BindingUnavailable => CaptureErrorKind::BindingUnavailable,
            CaptureError::HardwareCaptureFailure(_) => CaptureErrorKind::HardwareCaptureFailure,
            CaptureError::DecodeFailure(_) => CaptureErrorKind::DecodeFailure,
            CaptureError::Busy => CaptureErrorKind::Busy,
            CaptureError::SessionClosed => CaptureErrorKind::SessionClosed,
            CaptureError::DeviceInUse { .. } => CaptureErrorKind::DeviceInUse,
            CaptureError::Config(_) => CaptureErrorKind::Config,
        }
    }
}

impl From<CameraError> for CaptureError {
    fn from(error: CameraError) -> Self {
        CaptureError::HardwareCaptureFailure(error.to_string())
    }
}

impl From<DecodeError> for CaptureError {
    fn from(error: DecodeError) -> Self {
        CaptureError::DecodeFailure(error.to_string())
    }
}
