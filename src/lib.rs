//! Still Capture Library
//!
//! Permission-gated, lifecycle-bound single-shot camera capture. A host UI
//! reports when its camera surface becomes visible or goes away; a user
//! action asks for one still; the still arrives as a decoded RGBA buffer at
//! a caller-supplied consumer.
//!
//! # Architecture
//!
//! ```text
//! permission → session (lifecycle → controller → orchestrator) → consumer
//!                              ↓
//!                 capture (backend → raw frame → decode)
//! ```
//!
//! # Design Principles
//!
//! - **No grant, no camera**: a controller can only be built from a
//!   [`permission::CameraAccess`] token
//! - **Hardware follows the UI**: sessions are bound to a surface lifetime
//!   and never outlive it
//! - **Every frame goes back**: raw hardware frames are released exactly
//!   once on every path, success or failure
//! - **Late results are dropped**: a capture finishing after teardown never
//!   reaches a callback
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use still_capture::{
//!     capture::{CameraBackend, CaptureConfig, CapturedImage, MockCamera, PreviewConfig},
//!     permission::{FixedPermission, PermissionGate},
//!     session::{CaptureOrchestrator, LifecycleBinding, LifecycleHandle},
//! };
//!
//! # async fn run() -> Result<(), still_capture::CaptureError> {
//! let gate = PermissionGate::new(Arc::new(FixedPermission::granted()));
//! let mut binding = LifecycleBinding::new(
//!     gate,
//!     CaptureConfig::default(),
//!     PreviewConfig::default(),
//!     || Ok(Box::new(MockCamera::new()) as Box<dyn CameraBackend>),
//! );
//!
//! let screen = LifecycleHandle::new();
//! let controller = binding.on_visible(screen, None)?;
//!
//! let orchestrator = CaptureOrchestrator::new(
//!     controller,
//!     Arc::new(|image: CapturedImage| {
//!         println!("Captured {}x{}", image.width(), image.height());
//!     }),
//! );
//! orchestrator.trigger().await;
//!
//! binding.on_destroyed(screen);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod error;
pub mod metrics;
pub mod permission;
pub mod session;

// Re-export commonly used types at crate root
pub use capture::{CameraBackend, CaptureConfig, CapturedImage, MockCamera, PreviewConfig};
pub use error::{CaptureError, CaptureErrorKind};
pub use permission::{PermissionGate, PermissionState};
pub use session::{CaptureController, CaptureOrchestrator, LifecycleBinding, LifecycleHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
