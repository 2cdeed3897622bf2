//! Camera input, frames and decoding.
//!
//! This module provides abstractions for acquiring frames from a camera,
//! the hardware-owned frame type with its release discipline, and the
//! decode step that turns a raw frame into an RGBA image.

mod camera;
mod config;
pub mod decode;
#[cfg(feature = "camera")]
mod device;
mod frame;

pub use camera::{CameraBackend, CameraError, FrameLedger, MockCamera, MockControl};
pub use config::{
    CaptureConfig, ConfigError, FileConfig, OutputConfig, PreviewConfig, UseCase, MAX_DIMENSION,
};
pub use decode::{decode, DecodeError};
#[cfg(feature = "camera")]
pub use device::NokhwaCamera;
pub use frame::{CapturedImage, PixelFormat, RawFrame, Rotation};
