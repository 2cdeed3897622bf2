//! Camera abstraction for still and preview acquisition.
//!
//! This module provides a trait-based abstraction over camera hardware,
//! allowing for both real camera input and mock implementations for testing.

use super::{CaptureConfig, PixelFormat, PreviewConfig, RawFrame, Rotation};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No device matches the configured id.
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    /// The device exists but could not be opened.
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    /// The device rejected the requested format.
    #[error("failed to configure camera: {0}")]
    ConfigFailed(String),
    /// Frame acquisition failed.
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    /// Acquisition attempted on a closed camera.
    #[error("camera not initialized")]
    NotInitialized,
}

/// Trait for camera implementations.
///
/// Calls are blocking. The controller serializes access and only calls
/// these methods from the blocking pool, never from the caller's task.
pub trait CameraBackend: Send {
    /// Opens the camera in still-capture mode.
    fn open(&mut self, capture: &CaptureConfig, preview: &PreviewConfig)
        -> Result<(), CameraError>;

    /// Acquires one full-resolution still frame.
    fn acquire_still(&mut self) -> Result<RawFrame, CameraError>;

    /// Acquires one low-latency preview frame.
    fn acquire_preview(&mut self) -> Result<RawFrame, CameraError>;

    /// Checks if the camera is currently open.
    fn is_open(&self) -> bool;

    /// Closes the camera and releases the hardware.
    fn close(&mut self);
}

/// Counts hardware frames handed out and returned.
///
/// Shared between a backend and whoever wants to audit it; every frame the
/// backend produces reports back here when it is released.
#[derive(Debug, Default)]
pub struct FrameLedger {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl FrameLedger {
    /// Records a frame leaving the pool and installs its release hook.
    pub fn track(self: &Arc<Self>, frame: RawFrame) -> RawFrame {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let ledger = Arc::clone(self);
        frame.on_release(move || {
            ledger.released.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Frames handed out so far.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Frames returned so far.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Frames currently outside the pool.
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

#[derive(Debug, Default)]
struct MockState {
    latency: Mutex<Duration>,
    fail_next: AtomicBool,
    corrupt_next: AtomicBool,
    opens: AtomicU64,
    closes: AtomicU64,
    stills: AtomicU64,
}

/// Handle for steering a [`MockCamera`] after it has been boxed.
#[derive(Debug, Clone)]
pub struct MockControl {
    state: Arc<MockState>,
    ledger: Arc<FrameLedger>,
}

impl MockControl {
    /// Simulated sensor latency for still acquisition.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.state.latency.lock() {
            *guard = latency;
        }
    }

    /// Makes the next still acquisition report a hardware fault.
    pub fn fail_next_capture(&self) {
        self.state.fail_next.store(true, Ordering::SeqCst);
    }

    /// Makes the next still acquisition return an undecodable frame.
    pub fn corrupt_next_capture(&self) {
        self.state.corrupt_next.store(true, Ordering::SeqCst);
    }

    /// Frame accounting for every frame this camera produced.
    pub fn ledger(&self) -> &Arc<FrameLedger> {
        &self.ledger
    }

    /// Number of times the hardware was opened.
    pub fn open_count(&self) -> u64 {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of times the hardware was closed.
    pub fn close_count(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Number of still acquisitions attempted.
    pub fn still_count(&self) -> u64 {
        self.state.stills.load(Ordering::SeqCst)
    }
}

/// Mock camera for testing that generates synthetic frames.
#[derive(Debug)]
pub struct MockCamera {
    config: Option<(CaptureConfig, PreviewConfig)>,
    sequence: u64,
    rotation: Rotation,
    control: MockControl,
}

impl MockCamera {
    /// Creates a closed mock camera.
    pub fn new() -> Self {
        Self {
            config: None,
            sequence: 0,
            rotation: Rotation::Rotate0,
            control: MockControl {
                state: Arc::new(MockState::default()),
                ledger: Arc::new(FrameLedger::default()),
            },
        }
    }

    /// Reports every frame with the given sensor rotation.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Returns a control handle that stays valid after the camera is boxed.
    pub fn control(&self) -> MockControl {
        self.control.clone()
    }

    fn synthesize(&mut self, width: u32, height: u32) -> RawFrame {
        // Diagonal gradient shifted by the sequence number; enough structure
        // to spot orientation mistakes in decoded output.
        let capacity = PixelFormat::Rgb8.expected_len(width, height).unwrap_or(0);
        let mut pixels = Vec::with_capacity(capacity);
        for y in 0..height {
            for x in 0..width {
                let base = u64::from(x) + u64::from(y) + self.sequence;
                pixels.push((base % 256) as u8);
                pixels.push(((x as u64 * 255) / u64::from(width.max(1))) as u8);
                pixels.push(((y as u64 * 255) / u64::from(height.max(1))) as u8);
            }
        }

        self.sequence += 1;
        let frame = RawFrame::new(pixels, width, height, PixelFormat::Rgb8, self.sequence)
            .with_rotation(self.rotation);
        self.control.ledger.track(frame)
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for MockCamera {
    fn open(
        &mut self,
        capture: &CaptureConfig,
        preview: &PreviewConfig,
    ) -> Result<(), CameraError> {
        capture
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        preview
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        self.config = Some((capture.clone(), preview.clone()));
        self.control.state.opens.fetch_add(1, Ordering::SeqCst);
        tracing::info!(device_id = capture.device_id, "MockCamera opened");
        Ok(())
    }

    fn acquire_still(&mut self) -> Result<RawFrame, CameraError> {
        let (width, height) = {
            let (capture, _) = self.config.as_ref().ok_or(CameraError::NotInitialized)?;
            (capture.width, capture.height)
        };
        self.control.state.stills.fetch_add(1, Ordering::SeqCst);

        let latency = self
            .control
            .state
            .latency
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if self.control.state.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CameraError::CaptureFailed("sensor fault".into()));
        }

        if self.control.state.corrupt_next.swap(false, Ordering::SeqCst) {
            // Truncated buffer: hardware hands it out, decode rejects it.
            self.sequence += 1;
            let frame = RawFrame::new(vec![0u8; 3], width, height, PixelFormat::Rgb8, self.sequence);
            return Ok(self.control.ledger.track(frame));
        }

        Ok(self.synthesize(width, height))
    }

    fn acquire_preview(&mut self) -> Result<RawFrame, CameraError> {
        let (width, height) = {
            let (_, preview) = self.config.as_ref().ok_or(CameraError::NotInitialized)?;
            (preview.width, preview.height)
        };
        Ok(self.synthesize(width, height))
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn close(&mut self) {
        if self.config.take().is_some() {
            self.control.state.closes.fetch_add(1, Ordering::SeqCst);
            tracing::info!("MockCamera closed");
        }
    }
}
