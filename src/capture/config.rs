//! Camera capture configuration.
//!
//! The controller is configured exactly once, for still-image capture.
//! No other use case is enabled alongside it, which keeps the hardware
//! pipeline free of contention from streaming analysis.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest accepted frame edge, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

fn check_dimensions(width: u32, height: u32) -> Result<(), ConfigError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ConfigError::InvalidDimensions);
    }
    Ok(())
}

/// Camera use cases a controller can be configured for.
///
/// Only still capture exists; the enum makes the configuration explicit
/// in config files and keeps room for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    /// Single-frame acquisition.
    #[default]
    StillCapture,
}

/// Configuration for still capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index or identifier.
    pub device_id: u32,
    /// Requested still width in pixels.
    pub width: u32,
    /// Requested still height in pixels.
    pub height: u32,
    /// Target sensor frame rate.
    pub fps: u32,
    /// Configured use case. Always still capture.
    pub use_case: UseCase,
    /// Upper bound on a single capture, in milliseconds.
    pub capture_timeout_ms: u64,
    /// Rotate decoded stills upright using the frame's sensor rotation.
    pub apply_rotation: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: 1280,
            height: 720,
            fps: 30,
            use_case: UseCase::StillCapture,
            capture_timeout_ms: 5000,
            apply_rotation: true,
        }
    }
}

impl CaptureConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Returns the capture timeout as a [`Duration`].
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimensions(self.width, self.height)?;
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.capture_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.use_case != UseCase::StillCapture {
            return Err(ConfigError::UnsupportedUseCase);
        }
        Ok(())
    }
}

/// Live preview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Push preview frames to an attached surface.
    pub enabled: bool,
    /// Preview frame width in pixels.
    pub width: u32,
    /// Preview frame height in pixels.
    pub height: u32,
    /// Preview frames per second.
    pub fps: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

impl PreviewConfig {
    /// Interval between preview frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimensions(self.width, self.height)?;
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::InvalidFrameRate);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Width or height is zero or above [`MAX_DIMENSION`].
    #[error("invalid frame dimensions (each edge must be 1-16384 px)")]
    InvalidDimensions,
    /// Frame rate outside 1-120.
    #[error("invalid frame rate (must be 1-120 fps)")]
    InvalidFrameRate,
    /// Zero capture timeout.
    #[error("capture timeout must be non-zero")]
    InvalidTimeout,
    /// Use case other than still capture.
    #[error("only still capture is supported")]
    UnsupportedUseCase,
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Still capture settings.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Live preview settings.
    #[serde(default)]
    pub preview: PreviewConfig,
    /// Exporter settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { metrics_port: 0 }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        config.preview.validate()?;
        Ok(config)
    }
}
