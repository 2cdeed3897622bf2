//! Raw hardware frames and decoded still images.

use chrono::{DateTime, Utc};

/// Pixel layout of a raw hardware frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB.
    Rgb8,
    /// Packed 8-bit RGBA.
    Rgba8,
    /// 8-bit luminance.
    Gray8,
    /// Packed YUV 4:2:2 (Y0 U Y1 V).
    Yuyv,
    /// JPEG / MJPEG compressed frame.
    Jpeg,
}

impl PixelFormat {
    /// Expected buffer length for uncompressed formats.
    ///
    /// Returns `None` for compressed formats, whose size is not fixed.
    pub fn expected_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize) * (height as usize);
        match self {
            PixelFormat::Rgb8 => Some(pixels * 3),
            PixelFormat::Rgba8 => Some(pixels * 4),
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Yuyv => Some(pixels * 2),
            PixelFormat::Jpeg => None,
        }
    }
}

/// Clockwise rotation needed to display a frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// Already upright.
    #[default]
    Rotate0,
    /// A quarter turn clockwise.
    Rotate90,
    /// Upside down.
    Rotate180,
    /// Three quarter turns clockwise.
    Rotate270,
}

impl Rotation {
    /// Builds a rotation from degrees, snapping to the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        match (degrees.rem_euclid(360) + 45) / 90 % 4 {
            1 => Rotation::Rotate90,
            2 => Rotation::Rotate180,
            3 => Rotation::Rotate270,
            _ => Rotation::Rotate0,
        }
    }

    /// Returns true if width and height swap after rotating.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A frame still owned by the camera hardware.
///
/// The backing buffer belongs to the camera's frame pool and must be handed
/// back exactly once. Call [`RawFrame::release`] once the frame has been
/// decoded; a frame dropped without an explicit release is released by its
/// `Drop` impl, so no exit path can leak it.
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    rotation: Rotation,
    sequence: u64,
    release: Option<ReleaseHook>,
}

impl RawFrame {
    /// Creates a new frame with no release hook.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            rotation: Rotation::Rotate0,
            sequence,
            release: None,
        }
    }

    /// Sets the sensor rotation of this frame.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Installs the hook that returns the buffer to the hardware pool.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Raw pixel bytes as delivered by the hardware.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout of [`data`](Self::data).
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Sensor rotation relative to upright.
    #[inline]
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Monotonic frame number from the backend.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the buffer to the hardware pool.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("rotation", &self.rotation)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A decoded still image.
///
/// Pixels are packed RGBA8, row-major, with no padding.
#[derive(Clone)]
pub struct CapturedImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u64,
    captured_at: DateTime<Utc>,
}

impl CapturedImage {
    /// Creates an image from an RGBA8 buffer.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Utc::now(),
        }
    }

    /// Returns the RGBA8 pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Consumes the image, returning the RGBA8 pixel data.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sequence number of the hardware frame this image came from.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wall-clock time the image was decoded.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == (self.width as usize) * (self.height as usize) * 4
    }

    /// Converts into an [`image::RgbaImage`] for downstream processing.
    pub fn into_rgba_image(self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels)
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
