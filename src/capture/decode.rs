//! Raw frame decoding.
//!
//! Converts a hardware frame into an RGBA8 pixel buffer. Decoding is CPU
//! bound and is always run off the caller's task by the controller.

use super::frame::{CapturedImage, PixelFormat, RawFrame, Rotation};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use thiserror::Error;

/// Reasons a raw frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Width or height is zero.
    #[error("frame has zero dimensions")]
    EmptyFrame,
    /// Buffer length does not match the pixel format and dimensions.
    #[error("buffer size mismatch for {format:?}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared pixel format.
        format: PixelFormat,
        /// Bytes the format and dimensions call for.
        expected: usize,
        /// Bytes actually delivered.
        actual: usize,
    },
    /// YUYV packs pixel pairs, so the width must be even.
    #[error("YUYV frame width must be even, got {0}")]
    OddYuyvWidth(u32),
    /// JPEG data the decoder could not read.
    #[error("compressed frame could not be decoded: {0}")]
    Image(#[from] image::ImageError),
}

/// Decodes a raw frame into an upright RGBA8 image.
///
/// The frame itself is only borrowed; releasing it back to the hardware
/// pool stays the caller's responsibility.
pub fn decode(frame: &RawFrame, apply_rotation: bool) -> Result<CapturedImage, DecodeError> {
    let image = decode_rgba(frame)?;
    let image = if apply_rotation {
        rotate(image, frame.rotation())
    } else {
        image
    };

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyFrame);
    }

    tracing::trace!(
        sequence = frame.sequence(),
        width,
        height,
        format = ?frame.format(),
        "Decoded frame"
    );

    Ok(CapturedImage::new(image.into_raw(), width, height, frame.sequence()))
}

fn decode_rgba(frame: &RawFrame) -> Result<RgbaImage, DecodeError> {
    let image = match frame.format() {
        PixelFormat::Jpeg => image::load_from_memory_with_format(frame.data(), ImageFormat::Jpeg)?,
        PixelFormat::Rgba8 => uncompressed(frame, |w, h, data| {
            RgbaImage::from_raw(w, h, data.to_vec()).map(DynamicImage::from)
        })?,
        PixelFormat::Rgb8 => uncompressed(frame, |w, h, data| {
            RgbImage::from_raw(w, h, data.to_vec()).map(DynamicImage::from)
        })?,
        PixelFormat::Gray8 => uncompressed(frame, |w, h, data| {
            GrayImage::from_raw(w, h, data.to_vec()).map(DynamicImage::from)
        })?,
        PixelFormat::Yuyv => {
            if frame.width() % 2 != 0 {
                return Err(DecodeError::OddYuyvWidth(frame.width()));
            }
            uncompressed(frame, |w, h, data| {
                RgbImage::from_raw(w, h, yuyv_to_rgb(data)).map(DynamicImage::from)
            })?
        }
    };
    Ok(image.to_rgba8())
}

fn uncompressed<F>(frame: &RawFrame, build: F) -> Result<DynamicImage, DecodeError>
where
    F: FnOnce(u32, u32, &[u8]) -> Option<DynamicImage>,
{
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DecodeError::EmptyFrame);
    }
    check_len(frame)?;
    // Lengths were checked, so construction only fails on empty input.
    build(frame.width(), frame.height(), frame.data()).ok_or(DecodeError::EmptyFrame)
}

fn check_len(frame: &RawFrame) -> Result<(), DecodeError> {
    if let Some(expected) = frame.format().expected_len(frame.width(), frame.height()) {
        if frame.data().len() != expected {
            return Err(DecodeError::SizeMismatch {
                format: frame.format(),
                expected,
                actual: frame.data().len(),
            });
        }
    }
    Ok(())
}

/// BT.601 limited-range YUYV to packed RGB.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = f32::from(y) - 16.0;
    let d = f32::from(u) - 128.0;
    let e = f32::from(v) - 128.0;

    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;

    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn rotate(image: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Rotate0 => image,
        Rotation::Rotate90 => image::imageops::rotate90(&image),
        Rotation::Rotate180 => image::imageops::rotate180(&image),
        Rotation::Rotate270 => image::imageops::rotate270(&image),
    }
}
