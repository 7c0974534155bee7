//! Photo validation and conversion into a classifier input tensor.
//!
//! Checks run cheapest first: byte size, format allow-list, header
//! dimensions, and only then a full decode.

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;
use tracing::instrument;

// =============================================================================
// Limits
// =============================================================================

/// Camera photos are a few MB; anything past this is not a photo.
pub const MAX_INPUT_BYTES: usize = 20 * 1024 * 1024;

/// Decompression-bomb guard, checked from the header before decoding.
pub const MAX_PIXELS: u64 = 100_000_000;

pub const MAX_TARGET_SIDE: u32 = 4096;

pub const ALLOWED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("input bytes empty")]
    EmptyInput,

    #[error("input too large: {size} bytes, max {max}")]
    InputTooLarge { size: usize, max: usize },

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode image")]
    Decode(#[source] image::ImageError),

    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("image too large: {width}x{height} exceeds {MAX_PIXELS} pixels")]
    TooManyPixels { width: u32, height: u32 },

    #[error("invalid target size: {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
}

/// Memory order of the produced tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Channels first: `[3, h, w]`.
    Chw,
    /// Channels last: `[h, w, 3]`.
    Hwc,
}

/// RGB pixels scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorImage {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub layout: Layout,
}

impl TensorImage {
    /// Shape including a leading batch of one.
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            Layout::Chw => [1, 3, h, w],
            Layout::Hwc => [1, h, w, 3],
        }
    }
}

/// Checks size, format and header dimensions without decoding pixels.
pub fn inspect(bytes: &[u8]) -> Result<(ImageFormat, u32, u32), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::EmptyInput);
    }
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(ImageError::InputTooLarge {
            size: bytes.len(),
            max: MAX_INPUT_BYTES,
        });
    }

    let format = image::guess_format(bytes).map_err(|_| ImageError::UnsupportedFormat("unknown".into()))?;
    if !ALLOWED_FORMATS.contains(&format) {
        return Err(ImageError::UnsupportedFormat(format!("{format:?}")));
    }

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(ImageError::Decode)?;

    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    if u64::from(width).saturating_mul(u64::from(height)) > MAX_PIXELS {
        return Err(ImageError::TooManyPixels { width, height });
    }

    Ok((format, width, height))
}

/// Decodes, stretches to `width`x`height` and lays out the pixels.
#[instrument(skip(bytes), fields(input_size = bytes.len()))]
pub fn to_tensor(bytes: &[u8], width: u32, height: u32, layout: Layout) -> Result<TensorImage, ImageError> {
    if width == 0 || height == 0 || width > MAX_TARGET_SIDE || height > MAX_TARGET_SIDE {
        return Err(ImageError::InvalidTarget { width, height });
    }

    let (format, _, _) = inspect(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(ImageError::Decode)?;
    let rgb = decoded.resize_exact(width, height, FilterType::Triangle).to_rgb8();

    let plane = (width as usize) * (height as usize);
    let mut data = vec![0.0f32; plane * 3];
    for (i, px) in rgb.pixels().enumerate() {
        for c in 0..3 {
            let v = f32::from(px.0[c]) / 255.0;
            match layout {
                Layout::Chw => data[c * plane + i] = v,
                Layout::Hwc => data[i * 3 + c] = v,
            }
        }
    }

    Ok(TensorImage {
        data,
        width,
        height,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn inspect_reports_dimensions() {
        let (format, w, h) = inspect(&png(8, 4, [0, 0, 0])).unwrap();
        assert_eq!(format, ImageFormat::Png);
        assert_eq!((w, h), (8, 4));
    }

    #[test]
    fn empty_and_garbage_rejected() {
        assert!(matches!(inspect(&[]), Err(ImageError::EmptyInput)));
        assert!(matches!(inspect(b"definitely not an image"), Err(ImageError::UnsupportedFormat(_))));
    }

    #[test]
    fn oversized_input_rejected_before_decoding() {
        let big = vec![0u8; MAX_INPUT_BYTES + 1];
        assert!(matches!(inspect(&big), Err(ImageError::InputTooLarge { .. })));
    }

    #[test]
    fn disallowed_format_rejected() {
        // GIF magic
        assert!(matches!(
            inspect(b"GIF89a\x01\x00\x01\x00\x00\x00\x00"),
            Err(ImageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn chw_planes_are_contiguous() {
        let tensor = to_tensor(&png(3, 3, [255, 0, 51]), 2, 2, Layout::Chw).unwrap();
        assert_eq!(tensor.shape(), [1, 3, 2, 2]);
        assert!(tensor.data[0..4].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(tensor.data[4..8].iter().all(|v| v.abs() < 1e-6));
        assert!(tensor.data[8..12].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn hwc_interleaves_channels() {
        let tensor = to_tensor(&png(2, 2, [0, 255, 0]), 2, 2, Layout::Hwc).unwrap();
        assert_eq!(tensor.shape(), [1, 2, 2, 3]);
        assert_eq!(&tensor.data[0..3], &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn target_size_is_bounded() {
        assert!(matches!(
            to_tensor(&png(2, 2, [0, 0, 0]), 0, 224, Layout::Chw),
            Err(ImageError::InvalidTarget { .. })
        ));
    }
}
