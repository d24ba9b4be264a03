//! Page encoder.
//!
//! Turns a stitched canvas into bytes for the packaging step. JPEG output
//! drops the alpha channel; every pixel is already opaque because the canvas
//! starts white.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::error::TileError;

use super::stitcher::StitchedImage;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Output Format
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl OutputFormat {
    /// Pick a format from a file extension, JPEG for anything unrecognised.
    pub fn from_path(path: &Path, quality: u8) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => OutputFormat::Png,
            _ => OutputFormat::Jpeg { quality },
        }
    }

    pub const fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

// =============================================================================
// Page Encoder
// =============================================================================

/// Encodes stitched pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageEncoder {
    format: OutputFormat,
}

impl PageEncoder {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Encode a page in the configured format.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::EncodeError`] if the codec rejects the image.
    pub fn encode(&self, page: &StitchedImage) -> Result<Bytes, TileError> {
        let mut output = Vec::new();

        match self.format {
            OutputFormat::Jpeg { quality } => {
                let rgb: RgbImage = page.image.convert();
                let mut encoder =
                    JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
                encoder
                    .encode_image(&rgb)
                    .map_err(|e| TileError::EncodeError {
                        message: e.to_string(),
                    })?;
            }
            OutputFormat::Png => {
                page.image
                    .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
                    .map_err(|e| TileError::EncodeError {
                        message: e.to_string(),
                    })?;
            }
        }

        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
