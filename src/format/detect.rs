//! Tile payload recognition.
//!
//! A probe only counts as a hit when the server returns HTTP 200 *and* the
//! body starts with a known image signature. Many viewers answer missing
//! tiles with a 200 HTML error page or an empty body, so the status alone is
//! not enough.

use super::jpeg::SOI;

/// PNG file signature
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Recognised tile image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Jpeg,
    Png,
}

impl TileFormat {
    /// Get a human-readable name for the format.
    pub const fn name(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "JPEG",
            TileFormat::Png => "PNG",
        }
    }

    pub(crate) const fn image_format(&self) -> image::ImageFormat {
        match self {
            TileFormat::Jpeg => image::ImageFormat::Jpeg,
            TileFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// Identify the image format of a payload from its leading bytes.
///
/// Returns `None` for anything that is not a JPEG or PNG stream.
pub fn detect_tile_format(data: &[u8]) -> Option<TileFormat> {
    // JPEG: SOI followed by the first marker's 0xFF
    if data.len() >= 3 && data[..2] == SOI && data[2] == 0xFF {
        return Some(TileFormat::Jpeg);
    }
    if data.starts_with(&PNG_SIGNATURE) {
        return Some(TileFormat::Png);
    }
    None
}

/// Whether `data` looks like a tile image.
#[inline]
pub fn is_image_payload(data: &[u8]) -> bool {
    detect_tile_format(data).is_some()
}
