//! JPEG stream checks.
//!
//! Tile servers occasionally close the connection mid-body; the client sees
//! a 200 with a short payload that still starts with a valid SOI. Such a tile
//! decodes into a grey smear, so it is treated as a transport failure and
//! retried instead of being composited.

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

// =============================================================================
// JPEG Stream Analysis
// =============================================================================

/// Check if JPEG data is a complete stream: starts with SOI, carries at
/// least one DQT, and ends with EOI.
///
/// Trailing padding after EOI (some servers append `0x00` bytes) is ignored.
pub fn is_complete_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let has_tables = data.windows(2).skip(2).any(|w| w == DQT);
    has_tables && ends_with_eoi(data)
}

/// Whether the stream ends with EOI, ignoring trailing zero padding.
pub fn ends_with_eoi(data: &[u8]) -> bool {
    let end = data
        .iter()
        .rposition(|&b| b != 0x00)
        .map(|i| i + 1)
        .unwrap_or(0);
    end >= 2 && data[end - 2..end] == EOI
}
