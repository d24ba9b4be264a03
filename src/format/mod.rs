//! Tile payload formats.
//!
//! - [`detect`]: recognise JPEG/PNG payloads by their signatures
//! - [`jpeg`]: JPEG stream completeness checks

pub mod detect;
pub mod jpeg;

pub use detect::{detect_tile_format, is_image_payload, TileFormat, PNG_SIGNATURE};
pub use jpeg::{ends_with_eoi, is_complete_stream};
