use thiserror::Error;

use crate::grid::{Axis, TileCoordinate};

/// I/O errors that can occur when fetching from a tile server
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The server answered with a clean "not found" (HTTP 404 or 410)
    #[error("Not found: {url}")]
    NotFound { url: String },

    /// Any other non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Network or connection error (reset, refused, DNS, body read)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request did not complete within its timeout
    #[error("Request timed out: {url}")]
    Timeout { url: String },

    /// The caller cancelled the operation
    #[error("Request cancelled")]
    Cancelled,
}

impl IoError {
    /// Connection resets and timeouts. Probes retry only on these.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, IoError::Connection(_) | IoError::Timeout { .. })
    }

    /// Failures that may succeed on a later attempt.
    ///
    /// Connection-level errors, rate limiting (429) and server errors (5xx).
    /// A 404 is never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            IoError::Connection(_) | IoError::Timeout { .. } => true,
            IoError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            IoError::NotFound { .. } | IoError::Cancelled => false,
        }
    }
}

/// Reasons a computed page size is refused before any buffer is allocated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DimensionError {
    /// NaN, infinite, negative, zero, or rounds to zero
    #[error("Invalid {axis} dimension: {value}")]
    InvalidDimension { axis: Axis, value: f64 },

    /// `width * height * 4` is larger than the configured memory budget
    #[error(
        "Dimensions {width}x{height} need {required_bytes} bytes, exceeding the memory budget of {budget_bytes} bytes"
    )]
    DimensionsExceedMemoryBudget {
        width: u64,
        height: u64,
        required_bytes: u128,
        budget_bytes: u64,
    },

    /// A single edge is longer than the canvas backend allows
    #[error("{axis} of {value}px exceeds the canvas limit of {limit}px")]
    DimensionExceedsCanvasLimit { axis: Axis, value: u64, limit: u32 },
}

/// Reasons a `.dzi` descriptor is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DziError {
    /// The document is not well-formed XML
    #[error("Malformed descriptor: {0}")]
    Malformed(String),

    /// A required element is absent
    #[error("Descriptor has no <{0}> element")]
    MissingElement(&'static str),

    /// A required attribute is absent
    #[error("<{element}> is missing the {attribute} attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// An attribute is present but not a usable value
    #[error("Invalid {attribute} value '{value}'")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
}

/// Errors surfaced by page reconstruction
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// I/O error while talking to the tile server
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The tile URL template is malformed
    #[error("Invalid tile URL template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// No probed zoom level yielded a valid tile
    #[error("No tile level found for {template} between levels {highest} and {lowest}")]
    NoTileLevelFound {
        template: String,
        highest: u32,
        lowest: u32,
    },

    /// Probing ran past the safety sentinel without finding a boundary
    #[error(
        "Grid extent unbounded along {axis} at level {level}: still finding tiles past index {sentinel} ({url})"
    )]
    GridExtentUnbounded {
        axis: Axis,
        level: u32,
        sentinel: u32,
        url: String,
    },

    /// Computed dimensions are unsafe to allocate
    #[error("Unsafe page dimensions: {0}")]
    Dimension(#[from] DimensionError),

    /// Not a single tile could be retrieved
    #[error("Stitching failed: 0 of {expected} tiles retrieved (last error: {last_error})")]
    StitchFailed { expected: usize, last_error: String },

    /// A downloaded tile could not be decoded
    #[error("Failed to decode tile {coordinate}: {message}")]
    DecodeError {
        coordinate: TileCoordinate,
        message: String,
    },

    /// The stitched page could not be encoded
    #[error("Failed to encode page: {message}")]
    EncodeError { message: String },

    /// The caller cancelled the page reconstruction
    #[error("Page reconstruction cancelled")]
    Cancelled,
}
