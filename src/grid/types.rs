//! Value types shared by the resolver, the calculator and the stitcher.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Axis
// =============================================================================

/// One of the two grid/image axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Columns / width
    Horizontal,
    /// Rows / height
    Vertical,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Horizontal => f.write_str("width"),
            Axis::Vertical => f.write_str("height"),
        }
    }
}

// =============================================================================
// TileCoordinate
// =============================================================================

/// Identifies one tile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    /// Zoom level (0 = single thumbnail tile)
    pub level: u32,

    /// Column index, 0 at the left edge
    pub column: u32,

    /// Row index, 0 at the top edge
    pub row: u32,
}

impl TileCoordinate {
    pub const fn new(level: u32, column: u32, row: u32) -> Self {
        Self { level, column, row }
    }

    /// Coordinate `index` along `axis`, keeping the other index at 0.
    pub const fn along(level: u32, axis: Axis, index: u32) -> Self {
        match axis {
            Axis::Horizontal => Self::new(level, index, 0),
            Axis::Vertical => Self::new(level, 0, index),
        }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.level, self.column, self.row)
    }
}

// =============================================================================
// GridExtent
// =============================================================================

/// The discovered boundary of available tiles at one zoom level.
///
/// `max_column` and `max_row` are inclusive indices of the last tile that
/// exists along row 0 and column 0 respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridExtent {
    pub level: u32,
    pub max_column: u32,
    pub max_row: u32,
    pub tile_size_px: u32,
}

impl GridExtent {
    pub const fn new(level: u32, max_column: u32, max_row: u32, tile_size_px: u32) -> Self {
        Self {
            level,
            max_column,
            max_row,
            tile_size_px,
        }
    }

    /// Number of tile columns (`max_column + 1`).
    pub fn columns(&self) -> u64 {
        self.max_column as u64 + 1
    }

    /// Number of tile rows (`max_row + 1`).
    pub fn rows(&self) -> u64 {
        self.max_row as u64 + 1
    }

    /// Total number of tiles in the grid.
    pub fn tile_count(&self) -> usize {
        (self.columns() * self.rows()) as usize
    }

    /// All coordinates in row-major order.
    pub fn coordinates(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        (0..=self.max_row).flat_map(move |row| {
            (0..=self.max_column).map(move |column| TileCoordinate::new(self.level, column, row))
        })
    }
}

// =============================================================================
// ImageDimensions
// =============================================================================

/// Validated pixel size of a full page.
///
/// Only [`DimensionCalculator`](super::DimensionCalculator) constructs these,
/// so holding one means the size is finite, positive, and within the
/// configured memory and canvas limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDimensions {
    pub width_px: u32,
    pub height_px: u32,
}

impl ImageDimensions {
    pub(crate) const fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }

    /// Bytes needed for an RGBA buffer of this size.
    pub fn rgba_bytes(&self) -> u64 {
        self.width_px as u64 * self.height_px as u64 * super::dimensions::BYTES_PER_PIXEL
    }
}
