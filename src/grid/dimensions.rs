//! Page dimension calculation and validation.
//!
//! The resolver selects the highest level that has tiles, so the pixel size of
//! that level's grid *is* the full-resolution page size:
//!
//! ```text
//! width  = (max_column + 1) * tile_size
//! height = (max_row    + 1) * tile_size
//! ```
//!
//! No `2^level` factor is applied. Every size is validated before anything
//! is allocated; the calculator is pure and never allocates a pixel buffer.

use crate::error::DimensionError;

use super::{Axis, GridExtent, ImageDimensions};

/// Bytes per RGBA pixel.
pub const BYTES_PER_PIXEL: u64 = 4;

/// Default memory budget for one page buffer (1 GiB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;

/// Default maximum edge length, matching common 2D canvas backends.
pub const DEFAULT_MAX_CANVAS_EDGE_PX: u32 = 16384;

// =============================================================================
// Limits
// =============================================================================

/// Allocation limits applied to every computed page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionLimits {
    /// Maximum `width * height * 4`
    pub memory_budget_bytes: u64,

    /// Maximum width or height in pixels
    pub max_canvas_edge_px: u32,
}

impl Default for DimensionLimits {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            max_canvas_edge_px: DEFAULT_MAX_CANVAS_EDGE_PX,
        }
    }
}

// =============================================================================
// DimensionCalculator
// =============================================================================

/// Converts a [`GridExtent`] into validated [`ImageDimensions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DimensionCalculator {
    limits: DimensionLimits,
}

impl DimensionCalculator {
    pub fn new(limits: DimensionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DimensionLimits {
        &self.limits
    }

    /// Full-resolution page size for `grid`.
    pub fn calculate(&self, grid: &GridExtent) -> Result<ImageDimensions, DimensionError> {
        let (width, height) = level_size(grid);
        self.validate(width, height)
    }

    /// Validate a raw width/height pair.
    ///
    /// Checks run in this order: each value is finite and rounds to a
    /// positive integer, the RGBA buffer fits the memory budget, and each
    /// edge fits the canvas limit.
    pub fn validate(
        &self,
        width_px: f64,
        height_px: f64,
    ) -> Result<ImageDimensions, DimensionError> {
        let width = checked_edge(Axis::Horizontal, width_px)?;
        let height = checked_edge(Axis::Vertical, height_px)?;

        let required_bytes = width as u128 * height as u128 * BYTES_PER_PIXEL as u128;
        if required_bytes > self.limits.memory_budget_bytes as u128 {
            return Err(DimensionError::DimensionsExceedMemoryBudget {
                width,
                height,
                required_bytes,
                budget_bytes: self.limits.memory_budget_bytes,
            });
        }

        let limit = self.limits.max_canvas_edge_px;
        for (axis, value) in [(Axis::Horizontal, width), (Axis::Vertical, height)] {
            if value > limit as u64 {
                return Err(DimensionError::DimensionExceedsCanvasLimit { axis, value, limit });
            }
        }

        Ok(ImageDimensions::new(width as u32, height as u32))
    }

    /// Uniform scale factor `sqrt(budget / naive_size)` for a size that
    /// exceeds the memory budget. Returns `1.0` when it already fits.
    ///
    /// Applying the factor is a caller decision; [`calculate`](Self::calculate)
    /// never scales.
    pub fn downscale_factor(&self, width_px: u64, height_px: u64) -> f64 {
        let naive_size = width_px as f64 * height_px as f64 * BYTES_PER_PIXEL as f64;
        if naive_size <= self.limits.memory_budget_bytes as f64 {
            return 1.0;
        }
        (self.limits.memory_budget_bytes as f64 / naive_size).sqrt()
    }

    /// Largest uniformly scaled size of `grid` that passes validation.
    ///
    /// Combines the memory-budget factor with the canvas edge limit and
    /// rounds down, so the result never exceeds either limit.
    pub fn fit_within_limits(&self, grid: &GridExtent) -> Result<ImageDimensions, DimensionError> {
        let (width, height) = level_size(grid);
        checked_edge(Axis::Horizontal, width)?;
        checked_edge(Axis::Vertical, height)?;

        let edge = self.limits.max_canvas_edge_px as f64;
        let scale = self
            .downscale_factor(width as u64, height as u64)
            .min(edge / width)
            .min(edge / height)
            .min(1.0);

        self.validate((width * scale).floor(), (height * scale).floor())
    }
}

/// Pixel size of the grid at its own level.
fn level_size(grid: &GridExtent) -> (f64, f64) {
    let tile = grid.tile_size_px as f64;
    (grid.columns() as f64 * tile, grid.rows() as f64 * tile)
}

fn checked_edge(axis: Axis, value: f64) -> Result<u64, DimensionError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DimensionError::InvalidDimension { axis, value });
    }
    let rounded = value.round();
    if rounded < 1.0 || rounded > u32::MAX as f64 {
        return Err(DimensionError::InvalidDimension { axis, value });
    }
    Ok(rounded as u64)
}
