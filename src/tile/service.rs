//! Page reconstruction pipeline.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PageReconstructor                       │
//! │                                                              │
//! │  1. find_max_level     ┐                                     │
//! │  2. find_grid_extent   ┘ TileGridResolver (sequential)       │
//! │  3. calculate          ─ DimensionCalculator (pure)          │
//! │  4. stitch             ─ TileStitcher (bounded concurrency)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All components share one fetcher. Pages are processed one after
//! another; the first page that fails stops the run.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::TileError;
use crate::grid::{
    DimensionCalculator, DziDescriptor, GridExtent, ImageDimensions, TileGridResolver,
    TileUrlTemplate,
};
use crate::io::TileFetcher;

use super::stitcher::{StitchedImage, TileStitcher};

// =============================================================================
// Page Request
// =============================================================================

/// One page to reconstruct.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub template: TileUrlTemplate,
    pub tile_size_px: u32,

    /// Declared metadata to compare against the probed grid
    pub descriptor: Option<DziDescriptor>,
}

impl PageRequest {
    pub fn new(template: TileUrlTemplate, tile_size_px: u32) -> Self {
        Self {
            template,
            tile_size_px,
            descriptor: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: DziDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }
}

// =============================================================================
// Resolved Page
// =============================================================================

/// Probing and sizing result for one page, before any tile is downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedPage {
    pub grid: GridExtent,
    pub dimensions: ImageDimensions,

    /// Whether `dimensions` is smaller than the grid's native size
    pub downscaled: bool,

    /// Outcome of the descriptor cross-check, if a descriptor was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor_agrees: Option<bool>,
}

// =============================================================================
// Page Reconstructor
// =============================================================================

/// Runs the full resolve, size and stitch pipeline.
pub struct PageReconstructor<F: TileFetcher + 'static> {
    resolver: TileGridResolver<F>,
    calculator: DimensionCalculator,
    stitcher: TileStitcher<F>,
    allow_downscale: bool,
    low_confidence_threshold: f64,
}

impl<F: TileFetcher + 'static> PageReconstructor<F> {
    pub fn new(fetcher: F, config: &EngineConfig) -> Self {
        Self::with_shared_fetcher(Arc::new(fetcher), config)
    }

    pub fn with_shared_fetcher(fetcher: Arc<F>, config: &EngineConfig) -> Self {
        Self {
            resolver: TileGridResolver::with_shared_fetcher(
                Arc::clone(&fetcher),
                config.resolver_config(),
            ),
            calculator: DimensionCalculator::new(config.dimension_limits()),
            stitcher: TileStitcher::with_shared_fetcher(fetcher, config.stitch_config()),
            allow_downscale: config.allow_downscale,
            low_confidence_threshold: config.low_confidence_threshold,
        }
    }

    /// Report stitching progress as `(done, expected)` tiles.
    pub fn on_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.stitcher = self.stitcher.on_progress(callback);
        self
    }

    pub fn resolver(&self) -> &TileGridResolver<F> {
        &self.resolver
    }

    pub fn calculator(&self) -> &DimensionCalculator {
        &self.calculator
    }

    /// Probe the server and size the page without downloading tiles.
    ///
    /// # Errors
    ///
    /// Probe errors from the resolver, or [`TileError::Dimension`] when the
    /// page is too large and downscaling is not allowed.
    pub async fn resolve(
        &self,
        page: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedPage, TileError> {
        let grid = self
            .resolver
            .resolve(&page.template, page.tile_size_px, cancel)
            .await?;

        let descriptor_agrees = page
            .descriptor
            .as_ref()
            .map(|descriptor| self.resolver.cross_check(&grid, descriptor));

        let (dimensions, downscaled) = match self.calculator.calculate(&grid) {
            Ok(dimensions) => (dimensions, false),
            Err(e) if self.allow_downscale => {
                let dimensions = self.calculator.fit_within_limits(&grid)?;
                warn!(
                    level = grid.level,
                    reason = %e,
                    width = dimensions.width_px,
                    height = dimensions.height_px,
                    "Downscaling page to fit limits"
                );
                (dimensions, true)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ResolvedPage {
            grid,
            dimensions,
            downscaled,
            descriptor_agrees,
        })
    }

    /// Reconstruct one page.
    ///
    /// Missing tiles are not an error; check
    /// [`StitchedImage::is_complete`] or the low-confidence warning.
    pub async fn reconstruct_page(
        &self,
        page: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<StitchedImage, TileError> {
        let resolved = self.resolve(page, cancel).await?;
        let stitched = self
            .stitcher
            .stitch(&page.template, &resolved.grid, resolved.dimensions, cancel)
            .await?;

        if stitched.is_low_confidence(self.low_confidence_threshold) {
            warn!(
                template = %page.template,
                tiles_used = stitched.tiles_used,
                tiles_expected = stitched.tiles_expected,
                threshold = self.low_confidence_threshold,
                "Low-confidence page: too many tiles missing"
            );
        }

        Ok(stitched)
    }

    /// Reconstruct pages in order, stopping at the first failure.
    pub async fn reconstruct_pages(
        &self,
        pages: &[PageRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<StitchedImage>, TileError> {
        let mut stitched = Vec::with_capacity(pages.len());
        self.for_each_page(pages, cancel, |_, _, image| {
            stitched.push(image);
            Ok::<_, TileError>(())
        })
        .await?;
        Ok(stitched)
    }

    /// Reconstruct pages in order and hand each one to `on_page` as soon as
    /// it is done, so only one page is held in memory at a time.
    ///
    /// Stops at the first page that fails or that `on_page` rejects.
    pub async fn for_each_page<E, C>(
        &self,
        pages: &[PageRequest],
        cancel: &CancellationToken,
        mut on_page: C,
    ) -> Result<(), E>
    where
        E: From<TileError>,
        C: FnMut(usize, &PageRequest, StitchedImage) -> Result<(), E>,
    {
        for (index, page) in pages.iter().enumerate() {
            info!(
                page = index + 1,
                total = pages.len(),
                template = %page.template,
                "Reconstructing page"
            );
            match self.reconstruct_page(page, cancel).await {
                Ok(image) => on_page(index, page, image)?,
                Err(e) => {
                    warn!(page = index + 1, error = %e, "Page failed, stopping");
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
