//! Tile grid discovery by probing.
//!
//! Declared metadata (a `.dzi` descriptor, a IIIF `info.json`) is missing or
//! wrong for many of the bespoke viewers we deal with, so the resolver asks
//! the tile server directly:
//!
//! 1. **Max level**: request tile `(level, 0, 0)` from the top of the probe
//!    range downwards; the first level that returns an image wins.
//! 2. **Grid extent**: at that level, walk along row 0 and column 0 until
//!    [`BoundarySearch`] confirms the boundary with consecutive misses.
//!
//! Probing is strictly sequential with a small pause between requests: each
//! step depends on the previous result, and parallel probes against the same
//! origin tend to trigger rate limiting that looks like false misses.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{IoError, TileError};
use crate::format::is_image_payload;
use crate::io::{RetryPolicy, TileFetcher};

use super::{
    Axis, BoundarySearch, BoundaryStep, DziDescriptor, GridExtent, TileCoordinate,
    TileUrlTemplate,
};

/// Default highest level probed.
pub const DEFAULT_HIGHEST_LEVEL: u32 = 20;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between consecutive probes.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_millis(50);

/// Default cap on probed column/row indices.
pub const DEFAULT_PROBE_SENTINEL: u32 = 500;

/// Default number of consecutive misses that confirm a boundary.
pub const DEFAULT_MISSES_TO_CONFIRM: u32 = 2;

// =============================================================================
// Configuration
// =============================================================================

/// Inclusive range of zoom levels to probe, searched from `highest` down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRange {
    pub highest: u32,
    pub lowest: u32,
}

impl Default for ProbeRange {
    fn default() -> Self {
        Self {
            highest: DEFAULT_HIGHEST_LEVEL,
            lowest: 0,
        }
    }
}

/// Resolver tuning knobs. None of these affect correctness, only how long
/// discovery takes and how hard it leans on the origin server.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub probe_range: ProbeRange,
    pub probe_timeout: Duration,
    pub probe_delay: Duration,
    pub misses_to_confirm: u32,
    pub sentinel: u32,
    pub retry: RetryPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_range: ProbeRange::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_delay: DEFAULT_PROBE_DELAY,
            misses_to_confirm: DEFAULT_MISSES_TO_CONFIRM,
            sentinel: DEFAULT_PROBE_SENTINEL,
            retry: RetryPolicy::probe(),
        }
    }
}

// =============================================================================
// Probe Outcome
// =============================================================================

/// Result of probing one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// HTTP 200 with an image payload
    Hit,

    /// Clean 404/410
    NotFound,

    /// Some other HTTP status (403 and 500 are common past the grid edge)
    Status(u16),

    /// HTTP 200 but the body is not an image (HTML error page, empty body)
    NotAnImage,
}

impl ProbeOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, ProbeOutcome::Hit)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Discovers the maximum zoom level and grid extent of a tile pyramid.
pub struct TileGridResolver<F: TileFetcher> {
    fetcher: Arc<F>,
    config: ResolverConfig,
}

impl<F: TileFetcher> TileGridResolver<F> {
    pub fn new(fetcher: F, config: ResolverConfig) -> Self {
        Self::with_shared_fetcher(Arc::new(fetcher), config)
    }

    /// Create a resolver that shares its fetcher with other components.
    pub fn with_shared_fetcher(fetcher: Arc<F>, config: ResolverConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Find the highest level in the probe range at which tile `(level, 0, 0)`
    /// exists.
    ///
    /// # Errors
    ///
    /// - [`TileError::NoTileLevelFound`] if no level yields an image
    /// - [`TileError::Io`] if the server stays unreachable after a retry
    /// - [`TileError::Cancelled`] if `cancel` fires
    pub async fn find_max_level(
        &self,
        template: &TileUrlTemplate,
        cancel: &CancellationToken,
    ) -> Result<u32, TileError> {
        let ProbeRange { highest, lowest } = self.config.probe_range;

        for (i, level) in (lowest..=highest).rev().enumerate() {
            if i > 0 {
                self.pace(cancel).await?;
            }

            let outcome = self
                .probe(template, TileCoordinate::new(level, 0, 0), cancel)
                .await?;
            debug!(level = level, outcome = ?outcome, "Level probe");

            if outcome.is_hit() {
                info!(
                    level = level,
                    template = %template,
                    fetcher = self.fetcher.identifier(),
                    "Found max tile level"
                );
                return Ok(level);
            }
        }

        Err(TileError::NoTileLevelFound {
            template: template.to_string(),
            highest,
            lowest,
        })
    }

    /// Find the column/row extent at `level`.
    ///
    /// Columns are probed along row 0 and rows along column 0. Tile
    /// `(level, 0, 0)` is assumed to exist.
    ///
    /// # Errors
    ///
    /// - [`TileError::GridExtentUnbounded`] if tiles keep appearing past the
    ///   sentinel index
    /// - [`TileError::Io`] if the server stays unreachable after a retry
    /// - [`TileError::Cancelled`] if `cancel` fires
    pub async fn find_grid_extent(
        &self,
        template: &TileUrlTemplate,
        level: u32,
        tile_size_px: u32,
        cancel: &CancellationToken,
    ) -> Result<GridExtent, TileError> {
        let max_column = self
            .find_axis_boundary(template, level, Axis::Horizontal, cancel)
            .await?;
        let max_row = self
            .find_axis_boundary(template, level, Axis::Vertical, cancel)
            .await?;

        let grid = GridExtent::new(level, max_column, max_row, tile_size_px);
        info!(
            level = level,
            columns = grid.columns(),
            rows = grid.rows(),
            tile_size = tile_size_px,
            "Resolved tile grid"
        );
        Ok(grid)
    }

    /// [`find_max_level`](Self::find_max_level) followed by
    /// [`find_grid_extent`](Self::find_grid_extent).
    pub async fn resolve(
        &self,
        template: &TileUrlTemplate,
        tile_size_px: u32,
        cancel: &CancellationToken,
    ) -> Result<GridExtent, TileError> {
        let level = self.find_max_level(template, cancel).await?;
        self.pace(cancel).await?;
        self.find_grid_extent(template, level, tile_size_px, cancel)
            .await
    }

    /// Compare a probed grid with a declared descriptor.
    ///
    /// Returns `true` when they agree. Disagreement is logged, never acted
    /// on: the probed grid stays authoritative.
    pub fn cross_check(&self, grid: &GridExtent, descriptor: &DziDescriptor) -> bool {
        let declared = descriptor.tile_grid(grid.level);
        let probed = (grid.columns() as u32, grid.rows() as u32);
        let agrees = declared == Some(probed) && descriptor.tile_size == grid.tile_size_px;

        if !agrees {
            warn!(
                level = grid.level,
                probed_columns = probed.0,
                probed_rows = probed.1,
                probed_tile_size = grid.tile_size_px,
                declared = ?declared,
                declared_tile_size = descriptor.tile_size,
                declared_max_level = descriptor.max_level(),
                "Declared DZI metadata disagrees with probed grid"
            );
        }
        agrees
    }

    /// Probe one tile.
    ///
    /// Connection-level failures get one retry; if they persist the error is
    /// returned with the URL so the caller can tell an unreachable server
    /// from a missing tile.
    pub async fn probe(
        &self,
        template: &TileUrlTemplate,
        coordinate: TileCoordinate,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, TileError> {
        let url = template.url_for(coordinate);
        let timeout = self.config.probe_timeout;

        let result = self
            .config
            .retry
            .run(cancel, |_| {
                let url = url.as_str();
                async move {
                    match tokio::time::timeout(timeout, self.fetcher.fetch(url)).await {
                        Ok(result) => result,
                        Err(_) => Err(IoError::Timeout {
                            url: url.to_string(),
                        }),
                    }
                }
            })
            .await;

        match result {
            Ok(body) if is_image_payload(&body) => Ok(ProbeOutcome::Hit),
            Ok(body) => {
                debug!(
                    url = %url,
                    bytes = body.len(),
                    "Probe returned a non-image payload"
                );
                Ok(ProbeOutcome::NotAnImage)
            }
            Err(IoError::NotFound { .. }) => Ok(ProbeOutcome::NotFound),
            Err(IoError::Http { status, .. }) => Ok(ProbeOutcome::Status(status)),
            Err(IoError::Cancelled) => Err(TileError::Cancelled),
            Err(e) => {
                warn!(
                    level = coordinate.level,
                    column = coordinate.column,
                    row = coordinate.row,
                    url = %url,
                    error = %e,
                    "Probe failed after retry"
                );
                Err(TileError::Io(e))
            }
        }
    }

    async fn find_axis_boundary(
        &self,
        template: &TileUrlTemplate,
        level: u32,
        axis: Axis,
        cancel: &CancellationToken,
    ) -> Result<u32, TileError> {
        let mut search = BoundarySearch::new(self.config.misses_to_confirm, self.config.sentinel);

        loop {
            match search.next_step() {
                BoundaryStep::Probe(index) => {
                    self.pace(cancel).await?;
                    let coordinate = TileCoordinate::along(level, axis, index);
                    let outcome = self.probe(template, coordinate, cancel).await?;
                    debug!(
                        level = level,
                        axis = %axis,
                        index = index,
                        outcome = ?outcome,
                        "Extent probe"
                    );
                    search.record(outcome.is_hit());
                }
                BoundaryStep::Found(max_index) => return Ok(max_index),
                BoundaryStep::Unbounded => {
                    let last = TileCoordinate::along(level, axis, search.last_hit());
                    return Err(TileError::GridExtentUnbounded {
                        axis,
                        level,
                        sentinel: self.config.sentinel,
                        url: template.url_for(last),
                    });
                }
            }
        }
    }

    async fn pace(&self, cancel: &CancellationToken) -> Result<(), TileError> {
        if self.config.probe_delay.is_zero() {
            return if cancel.is_cancelled() {
                Err(TileError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TileError::Cancelled),
            _ = tokio::time::sleep(self.config.probe_delay) => Ok(()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
