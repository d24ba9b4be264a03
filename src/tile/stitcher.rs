//! Tile download and compositing.
//!
//! [`TileStitcher`] fetches every tile of a [`GridExtent`] with bounded
//! concurrency and draws each one into its own cell of a single RGBA canvas.
//!
//! # Placement
//!
//! Cell `(column, row)` starts at `(column * tile_size, row * tile_size)` and
//! is at most one tile wide and high. Before drawing, a tile is cropped:
//!
//! - the leading `overlap` pixels are dropped on tiles with `column > 0`
//!   (resp. `row > 0`), as Deep Zoom servers repeat them from the neighbour
//! - the remainder is cut to one cell, then clipped at the canvas edge
//!
//! Cells never intersect, so the result does not depend on the order in which
//! downloads complete.
//!
//! When the canvas is smaller than the grid (the caller opted into
//! downscaling), each cell is resized into `floor(start * scale) ..
//! floor(end * scale)`, which keeps neighbouring cells disjoint.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{IoError, TileError};
use crate::format::{detect_tile_format, is_complete_stream, TileFormat};
use crate::grid::{GridExtent, ImageDimensions, TileCoordinate, TileUrlTemplate};
use crate::io::{RetryPolicy, TileFetcher, DEFAULT_REQUEST_TIMEOUT};

/// Default number of tile downloads in flight.
pub const DEFAULT_TILE_CONCURRENCY: usize = 4;

/// Default attempts per tile, including the first.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default success ratio below which a page is considered low-confidence.
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Fill for regions whose tile could not be retrieved.
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Called after every finished tile with `(done, expected)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

type TileRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct StitchConfig {
    /// Maximum tile downloads in flight
    pub concurrency: usize,

    /// Retry policy for each tile
    pub retry: RetryPolicy,

    /// Timeout for a single tile request
    pub request_timeout: Duration,

    /// Pixels each tile shares with its left/top neighbour
    pub overlap_px: u32,

    /// Request rate cap shared by all downloads of one page, off when `None`
    pub rate_limit: Option<RateLimit>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_TILE_CONCURRENCY,
            retry: RetryPolicy::tiles(DEFAULT_RETRY_ATTEMPTS),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            overlap_px: 0,
            rate_limit: None,
        }
    }
}

/// Token bucket for tile requests.
///
/// Up to `burst` requests go out back to back, after which they are spaced
/// at `requests_per_second`. Retries draw from the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl RateLimit {
    pub fn per_second(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            burst: 1,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// `None` when either value is zero.
    pub fn quota(&self) -> Option<Quota> {
        let rate = NonZeroU32::new(self.requests_per_second)?;
        let burst = NonZeroU32::new(self.burst)?;
        Some(Quota::per_second(rate).allow_burst(burst))
    }
}

// =============================================================================
// Stitched Image
// =============================================================================

/// A composited page plus how much of it was actually retrieved.
#[derive(Clone)]
pub struct StitchedImage {
    pub image: RgbaImage,
    pub width_px: u32,
    pub height_px: u32,
    pub level: u32,
    pub tiles_used: usize,
    pub tiles_expected: usize,

    /// Tiles that failed after retries, sorted by row then column
    pub missing: Vec<TileCoordinate>,
}

impl StitchedImage {
    /// Fraction of expected tiles that made it into the image.
    pub fn success_ratio(&self) -> f64 {
        if self.tiles_expected == 0 {
            return 0.0;
        }
        self.tiles_used as f64 / self.tiles_expected as f64
    }

    pub fn is_complete(&self) -> bool {
        self.tiles_used == self.tiles_expected
    }

    /// Whether the caller should treat this page as unreliable.
    pub fn is_low_confidence(&self, threshold: f64) -> bool {
        self.success_ratio() < threshold
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

impl fmt::Debug for StitchedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StitchedImage")
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("level", &self.level)
            .field("tiles_used", &self.tiles_used)
            .field("tiles_expected", &self.tiles_expected)
            .field("missing", &self.missing)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Stitcher
// =============================================================================

/// Downloads the tiles of one grid and composites them.
pub struct TileStitcher<F: TileFetcher + 'static> {
    fetcher: Arc<F>,
    config: StitchConfig,
    on_progress: Option<ProgressCallback>,
}

impl<F: TileFetcher + 'static> TileStitcher<F> {
    pub fn new(fetcher: F, config: StitchConfig) -> Self {
        Self::with_shared_fetcher(Arc::new(fetcher), config)
    }

    pub fn with_shared_fetcher(fetcher: Arc<F>, config: StitchConfig) -> Self {
        Self {
            fetcher,
            config,
            on_progress: None,
        }
    }

    /// Register a progress callback.
    pub fn on_progress(
        mut self,
        callback: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Fetch every tile of `grid` and composite them into a
    /// `dimensions`-sized canvas.
    ///
    /// Missing tiles leave their cell white and are listed in
    /// [`StitchedImage::missing`]. The call waits for every download to
    /// finish (or be aborted) before returning.
    ///
    /// # Errors
    ///
    /// - [`TileError::StitchFailed`] if not a single tile was retrieved
    /// - [`TileError::Cancelled`] if `cancel` fires; in-flight downloads are
    ///   aborted and drained first
    pub async fn stitch(
        &self,
        template: &TileUrlTemplate,
        grid: &GridExtent,
        dimensions: ImageDimensions,
        cancel: &CancellationToken,
    ) -> Result<StitchedImage, TileError> {
        if cancel.is_cancelled() {
            return Err(TileError::Cancelled);
        }

        let expected = grid.tile_count();
        let layout = CellLayout::new(grid, dimensions, self.config.overlap_px);
        let mut canvas =
            RgbaImage::from_pixel(dimensions.width_px, dimensions.height_px, BACKGROUND);

        debug!(
            level = grid.level,
            tiles = expected,
            width = dimensions.width_px,
            height = dimensions.height_px,
            concurrency = self.config.concurrency,
            rate_limit = ?self.config.rate_limit,
            fetcher = self.fetcher.identifier(),
            "Starting tile downloads"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let limiter: Option<Arc<TileRateLimiter>> = self
            .config
            .rate_limit
            .and_then(|limit| limit.quota())
            .map(|quota| Arc::new(RateLimiter::direct(quota)));
        let mut downloads = JoinSet::new();
        let mut outstanding: HashSet<TileCoordinate> = HashSet::with_capacity(expected);

        for coordinate in grid.coordinates() {
            outstanding.insert(coordinate);

            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let limiter = limiter.clone();
            let url = template.url_for(coordinate);
            let retry = self.config.retry;
            let timeout = self.config.request_timeout;
            let cancel = cancel.clone();

            downloads.spawn(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        let request = TileRequest {
                            url: &url,
                            coordinate,
                            retry,
                            timeout,
                            limiter: limiter.as_deref(),
                        };
                        download_tile(fetcher.as_ref(), request, &cancel).await
                    }
                    Err(_) => Err(TileError::Cancelled),
                };
                (coordinate, result)
            });
        }

        let mut tiles_used = 0;
        let mut missing = Vec::new();
        let mut last_error: Option<String> = None;

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    downloads.abort_all();
                    while downloads.join_next().await.is_some() {}
                    debug!(level = grid.level, "Tile downloads cancelled");
                    return Err(TileError::Cancelled);
                }
                joined = downloads.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((coordinate, Ok(tile))) => {
                    outstanding.remove(&coordinate);
                    layout.draw(&mut canvas, coordinate, &tile);
                    tiles_used += 1;
                }
                Ok((_, Err(TileError::Cancelled))) => {
                    // The token fired mid-download; the select arm handles it
                    continue;
                }
                Ok((coordinate, Err(e))) => {
                    outstanding.remove(&coordinate);
                    warn!(
                        level = coordinate.level,
                        column = coordinate.column,
                        row = coordinate.row,
                        url = %template.url_for(coordinate),
                        error = %e,
                        "Tile missing after retries"
                    );
                    last_error = Some(e.to_string());
                    missing.push(coordinate);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "Tile download task panicked");
                    last_error = Some(join_err.to_string());
                    continue;
                }
            }

            if let Some(callback) = &self.on_progress {
                callback(tiles_used + missing.len(), expected);
            }
        }

        // Tasks that panicked never reported their coordinate
        missing.extend(outstanding);
        missing.sort_by_key(|c| (c.row, c.column));

        if tiles_used == 0 {
            return Err(TileError::StitchFailed {
                expected,
                last_error: last_error.unwrap_or_else(|| "no tiles requested".to_string()),
            });
        }

        info!(
            level = grid.level,
            tiles_used = tiles_used,
            tiles_expected = expected,
            width = dimensions.width_px,
            height = dimensions.height_px,
            "Stitched page"
        );

        Ok(StitchedImage {
            image: canvas,
            width_px: dimensions.width_px,
            height_px: dimensions.height_px,
            level: grid.level,
            tiles_used,
            tiles_expected: expected,
            missing,
        })
    }
}

// =============================================================================
// Download
// =============================================================================

struct TileRequest<'a> {
    url: &'a str,
    coordinate: TileCoordinate,
    retry: RetryPolicy,
    timeout: Duration,
    limiter: Option<&'a TileRateLimiter>,
}

async fn download_tile<F: TileFetcher + ?Sized>(
    fetcher: &F,
    request: TileRequest<'_>,
    cancel: &CancellationToken,
) -> Result<RgbaImage, TileError> {
    let TileRequest {
        url,
        coordinate,
        retry,
        timeout,
        limiter,
    } = request;

    let body = retry
        .run(cancel, |attempt| async move {
            if attempt > 1 {
                debug!(url = %url, attempt = attempt, "Retrying tile");
            }
            if let Some(limiter) = limiter {
                limiter.until_ready().await;
            }
            let body = match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(IoError::Timeout {
                        url: url.to_string(),
                    })
                }
            };
            // A JPEG cut short is a transport problem, not a bad tile
            if detect_tile_format(&body) == Some(TileFormat::Jpeg) && !is_complete_stream(&body) {
                return Err(IoError::Connection(format!(
                    "truncated JPEG body from {}",
                    url
                )));
            }
            Ok(body)
        })
        .await
        .map_err(|e| match e {
            IoError::Cancelled => TileError::Cancelled,
            other => TileError::Io(other),
        })?;

    decode_tile(coordinate, &body)
}

fn decode_tile(coordinate: TileCoordinate, body: &Bytes) -> Result<RgbaImage, TileError> {
    let format = detect_tile_format(body).ok_or_else(|| TileError::DecodeError {
        coordinate,
        message: format!("unrecognised payload ({} bytes)", body.len()),
    })?;

    image::load_from_memory_with_format(body, format.image_format())
        .map(|img| img.to_rgba8())
        .map_err(|e| TileError::DecodeError {
            coordinate,
            message: e.to_string(),
        })
}

// =============================================================================
// Layout
// =============================================================================

/// Maps grid cells to canvas rectangles.
#[derive(Debug, Clone, Copy)]
struct CellLayout {
    tile_size: u32,
    overlap: u32,
    canvas_width: u32,
    canvas_height: u32,
    scale_x: f64,
    scale_y: f64,
}

impl CellLayout {
    fn new(grid: &GridExtent, dimensions: ImageDimensions, overlap: u32) -> Self {
        let grid_width = grid.columns() * grid.tile_size_px as u64;
        let grid_height = grid.rows() * grid.tile_size_px as u64;
        Self {
            tile_size: grid.tile_size_px,
            overlap,
            canvas_width: dimensions.width_px,
            canvas_height: dimensions.height_px,
            scale_x: dimensions.width_px as f64 / grid_width as f64,
            scale_y: dimensions.height_px as f64 / grid_height as f64,
        }
    }

    fn is_unscaled(&self) -> bool {
        self.scale_x == 1.0 && self.scale_y == 1.0
    }

    /// Destination span `[start, end)` along one axis for a cell whose
    /// cropped source is `len` pixels long.
    fn span(&self, index: u32, len: u32, scale: f64, limit: u32) -> (u32, u32) {
        let origin = index as u64 * self.tile_size as u64;
        if scale == 1.0 {
            let start = origin.min(limit as u64) as u32;
            let end = (origin + len as u64).min(limit as u64) as u32;
            return (start, end);
        }
        let start = ((origin as f64 * scale).floor() as u64).min(limit as u64) as u32;
        let end =
            (((origin + len as u64) as f64 * scale).floor() as u64).min(limit as u64) as u32;
        (start, end)
    }

    /// Source rectangle `(x, y, width, height)` inside a decoded tile.
    fn source_rect(&self, coordinate: TileCoordinate, tile: &RgbaImage) -> (u32, u32, u32, u32) {
        let skip_x = if coordinate.column > 0 { self.overlap } else { 0 };
        let skip_y = if coordinate.row > 0 { self.overlap } else { 0 };
        let x = skip_x.min(tile.width());
        let y = skip_y.min(tile.height());
        let width = (tile.width() - x).min(self.tile_size);
        let height = (tile.height() - y).min(self.tile_size);
        (x, y, width, height)
    }

    fn draw(&self, canvas: &mut RgbaImage, coordinate: TileCoordinate, tile: &RgbaImage) {
        let (src_x, src_y, src_w, src_h) = self.source_rect(coordinate, tile);
        let (x0, x1) = self.span(coordinate.column, src_w, self.scale_x, self.canvas_width);
        let (y0, y1) = self.span(coordinate.row, src_h, self.scale_y, self.canvas_height);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let (dst_w, dst_h) = (x1 - x0, y1 - y0);

        let cell = if self.is_unscaled() {
            imageops::crop_imm(tile, src_x, src_y, dst_w, dst_h).to_image()
        } else {
            let source = imageops::crop_imm(tile, src_x, src_y, src_w, src_h).to_image();
            imageops::resize(&source, dst_w, dst_h, FilterType::Triangle)
        };

        imageops::overlay(canvas, &cell, x0 as i64, y0 as i64);
    }
}

// =============================================================================
// Tests
// =============================================================================
