//! Configuration for folio-stitch.
//!
//! Two layers:
//! - [`EngineConfig`]: the plain struct the library components are built
//!   from, with defaults for every tuning knob
//! - [`Cli`]: command-line arguments (clap) with `FOLIO_`-prefixed
//!   environment variable fallbacks, converted into an [`EngineConfig`]
//!
//! # Environment Variables
//!
//! - `FOLIO_TEMPLATE` - Tile URL template with `{level}`, `{col}`, `{row}`
//! - `FOLIO_TILE_SIZE` - Tile edge in pixels (default: 256)
//! - `FOLIO_REFERER` - Referer header sent with every request
//! - `FOLIO_PROBE_TIMEOUT_MS` - Per-probe timeout (default: 5000)
//! - `FOLIO_PROBE_DELAY_MS` - Pause between probes (default: 50)
//! - `FOLIO_REQUEST_TIMEOUT_MS` - Per-tile timeout (default: 30000)
//! - `FOLIO_MAX_LEVEL` - Highest zoom level probed (default: 20)
//! - `FOLIO_CONCURRENCY` - Tile downloads in flight (default: 4)
//! - `FOLIO_RETRY_ATTEMPTS` - Attempts per tile (default: 3)
//! - `FOLIO_REQUESTS_PER_SECOND` - Tile request rate cap (default: unlimited)
//! - `FOLIO_BURST` - Requests allowed back to back under the cap (default: 1)
//! - `FOLIO_MEMORY_BUDGET_MB` - Canvas memory budget (default: 1024)
//! - `FOLIO_MAX_CANVAS_EDGE` - Longest allowed edge (default: 16384)
//! - `FOLIO_ALLOW_DOWNSCALE` - Shrink oversized pages instead of failing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::{IoError, TileError};
use crate::grid::{
    DimensionLimits, ProbeRange, ResolverConfig, TileUrlTemplate, DEFAULT_HIGHEST_LEVEL,
    DEFAULT_MAX_CANVAS_EDGE_PX, DEFAULT_MEMORY_BUDGET_BYTES, DEFAULT_MISSES_TO_CONFIRM,
    DEFAULT_PROBE_DELAY, DEFAULT_PROBE_SENTINEL, DEFAULT_PROBE_TIMEOUT,
};
use crate::io::{
    HttpTileFetcher, RetryPolicy, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_BACKOFF,
    DEFAULT_USER_AGENT,
};
use crate::tile::{
    RateLimit, StitchConfig, DEFAULT_JPEG_QUALITY, DEFAULT_LOW_CONFIDENCE_THRESHOLD,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TILE_CONCURRENCY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Upper bound on tile downloads in flight.
pub const MAX_TILE_CONCURRENCY: usize = 64;

const MIB: u64 = 1024 * 1024;

// =============================================================================
// Engine Configuration
// =============================================================================

/// Every tuning knob of the reconstruction pipeline.
///
/// Timeouts, delays and concurrency only affect speed and server load, never
/// the result.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
    pub probe_delay: Duration,
    pub max_probe_level: u32,
    pub min_probe_level: u32,
    pub probe_sentinel: u32,
    pub misses_to_confirm: u32,
    pub tile_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub memory_budget_bytes: u64,
    pub max_canvas_edge_px: u32,

    /// Pages with a lower tile success ratio are reported as low-confidence
    pub low_confidence_threshold: f64,

    /// Shrink pages that exceed the limits instead of failing
    pub allow_downscale: bool,

    /// Pixels each tile repeats from its left/top neighbour
    pub overlap_px: u32,

    /// Cap on tile requests per second, unlimited when `None`
    pub rate_limit: Option<RateLimit>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_delay: DEFAULT_PROBE_DELAY,
            max_probe_level: DEFAULT_HIGHEST_LEVEL,
            min_probe_level: 0,
            probe_sentinel: DEFAULT_PROBE_SENTINEL,
            misses_to_confirm: DEFAULT_MISSES_TO_CONFIRM,
            tile_concurrency: DEFAULT_TILE_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            max_canvas_edge_px: DEFAULT_MAX_CANVAS_EDGE_PX,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
            allow_downscale: false,
            overlap_px: 0,
            rate_limit: None,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_probe_level > self.max_probe_level {
            return Err(format!(
                "min_probe_level ({}) must not exceed max_probe_level ({})",
                self.min_probe_level, self.max_probe_level
            ));
        }
        if self.probe_sentinel == 0 {
            return Err("probe_sentinel must be greater than 0".to_string());
        }
        if self.misses_to_confirm == 0 {
            return Err("misses_to_confirm must be greater than 0".to_string());
        }
        if self.tile_concurrency == 0 || self.tile_concurrency > MAX_TILE_CONCURRENCY {
            return Err(format!(
                "tile_concurrency must be between 1 and {}",
                MAX_TILE_CONCURRENCY
            ));
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }
        if self.probe_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err("timeouts must be greater than 0".to_string());
        }
        if self.memory_budget_bytes == 0 {
            return Err("memory_budget_bytes must be greater than 0".to_string());
        }
        if self.max_canvas_edge_px == 0 {
            return Err("max_canvas_edge_px must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err("low_confidence_threshold must be between 0 and 1".to_string());
        }
        if let Some(limit) = self.rate_limit {
            if limit.quota().is_none() {
                return Err("requests_per_second and burst must be greater than 0".to_string());
            }
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            probe_range: ProbeRange {
                highest: self.max_probe_level,
                lowest: self.min_probe_level,
            },
            probe_timeout: self.probe_timeout,
            probe_delay: self.probe_delay,
            misses_to_confirm: self.misses_to_confirm,
            sentinel: self.probe_sentinel,
            retry: RetryPolicy::probe().with_backoff(self.retry_backoff),
        }
    }

    pub fn dimension_limits(&self) -> DimensionLimits {
        DimensionLimits {
            memory_budget_bytes: self.memory_budget_bytes,
            max_canvas_edge_px: self.max_canvas_edge_px,
        }
    }

    pub fn stitch_config(&self) -> StitchConfig {
        StitchConfig {
            concurrency: self.tile_concurrency,
            retry: RetryPolicy::tiles(self.retry_attempts).with_backoff(self.retry_backoff),
            request_timeout: self.request_timeout,
            overlap_px: self.overlap_px,
            rate_limit: self.rate_limit,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// folio-stitch - Rebuild full-resolution pages from deep-zoom tile servers.
///
/// Probes the tile pyramid instead of trusting viewer metadata, then
/// downloads and stitches every tile of the highest available level.
#[derive(Parser, Debug, Clone)]
#[command(name = "folio-stitch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Discover the max level, grid and page size without downloading tiles
    Probe(ProbeConfig),

    /// Reconstruct pages and write them to disk
    Fetch(FetchConfig),
}

#[derive(Args, Debug, Clone)]
pub struct ProbeConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Output file for a single page, or directory for several pages.
    #[arg(short, long, env = "FOLIO_OUTPUT")]
    pub output: PathBuf,

    /// JPEG quality (1-100). Ignored for .png output.
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "FOLIO_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Write pages as PNG instead of JPEG when writing into a directory.
    #[arg(long, default_value_t = false)]
    pub png: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        self.source.validate()?;
        self.engine.to_engine_config().validate()
    }
}

// =============================================================================
// Tile Source
// =============================================================================

/// Where the tiles come from. One of the three layouts is required; each
/// may be repeated to process several pages in order.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct LayoutArgs {
    /// Tile URL template with {level}, {col} and {row} placeholders.
    #[arg(long, env = "FOLIO_TEMPLATE")]
    pub template: Vec<String>,

    /// Deep Zoom image base; tiles at {base}_files/{level}/{col}_{row}.jpg
    #[arg(long)]
    pub deep_zoom: Vec<String>,

    /// AjaxZoom tile directory; tiles at {base}{level}-{col}-{row}.jpg
    #[arg(long)]
    pub ajax_zoom: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Tile edge in pixels (commonly 256 or 768).
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "FOLIO_TILE_SIZE")]
    pub tile_size: u32,

    /// Referer header; many viewers refuse tiles without it.
    #[arg(long, env = "FOLIO_REFERER")]
    pub referer: Option<String>,

    /// User-Agent header.
    #[arg(long, default_value = DEFAULT_USER_AGENT, env = "FOLIO_USER_AGENT")]
    pub user_agent: String,

    /// Extra request header as "Name: value" (repeatable).
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Deep Zoom descriptor (.dzi) to cross-check against the probed grid.
    #[arg(long)]
    pub dzi: Option<PathBuf>,
}

impl SourceArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        self.templates().map(|_| ()).map_err(|e| e.to_string())
    }

    /// URL templates for every requested page, in command-line order.
    pub fn templates(&self) -> Result<Vec<TileUrlTemplate>, TileError> {
        let layout = &self.layout;
        let templates = layout
            .template
            .iter()
            .map(|t| TileUrlTemplate::parse(t.as_str()))
            .chain(
                layout
                    .deep_zoom
                    .iter()
                    .map(|base| TileUrlTemplate::deep_zoom(base, "jpg")),
            )
            .chain(layout.ajax_zoom.iter().map(|base| TileUrlTemplate::ajax_zoom(base)))
            .collect::<Result<Vec<_>, _>>()?;

        if templates.is_empty() {
            return Err(TileError::InvalidTemplate {
                template: String::new(),
                reason: "no tile source given".to_string(),
            });
        }
        Ok(templates)
    }

    /// Build the HTTP fetcher with this source's headers.
    pub fn fetcher(&self, request_timeout: Duration) -> Result<HttpTileFetcher, IoError> {
        let mut builder = HttpTileFetcher::builder()
            .user_agent(self.user_agent.as_str())
            .request_timeout(request_timeout);
        if let Some(referer) = &self.referer {
            builder = builder.referer(referer.as_str());
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.build()
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got \"{}\"", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in \"{}\"", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

// =============================================================================
// Engine Arguments
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Timeout for a single probe, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
        env = "FOLIO_PROBE_TIMEOUT_MS",
    )]
    pub probe_timeout_ms: u64,

    /// Pause between consecutive probes, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_PROBE_DELAY.as_millis() as u64,
        env = "FOLIO_PROBE_DELAY_MS",
    )]
    pub probe_delay_ms: u64,

    /// Timeout for a single tile download, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
        env = "FOLIO_REQUEST_TIMEOUT_MS",
    )]
    pub request_timeout_ms: u64,

    /// Highest zoom level probed.
    #[arg(long, default_value_t = DEFAULT_HIGHEST_LEVEL, env = "FOLIO_MAX_LEVEL")]
    pub max_level: u32,

    /// Lowest zoom level probed.
    #[arg(long, default_value_t = 0, env = "FOLIO_MIN_LEVEL")]
    pub min_level: u32,

    /// Stop probing an axis past this index.
    #[arg(long, default_value_t = DEFAULT_PROBE_SENTINEL, env = "FOLIO_PROBE_SENTINEL")]
    pub probe_sentinel: u32,

    /// Maximum tile downloads in flight.
    #[arg(short = 'j', long, default_value_t = DEFAULT_TILE_CONCURRENCY, env = "FOLIO_CONCURRENCY")]
    pub concurrency: usize,

    /// Attempts per tile, including the first.
    #[arg(long, default_value_t = DEFAULT_RETRY_ATTEMPTS, env = "FOLIO_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Cap on tile requests per second (unlimited if unset).
    #[arg(long, env = "FOLIO_REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<u32>,

    /// Requests allowed back to back under the rate cap.
    #[arg(long, default_value_t = 1, env = "FOLIO_BURST")]
    pub burst: u32,

    /// Canvas memory budget in MiB.
    #[arg(
        long,
        default_value_t = DEFAULT_MEMORY_BUDGET_BYTES / MIB,
        env = "FOLIO_MEMORY_BUDGET_MB",
    )]
    pub memory_budget_mb: u64,

    /// Longest allowed page edge in pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_CANVAS_EDGE_PX, env = "FOLIO_MAX_CANVAS_EDGE")]
    pub max_canvas_edge: u32,

    /// Pixels each tile repeats from its neighbour (1 for most Deep Zoom servers).
    #[arg(long, default_value_t = 0, env = "FOLIO_OVERLAP")]
    pub overlap: u32,

    /// Shrink pages that exceed the limits instead of failing.
    #[arg(long, default_value_t = false, env = "FOLIO_ALLOW_DOWNSCALE")]
    pub allow_downscale: bool,
}

impl EngineArgs {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            probe_delay: Duration::from_millis(self.probe_delay_ms),
            max_probe_level: self.max_level,
            min_probe_level: self.min_level,
            probe_sentinel: self.probe_sentinel,
            tile_concurrency: self.concurrency,
            retry_attempts: self.retry_attempts,
            memory_budget_bytes: self.memory_budget_mb.saturating_mul(MIB),
            max_canvas_edge_px: self.max_canvas_edge,
            overlap_px: self.overlap,
            allow_downscale: self.allow_downscale,
            rate_limit: self
                .requests_per_second
                .map(|rps| RateLimit::per_second(rps).with_burst(self.burst)),
            ..EngineConfig::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
