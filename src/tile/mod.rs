//! Tile download, compositing and page output.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            PageReconstructor            │
//! │   resolve → calculate → stitch          │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileStitcher               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ JoinSet +    │  │  RGBA canvas    │  │
//! │  │ Semaphore    │  │  (disjoint      │  │
//! │  │ downloads    │  │   cells)        │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ StitchedImage
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              PageEncoder                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PageReconstructor`]: runs the whole pipeline for one or many pages
//! - [`TileStitcher`]: downloads tiles with bounded concurrency and retry,
//!   composites them, and reports missing tiles
//! - [`StitchedImage`]: the composited page with success counters
//! - [`PageEncoder`]: JPEG/PNG output for the packaging step

mod encoder;
mod service;
mod stitcher;

pub use encoder::{
    clamp_quality, is_valid_quality, OutputFormat, PageEncoder, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use service::{PageReconstructor, PageRequest, ResolvedPage};
pub use stitcher::{
    ProgressCallback, RateLimit, StitchConfig, StitchedImage, TileStitcher, BACKGROUND,
    DEFAULT_LOW_CONFIDENCE_THRESHOLD, DEFAULT_RETRY_ATTEMPTS, DEFAULT_TILE_CONCURRENCY,
};
