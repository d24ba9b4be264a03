//! # folio-stitch
//!
//! Rebuild full-resolution page images from deep-zoom tile servers.
//!
//! Digitised-manuscript viewers usually expose a page only as a tile
//! pyramid, often without trustworthy metadata. This library discovers the
//! pyramid by probing, sizes the page safely, and stitches every tile of the
//! highest level into one bitmap.
//!
//! ## Features
//!
//! - **Probing instead of metadata**: finds the max zoom level and grid extent
//!   with plain HTTP requests; a `.dzi` descriptor is only cross-checked
//! - **Safe sizing**: page dimensions are validated against a memory budget
//!   and a canvas edge limit before any buffer is allocated
//! - **Partial pages**: tiles that stay missing after retries leave a white
//!   cell and are reported, not fatal
//! - **Cancellable**: every network wait observes a `CancellationToken`
//!
//! ## Architecture
//!
//! - [`grid`] - Tile coordinates, URL templates, probing and page dimensions
//! - [`io`] - Tile fetcher trait, HTTP implementation and retry policy
//! - [`mod@format`] - JPEG/PNG payload recognition
//! - [`tile`] - Stitching, page pipeline and output encoding
//! - [`config`] - Engine configuration and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use folio_stitch::{EngineConfig, HttpTileFetcher, PageReconstructor, PageRequest, TileUrlTemplate};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = HttpTileFetcher::builder()
//!         .referer("https://viewer.example/manuscript/42")
//!         .build()?;
//!     let reconstructor = PageReconstructor::new(fetcher, &EngineConfig::default());
//!
//!     let page = PageRequest::new(
//!         TileUrlTemplate::deep_zoom("https://tiles.example/ms42/f001r", "jpg")?,
//!         256,
//!     );
//!     let image = reconstructor
//!         .reconstruct_page(&page, &CancellationToken::new())
//!         .await?;
//!
//!     println!("{}x{}, {}/{} tiles", image.width_px, image.height_px, image.tiles_used, image.tiles_expected);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod grid;
pub mod io;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, EngineConfig, FetchConfig, ProbeConfig};
pub use error::{DimensionError, DziError, IoError, TileError};
pub use format::{detect_tile_format, is_image_payload, TileFormat};
pub use grid::{
    Axis, BoundarySearch, BoundaryStep, DimensionCalculator, DimensionLimits, DziDescriptor,
    GridExtent, ImageDimensions, ProbeOutcome, ProbeRange, ResolverConfig, TileCoordinate,
    TileGridResolver, TileUrlTemplate,
};
pub use io::{HttpTileFetcher, HttpTileFetcherBuilder, RetryOn, RetryPolicy, TileFetcher};
pub use tile::{
    OutputFormat, PageEncoder, PageReconstructor, PageRequest, RateLimit, ResolvedPage,
    StitchConfig, StitchedImage, TileStitcher,
};
