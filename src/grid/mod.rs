//! Tile-grid discovery and page dimensions.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────────────┐   GridExtent   ┌───────────────────────┐
//! │   TileGridResolver   │ ─────────────► │  DimensionCalculator  │
//! │ (sequential probing) │                │  (pure, validating)   │
//! └──────────────────────┘                └───────────┬───────────┘
//!                                                     │ ImageDimensions
//!                                                     ▼
//!                                           tile::TileStitcher
//! ```
//!
//! # Components
//!
//! - [`TileGridResolver`]: finds the highest level with tiles and the grid
//!   extent at that level by probing the server
//! - [`BoundarySearch`]: the stopping rule used while probing one axis
//! - [`DimensionCalculator`]: turns a [`GridExtent`] into validated
//!   [`ImageDimensions`]
//! - [`TileUrlTemplate`]: maps a [`TileCoordinate`] to a tile URL
//! - [`DziDescriptor`]: optional declared metadata for cross-checking

mod boundary;
pub mod dimensions;
mod dzi;
mod resolver;
mod types;
mod url;

pub use boundary::{BoundarySearch, BoundaryStep};
pub use dimensions::{
    DimensionCalculator, DimensionLimits, BYTES_PER_PIXEL, DEFAULT_MAX_CANVAS_EDGE_PX,
    DEFAULT_MEMORY_BUDGET_BYTES,
};
pub use dzi::DziDescriptor;
pub use resolver::{
    ProbeOutcome, ProbeRange, ResolverConfig, TileGridResolver, DEFAULT_HIGHEST_LEVEL,
    DEFAULT_MISSES_TO_CONFIRM, DEFAULT_PROBE_DELAY, DEFAULT_PROBE_SENTINEL, DEFAULT_PROBE_TIMEOUT,
};
pub use types::{Axis, GridExtent, ImageDimensions, TileCoordinate};
pub use url::TileUrlTemplate;
