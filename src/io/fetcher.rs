use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for fetching one tile (or probe) payload by URL.
///
/// This abstraction lets the resolver and stitcher run against a real HTTP
/// server or an in-memory mock. Implementations must be thread-safe; the
/// stitcher shares one fetcher across its worker tasks.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the full body at `url`.
    ///
    /// A clean "not found" must be reported as [`IoError::NotFound`] so that
    /// probing can tell an absent tile from a transport failure.
    async fn fetch(&self, url: &str) -> Result<Bytes, IoError>;

    /// Get an identifier for this fetcher (for logging).
    fn identifier(&self) -> &str;
}
