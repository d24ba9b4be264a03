mod fetcher;
mod http_fetcher;
mod retry;

pub use fetcher::TileFetcher;
pub use http_fetcher::{
    HttpTileFetcher, HttpTileFetcherBuilder, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use retry::{RetryOn, RetryPolicy, DEFAULT_RETRY_BACKOFF};

#[cfg(test)]
pub(crate) mod mock;
