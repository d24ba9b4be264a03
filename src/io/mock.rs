//! In-memory fetcher for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use super::TileFetcher;
use crate::error::IoError;
use crate::grid::{TileCoordinate, TileUrlTemplate};

/// Serves pre-registered payloads; unknown URLs are `NotFound`.
///
/// Scripted failures for a URL are returned (in order) before its payload.
#[derive(Default)]
pub struct MockFetcher {
    payloads: HashMap<String, Bytes>,
    failures: Mutex<HashMap<String, VecDeque<IoError>>>,
    requests: Mutex<Vec<String>>,
    request_count: AtomicUsize,
    latency: Option<Duration>,
    url_latency: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completions: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, url: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.payloads.insert(url.into(), data.into());
        self
    }

    /// Register a full `columns x rows` grid at `level`, every tile a
    /// solid-colour JPEG derived from its position.
    pub fn with_grid(
        mut self,
        template: &TileUrlTemplate,
        level: u32,
        columns: u32,
        rows: u32,
        tile_size: u32,
    ) -> Self {
        for row in 0..rows {
            for column in 0..columns {
                let coord = TileCoordinate::new(level, column, row);
                self.payloads.insert(
                    template.url_for(coord),
                    Bytes::from(solid_jpeg(tile_size, tile_size, tile_colour(column, row))),
                );
            }
        }
        self
    }

    pub fn with_failures(self, url: impl Into<String>, errors: Vec<IoError>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.into(), errors.into_iter().collect());
        self
    }

    pub fn without(mut self, url: &str) -> Self {
        self.payloads.remove(url);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Latency for one URL, overriding [`with_latency`](Self::with_latency).
    pub fn with_url_latency(mut self, url: impl Into<String>, latency: Duration) -> Self {
        self.url_latency.insert(url.into(), latency);
        self
    }

    /// Highest number of fetches that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// URLs in the order their fetches finished.
    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl TileFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(url.to_string());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = self.respond(url).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completions.lock().unwrap().push(url.to_string());
        result
    }

    fn identifier(&self) -> &str {
        "mock"
    }
}

impl MockFetcher {
    async fn respond(&self, url: &str) -> Result<Bytes, IoError> {
        if let Some(latency) = self.url_latency.get(url).copied().or(self.latency) {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        self.payloads
            .get(url)
            .cloned()
            .ok_or_else(|| IoError::NotFound {
                url: url.to_string(),
            })
    }
}

/// Colour used for the tile at `(column, row)`.
pub fn tile_colour(column: u32, row: u32) -> [u8; 3] {
    [
        (column * 40 % 256) as u8,
        (row * 40 % 256) as u8,
        ((column + row) * 20 % 256) as u8,
    ]
}

pub fn solid_jpeg(width: u32, height: u32, colour: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(colour));
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 95);
    encoder.encode_image(&img).unwrap();
    buf
}
