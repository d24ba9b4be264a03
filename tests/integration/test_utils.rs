//! Test utilities for integration tests.
//!
//! Runs a real HTTP tile server on `127.0.0.1:0` so the resolver and the
//! stitcher go through `HttpTileFetcher` and reqwest end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tokio::task::JoinHandle;

use folio_stitch::{HttpTileFetcher, TileCoordinate, TileUrlTemplate};

// =============================================================================
// Tile Server
// =============================================================================

/// How the server answers a path it has no tile for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingTile {
    /// Plain 404
    NotFound,

    /// 200 with an HTML error page, as some viewers do
    HtmlPage,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Requests without this exact Referer get 403
    pub required_referer: Option<String>,

    /// Requests without this header/value pair get 403
    pub required_header: Option<(String, String)>,

    pub missing: MissingTile,

    /// Delay before every response
    pub latency: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            required_referer: None,
            required_header: None,
            missing: MissingTile::NotFound,
            latency: None,
        }
    }
}

struct ServerState {
    tiles: RwLock<HashMap<String, Bytes>>,
    /// Remaining 503 responses per path
    flaky: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<String>>,
    request_count: AtomicUsize,
    options: ServerOptions,
}

/// A local tile server with request tracking.
pub struct TileServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl TileServer {
    pub async fn start() -> Self {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(options: ServerOptions) -> Self {
        let state = Arc::new(ServerState {
            tiles: RwLock::new(HashMap::new()),
            flaky: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            request_count: AtomicUsize::new(0),
            options,
        });

        let router = Router::new()
            .fallback(serve_tile)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Deep Zoom template for the page at `/{name}`.
    pub fn deep_zoom(&self, name: &str) -> TileUrlTemplate {
        TileUrlTemplate::deep_zoom(&format!("{}/{}", self.base_url(), name), "jpg").unwrap()
    }

    /// AjaxZoom template for the tile directory `/{name}/`.
    pub fn ajax_zoom(&self, name: &str) -> TileUrlTemplate {
        TileUrlTemplate::ajax_zoom(&format!("{}/{}/", self.base_url(), name)).unwrap()
    }

    pub fn add_tile(&self, template: &TileUrlTemplate, coordinate: TileCoordinate, data: Vec<u8>) {
        let path = path_of(&template.url_for(coordinate));
        self.state.tiles.write().unwrap().insert(path, Bytes::from(data));
    }

    /// Add a full `columns x rows` grid of solid-colour tiles at `level`.
    pub fn add_grid(
        &self,
        template: &TileUrlTemplate,
        level: u32,
        columns: u32,
        rows: u32,
        tile_size: u32,
    ) {
        for row in 0..rows {
            for column in 0..columns {
                self.add_tile(
                    template,
                    TileCoordinate::new(level, column, row),
                    solid_jpeg(tile_size, tile_size, tile_colour(column, row)),
                );
            }
        }
    }

    pub fn remove_tile(&self, template: &TileUrlTemplate, coordinate: TileCoordinate) {
        let path = path_of(&template.url_for(coordinate));
        self.state.tiles.write().unwrap().remove(&path);
    }

    /// Answer the next `times` requests for this tile with 503.
    pub fn fail_times(&self, template: &TileUrlTemplate, coordinate: TileCoordinate, times: u32) {
        let path = path_of(&template.url_for(coordinate));
        self.state.flaky.lock().unwrap().insert(path, times);
    }

    pub fn request_count(&self) -> usize {
        self.state.request_count.load(Ordering::SeqCst)
    }

    pub fn requests_for(&self, template: &TileUrlTemplate, coordinate: TileCoordinate) -> usize {
        let path = path_of(&template.url_for(coordinate));
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| **p == path)
            .count()
    }
}

impl Drop for TileServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_tile(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    state.request_count.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(path.clone());

    if let Some(latency) = state.options.latency {
        tokio::time::sleep(latency).await;
    }

    if let Some(referer) = &state.options.required_referer {
        let sent = headers.get(header::REFERER).and_then(|v| v.to_str().ok());
        if sent != Some(referer.as_str()) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    if let Some((name, value)) = &state.options.required_header {
        let sent = headers.get(name.as_str()).and_then(|v| v.to_str().ok());
        if sent != Some(value.as_str()) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    {
        let mut flaky = state.flaky.lock().unwrap();
        if let Some(remaining) = flaky.get_mut(&path) {
            if *remaining > 0 {
                *remaining -= 1;
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        }
    }

    let tile = state.tiles.read().unwrap().get(&path).cloned();
    match (tile, state.options.missing) {
        (Some(data), _) => ([(header::CONTENT_TYPE, "image/jpeg")], data).into_response(),
        (None, MissingTile::NotFound) => StatusCode::NOT_FOUND.into_response(),
        (None, MissingTile::HtmlPage) => (
            [(header::CONTENT_TYPE, "text/html")],
            "<!DOCTYPE html><html><body>Tile not available</body></html>",
        )
            .into_response(),
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url).unwrap().path().to_string()
}

// =============================================================================
// Fetchers and Images
// =============================================================================

/// A fetcher with short timeouts for local tests.
pub fn http_fetcher() -> HttpTileFetcher {
    HttpTileFetcher::builder()
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
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

/// Whether two colours are within JPEG rounding of each other.
pub fn colour_close(actual: &[u8], expected: [u8; 3]) -> bool {
    actual
        .iter()
        .zip(expected.iter())
        .all(|(a, e)| (*a as i16 - *e as i16).abs() <= 4)
}
