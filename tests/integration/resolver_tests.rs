//! Grid discovery against a live HTTP tile server.
//!
//! Tests verify:
//! - Max-level probing over HTTP (tiles at 13, none at 14)
//! - Grid extent discovery and idempotence
//! - Referer-protected servers
//! - Soft 404s (HTML error pages with status 200)
//! - The unbounded-grid sentinel

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use folio_stitch::{
    Axis, GridExtent, HttpTileFetcher, ResolverConfig, TileCoordinate, TileError,
    TileGridResolver,
};

use super::test_utils::{http_fetcher, solid_jpeg, MissingTile, ServerOptions, TileServer};

fn config() -> ResolverConfig {
    ResolverConfig {
        probe_delay: Duration::ZERO,
        probe_timeout: Duration::from_secs(5),
        ..ResolverConfig::default()
    }
}

// =============================================================================
// Max Level
// =============================================================================

#[tokio::test]
async fn test_max_level_over_http() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("ms/f001r");
    server.add_grid(&page, 13, 8, 10, 8);
    server.add_grid(&page, 12, 4, 5, 8);

    let resolver = TileGridResolver::new(http_fetcher(), config());
    let level = resolver
        .find_max_level(&page, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(level, 13);
    // 20 down to 13
    assert_eq!(server.request_count(), 8);
}

#[tokio::test]
async fn test_no_level_found_over_http() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("empty");

    let resolver = TileGridResolver::new(http_fetcher(), config());
    let result = resolver
        .find_max_level(&page, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(TileError::NoTileLevelFound { .. })));
    assert_eq!(server.request_count(), 21);
}

#[tokio::test]
async fn test_unreachable_server_is_an_error_not_a_miss() {
    // Bind and immediately drop a listener to get a closed port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let page = folio_stitch::TileUrlTemplate::deep_zoom(&format!("http://{}/page", addr), "jpg")
        .unwrap();
    let config = ResolverConfig {
        retry: folio_stitch::RetryPolicy::probe().with_backoff(Duration::from_millis(1)),
        ..config()
    };
    let resolver = TileGridResolver::new(http_fetcher(), config);

    let result = resolver
        .find_max_level(&page, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(TileError::Io(_))));
}

// =============================================================================
// Grid Extent
// =============================================================================

#[tokio::test]
async fn test_grid_extent_over_http() {
    let server = TileServer::start().await;
    let page = server.ajax_zoom("kbr/page_0001");
    server.add_grid(&page, 3, 8, 10, 8);

    let resolver = TileGridResolver::new(http_fetcher(), config());
    let cancel = CancellationToken::new();

    let first = resolver.resolve(&page, 768, &cancel).await.unwrap();
    let second = resolver.resolve(&page, 768, &cancel).await.unwrap();

    assert_eq!(first, GridExtent::new(3, 7, 9, 768));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_single_transient_gap_does_not_end_row() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("gap");
    server.add_grid(&page, 5, 6, 3, 8);
    server.fail_times(&page, TileCoordinate::new(5, 2, 0), 1);

    let resolver = TileGridResolver::new(http_fetcher(), config());
    let grid = resolver
        .find_grid_extent(&page, 5, 256, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(grid.max_column, 5);
    assert_eq!(grid.max_row, 2);
}

#[tokio::test]
async fn test_referer_protected_server() {
    let server = TileServer::start_with(ServerOptions {
        required_referer: Some("https://viewer.example/ms/42".to_string()),
        ..ServerOptions::default()
    })
    .await;
    let page = server.deep_zoom("protected");
    server.add_grid(&page, 4, 2, 2, 8);

    // Without the Referer every probe is a 403
    let anonymous = TileGridResolver::new(http_fetcher(), config());
    let result = anonymous
        .find_max_level(&page, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(TileError::NoTileLevelFound { .. })));

    let fetcher = HttpTileFetcher::builder()
        .referer("https://viewer.example/ms/42")
        .build()
        .unwrap();
    let resolver = TileGridResolver::new(fetcher, config());
    let grid = resolver
        .resolve(&page, 256, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(grid, GridExtent::new(4, 1, 1, 256));
}

#[tokio::test]
async fn test_soft_404_pages_are_misses() {
    let server = TileServer::start_with(ServerOptions {
        missing: MissingTile::HtmlPage,
        ..ServerOptions::default()
    })
    .await;
    let page = server.deep_zoom("soft");
    server.add_grid(&page, 9, 3, 2, 8);

    let resolver = TileGridResolver::new(http_fetcher(), config());
    let grid = resolver
        .resolve(&page, 256, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(grid, GridExtent::new(9, 2, 1, 256));
}

#[tokio::test]
async fn test_unbounded_grid_hits_sentinel() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("endless");
    let tile = solid_jpeg(4, 4, [0, 0, 0]);
    for column in 0..=500 {
        server.add_tile(&page, TileCoordinate::new(2, column, 0), tile.clone());
    }

    let resolver = TileGridResolver::new(http_fetcher(), config());
    let result = resolver
        .find_grid_extent(&page, 2, 256, &CancellationToken::new())
        .await;

    match result {
        Err(TileError::GridExtentUnbounded {
            axis,
            level,
            sentinel,
            url,
        }) => {
            assert_eq!(axis, Axis::Horizontal);
            assert_eq!(level, 2);
            assert_eq!(sentinel, 500);
            assert!(url.ends_with("/2/500_0.jpg"));
        }
        other => panic!("Expected GridExtentUnbounded, got {:?}", other),
    }
}
