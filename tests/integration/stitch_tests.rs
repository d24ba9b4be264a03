//! Stitching against a live HTTP tile server.
//!
//! Tests verify:
//! - Partial success when some tiles 404 (77 of 80)
//! - Retry of 503 responses
//! - StitchFailed when no tile is retrievable
//! - Cancellation of in-flight downloads
//! - Concurrency does not change the output pixels

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use folio_stitch::{
    DimensionCalculator, GridExtent, RetryPolicy, StitchConfig, TileCoordinate, TileError,
    TileStitcher,
};

use super::test_utils::{colour_close, http_fetcher, tile_colour, ServerOptions, TileServer};

fn config(concurrency: usize) -> StitchConfig {
    StitchConfig {
        concurrency,
        retry: RetryPolicy::tiles(3).with_backoff(Duration::from_millis(5)),
        request_timeout: Duration::from_secs(5),
        ..StitchConfig::default()
    }
}

#[tokio::test]
async fn test_stitch_with_missing_tiles() {
    let server = TileServer::start().await;
    let page = server.ajax_zoom("kbr/page_0007");
    server.add_grid(&page, 3, 8, 10, 8);
    for (column, row) in [(0, 0), (4, 6), (7, 9)] {
        server.remove_tile(&page, TileCoordinate::new(3, column, row));
    }

    let grid = GridExtent::new(3, 7, 9, 8);
    let dimensions = DimensionCalculator::default().calculate(&grid).unwrap();
    let stitcher = TileStitcher::new(http_fetcher(), config(4));

    let stitched = stitcher
        .stitch(&page, &grid, dimensions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stitched.tiles_used, 77);
    assert_eq!(stitched.tiles_expected, 80);
    assert_eq!(stitched.missing.len(), 3);
    assert_eq!(stitched.image.dimensions(), (64, 80));

    // 404s are final: one request each
    assert_eq!(
        server.requests_for(&page, TileCoordinate::new(3, 4, 6)),
        1
    );

    let pixel = stitched.image.get_pixel(8 * 3 + 4, 8 * 2 + 4);
    assert!(colour_close(&pixel.0[..3], tile_colour(3, 2)));
    let blank = stitched.image.get_pixel(8 * 4 + 4, 8 * 6 + 4);
    assert_eq!(blank.0, [255, 255, 255, 255]);
}

#[tokio::test]
async fn test_stitch_retries_unavailable_tiles() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("flaky");
    server.add_grid(&page, 2, 2, 2, 8);
    server.fail_times(&page, TileCoordinate::new(2, 1, 1), 2);

    let grid = GridExtent::new(2, 1, 1, 8);
    let dimensions = DimensionCalculator::default().calculate(&grid).unwrap();
    let stitcher = TileStitcher::new(http_fetcher(), config(2));

    let stitched = stitcher
        .stitch(&page, &grid, dimensions, &CancellationToken::new())
        .await
        .unwrap();

    assert!(stitched.is_complete());
    assert_eq!(server.requests_for(&page, TileCoordinate::new(2, 1, 1)), 3);
}

#[tokio::test]
async fn test_stitch_gives_up_after_retry_budget() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("down");
    server.add_grid(&page, 2, 2, 1, 8);
    server.fail_times(&page, TileCoordinate::new(2, 1, 0), 10);

    let grid = GridExtent::new(2, 1, 0, 8);
    let dimensions = DimensionCalculator::default().calculate(&grid).unwrap();
    let stitcher = TileStitcher::new(http_fetcher(), config(2));

    let stitched = stitcher
        .stitch(&page, &grid, dimensions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stitched.tiles_used, 1);
    assert_eq!(stitched.missing, vec![TileCoordinate::new(2, 1, 0)]);
    assert_eq!(server.requests_for(&page, TileCoordinate::new(2, 1, 0)), 3);
}

#[tokio::test]
async fn test_stitch_fails_when_nothing_retrieved() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("gone");

    let grid = GridExtent::new(5, 2, 2, 8);
    let dimensions = DimensionCalculator::default().calculate(&grid).unwrap();
    let stitcher = TileStitcher::new(http_fetcher(), config(4));

    let result = stitcher
        .stitch(&page, &grid, dimensions, &CancellationToken::new())
        .await;

    match result {
        Err(TileError::StitchFailed { expected, .. }) => assert_eq!(expected, 9),
        other => panic!("Expected StitchFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stitch_cancellation() {
    let server = TileServer::start_with(ServerOptions {
        latency: Some(Duration::from_secs(10)),
        ..ServerOptions::default()
    })
    .await;
    let page = server.deep_zoom("slow");
    server.add_grid(&page, 1, 4, 4, 8);

    let grid = GridExtent::new(1, 3, 3, 8);
    let dimensions = DimensionCalculator::default().calculate(&grid).unwrap();
    let stitcher = TileStitcher::new(http_fetcher(), config(4));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = stitcher.stitch(&page, &grid, dimensions, &cancel).await;

    assert!(matches!(result, Err(TileError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_concurrency_does_not_change_output() {
    let server = TileServer::start().await;
    let page = server.deep_zoom("order");
    server.add_grid(&page, 4, 5, 4, 8);

    let grid = GridExtent::new(4, 4, 3, 8);
    let dimensions = DimensionCalculator::default().calculate(&grid).unwrap();
    let cancel = CancellationToken::new();

    let one = TileStitcher::new(http_fetcher(), config(1))
        .stitch(&page, &grid, dimensions, &cancel)
        .await
        .unwrap();
    let many = TileStitcher::new(http_fetcher(), config(16))
        .stitch(&page, &grid, dimensions, &cancel)
        .await
        .unwrap();

    assert_eq!(one.image.as_raw(), many.image.as_raw());
}
