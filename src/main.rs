//! folio-stitch - Rebuild full-resolution pages from deep-zoom tile servers.
//!
//! Thin driver over the library: parses arguments, wires the HTTP fetcher
//! into the page pipeline and writes results.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_stitch::{
    config::{Cli, Command, FetchConfig, ProbeConfig, SourceArgs},
    DziDescriptor, OutputFormat, PageEncoder, PageReconstructor, PageRequest, ResolvedPage,
    TileError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Probe(config) => run_probe(config).await,
        Command::Fetch(config) => run_fetch(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "folio_stitch=debug"
    } else {
        "folio_stitch=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling downloads");
            token.cancel();
        }
    });
}

/// Build page requests for every template, with the optional descriptor.
fn page_requests(source: &SourceArgs) -> Result<Vec<PageRequest>, String> {
    let descriptor = match &source.dzi {
        Some(path) => Some(read_descriptor(path)?),
        None => None,
    };

    let templates = source.templates().map_err(|e| e.to_string())?;
    Ok(templates
        .into_iter()
        .map(|template| {
            let request = PageRequest::new(template, source.tile_size);
            match &descriptor {
                Some(d) => request.with_descriptor(d.clone()),
                None => request,
            }
        })
        .collect())
}

fn read_descriptor(path: &Path) -> Result<DziDescriptor, String> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    DziDescriptor::parse(&xml).map_err(|e| format!("{}: {}", path.display(), e))
}

// =============================================================================
// Probe Command
// =============================================================================

/// One line of `probe` output.
#[derive(Serialize)]
struct ProbeReport<'a> {
    template: &'a str,
    #[serde(flatten)]
    page: &'a ResolvedPage,
}

async fn run_probe(config: ProbeConfig) -> ExitCode {
    init_logging(config.verbose);

    let engine = config.engine.to_engine_config();
    if let Err(e) = engine.validate().and_then(|_| config.source.validate()) {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pages = match page_requests(&config.source) {
        Ok(pages) => pages,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match config.source.fetcher(engine.request_timeout) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let reconstructor = PageReconstructor::new(fetcher, &engine);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut status = ExitCode::SUCCESS;
    for page in &pages {
        let result = reconstructor.resolve(page, &cancel).await;
        let json = match &result {
            Ok(resolved) => {
                let report = ProbeReport {
                    template: page.template.as_str(),
                    page: resolved,
                };
                match serde_json::to_value(&report) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Failed to serialize probe result: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            Err(e) => {
                status = ExitCode::FAILURE;
                serde_json::json!({
                    "template": page.template.as_str(),
                    "error": e.to_string(),
                })
            }
        };
        println!("{}", json);

        if matches!(result, Err(TileError::Cancelled)) {
            break;
        }
    }

    status
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: FetchConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let engine = config.engine.to_engine_config();
    let pages = match page_requests(&config.source) {
        Ok(pages) => pages,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match config.source.fetcher(engine.request_timeout) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let format = if pages.len() == 1 {
        OutputFormat::from_path(&config.output, config.jpeg_quality)
    } else if config.png {
        OutputFormat::Png
    } else {
        OutputFormat::Jpeg {
            quality: config.jpeg_quality,
        }
    };
    let outputs = output_paths(&config.output, pages.len(), format);
    if pages.len() > 1 {
        if let Err(e) = std::fs::create_dir_all(&config.output) {
            error!("Failed to create {}: {}", config.output.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let reconstructor = PageReconstructor::new(fetcher, &engine).on_progress(|done, expected| {
        if done == expected || done % 20 == 0 {
            info!(done = done, expected = expected, "Tiles downloaded");
        }
    });
    let encoder = PageEncoder::new(format);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result: Result<(), FetchError> = reconstructor
        .for_each_page(&pages, &cancel, |index, _, stitched| {
            let path = &outputs[index];
            let bytes = encoder.encode(&stitched)?;
            std::fs::write(path, &bytes).map_err(|e| FetchError::Write {
                path: path.clone(),
                source: e,
            })?;

            info!(
                path = %path.display(),
                width = stitched.width_px,
                height = stitched.height_px,
                tiles_used = stitched.tiles_used,
                tiles_expected = stitched.tiles_expected,
                bytes = bytes.len(),
                "Wrote page"
            );
            Ok(())
        })
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Error)]
enum FetchError {
    #[error(transparent)]
    Page(#[from] TileError),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One output path per page: `output` itself for a single page, otherwise
/// numbered files inside `output`.
fn output_paths(output: &Path, pages: usize, format: OutputFormat) -> Vec<PathBuf> {
    if pages == 1 {
        return vec![output.to_path_buf()];
    }
    (1..=pages)
        .map(|n| output.join(format!("page_{:04}.{}", n, format.extension())))
        .collect()
}
