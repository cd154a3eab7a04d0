//! Sync daemon for gridded geophysical datasets.
//!
//! Registers the sources configured under `<config_dir>/sources/`,
//! then either runs one sync (or gap-filling) pass and exits, or keeps
//! polling every source on its configured interval. Sources are
//! independent and run as separate tasks; within one source, calendar
//! steps are processed strictly in order.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use futures::future::join_all;
use region_grid::GeoJsonRegions;
use sync_pipeline::{PipelinePaths, SyncController};
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{load_source_configs, SourceConfig};

#[derive(Parser, Debug)]
#[command(name = "syncd")]
#[command(about = "Synchronizes remote gridded datasets into canonical stores")]
struct Args {
    /// Run one pass and exit (vs continuous polling)
    #[arg(long)]
    once: bool,

    /// Specific source to sync (default: all configured)
    #[arg(short, long)]
    source: Option<String>,

    /// Scan for gaps and try to fill them instead of a forward sync
    #[arg(long)]
    fill_gaps: bool,

    /// First date to consider (defaults to the resume date)
    #[arg(long)]
    begin: Option<NaiveDate>,

    /// Last date to consider (defaults to today)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Delete raw files once they are resampled and written
    #[arg(long)]
    delete_raw: bool,

    /// Root directory for stores and raw downloads
    #[arg(long, env = "SYNCD_DATA_DIR", default_value = "/data/syncd")]
    data_dir: PathBuf,

    /// Configuration directory (contains sources/*.yaml)
    #[arg(long, env = "SYNCD_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// GeoJSON file with region polygons
    #[arg(long, env = "SYNCD_REGIONS", default_value = "config/regions.geojson")]
    regions_file: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting sync daemon");

    let configs = load_source_configs(&args.config_dir)?;
    let provider = Arc::new(GeoJsonRegions::new(&args.regions_file));

    let mut controllers = Vec::new();
    for config in configs {
        if let Some(filter) = &args.source {
            if &config.source.name != filter {
                continue;
            }
        }
        let name = config.source.name.clone();
        let paths = PipelinePaths::new(&args.data_dir, &name);
        let controller = SyncController::new(config.source.clone(), paths, provider.clone())
            .with_context(|| format!("registering source {name}"))?;
        controllers.push((controller, config));
    }

    if controllers.is_empty() {
        anyhow::bail!("no sources registered");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_for_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_for_signal.send(()).ok();
    });

    if args.once {
        run_once(&args, controllers, &shutdown_tx).await;
    } else {
        run_forever(&args, controllers, &shutdown_tx).await;
    }

    Ok(())
}

/// One pass over every registered source, sources running concurrently.
async fn run_once(
    args: &Args,
    controllers: Vec<(SyncController, SourceConfig)>,
    shutdown_tx: &broadcast::Sender<()>,
) {
    let tasks = controllers.into_iter().map(|(controller, _)| {
        let mut shutdown = shutdown_tx.subscribe();
        let begin = args.begin;
        let end = args.end;
        let delete_raw = args.delete_raw;
        let fill_gaps = args.fill_gaps;
        async move {
            let name = controller.descriptor().name.clone();
            let result = if fill_gaps {
                controller
                    .fill_gaps(begin, end, delete_raw, &mut shutdown)
                    .await
                    .map(|report| {
                        info!(
                            source = %name,
                            found = report.found.len(),
                            filled = report.filled.len(),
                            remaining = report.remaining.len(),
                            "gap pass complete"
                        );
                    })
            } else {
                controller
                    .sync(begin, end, delete_raw, &mut shutdown)
                    .await
                    .map(|report| {
                        info!(
                            source = %name,
                            written = report.steps_written,
                            skipped = report.steps_skipped,
                            fetched = report.files_fetched,
                            "sync complete"
                        );
                    })
            };
            if let Err(e) = result {
                error!(source = %name, error = %e, "source run failed");
            }
        }
    });

    join_all(tasks).await;
}

/// Poll every source on its configured interval until shutdown.
async fn run_forever(
    args: &Args,
    controllers: Vec<(SyncController, SourceConfig)>,
    shutdown_tx: &broadcast::Sender<()>,
) {
    let tasks: Vec<_> = controllers
        .into_iter()
        .map(|(controller, config)| {
            let mut shutdown = shutdown_tx.subscribe();
            let mut wait = shutdown_tx.subscribe();
            let delete_raw = args.delete_raw;
            tokio::spawn(async move {
                let name = controller.descriptor().name.clone();
                let interval = Duration::from_secs(config.schedule.poll_interval_secs);
                loop {
                    info!(source = %name, "running scheduled sync");
                    match controller.sync(None, None, delete_raw, &mut shutdown).await {
                        Ok(report) if report.cancelled => {
                            info!(source = %name, "sync cancelled, stopping");
                            break;
                        }
                        Ok(report) => {
                            info!(
                                source = %name,
                                written = report.steps_written,
                                skipped = report.steps_skipped,
                                "scheduled sync complete"
                            );
                        }
                        Err(e) => {
                            // Written steps are durable; the next poll
                            // resumes from the same point.
                            error!(source = %name, error = %e, "scheduled sync failed");
                        }
                    }

                    if config.schedule.fill_gaps {
                        match controller
                            .fill_gaps(None, None, delete_raw, &mut shutdown)
                            .await
                        {
                            Ok(report) if !report.remaining.is_empty() => {
                                info!(
                                    source = %name,
                                    remaining = report.remaining.len(),
                                    "gaps still unfilled"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(source = %name, error = %e, "gap pass failed");
                            }
                        }
                    }

                    tokio::select! {
                        _ = wait.recv() => {
                            info!(source = %name, "stopping source worker");
                            break;
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.ok();
    }
}
