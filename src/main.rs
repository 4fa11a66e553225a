//! ocrbatch - batch PDF OCR processing service.
//!
//! Accepts folders of PDFs over HTTP, OCRs each in parallel against a
//! content-addressed cache, and hands back a ZIP of the results.

mod archive;
mod cache;
mod config;
mod error;
mod fingerprint;
mod http;
mod job;
mod logs;
mod ocr;
mod optimiser;
mod worker;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache::CacheStore;
use config::{parse_bind_address, Settings};
use job::JobManager;
use logs::LogRing;

#[derive(Parser)]
#[command(name = "ocrbatch")]
#[command(about = "Batch PDF OCR processing service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default: 127.0.0.1:3030)
        #[arg(default_value = "127.0.0.1:3030", env = "OCRBATCH_BIND_ADDR")]
        bind: String,
    },
    /// Evict expired/oversized cache entries and report how many were removed
    ClearCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let settings = Settings::load();
    let log_ring = LogRing::new(settings.log_ring_capacity);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(log_ring.clone())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => cmd_serve(settings, log_ring, &bind).await,
        Commands::ClearCache => cmd_clear_cache(settings),
    }
}

async fn cmd_serve(settings: Settings, log_ring: LogRing, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind)?;

    std::fs::create_dir_all(&settings.staging_root)?;
    std::fs::create_dir_all(&settings.cache_root)?;

    let settings = Arc::new(settings);
    let cache = Arc::new(CacheStore::new(
        settings.cache_root.clone(),
        Duration::from_secs(settings.cache_max_age_days * 86400),
        settings.cache_max_total_bytes,
    ));
    let manager = JobManager::new(settings.clone(), cache.clone(), log_ring.clone());

    spawn_cache_janitor(cache, Duration::from_secs(settings.cache_max_age_days.max(1) * 3600));

    let state = http::AppState { manager, settings, log_ring };
    let app = http::create_router(state);

    println!(
        "{} Starting ocrbatch server at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!("  Press Ctrl+C to stop");

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic background sweep, independent of any one job's lifecycle, so the
/// cache doesn't grow unbounded across many submissions.
fn spawn_cache_janitor(cache: Arc<CacheStore>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match cache.evict(SystemTime::now()) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "cache janitor evicted expired/oversized entries");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "cache janitor sweep failed"),
            }
        }
    });
}

fn cmd_clear_cache(settings: Settings) -> anyhow::Result<()> {
    let cache = CacheStore::new(
        settings.cache_root.clone(),
        Duration::from_secs(settings.cache_max_age_days * 86400),
        settings.cache_max_total_bytes,
    );
    let removed = cache.clear()?;
    println!("{} Removed {} cache entries", style("✓").green(), removed);
    Ok(())
}
