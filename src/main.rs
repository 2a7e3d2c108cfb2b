// =============================================================================
// Cthulu — Autonomous MT5 Trading Engine — Entry Point
// =============================================================================
//
// Bootstrap order: CLI -> config -> logging -> singleton lock -> bridge
// probe -> watchdog -> health endpoint -> engine -> run -> graceful
// shutdown.
//
// Exit codes:
//   0  normal shutdown
//   2  configuration / bootstrap error
//   3  broker unavailable after startup retries
//   4  watchdog kill (issued by the watchdog thread)
//   1  unexpected fatal
// =============================================================================

mod adoption;
mod bridge;
mod config;
mod context;
mod db;
mod engine;
mod error;
mod exit;
mod health;
mod indicators;
mod lifecycle;
mod lockfile;
mod metrics;
mod risk;
mod snapshot;
mod strategy;
mod tracker;
mod types;
mod watchdog;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::bridge::client::BridgeClient;
use crate::bridge::Broker;
use crate::config::EngineConfig;
use crate::db::TradeDb;
use crate::engine::TradingEngine;
use crate::health::HealthHandle;
use crate::lockfile::LockFile;
use crate::watchdog::Watchdog;

/// Health probe attempts before giving up at startup.
const STARTUP_PROBE_ATTEMPTS: u32 = 5;

const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_BROKER_UNAVAILABLE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "cthulu", about = "Autonomous MT5 trading engine")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Never send orders; log intents instead.
    #[arg(long)]
    dry_run: bool,

    /// Skip the interactive setup wizard (headless operation).
    #[arg(long)]
    skip_setup: bool,

    /// Disable all interactive prompts (headless operation).
    #[arg(long)]
    no_prompt: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    // ── 1. Configuration ────────────────────────────────────────────────
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("cthulu.json"));
    if !config_path.exists() {
        eprintln!(
            "configuration file {} not found; pass --config PATH \
             (the setup wizard is a separate tool)",
            config_path.display()
        );
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    let mut cfg = match EngineConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    if cli.dry_run {
        cfg.dry_run = true;
    }

    // ── 2. Logging ──────────────────────────────────────────────────────
    if let Err(e) = init_logging(&cfg.log_path) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    info!("╔══════════════════════════════════════════════════════╗");
    info!("║            Cthulu Trading Engine — Starting          ║");
    info!("╚══════════════════════════════════════════════════════╝");
    if cli.skip_setup {
        info!("setup wizard skipped (headless)");
    }
    if cfg.dry_run {
        warn!("DRY RUN — orders will be logged, never sent");
    }

    // ── 3. Singleton lock ───────────────────────────────────────────────
    let _lock = match LockFile::acquire(&cfg.lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "could not acquire engine lock");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    // ── 4. Bridge probe ─────────────────────────────────────────────────
    let broker: Arc<dyn Broker> = Arc::new(BridgeClient::new(&cfg.mt5));
    if !probe_bridge(broker.as_ref()).await {
        error!(
            attempts = STARTUP_PROBE_ATTEMPTS,
            url = %cfg.mt5.base_url(),
            "broker bridge unavailable"
        );
        std::process::exit(EXIT_BROKER_UNAVAILABLE);
    }

    // ── 5. Watchdog ─────────────────────────────────────────────────────
    let watchdog = Watchdog::new();
    watchdog.spawn(Duration::from_secs(cfg.watchdog_timeout_seconds));

    // ── 6. Health endpoint ──────────────────────────────────────────────
    let health = HealthHandle::new(cfg.dry_run);
    if let Some(port) = cfg.metrics.http_port {
        tokio::spawn(health::serve(health.clone(), port));
    }

    // ── 7. Engine + metrics writer ──────────────────────────────────────
    let db = match TradeDb::open(&cfg.db_path) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "could not open trade database");
            std::process::exit(1);
        }
    };

    let close_on_exit = cfg.close_positions_on_exit;
    let csv_path = cfg.metrics.csv_path.clone();
    let prom_path = cfg.metrics.prometheus_path.clone();

    let mut engine =
        match TradingEngine::bootstrap(cfg, broker, db, health.clone(), watchdog.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                error!(error = %e, "engine bootstrap failed");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        };
    let writer_handle = metrics::writer::spawn(engine.metrics_receiver(), csv_path, prom_path);

    // ── 8. Shutdown signal ──────────────────────────────────────────────
    let signal_health = health.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received — shutting down at the next cycle boundary");
            signal_health.request_shutdown();
        }
    });

    // ── 9. Run ──────────────────────────────────────────────────────────
    engine.run().await;

    // ── 10. Graceful tear-down ──────────────────────────────────────────
    let close_positions = confirm_close_on_exit(close_on_exit, cli.no_prompt);
    engine.shutdown(close_positions).await;

    if writer_handle.join().is_err() {
        warn!("metrics writer terminated abnormally");
    }

    info!("Cthulu shut down cleanly.");
}

/// Probe the bridge with backoff until it answers healthy or attempts run out.
async fn probe_bridge(broker: &dyn Broker) -> bool {
    for attempt in 1..=STARTUP_PROBE_ATTEMPTS {
        match broker.health().await {
            Ok(status) if status.ok => {
                info!(latency_ms = status.latency_ms, "bridge healthy");
                return true;
            }
            Ok(_) => warn!(attempt, "bridge answered unhealthy"),
            Err(e) => warn!(attempt, error = %e, "bridge probe failed"),
        }
        tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
    }
    false
}

/// Decide whether to flatten engine-owned positions on exit. Headless runs
/// take the configured value; interactive runs get one prompt.
fn confirm_close_on_exit(configured: bool, no_prompt: bool) -> bool {
    if no_prompt {
        return configured;
    }
    if !configured {
        return false;
    }

    eprint!("Close open engine-owned positions before exit? [y/N] ");
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// -----------------------------------------------------------------------------
// Logging
// -----------------------------------------------------------------------------

/// Writer that mirrors every log line to stdout and the rolling log file.
#[derive(Clone)]
struct TeeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

struct TeeGuard {
    file: Arc<Mutex<std::fs::File>>,
}

impl Write for TeeGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = std::io::stdout().write_all(buf);
        self.file.lock().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = std::io::stdout().flush();
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for TeeWriter {
    type Writer = TeeGuard;

    fn make_writer(&'a self) -> Self::Writer {
        TeeGuard {
            file: self.file.clone(),
        }
    }
}

fn init_logging(log_path: &str) -> anyhow::Result<()> {
    let path = std::path::Path::new(log_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(TeeWriter {
            file: Arc::new(Mutex::new(file)),
        })
        .with_ansi(false)
        .init();
    Ok(())
}
