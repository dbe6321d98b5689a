//! hidwatch - Controller Reachability Monitor
//!
//! Pings a fixed list of controller addresses, debounces their up/down
//! state, mails alert and recovery notifications, records every confirmed
//! transition in SQLite, and serves a live dashboard.

mod alert;
mod config;
mod db;
mod monitor;
mod probe;
mod scheduler;
mod web;

use std::sync::Arc;
use std::time::Duration;

use alert::{AlertDispatcher, HttpMailer, RetryPolicy};
use config::Config;
use db::Store;
use monitor::StatusRegistry;
use probe::PingProber;
use scheduler::PollScheduler;
use web::Server;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration; anything wrong here is fatal.
    let cfg = Config::load()?;

    init_logging(&cfg)?;

    let addresses = config::load_addresses(&cfg.ip_file)?;
    tracing::info!(
        "Monitoring {} controllers from {} every {}s; alert after {}s offline",
        addresses.len(),
        cfg.ip_file,
        cfg.interval_secs,
        cfg.alert_after_secs,
    );

    // History store
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("History database at {}", cfg.db_path);

    // In-memory state; everything starts as Unknown after a restart.
    let registry = Arc::new(StatusRegistry::new(
        &addresses,
        Duration::from_secs(cfg.alert_after_secs),
    ));

    // Event fan-out: alerting and history are independent subscribers.
    let (alert_tx, alert_rx) = mpsc::channel(256);
    let (history_tx, history_rx) = mpsc::channel(256);

    tokio::spawn(scheduler::run_history_writer(history_rx, store.clone()));

    let mailer = Arc::new(HttpMailer::new(cfg.mail.clone())?);
    AlertDispatcher::start(
        mailer,
        registry.clone(),
        alert_rx,
        RetryPolicy::default(),
    );

    // Start polling
    let poll_scheduler = Arc::new(PollScheduler::new(
        registry.clone(),
        Arc::new(PingProber),
        alert_tx,
        history_tx,
        Duration::from_secs(cfg.interval_secs),
        Duration::from_secs(cfg.probe_timeout_secs),
    ));
    poll_scheduler.start(&addresses).await;

    // Serve the dashboard until ctrl-c, then stop the poll loops.
    let server = Server::new(cfg, store, registry);
    server.start().await?;

    poll_scheduler.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Initialize tracing: always to stdout, additionally to the configured log
/// file when one is set.
fn init_logging(cfg: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("hidwatch=info".parse()?);

    let stdout_layer = tracing_subscriber::fmt::layer();

    match &cfg.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(file_layer)
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(filter)
                .init();
        }
    }

    Ok(())
}
