//! `statsrec` — boots the long-term statistics engine (library crate
//! `statsrec`) as a standalone process: load configuration, initialize
//! logging, open the database, and run the 5-minute compaction scheduler
//! until interrupted.
//!
//! Mirrors the teacher's `main.rs` assembly style (config load, logging
//! init, background task spawn, `ctrl_c`-driven graceful shutdown) with the
//! proxy/TUI/event-channel wiring replaced by the engine's own scheduler.

mod cli;
mod demo;

use anyhow::Result;
use cli::Commands;
use statsrec::config::RecorderConfig;
use statsrec::platform::PlatformRegistry;
use statsrec::{logging, Engine};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();

    match args.command {
        Some(Commands::Config { path }) => {
            cli::handle_config(path);
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = RecorderConfig::from_env()?;
    logging::init(&config.logging.level);

    tracing::info!(
        db_path = %config.db_path.display(),
        keep_days_short_term = config.keep_days_short_term,
        "starting statsrec"
    );

    let mut platforms = PlatformRegistry::new();
    platforms.register(Arc::new(demo::DemoPlatform::new()));

    let engine = Arc::new(Engine::start(config, platforms)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let scheduler_handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_scheduler(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;

    tracing::info!(
        tasks_processed = engine.metrics().tasks_processed.load(std::sync::atomic::Ordering::Relaxed),
        tasks_failed = engine.metrics().tasks_failed.load(std::sync::atomic::Ordering::Relaxed),
        "shutdown complete"
    );
    Ok(())
}
