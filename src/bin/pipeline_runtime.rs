//! Pipeline Runtime
//!
//! Evaluates every configured instrument on an interval and sends the
//! resulting alerts:
//! - Initializes SQLite database with schema (or in-memory cooldown state)
//! - Picks the alert channel (Discord webhook, or the log)
//! - Runs the scheduler until CTRL+C, then cancels pending delayed alerts
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables: see `PipelineConfig::from_env`. A `.env` file found
//! at startup is re-read on every cycle.

use dotenv::dotenv;
use log::{error, info};
use rusqlite::Connection;
use patternwatch::pipeline::{
    channel::{AlertChannel, DiscordWebhookChannel, LogChannel},
    config::{ConfigSource, EnvConfigSource},
    db::{run_schema_migrations, InMemoryNotificationStore, NotificationStore, SqliteNotificationStore},
    dispatch::DispatchPolicy,
    engine::PipelineEngine,
    registry::DetectorRegistry,
    scheduler::PipelineScheduler,
    source::FileSnapshotSource,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    let dotenv_path = dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Pattern Pipeline Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    // The .env file is re-read every cycle so edits apply without a restart
    let config_source = Arc::new(match &dotenv_path {
        Some(path) => EnvConfigSource::with_dotenv(path),
        None => EnvConfigSource::new(),
    });

    // Load configuration; failing here is fatal
    let config = config_source.load().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    if !config.enabled {
        info!("⚠️  Pipeline is DISABLED (set ENABLE_PIPELINE=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    let registry = Arc::new(DetectorRegistry::standard());

    info!("✅ Pipeline ENABLED");
    info!("   ├─ Instruments: {}", config.instruments.join(", "));
    info!("   ├─ Data dir: {}", config.data_dir);
    info!("   ├─ Patterns registered: {}", registry.len());
    info!("   ├─ Cooldown: {}s", config.dispatch.cooldown.as_secs());
    info!("   ├─ Detector concurrency: {}", config.detector_concurrency);
    info!("   └─ Evaluation interval: {}ms", config.evaluation_interval_ms);

    // Cooldown state
    let mut sqlite_store = None;
    let store: Arc<dyn NotificationStore> = match &config.db_path {
        Some(db_path) => {
            info!("🔧 Initializing database...");
            let mut conn = Connection::open(db_path)?;

            // Run schema migrations (idempotent)
            run_schema_migrations(&mut conn, &config.schema_dir)?;
            drop(conn); // Close temporary connection

            let store = Arc::new(SqliteNotificationStore::new(db_path)?);
            info!("✅ Database initialized ({})", db_path);
            sqlite_store = Some(Arc::clone(&store));
            store
        }
        None => {
            info!("⚠️  PATTERNWATCH_DB_PATH unset, cooldown state is kept in memory");
            Arc::new(InMemoryNotificationStore::with_history_capacity(config.alert_history_capacity))
        }
    };

    // Alert channel
    let channel: Arc<dyn AlertChannel> = match &config.discord_webhook_url {
        Some(url) => {
            info!("✅ Alerts go to Discord webhook");
            Arc::new(DiscordWebhookChannel::new(url)?)
        }
        None => {
            info!("⚠️  DISCORD_WEBHOOK_URL unset, alerts go to the log");
            Arc::new(LogChannel)
        }
    };

    let policy = Arc::new(
        DispatchPolicy::new(store, channel).with_history_capacity(config.alert_history_capacity),
    );
    let engine = PipelineEngine::new(Arc::clone(&registry)).with_concurrency(config.detector_concurrency);
    let source = Arc::new(FileSnapshotSource::new(&config.data_dir));

    let mut scheduler = PipelineScheduler::new(config_source, engine, source, policy);
    if let Some(store) = sqlite_store {
        scheduler = scheduler.with_history_pruning(store);
    }

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    shutdown_tx.send_replace(true);
    if let Err(e) = handle.await {
        error!("❌ Scheduler task failed: {}", e);
    }

    info!("✅ Pipeline runtime stopped");
    Ok(())
}
