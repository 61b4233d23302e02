//! Process wiring for `frigate-relay run`.
//!
//! Opens the state store, loads shared state, builds the NVR and Telegram
//! clients, then runs the event pipeline and the command listener as two
//! tasks until a shutdown signal arrives.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use frigate_relay_core::monitor::MonitorConfig;
use frigate_relay_core::store::memory::InMemoryStore;
use frigate_relay_core::store::StateStore;

use crate::commands::{run_command_listener, CommandHandler, StatusInfo};
use crate::config::Config;
use crate::db;
use crate::dedup::DedupStore;
use crate::frigate::{FrigateClient, Nvr};
use crate::migrate::apply_schema;
use crate::pipeline::{run_pipeline, LoopTiming, Pipeline};
use crate::sqlite_store::SqliteStore;
use crate::telegram::TelegramClient;
use crate::toggle::ToggleStateStore;

/// The durable store, or an in-memory one when the database cannot be
/// opened.
pub struct OpenedStore {
    pub store: Arc<dyn StateStore>,
    pub sqlite: Option<Arc<SqliteStore>>,
}

pub async fn open_store(config: &Config) -> OpenedStore {
    let opened = async {
        let pool = db::connect(config).await?;
        apply_schema(&pool).await?;
        anyhow::Ok(pool)
    }
    .await;

    match opened {
        Ok(pool) => {
            let sqlite = Arc::new(SqliteStore::new(pool));
            OpenedStore {
                store: sqlite.clone(),
                sqlite: Some(sqlite),
            }
        }
        Err(e) => {
            tracing::warn!(
                path = %config.state.path.display(),
                error = %e,
                "state database unavailable; running with in-memory state"
            );
            OpenedStore {
                store: Arc::new(InMemoryStore::new()),
                sqlite: None,
            }
        }
    }
}

pub async fn run(config: Config) -> Result<()> {
    let parsed = config.monitor.parse()?;
    for entry in &parsed.skipped {
        tracing::warn!(entry = %entry, "ignoring malformed monitor entry");
    }
    let monitor = Arc::new(parsed.config);
    log_monitor(&monitor);

    let opened = open_store(&config).await;
    let store = opened.store.clone();

    let toggle = Arc::new(ToggleStateStore::load(store.clone()).await);
    let dedup = Arc::new(
        DedupStore::load(
            store.clone(),
            config.state.dedup_capacity,
            (config.state.dedup_max_age_hours * 3600) as i64,
        )
        .await,
    );

    let nvr: Arc<dyn Nvr> = Arc::new(FrigateClient::new(&config)?);
    let telegram = Arc::new(TelegramClient::new(&config)?);

    match nvr.version().await {
        Ok(version) => tracing::info!(version = %version, url = %config.nvr.base_url(), "NVR is up"),
        Err(e) => tracing::error!(url = %config.nvr.base_url(), error = %e, "cannot reach NVR; polling will keep retrying"),
    }

    let pipeline = Pipeline::from_config(
        &config,
        monitor.clone(),
        nvr.clone(),
        telegram.clone(),
        store,
        toggle.clone(),
        dedup,
    )
    .await?;

    let handler = CommandHandler::new(
        toggle,
        monitor,
        nvr,
        telegram.clone(),
        &config.telegram.chat_id,
        StatusInfo::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline_task = tokio::spawn(run_pipeline(
        pipeline,
        LoopTiming::from_config(&config),
        shutdown_rx.clone(),
    ));
    let listener_task = tokio::spawn(run_command_listener(
        handler,
        telegram,
        Duration::from_secs(config.telegram.long_poll_secs),
        shutdown_rx,
    ));

    wait_for_signal().await;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = pipeline_task.await {
        tracing::error!(error = %e, "pipeline task panicked");
    }
    if let Err(e) = listener_task.await {
        tracing::error!(error = %e, "command listener task panicked");
    }

    if let Some(sqlite) = opened.sqlite {
        sqlite.pool().close().await;
    }
    tracing::info!("stopped");
    Ok(())
}

fn log_monitor(monitor: &MonitorConfig) {
    for line in monitor.describe() {
        tracing::info!(rule = %line, "monitoring");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
