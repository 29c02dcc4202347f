use anyhow::Result;
use chrono::Utc;
use rosmon_alert::engine::AlertEngine;
use rosmon_device::backup::{
    BackupOptions, BackupOrchestrator, RestoreOptions, RetryPolicy, TokioSleeper,
};
use rosmon_device::rest::RestConnector;
use rosmon_device::DeviceConnector;
use rosmon_notify::channels::email::EmailChannel;
use rosmon_notify::channels::telegram::TelegramChannel;
use rosmon_notify::manager::NotificationManager;
use rosmon_notify::NotificationChannel;
use rosmon_storage::engine::SqliteMetricStore;
use rosmon_storage::registry::DeviceRegistry;
use rosmon_storage::MetricStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing_subscriber::EnvFilter;

use rosmon_server::alerts::AlertScheduler;
use rosmon_server::api;
use rosmon_server::config::ServerConfig;
use rosmon_server::poller::PollScheduler;
use rosmon_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    rosmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rosmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load_or_default(&config_path)?;

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        poll_interval = config.poll.interval_secs,
        "rosmon-server starting"
    );

    let data_dir = Path::new(&config.data_dir);
    let store: Arc<dyn MetricStore> = Arc::new(SqliteMetricStore::new(data_dir)?);
    let registry = Arc::new(DeviceRegistry::new(data_dir)?);
    let engine = Arc::new(Mutex::new(AlertEngine::new()));
    let notifier = Arc::new(build_notifier(&config)?);
    let connector: Arc<dyn DeviceConnector> = Arc::new(RestConnector::new());

    let orchestrator = Arc::new(BackupOrchestrator::new(
        connector.clone(),
        RetryPolicy {
            max_attempts: config.backup.max_attempts,
            backoff: Duration::from_secs(config.backup.backoff_secs),
        },
        BackupOptions {
            wait_timeout: Duration::from_secs(config.backup.wait_timeout_secs),
            poll_interval: Duration::from_millis(config.backup.poll_interval_ms),
        },
        RestoreOptions {
            offline_wait: Duration::from_secs(config.backup.restore_offline_wait_secs),
            online_wait: Duration::from_secs(config.backup.restore_online_wait_secs),
            probe_interval: Duration::from_secs(config.backup.probe_interval_secs),
            probe_timeout: Duration::from_secs(config.backup.probe_timeout_secs),
        },
        Arc::new(TokioSleeper),
    ));

    let state = AppState {
        store: store.clone(),
        registry,
        engine,
        notifier,
        connector,
        orchestrator,
        snapshots: Arc::new(Mutex::new(HashMap::new())),
        config: Arc::new(config.clone()),
        start_time: Utc::now(),
    };

    // Hourly partition retention sweep
    let retention_days = config.retention_days;
    let cleanup_store = store.clone();
    let cleanup_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match cleanup_store.cleanup(retention_days) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up expired partitions")
                }
                Err(e) => tracing::error!(error = %e, "Cleanup failed"),
                _ => {}
            }
        }
    });

    // Metrics poll loop
    let poll_state = state.clone();
    let poll_handle = tokio::spawn(async move {
        PollScheduler::new(poll_state).run().await;
    });

    // Alert check loop
    let alert_handle = if config.alerts.enabled {
        let alert_state = state.clone();
        Some(tokio::spawn(async move {
            AlertScheduler::new(alert_state).run().await;
        }))
    } else {
        tracing::info!("Alert check scheduler disabled");
        None
    };

    // HTTP/REST server
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    cleanup_handle.abort();
    poll_handle.abort();
    if let Some(handle) = alert_handle {
        handle.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}

fn build_notifier(config: &ServerConfig) -> Result<NotificationManager> {
    let email: Option<Box<dyn NotificationChannel>> = match &config.notify.email {
        Some(cfg) => Some(Box::new(EmailChannel::new(
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
        )?)),
        None => None,
    };
    let telegram: Option<Box<dyn NotificationChannel>> = config
        .notify
        .telegram
        .as_ref()
        .map(|cfg| {
            Box::new(TelegramChannel::new(&cfg.bot_token, &cfg.chat_id))
                as Box<dyn NotificationChannel>
        });

    if email.is_none() && telegram.is_none() {
        tracing::info!("No notification channels configured");
    }

    Ok(NotificationManager::new(email, telegram))
}
