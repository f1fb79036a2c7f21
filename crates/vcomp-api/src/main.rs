//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcomp_api::{create_router, error, ApiConfig, AppState};
use vcomp_media::{check_ffmpeg, check_ffprobe, FfmpegThumbnailer, FfprobeProber};
use vcomp_queue::{BrokerConfig, RedisCleanupQueue, RedisStreamLog};
use vcomp_storage::{R2Client, R2Config};

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vcomp=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting vcomp-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);
    error::hide_internal_details(config.is_production());

    check_ffprobe().context("ffprobe is required")?;
    if let Err(e) = check_ffmpeg() {
        warn!("Thumbnails unavailable: {}", e);
    }

    let broker = BrokerConfig::from_env();
    let log = Arc::new(RedisStreamLog::new(&broker).context("invalid broker config")?);
    let cleanup_queue = Arc::new(RedisCleanupQueue::new(&broker).context("invalid broker config")?);
    let store = Arc::new(R2Client::new(
        R2Config::from_env().context("invalid storage config")?,
    ));

    let state = AppState::new(
        config.clone(),
        &broker,
        store,
        log,
        cleanup_queue,
        Arc::new(FfprobeProber::new(config.probe_timeout)),
        Arc::new(FfmpegThumbnailer::new(config.thumbnail_timeout)),
    );

    state.check_dependencies().await?;
    info!("Broker and storage reachable");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let status = Arc::clone(&state.status);
    let status_rx = shutdown_rx.clone();
    let status_task = tokio::spawn(async move { status.run(status_rx).await });

    let cleanup = Arc::clone(&state.cleanup);
    let cleanup_task = tokio::spawn(async move { cleanup.run(shutdown_rx).await });

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(status_task, cleanup_task);

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
