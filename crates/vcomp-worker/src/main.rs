//! Compression worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcomp_media::{check_ffmpeg, FfmpegTranscoder};
use vcomp_queue::{BrokerConfig, RedisStreamLog};
use vcomp_storage::{R2Client, R2Config};
use vcomp_worker::{CompressionWorker, WorkerConfig};

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

    info!("Starting vcomp-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let ffmpeg = check_ffmpeg().context("ffmpeg is required")?;
    info!(path = %ffmpeg.display(), "Found ffmpeg");

    let broker = BrokerConfig::from_env();
    let log = Arc::new(RedisStreamLog::new(&broker).context("invalid broker config")?);
    let store = Arc::new(R2Client::new(
        R2Config::from_env().context("invalid storage config")?,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let transcoder = Arc::new(
        FfmpegTranscoder::new(config.transcode.clone()).with_cancel(shutdown_rx.clone()),
    );
    let shutdown_timeout = config.shutdown_timeout;

    let worker = CompressionWorker::new(config, &broker, log, store, transcoder);
    worker.check_dependencies().await?;
    info!("Broker and storage reachable");

    let mut handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Worker error during shutdown: {}", e),
                Ok(Err(e)) => error!("Worker task panicked: {}", e),
                Err(_) => {
                    warn!("Worker did not stop within {:?}; aborting", shutdown_timeout);
                    handle.abort();
                }
            }
        }
        joined = &mut handle => {
            joined.context("worker task panicked")?.context("worker stopped")?;
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}
