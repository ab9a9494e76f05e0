use crate::collector::ChannelCollector;
use crate::config::types::Config;
use crate::config::{load_config, ConfigError};
use crate::live::{run_live_feed, Broadcaster, Sampler};
use crate::pipeline::{batch_queue, run_writer, PipelineContext, QueueItem};
use crate::source::{build_source, ChannelSource};
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::{Storage, StorageError};
use crate::web::{run_server, AppState};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Ticks a slow live-feed subscriber may fall behind before skipping.
const BROADCAST_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),
}

/// A running set of collectors, writer and live feed.
pub struct Pipeline {
    ctx: PipelineContext,
    broadcaster: Arc<Broadcaster>,
    shutdown_tx: watch::Sender<bool>,
    collectors: Vec<(String, JoinHandle<()>)>,
    writer: JoinHandle<()>,
    live_feed: JoinHandle<()>,
    started: Instant,
}

/// Initializes the store and spawns one collector per configured channel,
/// the batch writer and the sampler/broadcaster loop.
pub async fn start_pipeline(
    config: &Config,
    source: Arc<dyn ChannelSource>,
    storage: Arc<dyn Storage>,
) -> Result<Pipeline, RunError> {
    storage.init_schema().await?;

    let (queue_tx, queue_rx) = batch_queue(config.pipeline.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = PipelineContext::new(storage.clone(), queue_tx, shutdown_rx.clone());

    let known = ctx.watermarks.preload().await?;
    info!(channels = known, "Loaded watermarks");

    let writer = tokio::spawn(run_writer(queue_rx, ctx.clone(), config.writer.clone()));

    let mut collectors = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        let collector = ChannelCollector::new(
            channel,
            source.clone(),
            ctx.clone(),
            config.collector.clone(),
            &config.source,
        );
        collectors.push((channel.clone(), tokio::spawn(collector.run())));
    }

    let broadcaster = Arc::new(Broadcaster::new(BROADCAST_CAPACITY));
    let sampler = Sampler::new(
        storage,
        config.channels.clone(),
        config.sampler.sample_size,
        config.sampler.recency_window,
    );
    let live_feed = tokio::spawn(run_live_feed(
        sampler,
        broadcaster.clone(),
        config.sampler.interval,
        shutdown_rx,
    ));

    info!(channels = config.channels.len(), "Pipeline started");

    Ok(Pipeline {
        ctx,
        broadcaster,
        shutdown_tx,
        collectors,
        writer,
        live_feed,
        started: Instant::now(),
    })
}

impl Pipeline {
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            storage: self.ctx.storage.clone(),
            watermarks: self.ctx.watermarks.clone(),
            stats: self.ctx.stats.clone(),
            broadcaster: self.broadcaster.clone(),
            started: self.started,
            shutdown: self.ctx.shutdown.clone(),
        }
    }

    /// Stops collectors after their current cycle, then lets the writer
    /// drain the queue behind the shutdown sentinel.
    pub async fn shutdown(self) -> Result<(), RunError> {
        let _ = self.shutdown_tx.send(true);

        let (channels, handles): (Vec<String>, Vec<JoinHandle<()>>) =
            self.collectors.into_iter().unzip();
        for (channel, result) in channels.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(channel = %channel, error = %e, "Collector task join error");
            }
        }

        if self.ctx.queue.send(QueueItem::Shutdown).await.is_err() {
            warn!("Batch writer already gone");
        }

        match self.writer.await {
            Ok(()) => info!("Writer task completed successfully"),
            Err(e) => {
                error!(error = %e, "Writer task join error");
                return Err(e.into());
            }
        }

        self.live_feed.await?;
        info!("Pipeline stopped");
        Ok(())
    }
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/auditfeed/config.yml");
            eprintln!("  /etc/auditfeed/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'auditfeed config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage = Arc::new(DuckDbStorage::new(
        &config.storage.path,
        config.storage.dedup_key,
        config.storage.reader_connections,
    )?);

    info!(
        source = %config.source.path.display(),
        direction = ?config.source.direction,
        "Opening channel source"
    );
    let source = build_source(&config.source);

    let pipeline = start_pipeline(&config, source, storage).await?;

    let web_shutdown = pipeline.context().shutdown.clone();
    let state = pipeline.app_state();
    let listen = config.web.listen.clone();
    let mut web_handle =
        tokio::spawn(async move { run_server(state, &listen, web_shutdown).await });

    info!("Pipeline started, press Ctrl+C to shutdown");

    let web_finished = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            false
        }
        result = &mut web_handle => {
            match result {
                Ok(Ok(())) => warn!("Web server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "Web server error"),
                Err(e) => error!(error = %e, "Web server join error"),
            }
            true
        }
    };

    info!("Waiting for pipeline tasks to complete");
    pipeline.shutdown().await?;

    if !web_finished {
        match web_handle.await {
            Ok(Ok(())) => info!("Web server stopped"),
            Ok(Err(e)) => error!(error = %e, "Web server error"),
            Err(e) => error!(error = %e, "Web server join error"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
