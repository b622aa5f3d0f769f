use anyhow::{Context, Result};
use janus_hw::{Camera, FrameSource, RelayLock, SourceConfig};
use janus_store::{GalleryCache, Store};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod door;
mod engine;
mod http;
mod recognition;
mod state;
mod stream;

use config::Config;
use door::DoorController;
use recognition::{RecognitionConfig, RecognitionLoop};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("janusd starting");
    let config = Arc::new(Config::from_env());

    // Persistence first: fail fast on a bad database or key file.
    let store = Store::open(&config.db_path, &config.key_path)
        .await
        .context("failed to open store")?;
    if store.admins().count().await? == 0 {
        tracing::warn!(
            "no administrators configured; unlock and enrollment will be rejected \
             (seed one with `janus admin set <username>`)"
        );
    }
    let gallery = GalleryCache::load(store.gallery().clone())
        .await
        .context("failed to load gallery")?;

    // The camera is owned by the capture thread for the life of the process.
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .context("failed to open camera")?;
    let source = FrameSource::spawn(
        camera,
        SourceConfig {
            stale_after: config.frame_stale_after,
            min_capture_interval: config.stream_interval,
            warmup_frames: config.warmup_frames,
        },
    );
    let frames = source.handle();

    let engine = engine::spawn_engine(&config.model_dir, frames.clone())
        .context("failed to start extraction engine")?;

    let lock = Arc::new(
        RelayLock::for_model(&config.relay_device, &config.relay_board)
            .context("failed to initialize relay lock")?,
    );
    tracing::info!(device = %config.relay_device, board = %config.relay_board, "relay lock ready");
    let (door, _door_status) = DoorController::new(lock, config.hold);

    let (stop_tx, stop_rx) = watch::channel(false);
    let (rec_loop, last_match) = RecognitionLoop::new(
        frames.clone(),
        engine.clone(),
        gallery.clone(),
        door.clone(),
        RecognitionConfig {
            match_threshold: config.match_threshold,
            cooldown: config.cooldown,
            poll_interval: config.poll_interval,
        },
        stop_rx,
    );
    let recognition_task = tokio::spawn(rec_loop.run());

    let app_state = AppState {
        config: config.clone(),
        store,
        gallery,
        engine,
        door,
        frames,
        last_match,
    };
    let app = http::router(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "janusd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    tracing::info!("janusd shutting down");
    let _ = stop_tx.send(true);
    let _ = recognition_task.await;
    source.stop();
    tracing::info!("janusd stopped");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
