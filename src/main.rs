use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

mod api;
mod camera;
mod config;
mod detect;
mod pipeline;
mod report;

use api::AppState;
use camera::Camera;
use config::Config;
use detect::{MotionEstimator, PresenceClassifier, YoloBackend};
use pipeline::{DetectionSession, DetectionStatus};
use report::{spawn_writer, StateReporter, StatusStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=debug".parse()?))
        .init();

    let config = Config::load()?;

    let backend = YoloBackend::new(&config.model)?;
    let classifier = PresenceClassifier::new(Box::new(backend));
    tracing::info!(model = %config.model.path, "presence model loaded");

    let camera = Camera::open(&config.camera)?;
    let store = StatusStore::new(&config.reporting)?;

    let (emission_tx, emission_rx) = mpsc::channel(16);
    let (frame_tx, frame_rx) = watch::channel(None);
    let (status_tx, status_rx) = watch::channel(DetectionStatus::default());

    let writer = spawn_writer(store, emission_rx);

    let session = DetectionSession::new(
        camera,
        MotionEstimator::new(config.motion.pixel_delta, config.motion.changed_fraction),
        classifier,
        StateReporter::new(Duration::from_secs(config.reporting.update_interval_secs)),
        emission_tx,
        frame_tx,
        status_tx,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let loop_handle = pipeline::spawn_session(session, Arc::clone(&shutdown));

    let state = AppState::new(frame_rx, status_rx);
    let server = tokio::spawn(api::start_server(state, config.http.port));

    tokio::select! {
        result = loop_handle => {
            match result {
                Ok(()) => tracing::info!("detection loop finished"),
                Err(e) => tracing::error!(error = %e, "detection task failed"),
            }
        }
        result = server => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                Ok(Ok(())) => tracing::info!("HTTP server stopped"),
                Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    let _ = writer.await;
    tracing::info!("shutdown complete");

    Ok(())
}
