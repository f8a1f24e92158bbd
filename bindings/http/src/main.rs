use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use storyface::{FaceDetector, StoryfaceError};
use storyface_http::telemetry::{build_subscriber, install, resolve_filter};
use storyface_http::upload::cleanup_dirs;
use storyface_http::{app, ApiError, AppConfig, AppState, DetectorSlot};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config_path = std::env::var_os("STORYFACE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("storyface.toml"));
    let config = AppConfig::load(&config_path)?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = resolve_filter(rust_log.as_deref(), &config.log_filter)?;
    install(build_subscriber("storyface", filter, std::io::stdout))?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let (state, ready) = AppState::new(config.clone());
    tokio::spawn(publish_detector(config.clone(), ready));
    tokio::spawn(cleanup_loop(
        vec![config.upload_dir.clone(), config.output_dir.clone()],
        Duration::from_secs(config.cleanup_max_age_hours * 3600),
        Duration::from_secs(config.cleanup_interval_secs.max(1)),
    ));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "storyface listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Load the detector off the runtime and flag the service ready.
async fn publish_detector(config: AppConfig, ready: watch::Sender<DetectorSlot>) {
    match tokio::task::spawn_blocking(move || load_detector(&config)).await {
        Ok(Ok(detector)) => {
            ready.send_replace(Some(detector));
            tracing::info!("face detector ready");
        }
        Ok(Err(err)) => tracing::error!(error = %err, "face detector failed to load"),
        Err(err) => tracing::error!(error = %err, "face detector loader panicked"),
    }
}

#[cfg(feature = "rustface")]
fn load_detector(config: &AppConfig) -> Result<Arc<dyn FaceDetector>, StoryfaceError> {
    let path = config
        .detector_model
        .as_deref()
        .ok_or_else(|| StoryfaceError::Detector("detector_model is not configured".into()))?;
    let detector = storyface::RustfaceDetector::from_path(path)?.min_face_size(config.min_face_size);
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "rustface"))]
fn load_detector(_config: &AppConfig) -> Result<Arc<dyn FaceDetector>, StoryfaceError> {
    Err(StoryfaceError::MissingDetector)
}

async fn cleanup_loop(dirs: Vec<PathBuf>, max_age: Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        cleanup_dirs(&dirs, max_age).await;
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
