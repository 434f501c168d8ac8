use anyhow::{Context, Result};
use facecam_core::{Detector, RasterSurface, ReplayDetector, SeetaDetector};
use facecam_hw::V4lCameraProvider;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod dbus_interface;

use config::{Config, DetectorKind};
use controller::Controller;
use dbus_interface::{FacecamService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facecamd starting");

    let config = Config::load().context("loading configuration")?;

    let detector: Arc<dyn Detector> = match config.detector {
        DetectorKind::Seeta => {
            let missing = facecam_core::models::missing_models(&config.model_dir);
            if !missing.is_empty() {
                tracing::warn!(
                    dir = %config.model_dir.display(),
                    ?missing,
                    "model files missing; run `facecam fetch-models` before starting a session"
                );
            }
            Arc::new(SeetaDetector::new(config.seeta_model_path()))
        }
        DetectorKind::Replay => Arc::new(ReplayDetector::new(config.replay_script_path())),
    };
    tracing::info!(detector = ?config.detector, device = %config.camera_device, "configured");

    let camera = Arc::new(
        V4lCameraProvider::new(&config.camera_device).with_warmup_frames(config.warmup_frames),
    );
    let font = config.font_path.as_deref().and_then(RasterSurface::load_font);
    let surface = RasterSurface::new(font);
    let controller = Controller::new(surface, config.settings(), detector, camera);

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FacecamService::new(controller.clone()))?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facecamd ready");

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => {}
    }

    tracing::info!("facecamd shutting down");
    // Release the camera even if no client ever called Stop.
    controller.stop();

    Ok(())
}
