use crate::controller::{Controller, SessionState, StartError};
use facecam_core::{gray_background, render, RasterSurface};
use image::RgbaImage;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.Facecam1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Facecam1";

/// D-Bus interface for the facecam capture daemon.
///
/// Bus name: org.freedesktop.Facecam1
/// Object path: /org/freedesktop/Facecam1
pub struct FacecamService {
    controller: Controller<RasterSurface>,
}

impl FacecamService {
    pub fn new(controller: Controller<RasterSurface>) -> Self {
        Self { controller }
    }
}

#[interface(name = "org.freedesktop.Facecam1")]
impl FacecamService {
    /// Start the camera session. Returns the session id.
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        match self.controller.start().await {
            Ok(id) => Ok(id.to_string()),
            Err(StartError::PermissionDenied(msg)) => Err(zbus::fdo::Error::AccessDenied(format!(
                "camera permission denied: {msg}"
            ))),
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Stop the camera session. No-op when idle.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.controller.stop();
        Ok(())
    }

    /// Set detector coarseness; applies from the next tick.
    async fn set_scale_factor(&self, value: f64) -> zbus::fdo::Result<()> {
        self.controller.set_scale_factor(value as f32);
        Ok(())
    }

    /// Set detector strictness; applies from the next tick.
    async fn set_min_neighbors(&self, value: u32) -> zbus::fdo::Result<()> {
        self.controller.set_min_neighbors(value);
        Ok(())
    }

    /// Return session, settings, controls and text outputs as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.controller.status())
            .map_err(|e| zbus::fdo::Error::Failed(format!("status serialization failed: {e}")))
    }

    /// Write the current overlay (boxes and labels only) to `path`.
    async fn save_overlay(&self, path: &str) -> zbus::fdo::Result<()> {
        tracing::info!(path, "save_overlay requested");
        let overlay = self.controller.with_surface(|surface| surface.image().clone());
        write_image(overlay, path).await
    }

    /// Write the last analysed frame with the overlay drawn over it and a
    /// face-count caption to `path`.
    async fn save_snapshot(&self, path: &str) -> zbus::fdo::Result<()> {
        tracing::info!(path, "save_snapshot requested");
        let snapshot = self
            .controller
            .with_state(compose_snapshot)
            .ok_or_else(|| zbus::fdo::Error::Failed("no frame analysed yet".to_string()))?;
        write_image(snapshot, path).await
    }
}

/// Last frame, overlay and caption flattened into one image.
fn compose_snapshot(state: &SessionState<RasterSurface>) -> Option<RgbaImage> {
    let frame = state.last_frame.as_ref()?;
    let background = gray_background(&frame.data, frame.width, frame.height)?;
    let caption = render::face_count_caption(&state.outputs);
    Some(state.surface.snapshot(&background, Some(&caption)))
}

/// Encode and write off the async executor; the format follows the extension.
async fn write_image(image: RgbaImage, path: &str) -> zbus::fdo::Result<()> {
    let dest = PathBuf::from(path);
    tokio::task::spawn_blocking(move || image.save(&dest))
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("image writer failed: {e}")))?
        .map_err(|e| zbus::fdo::Error::IOError(format!("{path}: {e}")))
}
