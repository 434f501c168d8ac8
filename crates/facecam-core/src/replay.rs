//! Detector that plays back recorded frame results.
//!
//! The script is a JSON array of frames, each an array of detections:
//!
//! ```json
//! [
//!   [{"box": {"x": 200, "y": 120, "width": 160, "height": 180},
//!     "expressions": {"neutral": 0.1, "happy": 0.9}, "age": 27.4}],
//!   []
//! ]
//! ```
//!
//! Each `analyze` call returns the next frame, wrapping around at the end.

use crate::detector::{check_frame, Detector, DetectorError};
use crate::types::{DetectionSettings, FrameResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

pub struct ReplayDetector {
    script_path: PathBuf,
    frames: OnceLock<Vec<FrameResult>>,
    cursor: AtomicUsize,
}

impl ReplayDetector {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            frames: OnceLock::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Build an already-initialized detector from in-memory frames.
    pub fn from_frames(frames: Vec<FrameResult>) -> Self {
        let detector = Self::new(PathBuf::new());
        let _ = detector.frames.set(frames);
        detector
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }
}

#[async_trait]
impl Detector for ReplayDetector {
    async fn initialize(&self) -> Result<(), DetectorError> {
        if self.frames.get().is_some() {
            return Ok(());
        }

        let path = self.script_path.to_string_lossy().into_owned();
        let text = std::fs::read_to_string(&self.script_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DetectorError::ModelNotFound(path.clone()),
            _ => DetectorError::LoadFailed {
                path: path.clone(),
                reason: e.to_string(),
            },
        })?;
        let frames: Vec<FrameResult> =
            serde_json::from_str(&text).map_err(|e| DetectorError::LoadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(path = %path, frames = frames.len(), "replay script loaded");
        let _ = self.frames.set(frames);
        Ok(())
    }

    async fn analyze(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        settings: &DetectionSettings,
    ) -> Result<FrameResult, DetectorError> {
        let frames = self.frames.get().ok_or(DetectorError::NotInitialized)?;
        check_frame(gray, width, height)?;
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % frames.len();
        tracing::trace!(
            index,
            scale_factor = settings.scale_factor,
            min_neighbors = settings.min_neighbors,
            "replaying frame"
        );
        Ok(frames[index].clone())
    }
}
