//! The detector capability and its error type.
//!
//! Backends live in [`crate::seeta`] (SeetaFace via `rustface`) and
//! [`crate::replay`] (recorded results).

use crate::types::{DetectionSettings, FrameResult};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (run `facecam fetch-models` first)")]
    ModelNotFound(String),
    #[error("failed to load model {path}: {reason}")]
    LoadFailed { path: String, reason: String },
    #[error("detector used before initialize()")]
    NotInitialized,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),
}

/// Produces face detections for one grayscale frame.
///
/// `initialize` must succeed before the first `analyze`; calling it again
/// on an initialized detector is a no-op.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn initialize(&self) -> Result<(), DetectorError>;

    async fn analyze(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        settings: &DetectionSettings,
    ) -> Result<FrameResult, DetectorError>;
}

/// Reject buffers that cannot hold `width * height` luma bytes.
pub(crate) fn check_frame(gray: &[u8], width: u32, height: u32) -> Result<(), DetectorError> {
    let expected = width as usize * height as usize;
    if width == 0 || height == 0 {
        return Err(DetectorError::InvalidFrame(format!("empty frame {width}x{height}")));
    }
    if gray.len() < expected {
        return Err(DetectorError::InvalidFrame(format!(
            "buffer too short: expected {expected}, got {}",
            gray.len()
        )));
    }
    Ok(())
}
