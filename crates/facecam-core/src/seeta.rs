//! SeetaFace frontal detector via the pure-Rust `rustface` engine.
//!
//! Finds faces only: detections carry no expression scores, so the overlay
//! shows "Neutral" for them. Age is a coarse bracket guessed from the box
//! size ([`AgeGroup::from_face_size`]).
//!
//! Model loading and detection are CPU-bound and run on tokio's blocking
//! pool.

use crate::detector::{check_frame, Detector, DetectorError};
use crate::types::{AgeGroup, BoundingBox, Detection, DetectionSettings, FrameResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

// rustface rejects pyramid steps outside this range and faces below 20 px.
const MIN_PYRAMID_STEP: f32 = 0.01;
const MAX_PYRAMID_STEP: f32 = 0.99;
const MIN_FACE_SIZE: u32 = 20;
const SLIDE_WINDOW_STEP: u32 = 4;
/// Score threshold contributed by each unit of `min_neighbors`.
const SCORE_PER_NEIGHBOR: f64 = 0.4;

/// Face detector backed by the SeetaFace cascade model.
pub struct SeetaDetector {
    model_path: PathBuf,
    model: OnceLock<Arc<rustface::Model>>,
}

impl SeetaDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            model: OnceLock::new(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

fn load_model(path: &Path) -> Result<rustface::Model, DetectorError> {
    let display = path.to_string_lossy().into_owned();
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DetectorError::ModelNotFound(display.clone()),
        _ => DetectorError::LoadFailed {
            path: display.clone(),
            reason: e.to_string(),
        },
    })?;

    rustface::read_model(std::io::Cursor::new(bytes)).map_err(|e| DetectorError::LoadFailed {
        path: display,
        reason: e.to_string(),
    })
}

fn detect(
    model: &rustface::Model,
    gray: &[u8],
    width: u32,
    height: u32,
    settings: &DetectionSettings,
) -> FrameResult {
    let mut detector = rustface::create_detector_with_model(model.clone());
    detector.set_min_face_size(MIN_FACE_SIZE);
    detector.set_score_thresh(score_threshold(settings.min_neighbors));
    detector.set_pyramid_scale_factor(pyramid_step(settings.scale_factor));
    detector.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);

    let pixels = &gray[..width as usize * height as usize];
    detector
        .detect(&rustface::ImageData::new(pixels, width, height))
        .iter()
        .map(|face| {
            let bbox = face.bbox();
            face_detection(
                bbox.x() as f32,
                bbox.y() as f32,
                bbox.width() as f32,
                bbox.height() as f32,
            )
        })
        .collect()
}

/// A detection for a face box with no classifier output beyond its size.
fn face_detection(x: f32, y: f32, width: f32, height: f32) -> Detection {
    Detection {
        bbox: BoundingBox {
            x,
            y,
            width,
            height,
        },
        age_group: Some(AgeGroup::from_face_size(width, height)),
        ..Detection::default()
    }
}

/// Map a coarseness factor (> 1.0, larger = coarser) to rustface's
/// downscaling step between pyramid levels.
fn pyramid_step(scale_factor: f32) -> f32 {
    if scale_factor.is_finite() && scale_factor > 1.0 {
        (1.0 / scale_factor).clamp(MIN_PYRAMID_STEP, MAX_PYRAMID_STEP)
    } else {
        MAX_PYRAMID_STEP
    }
}

fn score_threshold(min_neighbors: u32) -> f64 {
    f64::from(min_neighbors) * SCORE_PER_NEIGHBOR
}

#[async_trait]
impl Detector for SeetaDetector {
    async fn initialize(&self) -> Result<(), DetectorError> {
        if self.model.get().is_some() {
            return Ok(());
        }

        let path = self.model_path.clone();
        let model = tokio::task::spawn_blocking(move || load_model(&path))
            .await
            .map_err(|e| DetectorError::AnalysisFailed(format!("model loader panicked: {e}")))??;

        // A concurrent initialize may have won; either model is equivalent.
        let _ = self.model.set(Arc::new(model));
        tracing::info!(path = %self.model_path.display(), "SeetaFace model loaded");
        Ok(())
    }

    async fn analyze(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        settings: &DetectionSettings,
    ) -> Result<FrameResult, DetectorError> {
        let model = Arc::clone(self.model.get().ok_or(DetectorError::NotInitialized)?);
        check_frame(gray, width, height)?;

        let gray = gray.to_vec();
        let settings = *settings;
        tokio::task::spawn_blocking(move || detect(&model, &gray, width, height, &settings))
            .await
            .map_err(|e| DetectorError::AnalysisFailed(format!("detection task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pyramid_step_mapping() {
        assert!((pyramid_step(1.1) - 0.909_090_9).abs() < 1e-5);
        assert!((pyramid_step(1.5) - 0.666_666_7).abs() < 1e-5);
        assert_eq!(pyramid_step(1.0), MAX_PYRAMID_STEP);
        assert_eq!(pyramid_step(0.5), MAX_PYRAMID_STEP);
        assert_eq!(pyramid_step(f32::NAN), MAX_PYRAMID_STEP);
        assert_eq!(pyramid_step(1000.0), MIN_PYRAMID_STEP);
    }

    #[test]
    fn test_default_neighbors_give_customary_threshold() {
        assert!((score_threshold(5) - 2.0).abs() < 1e-9);
        assert_eq!(score_threshold(0), 0.0);
    }

    #[tokio::test]
    async fn test_initialize_missing_model() {
        let detector = SeetaDetector::new("/nonexistent/seeta_fd_frontal_v1.0.bin");
        let err = detector.initialize().await.unwrap_err();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_garbage_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, [0x01u8]).unwrap();
        let detector = SeetaDetector::new(&path);
        let err = detector.initialize().await.unwrap_err();
        assert!(matches!(err, DetectorError::LoadFailed { .. }));
    }

    #[test]
    fn test_face_detection_carries_size_bracket() {
        let detection = face_detection(100.0, 80.0, 130.0, 150.0);
        assert_eq!(detection.bbox.width, 130.0);
        assert_eq!(detection.age_group, Some(AgeGroup::Adult));
        assert!(detection.age.is_none());
        assert!(detection.expressions.is_empty());
        assert_eq!(crate::render::age_label(&detection), "Adult (36-50)");
    }

    #[tokio::test]
    async fn test_analyze_before_initialize() {
        let detector = SeetaDetector::new("unused");
        let err = detector
            .analyze(&[0u8; 4], 2, 2, &DetectionSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::NotInitialized));
    }
}
