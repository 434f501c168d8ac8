//! facecam-core: detection types, overlay rendering and detector backends.
//!
//! The capture loop in `facecamd` feeds grayscale frames to a [`Detector`],
//! then hands each [`FrameResult`] to [`render::apply`], which draws the
//! overlay onto a [`DrawingSurface`] and updates the shared [`Outputs`].

pub mod detector;
pub mod models;
pub mod render;
pub mod replay;
pub mod seeta;
pub mod surface;
pub mod types;

pub use detector::{Detector, DetectorError};
pub use models::default_model_dir;
pub use render::Outputs;
pub use replay::ReplayDetector;
pub use seeta::SeetaDetector;
pub use surface::{gray_background, DisplayList, DrawingSurface, RasterSurface};
pub use types::{AgeGroup, BoundingBox, Detection, DetectionSettings, ExpressionScores, FrameResult};
