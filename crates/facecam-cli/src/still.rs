//! One-shot detection on a still image.

use facecam_core::render::{self, Outputs};
use facecam_core::{DetectionSettings, Detector, DetectorError, DrawingSurface, RasterSurface};
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};

/// Detections rendered over the source image.
pub struct Annotated {
    pub outputs: Outputs,
    pub image: RgbaImage,
}

/// Run `detector` on `image` and draw the overlay and face-count caption
/// over it. The detector must already be initialized.
pub async fn annotate(
    detector: &dyn Detector,
    image: &DynamicImage,
    settings: &DetectionSettings,
    surface: &mut RasterSurface,
) -> Result<Annotated, DetectorError> {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    let frame = detector.analyze(gray.as_raw(), width, height, settings).await?;
    tracing::debug!(faces = frame.len(), width, height, "still image analysed");

    surface.resize(width, height);
    let mut outputs = Outputs::default();
    render::apply(surface, &mut outputs, &frame);

    let caption = render::face_count_caption(&outputs);
    let image = surface.snapshot(&image.to_rgba8(), Some(&caption));
    Ok(Annotated { outputs, image })
}

/// `photo.jpg` -> `photo_annotated.png`, next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{stem}_annotated.png"))
}
