//! Model asset manifest: which files the detector needs and where they live.

use std::path::{Path, PathBuf};

/// SeetaFace frontal face detection model consumed by [`crate::SeetaDetector`].
pub const SEETA_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";

/// Where `facecam fetch-models` downloads from by default.
pub const DEFAULT_MODEL_BASE_URL: &str =
    "https://raw.githubusercontent.com/atomashpolskiy/rustface/master/model/";

/// Every file fetched into the model directory, in download order.
pub const MODEL_FILES: &[&str] = &[SEETA_MODEL_FILE];

/// Default model directory: `$XDG_DATA_HOME/facecam/models`, falling back
/// to `~/.local/share/facecam/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecam")
        .join("models")
}

/// Manifest entries not present in `dir`.
pub fn missing_models(dir: &Path) -> Vec<&'static str> {
    MODEL_FILES
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect()
}
