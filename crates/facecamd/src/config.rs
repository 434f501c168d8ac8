use facecam_core::models::SEETA_MODEL_FILE;
use facecam_core::DetectionSettings;
use facecam_hw::DEFAULT_WARMUP_FRAMES;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which detector backend the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// SeetaFace model via rustface.
    Seeta,
    /// Recorded detections from a JSON script.
    Replay,
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "seeta" => Ok(Self::Seeta),
            "replay" => Ok(Self::Replay),
            other => Err(format!("unknown detector '{other}' (expected seeta or replay)")),
        }
    }
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `FACECAM_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frames discarded after the stream starts (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Directory holding downloaded model files.
    pub model_dir: PathBuf,
    pub detector: DetectorKind,
    /// Replay script; defaults to `<model_dir>/replay.json`.
    pub replay_script: Option<PathBuf>,
    /// TrueType font for overlay labels. Without one only boxes are drawn.
    pub font_path: Option<PathBuf>,
    /// Initial detector coarseness.
    pub scale_factor: f32,
    /// Initial detector strictness.
    pub min_neighbors: u32,
}

impl Default for Config {
    fn default() -> Self {
        let settings = DetectionSettings::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            warmup_frames: DEFAULT_WARMUP_FRAMES,
            model_dir: facecam_core::default_model_dir(),
            detector: DetectorKind::Seeta,
            replay_script: None,
            font_path: None,
            scale_factor: settings.scale_factor,
            min_neighbors: settings.min_neighbors,
        }
    }
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FACECAM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let config = if path.is_file() {
            tracing::info!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACECAM_*` overrides. Unparseable values are logged and ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("FACECAM_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACECAM_WARMUP_FRAMES") {
            match v.parse() {
                Ok(n) => self.warmup_frames = n,
                Err(_) => tracing::warn!(value = %v, "ignoring FACECAM_WARMUP_FRAMES"),
            }
        }
        if let Some(v) = lookup("FACECAM_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACECAM_DETECTOR") {
            match v.parse() {
                Ok(kind) => self.detector = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring FACECAM_DETECTOR"),
            }
        }
        if let Some(v) = lookup("FACECAM_REPLAY_SCRIPT") {
            self.replay_script = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACECAM_FONT") {
            self.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACECAM_SCALE_FACTOR") {
            match v.parse() {
                Ok(f) => self.scale_factor = f,
                Err(_) => tracing::warn!(value = %v, "ignoring FACECAM_SCALE_FACTOR"),
            }
        }
        if let Some(v) = lookup("FACECAM_MIN_NEIGHBORS") {
            match v.parse() {
                Ok(n) => self.min_neighbors = n,
                Err(_) => tracing::warn!(value = %v, "ignoring FACECAM_MIN_NEIGHBORS"),
            }
        }
        self
    }

    pub fn settings(&self) -> DetectionSettings {
        DetectionSettings {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
        }
    }

    /// Path to the SeetaFace detection model.
    pub fn seeta_model_path(&self) -> PathBuf {
        self.model_dir.join(SEETA_MODEL_FILE)
    }

    pub fn replay_script_path(&self) -> PathBuf {
        self.replay_script
            .clone()
            .unwrap_or_else(|| self.model_dir.join("replay.json"))
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facecam")
        .join("config.toml")
}
