use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecam_core::models::{DEFAULT_MODEL_BASE_URL, MODEL_FILES, SEETA_MODEL_FILE};
use facecam_core::{DetectionSettings, Detector, RasterSurface, SeetaDetector};
use std::path::{Path, PathBuf};

mod assets;
mod proxy;
mod still;

use proxy::FacecamProxy;

const SCALE_FACTOR_RANGE: std::ops::RangeInclusive<f64> = 1.05..=1.5;

#[derive(Parser)]
#[command(name = "facecam", about = "facecam camera face-analysis CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download detector model files
    FetchModels {
        /// Target directory (default: ~/.local/share/facecam/models)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Base URL the files are fetched from
        #[arg(long, default_value = DEFAULT_MODEL_BASE_URL)]
        base_url: String,
    },
    /// Start the camera session
    Start,
    /// Stop the camera session
    Stop,
    /// Show session, settings and detection outputs
    Status,
    /// Set detector coarseness (1.05–1.5)
    SetScale {
        #[arg(value_parser = parse_scale_factor)]
        value: f64,
    },
    /// Set detector strictness (1–10)
    SetNeighbors {
        #[arg(value_parser = clap::value_parser!(u32).range(1..=10))]
        value: u32,
    },
    /// Save the current overlay image
    SaveOverlay {
        /// Output path (e.g. overlay.png)
        path: PathBuf,
    },
    /// Save the last analysed frame with the overlay drawn on it
    SaveSnapshot {
        /// Output path (e.g. snapshot.png)
        path: PathBuf,
    },
    /// Detect faces in an image file and save an annotated copy
    Detect {
        /// Input image (PNG, JPEG, ...)
        image: PathBuf,
        /// Output path (default: <image>_annotated.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Model directory (default: ~/.local/share/facecam/models)
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// TrueType font for labels; without one only boxes are drawn
        #[arg(long)]
        font: Option<PathBuf>,
        #[arg(long, default_value_t = 1.1, value_parser = parse_scale_factor)]
        scale_factor: f64,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=10))]
        min_neighbors: u32,
    },
    /// List V4L2 capture devices
    Devices,
}

fn parse_scale_factor(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{s}: {e}"))?;
    if SCALE_FACTOR_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "scale factor must be between {} and {}",
            SCALE_FACTOR_RANGE.start(),
            SCALE_FACTOR_RANGE.end()
        ))
    }
}

/// The daemon writes files itself, so hand it an absolute UTF-8 path.
fn absolute_path_arg(path: &Path) -> Result<String> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("resolving working directory")?
            .join(path)
    };
    match path.to_str() {
        Some(s) => Ok(s.to_string()),
        None => bail!("path is not valid UTF-8: {}", path.display()),
    }
}

async fn detect_still(
    input: &Path,
    output: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    font: Option<PathBuf>,
    settings: DetectionSettings,
) -> Result<()> {
    let model_dir = model_dir.unwrap_or_else(facecam_core::default_model_dir);
    let detector = SeetaDetector::new(model_dir.join(SEETA_MODEL_FILE));
    detector.initialize().await?;

    let source = image::open(input).with_context(|| format!("opening {}", input.display()))?;
    let font = font.as_deref().and_then(RasterSurface::load_font);
    let mut surface = RasterSurface::new(font);
    let annotated = still::annotate(&detector, &source, &settings, &mut surface).await?;

    let output = output.unwrap_or_else(|| still::default_output_path(input));
    annotated
        .image
        .save(&output)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Faces:      {}", annotated.outputs.faces);
    println!("Expression: {}", annotated.outputs.expression);
    println!("Age:        {}", annotated.outputs.age);
    println!("Saved to {}", output.display());
    Ok(())
}

async fn daemon() -> Result<FacecamProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    FacecamProxy::new(&conn)
        .await
        .context("facecamd is not reachable")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::FetchModels { dir, base_url } => {
            let dir = dir.unwrap_or_else(facecam_core::default_model_dir);
            println!("Downloading {} model file(s) to {}", MODEL_FILES.len(), dir.display());
            let client = reqwest::Client::new();
            let summary = assets::fetch_all(&client, &base_url, MODEL_FILES, &dir).await?;
            for name in &summary.fetched {
                println!("  ok     {name}");
            }
            for (name, err) in &summary.failed {
                println!("  failed {name}: {err}");
            }
        }
        Commands::Start => {
            let id = daemon().await?.start().await.context("start failed")?;
            println!("Session started: {id}");
        }
        Commands::Stop => {
            daemon().await?.stop().await?;
            println!("Session stopped");
        }
        Commands::Status => {
            let raw = daemon().await?.status().await?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("daemon returned invalid status")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::SetScale { value } => {
            daemon().await?.set_scale_factor(value).await?;
            println!("Scale factor: {value:.2}");
        }
        Commands::SetNeighbors { value } => {
            daemon().await?.set_min_neighbors(value).await?;
            println!("Min neighbors: {value}");
        }
        Commands::SaveOverlay { path } => {
            let path = absolute_path_arg(&path)?;
            daemon().await?.save_overlay(&path).await?;
            println!("Overlay saved to {path}");
        }
        Commands::SaveSnapshot { path } => {
            let path = absolute_path_arg(&path)?;
            daemon().await?.save_snapshot(&path).await?;
            println!("Snapshot saved to {path}");
        }
        Commands::Detect {
            image,
            output,
            model_dir,
            font,
            scale_factor,
            min_neighbors,
        } => {
            let settings = DetectionSettings {
                scale_factor: scale_factor as f32,
                min_neighbors,
            };
            detect_still(&image, output, model_dir, font, settings).await?;
        }
        Commands::Devices => {
            let devices = facecam_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scale_factor_range() {
        assert_eq!(parse_scale_factor("1.1"), Ok(1.1));
        assert!(parse_scale_factor("1.6").is_err());
        assert!(parse_scale_factor("abc").is_err());
    }

    #[test]
    fn test_detect_defaults_match_daemon_settings() {
        let cli = Cli::try_parse_from(["facecam", "detect", "group.jpg"]).unwrap();
        let Commands::Detect {
            scale_factor,
            min_neighbors,
            output,
            ..
        } = cli.command
        else {
            panic!("expected detect");
        };
        let defaults = DetectionSettings::default();
        assert!((scale_factor as f32 - defaults.scale_factor).abs() < 1e-6);
        assert_eq!(min_neighbors, defaults.min_neighbors);
        assert!(output.is_none());
        let bad_scale = ["facecam", "detect", "a.png", "--scale-factor", "2"];
        assert!(Cli::try_parse_from(bad_scale).is_err());
    }

    #[test]
    fn test_absolute_path_arg() {
        assert_eq!(absolute_path_arg(Path::new("/tmp/snap.png")).unwrap(), "/tmp/snap.png");
        let relative = absolute_path_arg(Path::new("snap.png")).unwrap();
        assert!(Path::new(&relative).is_absolute());
        assert!(relative.ends_with("/snap.png"));
    }

    #[test]
    fn test_neighbors_range_enforced() {
        assert!(Cli::try_parse_from(["facecam", "set-neighbors", "5"]).is_ok());
        assert!(Cli::try_parse_from(["facecam", "set-neighbors", "0"]).is_err());
        assert!(Cli::try_parse_from(["facecam", "set-neighbors", "11"]).is_err());
    }
}
