//! Model asset download: fetch a fixed list of files into a directory.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to create model directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a batch fetch.
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub fetched: Vec<String>,
    pub failed: Vec<(String, FetchError)>,
}

/// Join a base URL and a file name with exactly one slash between them.
pub fn asset_url(base_url: &str, name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), name)
}

/// Fetch each of `names` from `base_url` into `dir`, one after another.
///
/// A failed file is logged and recorded in the summary; the remaining files
/// are still attempted. Only failing to create `dir` aborts the batch.
pub async fn fetch_all(
    client: &reqwest::Client,
    base_url: &str,
    names: &[&str],
    dir: &Path,
) -> Result<FetchSummary, FetchError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| FetchError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut summary = FetchSummary::default();
    for name in names {
        let url = asset_url(base_url, name);
        let dest = dir.join(name);
        match fetch_one(client, &url, &dest).await {
            Ok(bytes) => {
                tracing::info!(file = name, bytes, "downloaded");
                summary.fetched.push(name.to_string());
            }
            Err(e) => {
                tracing::error!(file = name, error = %e, "download failed");
                summary.failed.push((name.to_string(), e));
            }
        }
    }

    tracing::info!(
        fetched = summary.fetched.len(),
        failed = summary.failed.len(),
        dir = %dir.display(),
        "model fetch finished"
    );
    Ok(summary)
}

/// Download `url` to `dest` via a `.part` file renamed into place on success.
async fn fetch_one(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64, FetchError> {
    let download_err = |source: reqwest::Error| FetchError::Download {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;
    let bytes = response.bytes().await.map_err(download_err)?;

    write_via_part(dest, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// `<dest>.part`, keeping the full file name (`model.bin` -> `model.bin.part`).
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Write `bytes` to `<dest>.part`, then rename it over `dest`.
async fn write_via_part(dest: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let temp_path = part_path(dest);
    let write_err = |path: &Path, source: std::io::Error| FetchError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(write_err(&temp_path, e));
    }
    tokio::fs::rename(&temp_path, dest)
        .await
        .map_err(|e| write_err(dest, e))
}
