//! Idempotent download and extraction of resolved releases.
//!
//! A release is installed once the executable exists inside its tag folder;
//! that existence check is the short-circuit for repeat calls and the
//! re-check under the lock for racing callers. Downloads for the same
//! `(runtime version, release tag)` pair serialize behind a keyed mutex,
//! while unrelated versions proceed in parallel. Any failure rolls the
//! destination folder back so a retry starts clean; the temp file is removed
//! on every exit path.

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::archive::{self, ArchiveFormat};
use crate::cache::ResolvedRelease;
use crate::versions;

/// Failure retrieving or installing a release artifact. The destination
/// folder is rolled back before this is returned, so retrying is safe.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download link {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to download {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("failed to extract archive into {dest}")]
    Extract {
        dest: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("archive from {url} does not contain the {name} executable")]
    ExecutableMissing { url: String, name: &'static str },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type LockKey = (String, String);

/// Downloads release artifacts and installs them into tag folders.
#[derive(Debug, Default)]
pub struct Downloader {
    http: reqwest::Client,
    /// One mutex per `(runtime version, release tag)` pair, dropped once
    /// the release is installed.
    locks: std::sync::Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Downloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures `release` is installed under `dest_dir` and returns the tag
    /// folder path.
    ///
    /// Returns immediately when the executable already exists. Otherwise
    /// the per-release lock is taken, existence re-checked, and the
    /// artifact streamed to a temp file, verified, and extracted. Concurrent
    /// calls for the same release all return the same path after a single
    /// download.
    pub async fn download_and_extract(
        &self,
        release: &ResolvedRelease,
        dest_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let executable = versions::executable_path(dest_dir);
        if executable.exists() {
            debug!(
                "Release {} {} is already installed",
                release.runtime_version, release.release_tag
            );
            return Ok(dest_dir.to_path_buf());
        }

        let lock = self.lock_for(release);
        let _guard = lock.lock().await;
        if executable.exists() {
            debug!(
                "Release {} {} was installed by a concurrent caller",
                release.runtime_version, release.release_tag
            );
            return Ok(dest_dir.to_path_buf());
        }

        let temp_path = std::env::temp_dir().join(format!(
            "funckit-{}-{}-{}.download",
            release.runtime_version,
            release.release_tag,
            Uuid::new_v4()
        ));

        let outcome = self.fetch_and_install(release, dest_dir, &temp_path).await;

        if let Err(err) = tokio::fs::remove_file(&temp_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {}", temp_path.display(), err);
            }
        }

        match outcome {
            Ok(()) => {
                info!(
                    "Installed Core Tools {} {} into {}",
                    release.runtime_version,
                    release.release_tag,
                    dest_dir.display()
                );
                // Installed releases short-circuit before locking, so the
                // entry would never be used again.
                self.discard_lock(release);
                Ok(dest_dir.to_path_buf())
            }
            Err(err) => {
                // Roll the destination back so a retry starts from scratch.
                if dest_dir.exists() {
                    if let Err(cleanup) = tokio::fs::remove_dir_all(dest_dir).await {
                        warn!(
                            "Failed to roll back {}: {}",
                            dest_dir.display(),
                            cleanup
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn fetch_and_install(
        &self,
        release: &ResolvedRelease,
        dest_dir: &Path,
        temp_path: &Path,
    ) -> Result<(), DownloadError> {
        download_file(
            &self.http,
            &release.artifact_url,
            temp_path,
            release.sha2.as_deref(),
        )
        .await?;

        let format =
            ArchiveFormat::from_url(&release.artifact_url).unwrap_or(ArchiveFormat::Zip);
        let archive_path = temp_path.to_path_buf();
        let extract_dir = dest_dir.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || {
            archive::unpack(&archive_path, &extract_dir, format)
        })
        .await
        .map_err(|join| DownloadError::Extract {
            dest: dest_dir.to_path_buf(),
            source: anyhow::anyhow!(join),
        })?;
        extracted.map_err(|source| DownloadError::Extract {
            dest: dest_dir.to_path_buf(),
            source,
        })?;

        let executable = versions::executable_path(dest_dir);
        if !executable.exists() {
            return Err(DownloadError::ExecutableMissing {
                url: release.artifact_url.clone(),
                name: versions::executable_name(),
            });
        }
        archive::ensure_executable(&executable).map_err(|source| DownloadError::Extract {
            dest: dest_dir.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn lock_for(&self, release: &ResolvedRelease) -> Arc<tokio::sync::Mutex<()>> {
        let key = (
            release.runtime_version.clone(),
            release.release_tag.clone(),
        );
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Forgets the lock for an installed release. Callers already waiting on
    /// it hold their own `Arc` clone and find the executable under the lock;
    /// entries for failed installs stay so retries keep serializing.
    fn discard_lock(&self, release: &ResolvedRelease) {
        let key = (
            release.runtime_version.clone(),
            release.release_tag.clone(),
        );
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&key);
    }
}

/// Streams `url` into `dest`, verifying the SHA-256 when `expected_sha2` is
/// present. Returns the number of bytes written.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expected_sha2: Option<&str>,
) -> Result<u64, DownloadError> {
    validate_url(url)?;
    info!("Downloading {} to {}", url, dest.display());

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| DownloadError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Http {
            url: url.to_string(),
            source,
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = expected_sha2.filter(|sha| !sha.is_empty()) {
        let actual = to_hex(&hasher.finalize());
        if actual != expected.to_lowercase() {
            return Err(DownloadError::ChecksumMismatch {
                url: url.to_string(),
                expected: expected.to_lowercase(),
                actual,
            });
        }
        debug!("Checksum verified for {}", url);
    }

    debug!("Downloaded {} bytes from {}", written, url);
    Ok(written)
}

fn validate_url(raw: &str) -> Result<(), DownloadError> {
    let url = Url::parse(raw).map_err(|err| DownloadError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(DownloadError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(DownloadError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as TokioWrite};

    fn zip_bytes_with_executable() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file(versions::executable_name(), options).unwrap();
            zip.write_all(b"#!/bin/sh\necho func\n").unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    /// Serves `payload` over loopback HTTP for every connection, counting
    /// requests.
    async fn serve_payload(payload: Vec<u8>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_inner = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits_inner.fetch_add(1, Ordering::SeqCst);
                let body = payload.clone();
                tokio::spawn(async move {
                    let mut buffer = [0u8; 4096];
                    let _ = socket.read(&mut buffer).await;
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                });
            }
        });

        (format!("http://{}/tools.zip", addr), hits)
    }

    fn resolved(url: &str, sha2: Option<&str>) -> ResolvedRelease {
        ResolvedRelease {
            runtime_version: "v4".to_string(),
            release_tag: "4.0.5198".to_string(),
            artifact_url: url.to_string(),
            sha2: sha2.map(String::from),
        }
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("https://example.com/cli.zip").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/cli.zip").is_ok());
        assert!(validate_url("ftp://example.com/cli.zip").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn hex_encoding_is_lowercase() {
        let digest = Sha256::digest(b"");
        assert_eq!(
            to_hex(&digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn existing_executable_short_circuits_without_network() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(versions::executable_path(&dest), b"func").unwrap();

        // The URL is unreachable; the call must not touch it.
        let downloader = Downloader::new();
        let release = resolved("http://127.0.0.1:1/tools.zip", None);
        let path = downloader.download_and_extract(&release, &dest).await.unwrap();
        assert_eq!(path, dest);
    }

    #[tokio::test]
    async fn downloads_and_extracts_once() {
        let (url, hits) = serve_payload(zip_bytes_with_executable()).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Downloader::new();
        let release = resolved(&url, None);

        let path = downloader.download_and_extract(&release, &dest).await.unwrap();
        assert!(versions::executable_path(&path).exists());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second call short-circuits on the existence check.
        downloader.download_and_extract(&release, &dest).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lock_entry_is_dropped_after_install() {
        let (url, _hits) = serve_payload(zip_bytes_with_executable()).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Downloader::new();
        let release = resolved(&url, None);

        downloader.download_and_extract(&release, &dest).await.unwrap();
        assert!(downloader.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_entry_survives_a_failed_install() {
        let (url, _hits) = serve_payload(b"this is not a zip archive".to_vec()).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Downloader::new();
        let release = resolved(&url, None);

        assert!(downloader.download_and_extract(&release, &dest).await.is_err());
        assert_eq!(downloader.locks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_downloads_fetch_exactly_once() {
        let (url, hits) = serve_payload(zip_bytes_with_executable()).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Arc::new(Downloader::new());
        let release = resolved(&url, None);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let downloader = Arc::clone(&downloader);
            let release = release.clone();
            let dest = dest.clone();
            tasks.push(tokio::spawn(async move {
                downloader.download_and_extract(&release, &dest).await
            }));
        }

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap());
        }

        assert!(paths.iter().all(|path| *path == dest));
        assert!(versions::executable_path(&dest).exists());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_archive_rolls_back_destination() {
        let (url, _hits) = serve_payload(b"this is not a zip archive".to_vec()).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Downloader::new();
        let release = resolved(&url, None);

        let result = downloader.download_and_extract(&release, &dest).await;
        assert!(matches!(result, Err(DownloadError::Extract { .. })));
        assert!(!dest.exists(), "failed install must not leave the tag folder");
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_and_rolls_back() {
        let (url, _hits) = serve_payload(zip_bytes_with_executable()).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Downloader::new();
        let release = resolved(&url, Some("00000000"));

        let result = downloader.download_and_extract(&release, &dest).await;
        assert!(matches!(result, Err(DownloadError::ChecksumMismatch { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn matching_checksum_is_accepted() {
        let payload = zip_bytes_with_executable();
        let sha = to_hex(&Sha256::digest(&payload));
        let (url, _hits) = serve_payload(payload).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");

        let downloader = Downloader::new();
        let release = resolved(&url, Some(&sha));

        downloader.download_and_extract(&release, &dest).await.unwrap();
        assert!(versions::executable_path(&dest).exists());
    }

    #[tokio::test]
    async fn archive_without_executable_is_rejected() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file("README.md", options).unwrap();
            zip.write_all(b"no binary here").unwrap();
            zip.finish().unwrap();
        }
        let (url, _hits) = serve_payload(cursor.into_inner()).await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v4").join("4.0.5198");
        let downloader = Downloader::new();
        let release = resolved(&url, None);

        let result = downloader.download_and_extract(&release, &dest).await;
        assert!(matches!(result, Err(DownloadError::ExecutableMissing { .. })));
        assert!(!dest.exists());
    }
}
