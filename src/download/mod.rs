//! HTTP fetch-and-save for full-resolution images
//!
//! Bodies are streamed into `<dest>.part` and renamed into place only after
//! the final chunk has been flushed, so an interrupted or failed transfer
//! never leaves a file the ledger would mistake for a completed save.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::traits::ImageFetcher;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("server answered {0}")]
    Status(StatusCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Downloads images with a shared reqwest client
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    fn classify_error(&self, error: reqwest::Error) -> DownloadError {
        if error.is_timeout() {
            DownloadError::Timeout(self.timeout)
        } else {
            DownloadError::Request(error)
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify_error(e))?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }

        let partial = PartialFile::new(dest);
        let io_error = |source| DownloadError::Io {
            path: partial.path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&partial.path)
            .await
            .map_err(io_error)?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify_error(e))? {
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        partial.commit().await.map_err(|source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        debug!("Wrote {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

/// A `.part` file that is removed unless committed
struct PartialFile {
    path: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(dest: &Path) -> Self {
        let mut name = dest.file_name().unwrap_or_default().to_os_string();
        name.push(".part");

        Self {
            path: dest.with_file_name(name),
            dest: dest.to_path_buf(),
            committed: false,
        }
    }

    async fn commit(mut self) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, &self.dest).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
