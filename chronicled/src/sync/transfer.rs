use std::{io, path::Path, time::Duration};

use futures_util::StreamExt;
use md5::Context;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

use super::paths::partial_path;

const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

impl TransferError {
    pub fn is_transport(&self) -> bool {
        match self {
            TransferError::Request(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            _ => false,
        }
    }
}

/// Streams file bodies to and from the pre-signed links the API hands out.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Result<Self, TransferError> {
        Self::with_timeout(DEFAULT_TRANSFER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransferError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Downloads into a `.partial` sibling and renames over `target` once the
    /// body is complete (and matches `expected_md5`, when given).
    pub async fn download_to_path(
        &self,
        href: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut md5 = Context::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(err.into());
                }
            };
            file.write_all(&chunk).await?;
            md5.consume(&chunk);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected_md5) = expected_md5 {
            let actual_md5 = format!("{:x}", md5.compute());
            if actual_md5 != expected_md5.to_ascii_lowercase() {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(TransferError::IntegrityMismatch {
                    expected_md5: expected_md5.to_ascii_lowercase(),
                    actual_md5,
                });
            }
        }

        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    pub async fn upload_from_path(&self, href: &str, source: &Path) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        self.http
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
