use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::errors::{AppError, AppResult};
use crate::services::hash;
use crate::services::net;
use crate::services::progress::ProgressSink;

const STREAM_BUFFER: usize = 8 * 1024;
const DEFAULT_CONCURRENT: usize = 3;

/// HEAD probe result.
#[derive(Debug, Clone, Default)]
pub struct HeadInfo {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// One artifact to stage.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub url: String,
    /// Final live filename; the staging file is `<name>-<uuid>.tmp`.
    pub final_name: String,
    pub expected_hash: Option<String>,
    pub expected_len: Option<u64>,
}

/// A verified artifact sitting in the staging directory.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Computed SHA-256 of the staged bytes.
    pub hash: String,
}

/// Streaming downloader with retry, verification and cancellation.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    head_client: reqwest::Client,
    max_retries: u32,
    max_concurrent: usize,
}

impl Downloader {
    pub fn new(max_retries: u32) -> Self {
        Self {
            client: net::http_client(net::DOWNLOAD_TIMEOUT),
            head_client: net::http_client(net::HEAD_TIMEOUT),
            max_retries: max_retries.max(1),
            max_concurrent: DEFAULT_CONCURRENT,
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Content-Type and Content-Length of a download URL. Failures are the
    /// caller's signal to proceed without the probe, never fatal.
    pub async fn head(&self, url: &str) -> AppResult<HeadInfo> {
        let response = self.head_client.head(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Network {
                status: response.status().as_u16(),
                url: url.to_string(),
                snippet: String::new(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(HeadInfo {
            content_type,
            content_length: response.content_length(),
        })
    }

    /// First `n` bytes of the artifact via a ranged GET, for magic-byte
    /// extension sniffing. Best effort.
    pub async fn probe_leading_bytes(&self, url: &str, n: usize) -> Option<Vec<u8>> {
        let response = self
            .head_client
            .get(url)
            .header(reqwest::header::RANGE, format!("bytes=0-{}", n.saturating_sub(1)))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?;
        Some(bytes.iter().copied().take(n).collect())
    }

    /// Download one artifact into `staging_dir` and verify it.
    ///
    /// Retries with linear backoff up to `max_retries` attempts; an
    /// integrity mismatch deletes the staged bytes before the next attempt.
    pub async fn stage(
        &self,
        request: &StageRequest,
        staging_dir: &Path,
        sink: &Arc<dyn ProgressSink>,
    ) -> AppResult<StagedFile> {
        tokio::fs::create_dir_all(staging_dir).await?;
        let staging_path =
            staging_dir.join(format!("{}-{}.tmp", request.final_name, uuid::Uuid::new_v4()));

        let mut last_error: Option<AppError> = None;
        for attempt in 1..=self.max_retries {
            if sink.is_cancelled() {
                let _ = tokio::fs::remove_file(&staging_path).await;
                return Err(AppError::Cancelled);
            }

            match self.try_stage(request, &staging_path, sink).await {
                Ok(staged) => return Ok(staged),
                Err(AppError::Cancelled) => {
                    let _ = tokio::fs::remove_file(&staging_path).await;
                    return Err(AppError::Cancelled);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    log::warn!(
                        "download attempt {attempt}/{} failed for {}: {e}",
                        self.max_retries,
                        request.url
                    );
                    let _ = tokio::fs::remove_file(&staging_path).await;
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&staging_path).await;
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Custom(format!(
                "download failed after {} attempts: {}",
                self.max_retries, request.url
            ))
        }))
    }

    /// Stage several independent artifacts with bounded parallelism.
    /// Results are returned in request order.
    pub async fn stage_many(
        &self,
        requests: Vec<StageRequest>,
        staging_dir: &Path,
        sink: &Arc<dyn ProgressSink>,
    ) -> Vec<AppResult<StagedFile>> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let sem = Arc::clone(&semaphore);
            let downloader = self.clone();
            let staging_dir = staging_dir.to_path_buf();
            let sink = Arc::clone(sink);

            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Custom(format!("semaphore error: {e}")))?;
                downloader.stage(&request, &staging_dir, &sink).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(AppError::Custom(format!("staging task panicked: {e}"))),
            });
        }
        results
    }

    async fn try_stage(
        &self,
        request: &StageRequest,
        staging_path: &Path,
        sink: &Arc<dyn ProgressSink>,
    ) -> AppResult<StagedFile> {
        let response = self.client.get(&request.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Network {
                status: status.as_u16(),
                url: request.url.clone(),
                snippet: String::new(),
            });
        }

        let mut file = tokio::fs::File::create(staging_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut pending: Vec<u8> = Vec::with_capacity(STREAM_BUFFER);

        while let Some(chunk) = stream.next().await {
            if sink.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let chunk = chunk?;
            written += chunk.len() as u64;
            pending.extend_from_slice(&chunk);
            if pending.len() >= STREAM_BUFFER {
                file.write_all(&pending).await?;
                pending.clear();
            }
        }
        if !pending.is_empty() {
            file.write_all(&pending).await?;
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = request.expected_len {
            if written != expected {
                return Err(AppError::Integrity {
                    path: staging_path.to_path_buf(),
                    expected: format!("{expected} bytes"),
                    actual: format!("{written} bytes"),
                });
            }
        }

        let actual_hash = hash::sha256_file(staging_path).await?;
        if let Some(ref expected) = request.expected_hash {
            if !hash::hashes_match(&actual_hash, expected) {
                return Err(AppError::Integrity {
                    path: staging_path.to_path_buf(),
                    expected: expected.clone(),
                    actual: actual_hash,
                });
            }
        }

        Ok(StagedFile {
            path: staging_path.to_path_buf(),
            hash: actual_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::progress::NullSink;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modupdater_test_{label}_{}", uuid::Uuid::new_v4()))
    }

    struct CancelledSink;

    impl ProgressSink for CancelledSink {
        fn log(&self, _msg: &str) {}
        fn set_progress(&self, _percent: u8) {}
        fn is_cancelled(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn cancellation_is_checked_before_the_first_attempt() {
        let downloader = Downloader::new(3);
        let sink: Arc<dyn ProgressSink> = Arc::new(CancelledSink);
        let staging = temp_path("stage_cancelled");

        let request = StageRequest {
            url: "http://127.0.0.1:1/never".to_string(),
            final_name: "x.jar".to_string(),
            expected_hash: None,
            expected_len: None,
        };

        let result = downloader.stage(&request, &staging, &sink).await;
        assert!(matches!(result, Err(AppError::Cancelled)));

        let _ = tokio::fs::remove_dir_all(staging).await;
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_retries() {
        let downloader = Downloader::new(2);
        let sink: Arc<dyn ProgressSink> = Arc::new(NullSink);
        let staging = temp_path("stage_unreachable");

        let request = StageRequest {
            // Reserved port on loopback: connection refused immediately.
            url: "http://127.0.0.1:1/artifact.jar".to_string(),
            final_name: "artifact.jar".to_string(),
            expected_hash: None,
            expected_len: None,
        };

        let result = downloader.stage(&request, &staging, &sink).await;
        assert!(result.is_err());
        // No staged leftovers after a failed run.
        if let Ok(mut dir) = tokio::fs::read_dir(&staging).await {
            assert!(dir.next_entry().await.unwrap().is_none());
        }

        let _ = tokio::fs::remove_dir_all(staging).await;
    }
}
