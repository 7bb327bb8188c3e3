//! Model download coordinator
//!
//! Drives a single model download as a cancellable, progress-reporting job
//! against the model store. Bytes stream into a temporary file; the job is
//! committed atomically only after size (and, when the manifest supplies a
//! hash, SHA-256) verification.

use crate::storage::{ModelStore, StorageError};
use crate::types::ModelDescriptor;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Download timeout for large model files
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Download job state
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    /// No job has run, or the previous terminal outcome was consumed
    Idle,
    /// Destination resolution and request setup
    Preparing,
    /// Bytes are streaming; progress is in `[0, 1]`
    InProgress { progress: f32 },
    /// The file was verified and committed
    Completed,
    /// The job was cancelled cooperatively; no partial file remains
    Cancelled,
    /// The job failed; no partial file remains
    Failed { reason: String },
}

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download transport error: {0}")]
    Network(String),

    #[error("write error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download incomplete: got {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch for {file_name}")]
    ChecksumMismatch { file_name: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

enum JobEnd {
    Completed,
    Cancelled,
}

/// Coordinates at most one model download at a time.
///
/// Cheap to clone; clones share the same job state and cancellation flag.
#[derive(Clone)]
pub struct DownloadCoordinator {
    client: reqwest::Client,
    store: Arc<ModelStore>,
    state: Arc<Mutex<DownloadState>>,
    cancel: Arc<AtomicBool>,
}

impl DownloadCoordinator {
    /// Create a coordinator writing through the given store
    pub fn new(store: Arc<ModelStore>) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(Self {
            client,
            store,
            state: Arc::new(Mutex::new(DownloadState::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Current job state
    pub fn state(&self) -> DownloadState {
        self.state.lock().expect("download state lock poisoned").clone()
    }

    fn set_state(&self, state: DownloadState) {
        *self.state.lock().expect("download state lock poisoned") = state;
    }

    /// Request cooperative cancellation of the active job.
    ///
    /// No effect unless a job is `Preparing` or `InProgress`. The job checks
    /// the flag between chunks and once more before committing, so a cancel
    /// racing stream completion still ends in `Cancelled`.
    pub fn cancel(&self) {
        let state = self.state.lock().expect("download state lock poisoned");
        if matches!(
            *state,
            DownloadState::Preparing | DownloadState::InProgress { .. }
        ) {
            self.cancel.store(true, Ordering::SeqCst);
            tracing::info!("Download cancellation requested");
        }
    }

    /// Start downloading the given model.
    ///
    /// Returns `Ok(false)` without side effects when another job is already
    /// preparing or in progress. Otherwise the job runs to a terminal state:
    /// `Ok(true)` for `Completed`/`Cancelled` (inspect [`state`]), `Err` for
    /// a failure (state is `Failed`; retry with a fresh `start`).
    ///
    /// `on_progress` receives the clamped fraction at least once per integer
    /// percentage point.
    pub async fn start(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: impl Fn(f32) + Send,
    ) -> Result<bool, DownloadError> {
        {
            let mut state = self.state.lock().expect("download state lock poisoned");
            if matches!(
                *state,
                DownloadState::Preparing | DownloadState::InProgress { .. }
            ) {
                tracing::warn!("Rejecting download of {}: a job is active", descriptor.id);
                return Ok(false);
            }
            // Reset under the same lock cancel() checks the state under, so
            // a cancel that has observed Preparing can never be erased here
            self.cancel.store(false, Ordering::SeqCst);
            *state = DownloadState::Preparing;
        }

        // Nothing to do when a verified copy already exists
        if let Ok(path) = self.store.path_for(&descriptor.file_name) {
            if let Ok(meta) = std::fs::metadata(&path) {
                if meta.len() == descriptor.size_bytes {
                    tracing::info!("Model already downloaded: {:?}", path);
                    on_progress(1.0);
                    self.set_state(DownloadState::Completed);
                    return Ok(true);
                }
            }
        }

        match self.run(descriptor, &on_progress).await {
            Ok(JobEnd::Completed) => {
                tracing::info!("Download complete: {}", descriptor.file_name);
                self.set_state(DownloadState::Completed);
                Ok(true)
            }
            Ok(JobEnd::Cancelled) => {
                tracing::info!("Download cancelled: {}", descriptor.file_name);
                self.set_state(DownloadState::Cancelled);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Download failed: {}", e);
                self.set_state(DownloadState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: &(impl Fn(f32) + Send),
    ) -> Result<JobEnd, DownloadError> {
        let temp_path = self.store.temp_path_for(&descriptor.file_name)?;

        let result = self
            .run_stream(descriptor, &temp_path, on_progress)
            .await;

        if !matches!(result, Ok(JobEnd::Completed)) {
            // Cancelled or failed: never leave a partial file behind
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }

    async fn run_stream(
        &self,
        descriptor: &ModelDescriptor,
        temp_path: &std::path::Path,
        on_progress: &(impl Fn(f32) + Send),
    ) -> Result<JobEnd, DownloadError> {
        tracing::info!(
            "Downloading {} ({} bytes) from {}",
            descriptor.file_name,
            descriptor.size_bytes,
            descriptor.source_url
        );

        let mut response = self
            .client
            .get(&descriptor.source_url)
            .header("User-Agent", "pocketlm/0.2.0")
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::Network(format!(
                "download returned status {}",
                response.status()
            )));
        }

        let mut temp_file = File::create(temp_path).await?;
        let mut hasher = descriptor.sha256.as_ref().map(|_| Sha256::new());
        let mut written: u64 = 0;
        let mut last_percent: i64 = -1;
        self.set_state(DownloadState::InProgress { progress: 0.0 });

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?
        {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(JobEnd::Cancelled);
            }

            temp_file.write_all(&chunk).await?;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
            written += chunk.len() as u64;

            let progress = if descriptor.size_bytes > 0 {
                (written as f32 / descriptor.size_bytes as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };
            self.set_state(DownloadState::InProgress { progress });

            let percent = (progress * 100.0) as i64;
            if percent > last_percent {
                last_percent = percent;
                on_progress(progress);
            }
        }
        temp_file.flush().await?;
        drop(temp_file);

        // The flag check wins over stream completion
        if self.cancel.load(Ordering::SeqCst) {
            return Ok(JobEnd::Cancelled);
        }

        if written != descriptor.size_bytes {
            return Err(DownloadError::SizeMismatch {
                expected: descriptor.size_bytes,
                actual: written,
            });
        }

        if let (Some(expected), Some(h)) = (&descriptor.sha256, hasher) {
            let actual: String = h
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(DownloadError::ChecksumMismatch {
                    file_name: descriptor.file_name.clone(),
                });
            }
        }

        self.store.commit(temp_path, &descriptor.file_name)?;
        Ok(JobEnd::Completed)
    }
}
