//! Upload orchestration: admission through poller handoff
//!
//! Drives each file through admission → upload call → registry promotion
//! → progress poller, strictly one at a time. A batch stops at the first
//! failed upload and leaves the remaining pending files untouched; there
//! are no automatic retries. Every outcome is both returned to the caller
//! and broadcast on the event bus.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::uplink::admission::{AdmissionController, FileCandidate};
use crate::uplink::api::{ApiError, FrameExtractionResponse, TransferApi};
use crate::uplink::config::Limits;
use crate::uplink::events::{EventBus, UplinkEvent};
use crate::uplink::poller::ProgressPoller;
use crate::uplink::registry::{FileRecord, FileRegistry, RemoveOutcome};

/// Error types for orchestration operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no file with id {0}")]
    NoFile(Uuid),

    #[error("file rejected: {0}")]
    Rejected(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result of one upload attempt
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub id: Uuid,
    pub name: String,
    pub remote_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Result of a batch upload. `outcomes` covers only attempted files: a
/// failure aborts the batch before the remaining pending files are tried.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub outcomes: Vec<UploadOutcome>,
    pub success: bool,
    pub error: Option<String>,
}

/// Clears the single-flight flag on every exit path, including panics
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequential, fail-fast upload driver
pub struct UploadOrchestrator {
    api: Arc<dyn TransferApi>,
    registry: Arc<FileRegistry>,
    events: Arc<EventBus>,
    poller: Arc<ProgressPoller>,
    admission: AdmissionController,
    uploading: AtomicBool,
}

impl UploadOrchestrator {
    pub fn new(
        api: Arc<dyn TransferApi>,
        registry: Arc<FileRegistry>,
        events: Arc<EventBus>,
        poller: Arc<ProgressPoller>,
        limits: Limits,
    ) -> Self {
        Self {
            api,
            registry,
            events,
            poller,
            admission: AdmissionController::new(limits),
            uploading: AtomicBool::new(false),
        }
    }

    /// Admit one file into the pending queue. Purely local: no network
    /// call happens before admission passes.
    pub fn add_file(&self, candidate: FileCandidate) -> OrchestratorResult<FileRecord> {
        let pending = self.registry.pending();

        let validation = self.admission.validate(&candidate, &pending);
        let mut errors: Vec<String> = validation.errors.iter().map(ToString::to_string).collect();
        if let Err(e) = self.admission.check_exclusivity(&candidate, &pending) {
            errors.push(e.to_string());
        }

        if !errors.is_empty() {
            warn!(name = %candidate.name, ?errors, "File refused admission");
            self.events.publish(UplinkEvent::ValidationFailed {
                name: candidate.name.clone(),
                errors: errors.clone(),
            });
            return Err(OrchestratorError::Rejected(errors.join("; ")));
        }

        let media_type = AdmissionController::classify(&candidate.path);
        let record = FileRecord::new(candidate.path, candidate.name, candidate.size, media_type);
        self.registry.add(record.clone());
        Ok(record)
    }

    /// Admit a file straight from disk
    pub fn add_path(&self, path: impl Into<PathBuf>) -> OrchestratorResult<FileRecord> {
        let candidate = FileCandidate::from_path(path)?;
        self.add_file(candidate)
    }

    /// Remove a file by local id. Pending files leave the queue directly;
    /// in-flight uploads go through remote cancellation.
    pub async fn remove_file(&self, id: Uuid) -> OrchestratorResult<()> {
        match self.registry.remove(id) {
            RemoveOutcome::Pending(_) => Ok(()),
            RemoveOutcome::Active { remote_id } => self.cancel(&remote_id).await,
            RemoveOutcome::NotFound => Err(OrchestratorError::NoFile(id)),
        }
    }

    /// Upload a single pending file and hand it to the progress poller
    #[instrument(skip(self))]
    pub async fn upload_one(&self, id: Uuid) -> UploadOutcome {
        let Some(record) = self.registry.find_pending(id) else {
            return UploadOutcome {
                id,
                name: String::new(),
                remote_id: None,
                success: false,
                error: Some(format!("no pending file with id {id}")),
            };
        };

        self.events.publish(UplinkEvent::UploadStarted {
            id,
            name: record.name.clone(),
        });

        let response = match self.api.upload(&record.path, &record.name).await {
            Ok(response) => response,
            Err(e) => return self.fail_upload(record, e.to_string()),
        };

        let Some(remote_id) = response.primary_file_id().map(str::to_string) else {
            return self.fail_upload(record, "server did not return a file id".to_string());
        };

        if let Err(e) = self.registry.promote(id, remote_id.clone(), response) {
            return self.fail_upload(record, e.to_string());
        }

        info!(id = %id, name = %record.name, %remote_id, "Upload acknowledged");
        self.events.publish(UplinkEvent::UploadCompleted {
            id,
            name: record.name.clone(),
            remote_id: remote_id.clone(),
        });
        self.poller.start(remote_id.clone());

        UploadOutcome {
            id,
            name: record.name,
            remote_id: Some(remote_id),
            success: true,
            error: None,
        }
    }

    /// An upload that failed leaves the queue entirely: it was never
    /// promoted, and keeping it pending would block the next batch.
    fn fail_upload(&self, record: FileRecord, message: String) -> UploadOutcome {
        warn!(name = %record.name, %message, "Upload failed");
        self.registry.drop_pending(record.id);
        self.events.publish(UplinkEvent::UploadFailed {
            name: record.name.clone(),
            message: message.clone(),
        });
        UploadOutcome {
            id: record.id,
            name: record.name,
            remote_id: None,
            success: false,
            error: Some(message),
        }
    }

    /// Upload every pending file in insertion order, stopping at the
    /// first failure. Guarded against overlapping invocations.
    pub async fn upload_all(&self) -> BatchOutcome {
        if self.registry.pending_len() == 0 {
            return BatchOutcome {
                outcomes: Vec::new(),
                success: false,
                error: Some("no files are pending".to_string()),
            };
        }

        if self
            .uploading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return BatchOutcome {
                outcomes: Vec::new(),
                success: false,
                error: Some("an upload batch is already running".to_string()),
            };
        }
        let _guard = FlightGuard(&self.uploading);

        let ids: Vec<Uuid> = self.registry.pending().iter().map(|r| r.id).collect();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.upload_one(id).await;
            let failed = !outcome.success;
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        let success = outcomes.iter().all(|o| o.success);
        let error = outcomes
            .iter()
            .find(|o| !o.success)
            .and_then(|o| o.error.clone());
        BatchOutcome {
            outcomes,
            success,
            error,
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Acquire)
    }

    /// Force-clear the single-flight guard (reset path)
    pub fn clear_upload_guard(&self) {
        self.uploading.store(false, Ordering::Release);
    }

    /// Cancel an in-flight upload. On success the poller timer is aborted
    /// and the bookkeeping entry forgotten; on failure nothing changes.
    pub async fn cancel(&self, remote_id: &str) -> OrchestratorResult<()> {
        match self.api.cancel(remote_id).await {
            Ok(_) => {
                self.poller.abort(remote_id);
                let name = self
                    .registry
                    .discard(remote_id)
                    .map(|upload| upload.file.name)
                    .unwrap_or_default();
                info!(%remote_id, %name, "Upload cancelled");
                self.events.publish(UplinkEvent::UploadCancelled {
                    remote_id: remote_id.to_string(),
                    name,
                });
                Ok(())
            }
            Err(e) => {
                self.publish_api_error("cancel", &e);
                Err(e.into())
            }
        }
    }

    /// Ask the server to extract metadata for a pending file and attach
    /// it to the record.
    pub async fn fetch_metadata(&self, id: Uuid) -> OrchestratorResult<Value> {
        let record = self
            .registry
            .find_pending(id)
            .ok_or(OrchestratorError::NoFile(id))?;

        match self.api.extract_metadata(&record.path, &record.name).await {
            Ok(response) => {
                let metadata = response.metadata.unwrap_or(Value::Null);
                self.registry.set_metadata(id, metadata.clone());
                Ok(metadata)
            }
            Err(e) => {
                self.publish_api_error("metadata", &e);
                Err(e.into())
            }
        }
    }

    /// List files already uploaded to the server
    pub async fn list_remote(&self) -> OrchestratorResult<Vec<Value>> {
        match self.api.list_files().await {
            Ok(response) => Ok(response.files),
            Err(e) => {
                self.publish_api_error("list", &e);
                Err(e.into())
            }
        }
    }

    /// Look up server-side metadata for an uploaded video
    pub async fn video_info(&self, file_path: &str) -> OrchestratorResult<Value> {
        match self.api.video_info(file_path).await {
            Ok(response) => Ok(response.info.unwrap_or(Value::Null)),
            Err(e) => {
                self.publish_api_error("video_info", &e);
                Err(e.into())
            }
        }
    }

    /// Request frame extraction for an uploaded video
    pub async fn extract_frames(
        &self,
        file_path: &str,
        fps: f64,
    ) -> OrchestratorResult<FrameExtractionResponse> {
        match self.api.extract_frames(file_path, fps).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.publish_api_error("extract_frames", &e);
                Err(e.into())
            }
        }
    }

    /// Probe the server and broadcast the verdict
    pub async fn health_check(&self) -> bool {
        let healthy = match self.api.health().await {
            Ok(ack) => ack.success,
            Err(e) => {
                self.publish_api_error("health", &e);
                false
            }
        };
        self.events.publish(UplinkEvent::ApiHealth { healthy });
        healthy
    }

    fn publish_api_error(&self, operation: &str, error: &ApiError) {
        self.events.publish(UplinkEvent::ApiError {
            operation: operation.to_string(),
            message: error.to_string(),
        });
    }
}
