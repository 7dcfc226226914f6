//! Test support: a scripted [`TransferApi`] and event-capture helpers.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::uplink::admission::AdmissionController;
use crate::uplink::api::{
    Ack, ApiError, ApiResult, FrameExtractionResponse, ListResponse, MetadataResponse,
    ProgressSnapshot, ProgressStatus, TransferApi, UploadResponse, VideoInfoResponse,
};
use crate::uplink::events::{EventBus, EventKind, UplinkEvent};
use crate::uplink::registry::{FileRecord, FileRegistry};

/// Scripted fake for the remote API. Responses are popped from per-call
/// queues; when a queue is empty a configurable default applies.
pub(crate) struct MockApi {
    upload_responses: Mutex<VecDeque<ApiResult<UploadResponse>>>,
    progress_responses: Mutex<VecDeque<ApiResult<ProgressSnapshot>>>,
    cancel_responses: Mutex<VecDeque<ApiResult<Ack>>>,
    default_progress: Mutex<Option<ProgressSnapshot>>,
    default_progress_error: Mutex<Option<Box<dyn Fn() -> ApiError + Send + Sync>>>,
    health_responses: Mutex<VecDeque<ApiResult<Ack>>>,
    upload_counter: AtomicU64,
    /// Call log, e.g. `upload:a.jpg`, `cancel:remote-1`
    pub calls: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            upload_responses: Mutex::new(VecDeque::new()),
            progress_responses: Mutex::new(VecDeque::new()),
            cancel_responses: Mutex::new(VecDeque::new()),
            default_progress: Mutex::new(None),
            default_progress_error: Mutex::new(None),
            health_responses: Mutex::new(VecDeque::new()),
            upload_counter: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_upload(&self, response: ApiResult<UploadResponse>) {
        self.upload_responses.lock().push_back(response);
    }

    pub fn push_progress(&self, response: ApiResult<ProgressSnapshot>) {
        self.progress_responses.lock().push_back(response);
    }

    pub fn push_cancel(&self, response: ApiResult<Ack>) {
        self.cancel_responses.lock().push_back(response);
    }

    pub fn push_health(&self, response: ApiResult<Ack>) {
        self.health_responses.lock().push_back(response);
    }

    /// Snapshot returned whenever the progress queue is empty
    pub fn set_default_progress(&self, snapshot: ProgressSnapshot) {
        *self.default_progress.lock() = Some(snapshot);
    }

    /// Error returned whenever the progress queue is empty
    pub fn set_default_progress_error<F>(&self, factory: F)
    where
        F: Fn() -> ApiError + Send + Sync + 'static,
    {
        *self.default_progress_error.lock() = Some(Box::new(factory));
    }

    pub fn calls_named(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn next_remote_id(&self) -> String {
        format!("remote-{}", self.upload_counter.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl TransferApi for MockApi {
    async fn extract_metadata(&self, _path: &Path, name: &str) -> ApiResult<MetadataResponse> {
        self.record(format!("metadata:{name}"));
        Ok(MetadataResponse {
            success: true,
            message: None,
            metadata: Some(json!({ "name": name })),
        })
    }

    async fn upload(&self, _path: &Path, name: &str) -> ApiResult<UploadResponse> {
        self.record(format!("upload:{name}"));
        if let Some(scripted) = self.upload_responses.lock().pop_front() {
            return scripted;
        }
        Ok(UploadResponse {
            success: true,
            message: None,
            file_ids: vec![self.next_remote_id()],
            results: Vec::new(),
        })
    }

    async fn cancel(&self, remote_id: &str) -> ApiResult<Ack> {
        self.record(format!("cancel:{remote_id}"));
        if let Some(scripted) = self.cancel_responses.lock().pop_front() {
            return scripted;
        }
        Ok(Ack {
            success: true,
            message: None,
        })
    }

    async fn progress(&self, remote_id: &str) -> ApiResult<ProgressSnapshot> {
        self.record(format!("progress:{remote_id}"));
        if let Some(scripted) = self.progress_responses.lock().pop_front() {
            return scripted;
        }
        if let Some(default) = self.default_progress.lock().clone() {
            return Ok(default);
        }
        if let Some(factory) = self.default_progress_error.lock().as_ref() {
            return Err(factory());
        }
        Ok(ProgressSnapshot {
            status: ProgressStatus::Completed,
            percent: 100.0,
            error_message: None,
        })
    }

    async fn list_files(&self) -> ApiResult<ListResponse> {
        self.record("list".to_string());
        Ok(ListResponse {
            success: true,
            message: None,
            files: vec![json!({ "file_id": "remote-1" })],
        })
    }

    async fn video_info(&self, file_path: &str) -> ApiResult<VideoInfoResponse> {
        self.record(format!("video_info:{file_path}"));
        Ok(VideoInfoResponse {
            success: true,
            message: None,
            info: Some(json!({ "duration": 12.5 })),
        })
    }

    async fn extract_frames(&self, file_path: &str, fps: f64) -> ApiResult<FrameExtractionResponse> {
        self.record(format!("extract_frames:{file_path}@{fps}"));
        Ok(FrameExtractionResponse {
            success: true,
            message: None,
            frames: vec!["frame_0001.jpg".to_string()],
            frame_count: Some(1),
        })
    }

    async fn health(&self) -> ApiResult<Ack> {
        self.record("health".to_string());
        if let Some(scripted) = self.health_responses.lock().pop_front() {
            return scripted;
        }
        Ok(Ack {
            success: true,
            message: None,
        })
    }
}

/// Capture all events of one kind into a shared vector
pub(crate) fn collect_events(
    events: &Arc<EventBus>,
    kind: EventKind,
) -> Arc<Mutex<Vec<UplinkEvent>>> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    {
        let collected = collected.clone();
        events.subscribe(kind, move |event| collected.lock().push(event.clone()));
    }
    collected
}

/// Add a record and promote it straight into the active map
pub(crate) fn added_and_promoted(
    registry: &FileRegistry,
    name: &str,
    remote_id: &str,
) -> FileRecord {
    let path = PathBuf::from(name);
    let media_type = AdmissionController::classify(&path);
    let record = FileRecord::new(path, name.to_string(), 1024, media_type);
    let id = record.id;
    registry.add(record.clone());
    registry
        .promote(
            id,
            remote_id.to_string(),
            UploadResponse {
                success: true,
                message: None,
                file_ids: vec![remote_id.to_string()],
                results: Vec::new(),
            },
        )
        .expect("promote in test setup");
    record
}
