//! HTTP client for the remote processing service
//!
//! Narrow request/response contract over eight endpoints. Every server
//! response carries `{success: bool, message?, ...}`; a `success: false`
//! body and a transport failure are treated identically by callers, so
//! both surface as [`ApiError`].
//!
//! Orchestrator and poller consume the [`TransferApi`] trait instead of
//! the concrete client so they can be exercised against scripted fakes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, multipart};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::uplink::config::Server;

/// Error types for remote API calls
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for remote API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Server-side status of an upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

/// One progress query result. Transient: passed through events, never
/// stored.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSnapshot {
    pub status: ProgressStatus,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Body of a successful upload acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub results: Vec<UploadEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadEntry {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadResponse {
    /// The remote id assigned to the uploaded file. The server reports it
    /// either as `file_ids[0]` or as `results[0].file_id`.
    pub fn primary_file_id(&self) -> Option<&str> {
        self.file_ids
            .first()
            .map(String::as_str)
            .or_else(|| self.results.first().and_then(|r| r.file_id.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProgressResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    progress: Option<ProgressSnapshot>,
}

/// Minimal `{success, message}` acknowledgement used by cancel and health
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub files: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfoResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub info: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameExtractionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub frames: Vec<String>,
    #[serde(default)]
    pub frame_count: Option<u64>,
}

fn rejected(message: Option<String>, fallback: &str) -> ApiError {
    ApiError::Rejected(message.unwrap_or_else(|| fallback.to_string()))
}

/// The request/response contract the upload pipeline depends on
#[async_trait]
pub trait TransferApi: Send + Sync {
    /// POST /api/file/metadata
    async fn extract_metadata(&self, path: &Path, name: &str) -> ApiResult<MetadataResponse>;

    /// POST /api/file/upload
    async fn upload(&self, path: &Path, name: &str) -> ApiResult<UploadResponse>;

    /// POST /api/file/cancel/{id}
    async fn cancel(&self, remote_id: &str) -> ApiResult<Ack>;

    /// GET /api/file/progress/{id}
    async fn progress(&self, remote_id: &str) -> ApiResult<ProgressSnapshot>;

    /// GET /api/file/list
    async fn list_files(&self) -> ApiResult<ListResponse>;

    /// POST /api/video/info
    async fn video_info(&self, file_path: &str) -> ApiResult<VideoInfoResponse>;

    /// POST /api/video/extract-frames
    async fn extract_frames(&self, file_path: &str, fps: f64) -> ApiResult<FrameExtractionResponse>;

    /// GET /api/health
    async fn health(&self) -> ApiResult<Ack>;
}

/// Concrete [`TransferApi`] backed by reqwest
pub struct RemoteApi {
    client: Client,
    base_url: String,
}

impl RemoteApi {
    pub fn new(server: &Server) -> ApiResult<Self> {
        let client = Client::builder()
            .user_agent(&server.user_agent)
            .connect_timeout(Duration::from_secs(server.connect_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: server.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn file_form(path: &Path, name: &str) -> ApiResult<multipart::Form> {
        let bytes = tokio::fs::read(path).await?;
        let part = multipart::Part::bytes(bytes).file_name(name.to_string());
        Ok(multipart::Form::new().part("files", part))
    }
}

#[async_trait]
impl TransferApi for RemoteApi {
    async fn extract_metadata(&self, path: &Path, name: &str) -> ApiResult<MetadataResponse> {
        let form = Self::file_form(path, name).await?;
        let response: MetadataResponse = self
            .client
            .post(self.url("/api/file/metadata"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(rejected(response.message, "metadata extraction failed"));
        }
        Ok(response)
    }

    async fn upload(&self, path: &Path, name: &str) -> ApiResult<UploadResponse> {
        debug!(%name, "Uploading file");
        let form = Self::file_form(path, name).await?;
        let response: UploadResponse = self
            .client
            .post(self.url("/api/file/upload"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(rejected(response.message, "upload rejected"));
        }
        Ok(response)
    }

    async fn cancel(&self, remote_id: &str) -> ApiResult<Ack> {
        let ack: Ack = self
            .client
            .post(self.url(&format!("/api/file/cancel/{remote_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !ack.success {
            return Err(rejected(ack.message, "cancellation rejected"));
        }
        Ok(ack)
    }

    async fn progress(&self, remote_id: &str) -> ApiResult<ProgressSnapshot> {
        let response: ProgressResponse = self
            .client
            .get(self.url(&format!("/api/file/progress/{remote_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(rejected(response.message, "progress query failed"));
        }
        response
            .progress
            .ok_or_else(|| ApiError::InvalidResponse("progress body missing".to_string()))
    }

    async fn list_files(&self) -> ApiResult<ListResponse> {
        let response: ListResponse = self
            .client
            .get(self.url("/api/file/list"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(rejected(response.message, "listing failed"));
        }
        Ok(response)
    }

    async fn video_info(&self, file_path: &str) -> ApiResult<VideoInfoResponse> {
        let response: VideoInfoResponse = self
            .client
            .post(self.url("/api/video/info"))
            .json(&json!({ "file_path": file_path }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(rejected(response.message, "video info lookup failed"));
        }
        Ok(response)
    }

    async fn extract_frames(&self, file_path: &str, fps: f64) -> ApiResult<FrameExtractionResponse> {
        let response: FrameExtractionResponse = self
            .client
            .post(self.url("/api/video/extract-frames"))
            .json(&json!({ "file_path": file_path, "fps": fps }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(rejected(response.message, "frame extraction failed"));
        }
        Ok(response)
    }

    async fn health(&self) -> ApiResult<Ack> {
        let ack: Ack = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_file_id_prefers_file_ids() {
        let response: UploadResponse = serde_json::from_value(json!({
            "success": true,
            "file_ids": ["abc"],
            "results": [{"file_id": "def"}]
        }))
        .unwrap();
        assert_eq!(response.primary_file_id(), Some("abc"));
    }

    #[test]
    fn primary_file_id_falls_back_to_results() {
        let response: UploadResponse = serde_json::from_value(json!({
            "success": true,
            "results": [{"file_id": "def", "filename": "a.jpg"}]
        }))
        .unwrap();
        assert_eq!(response.primary_file_id(), Some("def"));

        let empty: UploadResponse =
            serde_json::from_value(json!({ "success": true })).unwrap();
        assert_eq!(empty.primary_file_id(), None);
    }

    #[test]
    fn progress_snapshot_parses_lowercase_status() {
        let snapshot: ProgressSnapshot = serde_json::from_value(json!({
            "status": "processing",
            "percent": 42.5
        }))
        .unwrap();
        assert_eq!(snapshot.status, ProgressStatus::Processing);
        assert_eq!(snapshot.percent, 42.5);
        assert!(snapshot.error_message.is_none());

        let failed: ProgressSnapshot = serde_json::from_value(json!({
            "status": "failed",
            "error_message": "codec not supported"
        }))
        .unwrap();
        assert_eq!(failed.status, ProgressStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("codec not supported"));
    }
}
