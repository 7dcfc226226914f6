//! File registry: the single owner of upload bookkeeping
//!
//! Three collections, each keyed differently:
//! 1. `pending`: admitted files in insertion order (insertion order is
//!    upload order)
//! 2. `active`: in-flight uploads keyed by the server-assigned remote id
//! 3. `archive`: settled records keyed by remote id
//!
//! Every mutation takes the registry lock once and runs to completion
//! inside it, so a `promote` can never interleave with a `settle` for the
//! same key. Events are published after the lock is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::uplink::admission::MediaType;
use crate::uplink::api::UploadResponse;
use crate::uplink::events::{EventBus, UplinkEvent};

/// Error types for registry mutations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no pending file with id {0}")]
    UnknownPendingId(Uuid),

    #[error("remote id {0} already has an upload in flight")]
    DuplicateRemoteId(String),
}

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Lifecycle status of a file record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// A locally admitted file. The id is generated locally and never reused.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Uuid,
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub media_type: MediaType,
    pub status: FileStatus,
    pub added_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

impl FileRecord {
    pub fn new(path: PathBuf, name: String, size: u64, media_type: MediaType) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            name,
            size,
            media_type,
            status: FileStatus::Pending,
            added_at: Utc::now(),
            metadata: None,
        }
    }
}

/// A file the server has acknowledged; `remote_id` joins client and
/// server state. Lives only while upload/processing is in flight.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub file: FileRecord,
    pub remote_id: String,
    pub upload_result: UploadResponse,
}

/// What `remove` found for the given id
#[derive(Debug)]
pub enum RemoveOutcome {
    /// The record was pending and has been removed
    Pending(FileRecord),
    /// The record is uploading; the caller should drive cancellation
    Active { remote_id: String },
    NotFound,
}

#[derive(Default)]
struct Collections {
    pending: Vec<FileRecord>,
    active: HashMap<String, UploadRecord>,
    archive: HashMap<String, FileRecord>,
}

/// Owner of the three upload collections
pub struct FileRegistry {
    inner: Mutex<Collections>,
    events: Arc<EventBus>,
}

impl FileRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(Collections::default()),
            events,
        }
    }

    /// Append an admitted record to the pending queue
    pub fn add(&self, record: FileRecord) {
        {
            let mut inner = self.inner.lock();
            inner.pending.push(record.clone());
        }
        debug!(id = %record.id, name = %record.name, "File added to pending queue");
        self.events.publish(UplinkEvent::FileAdded { record });
    }

    /// Snapshot of the pending queue in upload order
    pub fn pending(&self) -> Vec<FileRecord> {
        self.inner.lock().pending.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn find_pending(&self, id: Uuid) -> Option<FileRecord> {
        self.inner
            .lock()
            .pending
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Remove a file by local id.
    ///
    /// A pending record is removed directly (emitting `FileRemoved`); an
    /// active upload is reported back so the caller can drive remote
    /// cancellation.
    pub fn remove(&self, id: Uuid) -> RemoveOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if let Some(index) = inner.pending.iter().position(|record| record.id == id) {
                RemoveOutcome::Pending(inner.pending.remove(index))
            } else if let Some(upload) = inner.active.values().find(|upload| upload.file.id == id) {
                RemoveOutcome::Active {
                    remote_id: upload.remote_id.clone(),
                }
            } else {
                RemoveOutcome::NotFound
            }
        };

        if let RemoveOutcome::Pending(ref record) = outcome {
            self.events.publish(UplinkEvent::FileRemoved {
                id: record.id,
                name: record.name.clone(),
            });
        }
        outcome
    }

    /// Drop a pending record without emitting `FileRemoved`. Used when an
    /// upload attempt fails and the record leaves the queue as a failure.
    pub fn drop_pending(&self, id: Uuid) -> Option<FileRecord> {
        let mut inner = self.inner.lock();
        let index = inner.pending.iter().position(|record| record.id == id)?;
        Some(inner.pending.remove(index))
    }

    /// Attach server-extracted metadata to a pending record
    pub fn set_metadata(&self, id: Uuid, metadata: Value) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.metadata = Some(metadata);
                true
            }
            None => false,
        }
    }

    /// Move a record from pending into the active map in one atomic step
    pub fn promote(
        &self,
        pending_id: Uuid,
        remote_id: String,
        upload_result: UploadResponse,
    ) -> RegistryResult<UploadRecord> {
        let mut inner = self.inner.lock();

        if inner.active.contains_key(&remote_id) {
            return Err(RegistryError::DuplicateRemoteId(remote_id));
        }
        let index = inner
            .pending
            .iter()
            .position(|record| record.id == pending_id)
            .ok_or(RegistryError::UnknownPendingId(pending_id))?;

        let mut file = inner.pending.remove(index);
        file.status = FileStatus::Uploading;
        let upload = UploadRecord {
            file,
            remote_id: remote_id.clone(),
            upload_result,
        };
        inner.active.insert(remote_id, upload.clone());
        Ok(upload)
    }

    /// Move an active upload into the archive with a terminal status
    pub fn settle(&self, remote_id: &str, status: FileStatus) -> Option<FileRecord> {
        let mut inner = self.inner.lock();
        let upload = inner.active.remove(remote_id)?;
        let mut file = upload.file;
        file.status = status;
        inner.archive.insert(remote_id.to_string(), file.clone());
        Some(file)
    }

    /// Forget a remote id entirely (cancellation path): removed from both
    /// the active map and the archive.
    pub fn discard(&self, remote_id: &str) -> Option<UploadRecord> {
        let mut inner = self.inner.lock();
        let upload = inner.active.remove(remote_id);
        inner.archive.remove(remote_id);
        if upload.is_none() {
            warn!(%remote_id, "Discard requested for unknown remote id");
        }
        upload
    }

    pub fn active(&self) -> Vec<UploadRecord> {
        self.inner.lock().active.values().cloned().collect()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.inner.lock().active.keys().cloned().collect()
    }

    pub fn find_active(&self, remote_id: &str) -> Option<UploadRecord> {
        self.inner.lock().active.get(remote_id).cloned()
    }

    pub fn archive(&self) -> Vec<FileRecord> {
        self.inner.lock().archive.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && inner.active.is_empty() && inner.archive.is_empty()
    }

    /// Wipe all three collections. Subscriptions are untouched; callers
    /// emit their own reset notification.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.active.clear();
        inner.archive.clear();
    }
}
