//! Admission control for the pending queue
//!
//! Pure validation that runs before any network call:
//! 1. Classifies files as video/image by extension allow-lists
//! 2. Enforces size and queue-count limits, accumulating every violation
//! 3. Enforces the video-XOR-images rule against the pending queue
//!
//! No function here mutates anything; the caller decides what to do with
//! a rejection.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::uplink::config::Limits;
use crate::uplink::registry::FileRecord;

/// Extensions accepted as video uploads
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v"];

/// Extensions accepted as image uploads
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff"];

/// Media classification of a candidate file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Image,
    Unknown,
}

/// Reasons a file can be refused admission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("file is empty")]
    EmptyFile,

    #[error("file is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("unsupported file type: {name}")]
    UnsupportedType { name: String },

    #[error("queue is full ({max} files maximum)")]
    QueueFull { max: usize },

    #[error("a video is already pending; remove it before adding more files")]
    VideoAlreadyPending,

    #[error("a video must be uploaded on its own; clear the queue first")]
    VideoNotAlone,
}

/// A file proposed for admission, before it becomes a [`FileRecord`]
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl FileCandidate {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name, size }
    }

    /// Build a candidate from a path on disk, reading its size
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self::new(path, size))
    }
}

/// Outcome of [`AdmissionController::validate`]
#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<AdmissionError>,
}

/// Stateless validator for the admission rules
#[derive(Debug, Clone)]
pub struct AdmissionController {
    limits: Limits,
}

impl AdmissionController {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Classify a file by its extension
    pub fn classify(path: &Path) -> MediaType {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return MediaType::Unknown;
        };
        let extension = extension.to_ascii_lowercase();

        if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            MediaType::Video
        } else if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            MediaType::Image
        } else {
            MediaType::Unknown
        }
    }

    /// Check size, classification, and queue-count rules.
    ///
    /// Every violated rule is reported; validation never stops at the
    /// first failure.
    pub fn validate(&self, candidate: &FileCandidate, pending: &[FileRecord]) -> Validation {
        let mut errors = Vec::new();

        if candidate.size == 0 {
            errors.push(AdmissionError::EmptyFile);
        }
        if candidate.size > self.limits.max_file_size {
            errors.push(AdmissionError::TooLarge {
                size: candidate.size,
                limit: self.limits.max_file_size,
            });
        }
        if Self::classify(&candidate.path) == MediaType::Unknown {
            errors.push(AdmissionError::UnsupportedType {
                name: candidate.name.clone(),
            });
        }
        if pending.len() >= self.limits.max_files {
            errors.push(AdmissionError::QueueFull {
                max: self.limits.max_files,
            });
        }

        Validation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Enforce the video-XOR-images rule against the pending queue.
    ///
    /// A video may only enter an empty queue, and nothing may join a
    /// queue that holds a video.
    pub fn check_exclusivity(
        &self,
        candidate: &FileCandidate,
        pending: &[FileRecord],
    ) -> Result<(), AdmissionError> {
        let incoming = Self::classify(&candidate.path);
        let has_video = pending
            .iter()
            .any(|record| record.media_type == MediaType::Video);

        match incoming {
            MediaType::Video if !pending.is_empty() => Err(AdmissionError::VideoNotAlone),
            MediaType::Image if has_video => Err(AdmissionError::VideoAlreadyPending),
            _ => Ok(()),
        }
    }
}
