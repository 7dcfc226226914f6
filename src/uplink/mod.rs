//! Upload orchestration subsystem for Media Uplink
//! Queues local media files, uploads them one at a time, and tracks
//! server-side processing by polling, fanning state changes out through
//! an event bus.

pub mod admission;
pub mod api;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;
pub mod registry;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export commonly used types for convenience
pub use admission::{AdmissionController, AdmissionError, FileCandidate, MediaType, Validation};

pub use api::{
    Ack, ApiError, ApiResult, FrameExtractionResponse, ListResponse, MetadataResponse,
    ProgressSnapshot, ProgressStatus, RemoteApi, TransferApi, UploadResponse, VideoInfoResponse,
};

pub use config::{ConfigError, ConfigResult, Limits, Logging, Polling, Server, UplinkConfig};

pub use events::{EventBus, EventKind, SubscriptionId, UplinkEvent};

pub use lifecycle::{Lifecycle, Uplink, global_lifecycle};

pub use orchestrator::{
    BatchOutcome, OrchestratorError, OrchestratorResult, UploadOrchestrator, UploadOutcome,
};

pub use poller::{PollState, ProgressPoller};

pub use registry::{
    FileRecord, FileRegistry, FileStatus, RegistryError, RegistryResult, RemoveOutcome,
    UploadRecord,
};
