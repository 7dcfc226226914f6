//! Event bus for upload lifecycle notifications
//!
//! Observers (the console UI, tests) subscribe per event kind and receive
//! synchronous, in-order delivery. A handler that panics is caught and
//! logged so it cannot break delivery to later handlers or unwind into
//! the publisher.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::uplink::api::ProgressSnapshot;
use crate::uplink::registry::FileRecord;

/// Everything the upload pipeline reports to observers
#[derive(Debug, Clone)]
pub enum UplinkEvent {
    FileAdded {
        record: FileRecord,
    },
    FileRemoved {
        id: Uuid,
        name: String,
    },
    ValidationFailed {
        name: String,
        errors: Vec<String>,
    },
    UploadStarted {
        id: Uuid,
        name: String,
    },
    UploadProgress {
        remote_id: String,
        snapshot: ProgressSnapshot,
    },
    UploadCompleted {
        id: Uuid,
        name: String,
        remote_id: String,
    },
    UploadFailed {
        name: String,
        message: String,
    },
    UploadCancelled {
        remote_id: String,
        name: String,
    },
    ProcessingStarted {
        remote_id: String,
    },
    ProcessingCompleted {
        remote_id: String,
        name: String,
    },
    ProcessingFailed {
        remote_id: String,
        message: String,
    },
    ApiError {
        operation: String,
        message: String,
    },
    ApiHealth {
        healthy: bool,
    },
    Reset,
}

/// Subscription key for [`UplinkEvent`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileAdded,
    FileRemoved,
    ValidationFailed,
    UploadStarted,
    UploadProgress,
    UploadCompleted,
    UploadFailed,
    UploadCancelled,
    ProcessingStarted,
    ProcessingCompleted,
    ProcessingFailed,
    ApiError,
    ApiHealth,
    Reset,
}

impl UplinkEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            UplinkEvent::FileAdded { .. } => EventKind::FileAdded,
            UplinkEvent::FileRemoved { .. } => EventKind::FileRemoved,
            UplinkEvent::ValidationFailed { .. } => EventKind::ValidationFailed,
            UplinkEvent::UploadStarted { .. } => EventKind::UploadStarted,
            UplinkEvent::UploadProgress { .. } => EventKind::UploadProgress,
            UplinkEvent::UploadCompleted { .. } => EventKind::UploadCompleted,
            UplinkEvent::UploadFailed { .. } => EventKind::UploadFailed,
            UplinkEvent::UploadCancelled { .. } => EventKind::UploadCancelled,
            UplinkEvent::ProcessingStarted { .. } => EventKind::ProcessingStarted,
            UplinkEvent::ProcessingCompleted { .. } => EventKind::ProcessingCompleted,
            UplinkEvent::ProcessingFailed { .. } => EventKind::ProcessingFailed,
            UplinkEvent::ApiError { .. } => EventKind::ApiError,
            UplinkEvent::ApiHealth { .. } => EventKind::ApiHealth,
            UplinkEvent::Reset => EventKind::Reset,
        }
    }

    /// All kinds, for observers that want the full catalog
    pub const ALL_KINDS: &'static [EventKind] = &[
        EventKind::FileAdded,
        EventKind::FileRemoved,
        EventKind::ValidationFailed,
        EventKind::UploadStarted,
        EventKind::UploadProgress,
        EventKind::UploadCompleted,
        EventKind::UploadFailed,
        EventKind::UploadCancelled,
        EventKind::ProcessingStarted,
        EventKind::ProcessingCompleted,
        EventKind::ProcessingFailed,
        EventKind::ApiError,
        EventKind::ApiHealth,
        EventKind::Reset,
    ];
}

/// Token returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&UplinkEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: Handler,
}

/// Synchronous publish/subscribe channel keyed by [`EventKind`]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&UplinkEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write();
        subscribers.entry(kind).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    /// Remove a previously registered handler.
    ///
    /// Returns false if the subscription was not found.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|subscriber| subscriber.id != id.0);
        list.len() != before
    }

    /// Deliver an event to all current subscribers of its kind, in
    /// subscription order.
    ///
    /// The handler list is snapshotted before delivery, so handlers may
    /// subscribe or unsubscribe without deadlocking the bus.
    pub fn publish(&self, event: UplinkEvent) {
        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.read();
            subscribers
                .get(&event.kind())
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(kind = ?event.kind(), "event handler panicked; continuing delivery");
            }
        }
    }

    /// Drop every subscription on every kind
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
