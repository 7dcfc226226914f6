//! Service wiring and process lifecycle
//!
//! [`Uplink`] is the assembled service: bus, registry, poller, and
//! orchestrator wired together around one [`TransferApi`]. It is an
//! explicit, constructor-injected instance; nothing here hides behind
//! module-level mutable state.
//!
//! [`Lifecycle`] guards at most one live instance and gives it the
//! documented `get_instance` / `reset` / `destroy` transitions. The
//! binary uses a single process-wide [`Lifecycle`] through
//! [`global_lifecycle`].

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::uplink::api::{ApiResult, RemoteApi, TransferApi};
use crate::uplink::config::UplinkConfig;
use crate::uplink::events::{EventBus, UplinkEvent};
use crate::uplink::orchestrator::UploadOrchestrator;
use crate::uplink::poller::ProgressPoller;
use crate::uplink::registry::FileRegistry;

/// The assembled upload service
pub struct Uplink {
    config: UplinkConfig,
    events: Arc<EventBus>,
    registry: Arc<FileRegistry>,
    poller: Arc<ProgressPoller>,
    orchestrator: UploadOrchestrator,
}

impl Uplink {
    /// Wire up the service around an API implementation
    pub fn new(config: UplinkConfig, api: Arc<dyn TransferApi>) -> Self {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(FileRegistry::new(events.clone()));
        let poller = Arc::new(ProgressPoller::new(
            api.clone(),
            registry.clone(),
            events.clone(),
            config.polling.clone(),
        ));
        let orchestrator = UploadOrchestrator::new(
            api,
            registry.clone(),
            events.clone(),
            poller.clone(),
            config.limits.clone(),
        );

        Self {
            config,
            events,
            registry,
            poller,
            orchestrator,
        }
    }

    /// Wire up the service against the configured remote server
    pub fn with_remote(config: UplinkConfig) -> ApiResult<Self> {
        let api = Arc::new(RemoteApi::new(&config.server)?);
        Ok(Self::new(config, api))
    }

    pub fn config(&self) -> &UplinkConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &UploadOrchestrator {
        &self.orchestrator
    }

    /// Cancel everything in flight and wipe all bookkeeping. Event
    /// subscriptions survive a reset.
    pub async fn reset(&self) {
        for remote_id in self.registry.active_ids() {
            if let Err(e) = self.orchestrator.cancel(&remote_id).await {
                warn!(%remote_id, "Cancellation during reset failed: {e}");
            }
        }
        self.poller.abort_all();
        self.registry.clear();
        self.orchestrator.clear_upload_guard();
        info!("Uplink state reset");
        self.events.publish(UplinkEvent::Reset);
    }
}

/// Guards at most one live [`Uplink`] instance
pub struct Lifecycle {
    config: UplinkConfig,
    api: Arc<dyn TransferApi>,
    slot: Mutex<Option<Arc<Uplink>>>,
}

impl Lifecycle {
    pub fn new(config: UplinkConfig, api: Arc<dyn TransferApi>) -> Self {
        Self {
            config,
            api,
            slot: Mutex::new(None),
        }
    }

    pub fn with_remote(config: UplinkConfig) -> ApiResult<Self> {
        let api: Arc<dyn TransferApi> = Arc::new(RemoteApi::new(&config.server)?);
        Ok(Self::new(config, api))
    }

    /// Return the live instance, building one on first use. Construction
    /// wires the event log observers and probes server health.
    pub async fn get_instance(&self) -> Arc<Uplink> {
        let mut slot = self.slot.lock().await;
        if let Some(instance) = slot.as_ref() {
            return instance.clone();
        }

        let instance = Arc::new(Uplink::new(self.config.clone(), self.api.clone()));
        wire_event_log(instance.events());
        instance.orchestrator().health_check().await;
        info!("Uplink instance created");

        *slot = Some(instance.clone());
        instance
    }

    /// Reset the live instance, if any. Subscriptions are kept.
    pub async fn reset(&self) {
        let instance = self.slot.lock().await.clone();
        if let Some(instance) = instance {
            instance.reset().await;
        }
    }

    /// Reset, drop all subscriptions, and release the instance so the
    /// next `get_instance` builds a fresh one.
    pub async fn destroy(&self) {
        let instance = self.slot.lock().await.take();
        if let Some(instance) = instance {
            instance.reset().await;
            instance.events().clear();
            info!("Uplink instance destroyed");
        }
    }
}

/// Log every event at debug level; doubles as the catalog wiring that
/// keeps at least one observer on each kind.
fn wire_event_log(events: &Arc<EventBus>) {
    for &kind in UplinkEvent::ALL_KINDS {
        events.subscribe(kind, move |event| debug!(?event, "uplink event"));
    }
}

static GLOBAL: OnceCell<Lifecycle> = OnceCell::new();

/// The process-wide lifecycle manager used by the interactive program
pub fn global_lifecycle(config: UplinkConfig) -> ApiResult<&'static Lifecycle> {
    GLOBAL.get_or_try_init(|| Lifecycle::with_remote(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uplink::admission::FileCandidate;
    use crate::uplink::events::EventKind;
    use crate::uplink::testkit::{MockApi, added_and_promoted, collect_events};
    use std::path::PathBuf;

    fn lifecycle() -> (Arc<MockApi>, Lifecycle) {
        let api = Arc::new(MockApi::new());
        let lifecycle = Lifecycle::new(UplinkConfig::default(), api.clone());
        (api, lifecycle)
    }

    #[tokio::test]
    async fn get_instance_returns_the_same_instance() {
        let (api, lifecycle) = lifecycle();

        let first = lifecycle.get_instance().await;
        let second = lifecycle.get_instance().await;

        assert!(Arc::ptr_eq(&first, &second));
        // Health probe runs once, on construction only
        assert_eq!(api.calls_named("health"), 1);
    }

    #[tokio::test]
    async fn destroy_releases_the_instance() {
        let (_api, lifecycle) = lifecycle();

        let first = lifecycle.get_instance().await;
        first
            .orchestrator()
            .add_file(FileCandidate::new(PathBuf::from("a.jpg"), 1024))
            .unwrap();
        added_and_promoted(first.registry(), "b.jpg", "remote-1");

        lifecycle.destroy().await;

        let second = lifecycle.get_instance().await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.registry().is_empty());
    }

    #[tokio::test]
    async fn reset_cancels_active_and_keeps_subscriptions() {
        let (api, lifecycle) = lifecycle();
        let instance = lifecycle.get_instance().await;

        added_and_promoted(instance.registry(), "clip.mp4", "remote-1");
        let resets = collect_events(instance.events(), EventKind::Reset);
        let observers_before = instance.events().subscriber_count(EventKind::Reset);

        lifecycle.reset().await;

        assert_eq!(api.calls_named("cancel:remote-1"), 1);
        assert!(instance.registry().is_empty());
        assert!(!instance.orchestrator().is_uploading());
        assert_eq!(resets.lock().len(), 1);
        assert_eq!(
            instance.events().subscriber_count(EventKind::Reset),
            observers_before
        );
    }

    #[tokio::test]
    async fn destroy_clears_subscriptions() {
        let (_api, lifecycle) = lifecycle();
        let instance = lifecycle.get_instance().await;
        assert!(instance.events().subscriber_count(EventKind::FileAdded) > 0);

        lifecycle.destroy().await;
        assert_eq!(instance.events().subscriber_count(EventKind::FileAdded), 0);
    }
}
