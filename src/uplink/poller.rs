//! Bounded progress polling for in-flight uploads
//!
//! One scheduled task per remote id, spawned after a successful upload:
//! 1. Sleeps the initial delay, then queries progress
//! 2. Re-arms on `uploading`/`processing` and on transport errors
//! 3. Settles the registry entry and emits a single terminal event on
//!    `completed` or `failed`
//! 4. Gives up after the attempt budget, emitting one timeout failure
//!
//! Transport errors and non-terminal statuses both consume the budget, so
//! a wedged server cannot keep a poller alive forever. The task handle is
//! kept keyed by remote id so cancellation can abort the pending timer
//! directly instead of racing the next query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::uplink::api::{ProgressStatus, TransferApi};
use crate::uplink::config::Polling;
use crate::uplink::events::{EventBus, UplinkEvent};
use crate::uplink::registry::{FileRegistry, FileStatus};

/// Terminal state of one polling task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Completed,
    Failed,
    TimedOut,
}

/// Spawns and tracks the per-upload polling tasks
pub struct ProgressPoller {
    api: Arc<dyn TransferApi>,
    registry: Arc<FileRegistry>,
    events: Arc<EventBus>,
    polling: Polling,
    tasks: Mutex<HashMap<String, JoinHandle<PollState>>>,
}

impl ProgressPoller {
    pub fn new(
        api: Arc<dyn TransferApi>,
        registry: Arc<FileRegistry>,
        events: Arc<EventBus>,
        polling: Polling,
    ) -> Self {
        Self {
            api,
            registry,
            events,
            polling,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling a remote id. A second start for an id whose task is
    /// still live is ignored.
    pub fn start(&self, remote_id: String) {
        let mut tasks = self.tasks.lock();
        if let Some(existing) = tasks.get(&remote_id) {
            if !existing.is_finished() {
                warn!(%remote_id, "Poller already live for this remote id; not starting another");
                return;
            }
        }

        let handle = tokio::spawn(Self::poll_loop(
            self.api.clone(),
            self.registry.clone(),
            self.events.clone(),
            self.polling.clone(),
            remote_id.clone(),
        ));
        tasks.insert(remote_id, handle);
    }

    /// Abort the pending timer/query for a remote id, if one is live
    pub fn abort(&self, remote_id: &str) -> bool {
        match self.tasks.lock().remove(remote_id) {
            Some(handle) => {
                handle.abort();
                debug!(%remote_id, "Poller aborted");
                true
            }
            None => false,
        }
    }

    /// Abort every live polling task
    pub fn abort_all(&self) {
        let mut tasks = self.tasks.lock();
        for (remote_id, handle) in tasks.drain() {
            handle.abort();
            debug!(%remote_id, "Poller aborted");
        }
    }

    pub fn is_live(&self, remote_id: &str) -> bool {
        self.tasks
            .lock()
            .get(remote_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for a polling task to finish and return its terminal state.
    /// Returns None if no task is tracked or it was aborted.
    #[cfg(test)]
    pub(crate) async fn wait(&self, remote_id: &str) -> Option<PollState> {
        let handle = self.tasks.lock().remove(remote_id)?;
        handle.await.ok()
    }

    async fn poll_loop(
        api: Arc<dyn TransferApi>,
        registry: Arc<FileRegistry>,
        events: Arc<EventBus>,
        polling: Polling,
        remote_id: String,
    ) -> PollState {
        sleep(Duration::from_millis(polling.initial_delay_ms)).await;

        let mut attempts: u32 = 0;
        let mut processing_announced = false;

        loop {
            attempts += 1;

            match api.progress(&remote_id).await {
                Ok(snapshot) => {
                    events.publish(UplinkEvent::UploadProgress {
                        remote_id: remote_id.clone(),
                        snapshot: snapshot.clone(),
                    });

                    match snapshot.status {
                        ProgressStatus::Completed => {
                            let name = registry
                                .settle(&remote_id, FileStatus::Completed)
                                .map(|file| file.name)
                                .unwrap_or_default();
                            info!(%remote_id, %name, "Processing completed");
                            events.publish(UplinkEvent::ProcessingCompleted {
                                remote_id,
                                name,
                            });
                            return PollState::Completed;
                        }
                        ProgressStatus::Failed => {
                            registry.settle(&remote_id, FileStatus::Failed);
                            let message = snapshot
                                .error_message
                                .unwrap_or_else(|| "processing failed".to_string());
                            warn!(%remote_id, %message, "Processing failed");
                            events.publish(UplinkEvent::ProcessingFailed {
                                remote_id,
                                message,
                            });
                            return PollState::Failed;
                        }
                        ProgressStatus::Processing => {
                            if !processing_announced {
                                processing_announced = true;
                                events.publish(UplinkEvent::ProcessingStarted {
                                    remote_id: remote_id.clone(),
                                });
                            }
                        }
                        ProgressStatus::Uploading => {}
                    }
                }
                Err(e) => {
                    // Transport hiccup: report it and re-arm; the budget
                    // still ticks down
                    events.publish(UplinkEvent::ApiError {
                        operation: "progress".to_string(),
                        message: e.to_string(),
                    });
                }
            }

            if attempts >= polling.max_attempts {
                let name = registry
                    .find_active(&remote_id)
                    .map(|upload| upload.file.name)
                    .unwrap_or_else(|| remote_id.clone());
                warn!(%remote_id, attempts, "Progress poll budget exhausted");
                // The active entry is deliberately left in place for
                // inspection; only the poll stops.
                events.publish(UplinkEvent::UploadFailed {
                    name,
                    message: format!(
                        "processing did not finish within {} progress checks",
                        polling.max_attempts
                    ),
                });
                return PollState::TimedOut;
            }

            sleep(Duration::from_millis(polling.interval_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uplink::events::EventKind;
    use crate::uplink::testkit::{MockApi, added_and_promoted, collect_events};
    use crate::uplink::api::{ApiError, ProgressSnapshot};

    fn snapshot(status: ProgressStatus) -> ProgressSnapshot {
        ProgressSnapshot {
            status,
            percent: 0.0,
            error_message: None,
        }
    }

    fn fast_polling() -> Polling {
        Polling {
            initial_delay_ms: 10,
            interval_ms: 10,
            max_attempts: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminates_once_on_completed() {
        let api = Arc::new(MockApi::new());
        api.push_progress(Ok(snapshot(ProgressStatus::Uploading)));
        api.push_progress(Ok(snapshot(ProgressStatus::Processing)));
        api.push_progress(Ok(snapshot(ProgressStatus::Completed)));

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(FileRegistry::new(events.clone()));
        added_and_promoted(&registry, "clip.mp4", "remote-1");

        let completed = collect_events(&events, EventKind::ProcessingCompleted);
        let started = collect_events(&events, EventKind::ProcessingStarted);
        let progress = collect_events(&events, EventKind::UploadProgress);

        let poller = ProgressPoller::new(api, registry.clone(), events.clone(), fast_polling());
        poller.start("remote-1".to_string());

        assert_eq!(poller.wait("remote-1").await, Some(PollState::Completed));
        assert_eq!(completed.lock().len(), 1);
        assert_eq!(started.lock().len(), 1);
        assert_eq!(progress.lock().len(), 3);
        // Terminal transition settles the registry entry
        assert!(registry.find_active("remote-1").is_none());
        assert_eq!(registry.archive()[0].status, FileStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_carries_server_message() {
        let api = Arc::new(MockApi::new());
        api.push_progress(Ok(ProgressSnapshot {
            status: ProgressStatus::Failed,
            percent: 0.0,
            error_message: Some("codec not supported".to_string()),
        }));

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(FileRegistry::new(events.clone()));
        added_and_promoted(&registry, "clip.mp4", "remote-1");

        let failed = collect_events(&events, EventKind::ProcessingFailed);

        let poller = ProgressPoller::new(api, registry.clone(), events.clone(), fast_polling());
        poller.start("remote-1".to_string());

        assert_eq!(poller.wait("remote-1").await, Some(PollState::Failed));
        let failed = failed.lock();
        assert_eq!(failed.len(), 1);
        match &failed[0] {
            UplinkEvent::ProcessingFailed { message, .. } => {
                assert_eq!(message, "codec not supported");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(registry.archive()[0].status, FileStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_emits_one_timeout_and_keeps_active_entry() {
        let api = Arc::new(MockApi::new());
        // Never leaves processing
        api.set_default_progress(snapshot(ProgressStatus::Processing));

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(FileRegistry::new(events.clone()));
        added_and_promoted(&registry, "clip.mp4", "remote-1");

        let failed = collect_events(&events, EventKind::UploadFailed);

        let poller = ProgressPoller::new(api, registry.clone(), events.clone(), fast_polling());
        poller.start("remote-1".to_string());

        assert_eq!(poller.wait("remote-1").await, Some(PollState::TimedOut));
        assert_eq!(failed.lock().len(), 1);
        // The active entry stays behind for inspection
        assert!(registry.find_active("remote-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_count_toward_budget() {
        let api = Arc::new(MockApi::new());
        api.set_default_progress_error(|| ApiError::Rejected("progress query failed".to_string()));

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(FileRegistry::new(events.clone()));
        added_and_promoted(&registry, "clip.mp4", "remote-1");

        let api_errors = collect_events(&events, EventKind::ApiError);

        let polling = Polling {
            initial_delay_ms: 10,
            interval_ms: 10,
            max_attempts: 5,
        };
        let poller = ProgressPoller::new(api, registry, events.clone(), polling);
        poller.start("remote-1".to_string());

        assert_eq!(poller.wait("remote-1").await, Some(PollState::TimedOut));
        assert_eq!(api_errors.lock().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_for_live_remote_id_is_ignored() {
        let api = Arc::new(MockApi::new());
        api.set_default_progress(snapshot(ProgressStatus::Processing));

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(FileRegistry::new(events.clone()));
        added_and_promoted(&registry, "clip.mp4", "remote-1");

        let poller = ProgressPoller::new(api, registry, events, fast_polling());
        poller.start("remote-1".to_string());
        assert!(poller.is_live("remote-1"));
        // Must not replace (and thereby orphan) the live task
        poller.start("remote-1".to_string());
        assert!(poller.is_live("remote-1"));

        assert!(poller.abort("remote-1"));
        assert!(!poller.is_live("remote-1"));
    }
}
