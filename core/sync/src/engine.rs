//! Core sync engine that drains the submission outbox.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use relato_common::{OccurrencePayload, Result, SubmissionId};
use relato_store::{QueueStore, SubmissionPatch, SubmissionState};

use crate::transport::SubmissionTransport;

/// Result of a single send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered and removed from the queue.
    Sent,
    /// Attempt failed; the record stays queued as `Failed`.
    Failed,
    /// Another attempt for this id is already outstanding; nothing was done.
    AlreadyInFlight,
    /// No such record; nothing was done.
    NotFound,
}

/// Tally of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
}

/// Drives queued submissions to the remote endpoint.
///
/// Retry is event-driven: a send happens on explicit user action or when a
/// connectivity-restored trigger calls [`SyncEngine::drain_queue`]. There is
/// no timer-based backoff and no attempt ceiling.
pub struct SyncEngine {
    store: Arc<RwLock<QueueStore>>,
    transport: Arc<dyn SubmissionTransport>,
    draining: AtomicBool,
}

impl SyncEngine {
    /// Create a new sync engine over the given store and transport.
    pub fn new(store: Arc<RwLock<QueueStore>>, transport: Arc<dyn SubmissionTransport>) -> Self {
        Self {
            store,
            transport,
            draining: AtomicBool::new(false),
        }
    }

    /// Shared handle to the underlying queue store.
    pub fn store(&self) -> Arc<RwLock<QueueStore>> {
        self.store.clone()
    }

    /// Enqueue a new occurrence and attempt to send it right away.
    ///
    /// Callers that know they are offline should enqueue via the store
    /// directly and let a later drain pick the record up.
    pub async fn submit(
        &self,
        payload: OccurrencePayload,
    ) -> Result<(SubmissionId, SendOutcome)> {
        let id = self.store.write().await.enqueue(payload).await?;
        let outcome = self.attempt_send(&id).await;
        Ok((id, outcome))
    }

    /// Perform one send attempt for the given record.
    ///
    /// The in-flight transition happens under the store write lock, so no
    /// two attempts for the same id can be outstanding at once; the network
    /// await itself runs outside the lock.
    pub async fn attempt_send(&self, id: &SubmissionId) -> SendOutcome {
        let payload = {
            let mut store = self.store.write().await;

            let Some(item) = store.get(id) else {
                debug!("Send requested for unknown submission {}", id);
                return SendOutcome::NotFound;
            };
            if item.state == SubmissionState::InFlight {
                debug!("Submission {} already in flight, skipping", id);
                return SendOutcome::AlreadyInFlight;
            }

            let payload = item.payload.clone();
            let attempts = item.attempts + 1;
            store
                .update(
                    id,
                    SubmissionPatch {
                        state: Some(SubmissionState::InFlight),
                        attempts: Some(attempts),
                        last_attempt_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;
            payload
        };

        match self.transport.submit(&payload).await {
            Ok(()) => {
                info!("Submission {} delivered", id);
                self.store.write().await.remove(id).await;
                SendOutcome::Sent
            }
            Err(e) => {
                warn!("Submission {} failed: {}", id, e);
                self.store
                    .write()
                    .await
                    .update(
                        id,
                        SubmissionPatch {
                            state: Some(SubmissionState::Failed),
                            last_error: Some(Some(e.to_string())),
                            ..Default::default()
                        },
                    )
                    .await;
                SendOutcome::Failed
            }
        }
    }

    /// Manually retry one record.
    ///
    /// Returns whether the record ended up delivered. Unknown or already
    /// in-flight ids return `false` with no state change.
    pub async fn retry(&self, id: &SubmissionId) -> bool {
        matches!(self.attempt_send(id).await, SendOutcome::Sent)
    }

    /// Attempt every pending and failed record once, sequentially, in
    /// insertion order.
    ///
    /// A second drain while one is running is a no-op returning an empty
    /// report.
    pub async fn drain_queue(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("Drain already in progress, skipping");
            return DrainReport::default();
        }

        let ids: Vec<SubmissionId> = {
            let store = self.store.read().await;
            store
                .list_all()
                .into_iter()
                .filter(|i| {
                    matches!(i.state, SubmissionState::Pending | SubmissionState::Failed)
                })
                .map(|i| i.id)
                .collect()
        };

        let mut report = DrainReport::default();
        if ids.is_empty() {
            debug!("Queue is empty, nothing to sync");
        } else {
            info!("Draining queue with {} items", ids.len());
            for id in &ids {
                match self.attempt_send(id).await {
                    SendOutcome::Sent => report.sent += 1,
                    SendOutcome::Failed => report.failed += 1,
                    SendOutcome::AlreadyInFlight | SendOutcome::NotFound => {}
                }
            }
            info!(
                "Drain complete: {} sent, {} failed",
                report.sent, report.failed
            );
        }

        self.draining.store(false, Ordering::SeqCst);
        report
    }

    /// Discard all failed records (explicit user reset).
    pub async fn clear_failed(&self) -> usize {
        self.store.write().await.clear_failed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relato_common::{Coordinates, Error, OccurrenceCategory, UrgencyLevel};
    use relato_store::MemoryBackend;
    use std::sync::atomic::AtomicUsize;

    fn payload(description: &str) -> OccurrencePayload {
        OccurrencePayload {
            category: OccurrenceCategory::Incident,
            description: description.to_string(),
            location: Coordinates {
                longitude: -46.63,
                latitude: -23.55,
                approx_address: "Largo do Arouche".to_string(),
            },
            urgency: UrgencyLevel::Critical,
            photo_url: None,
            anonymous: false,
            privacy_consent: true,
            reporter_identity_id: Some("citizen-7".to_string()),
        }
    }

    /// Transport that always accepts, counting calls.
    struct AcceptingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SubmissionTransport for AcceptingTransport {
        async fn submit(&self, _payload: &OccurrencePayload) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Transport that always rejects with the given status.
    struct RejectingTransport {
        status: u16,
    }

    #[async_trait]
    impl SubmissionTransport for RejectingTransport {
        async fn submit(&self, _payload: &OccurrencePayload) -> Result<()> {
            Err(Error::Http(self.status))
        }
    }

    async fn engine_with(transport: Arc<dyn SubmissionTransport>) -> SyncEngine {
        let store = QueueStore::open(Arc::new(MemoryBackend::new())).await;
        SyncEngine::new(Arc::new(RwLock::new(store)), transport)
    }

    #[tokio::test]
    async fn test_successful_send_removes_record() {
        let transport = Arc::new(AcceptingTransport {
            calls: AtomicUsize::new(0),
        });
        let engine = engine_with(transport.clone()).await;

        let (id, outcome) = engine.submit(payload("pothole")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let store = engine.store();
        let store = store.read().await;
        assert!(store.get(&id).is_none());
        assert_eq!(store.count_pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_increments_attempts_once() {
        let engine = engine_with(Arc::new(RejectingTransport { status: 500 })).await;

        let (id, outcome) = engine.submit(payload("pothole")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Failed);

        let store = engine.store();
        let store = store.read().await;
        let item = store.get(&id).unwrap();
        assert_eq!(item.state, SubmissionState::Failed);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.last_error.as_deref(), Some("HTTP error: status 500"));
        assert!(item.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_on_removed_id_returns_false() {
        let engine = engine_with(Arc::new(AcceptingTransport {
            calls: AtomicUsize::new(0),
        }))
        .await;

        let (id, _) = engine.submit(payload("done")).await.unwrap();

        // Already sent and removed; no storage mutation happens.
        let snapshot_before = engine.store().read().await.list_all().len();
        assert!(!engine.retry(&id).await);
        assert_eq!(engine.store().read().await.list_all().len(), snapshot_before);
    }

    #[tokio::test]
    async fn test_retry_failed_record_counts_second_attempt() {
        let engine = engine_with(Arc::new(RejectingTransport { status: 503 })).await;

        let (id, _) = engine.submit(payload("retry me")).await.unwrap();
        assert!(!engine.retry(&id).await);

        let store = engine.store();
        let store = store.read().await;
        assert_eq!(store.get(&id).unwrap().attempts, 2);
        assert_eq!(store.get(&id).unwrap().state, SubmissionState::Failed);
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_reports_nothing() {
        let engine = engine_with(Arc::new(AcceptingTransport {
            calls: AtomicUsize::new(0),
        }))
        .await;

        assert_eq!(engine.drain_queue().await, DrainReport::default());
    }
}
