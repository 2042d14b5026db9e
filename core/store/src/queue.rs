//! Durable submission outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use relato_common::{Error, OccurrencePayload, Result, SubmissionId};

use crate::backend::KeyValueBackend;
use crate::events::{QueueChanged, QueueEvents};

/// Fixed storage key for the serialized outbox array.
pub const OUTBOX_KEY: &str = "occurrence_outbox";

/// Sync lifecycle state of a queued submission.
///
/// `Sent` is terminal: a record reaching it is removed from the store
/// immediately and never persisted in that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Waiting for a first send attempt.
    Pending,
    /// A send attempt is currently outstanding.
    InFlight,
    /// Last send attempt failed; eligible for retry.
    Failed,
    /// Delivered to the server.
    Sent,
}

/// A submission waiting in the outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSubmission {
    /// Identifier assigned at enqueue time, stable across retries.
    pub id: SubmissionId,
    /// The occurrence report to deliver.
    pub payload: OccurrencePayload,
    /// Current sync state.
    pub state: SubmissionState,
    /// Number of send attempts made so far.
    pub attempts: u32,
    /// Failure reason of the last attempt, if any.
    pub last_error: Option<String>,
    /// When the submission entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// When the last send attempt started.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedSubmission {
    fn new(payload: OccurrencePayload) -> Self {
        Self {
            id: SubmissionId::generate(),
            payload,
            state: SubmissionState::Pending,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// Whether this record still needs delivering.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.state,
            SubmissionState::Pending | SubmissionState::InFlight | SubmissionState::Failed
        )
    }
}

/// Partial state change merged into a stored record by [`QueueStore::update`].
#[derive(Debug, Clone, Default)]
pub struct SubmissionPatch {
    pub state: Option<SubmissionState>,
    pub attempts: Option<u32>,
    /// `Some(None)` clears a previously recorded error.
    pub last_error: Option<Option<String>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl SubmissionPatch {
    /// Patch that only transitions the state.
    pub fn state(state: SubmissionState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

/// Durable, insertion-ordered store of pending submissions.
///
/// The in-memory vector is the source of truth; every mutation rewrites the
/// full persisted array under [`OUTBOX_KEY`] and publishes a queue-changed
/// token. Broken persistence degrades to memory-only operation so the
/// submission flow stays usable.
pub struct QueueStore {
    backend: Arc<dyn KeyValueBackend>,
    items: Vec<QueuedSubmission>,
    events: QueueEvents,
}

impl QueueStore {
    /// Open the store, loading any previously persisted queue.
    ///
    /// A read or parse failure is logged and the store starts empty rather
    /// than failing the caller. A record persisted as `InFlight` means the
    /// process died mid-send; the store has no concurrent writer, so such a
    /// record is stale and is reset to `Pending` for the next drain.
    pub async fn open(backend: Arc<dyn KeyValueBackend>) -> Self {
        let mut items = match backend.read(OUTBOX_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<QueuedSubmission>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Failed to parse persisted queue, starting empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read persisted queue, starting empty: {}", e);
                Vec::new()
            }
        };

        for item in &mut items {
            if item.state == SubmissionState::InFlight {
                warn!(
                    "Submission {} was interrupted mid-send, resetting to pending",
                    item.id
                );
                item.state = SubmissionState::Pending;
            }
        }

        Self {
            backend,
            items,
            events: QueueEvents::new(),
        }
    }

    /// Append a new `Pending` record and persist it.
    ///
    /// The record stays in the in-memory view even when the backend write
    /// fails, so a submission is never silently lost; the failure is still
    /// signalled as [`Error::Storage`].
    pub async fn enqueue(&mut self, payload: OccurrencePayload) -> Result<SubmissionId> {
        let item = QueuedSubmission::new(payload);
        let id = item.id.clone();
        self.items.push(item);

        let persisted = self.persist().await;
        self.events.publish();

        debug!("Queued occurrence submission {}", id);
        match persisted {
            Ok(()) => Ok(id),
            Err(e) => Err(Error::Storage(format!(
                "submission {id} queued in memory only: {e}"
            ))),
        }
    }

    /// Insertion-order snapshot of all queued submissions.
    pub fn list_all(&self) -> Vec<QueuedSubmission> {
        self.items.clone()
    }

    /// Insertion-order snapshot of failed submissions.
    pub fn list_failed(&self) -> Vec<QueuedSubmission> {
        self.items
            .iter()
            .filter(|i| i.state == SubmissionState::Failed)
            .cloned()
            .collect()
    }

    /// Count of submissions not yet terminally sent.
    pub fn count_pending(&self) -> usize {
        self.items.iter().filter(|i| i.is_pending()).count()
    }

    /// Look up a submission by id.
    pub fn get(&self, id: &SubmissionId) -> Option<&QueuedSubmission> {
        self.items.iter().find(|i| &i.id == id)
    }

    /// Merge a partial state change into the stored record.
    ///
    /// Unknown ids are a silent no-op; persistence failures are logged and
    /// swallowed. Queue corruption must never crash the caller.
    pub async fn update(&mut self, id: &SubmissionId, patch: SubmissionPatch) {
        let Some(item) = self.items.iter_mut().find(|i| &i.id == id) else {
            debug!("Ignoring update for unknown submission {}", id);
            return;
        };

        if let Some(state) = patch.state {
            item.state = state;
        }
        if let Some(attempts) = patch.attempts {
            item.attempts = attempts;
        }
        if let Some(last_error) = patch.last_error {
            item.last_error = last_error;
        }
        if let Some(last_attempt_at) = patch.last_attempt_at {
            item.last_attempt_at = Some(last_attempt_at);
        }

        if let Err(e) = self.persist().await {
            warn!("Failed to persist queue update for {}: {}", id, e);
        }
        self.events.publish();
    }

    /// Delete a record. Idempotent.
    pub async fn remove(&mut self, id: &SubmissionId) {
        let before = self.items.len();
        self.items.retain(|i| &i.id != id);
        if self.items.len() == before {
            return;
        }

        if let Err(e) = self.persist().await {
            warn!("Failed to persist queue removal of {}: {}", id, e);
        }
        self.events.publish();
        debug!("Removed submission {} from queue", id);
    }

    /// Discard every failed record (explicit user reset).
    pub async fn clear_failed(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|i| i.state != SubmissionState::Failed);
        let cleared = before - self.items.len();
        if cleared == 0 {
            return 0;
        }

        if let Err(e) = self.persist().await {
            warn!("Failed to persist queue after clearing failed items: {}", e);
        }
        self.events.publish();
        cleared
    }

    /// Subscribe to queue-changed notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<QueueChanged> {
        self.events.subscribe()
    }

    async fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.items)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.backend.write(OUTBOX_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use async_trait::async_trait;
    use relato_common::{Coordinates, OccurrenceCategory, UrgencyLevel};

    fn payload(description: &str) -> OccurrencePayload {
        OccurrencePayload {
            category: OccurrenceCategory::WasteDisposal,
            description: description.to_string(),
            location: Coordinates {
                longitude: -46.63,
                latitude: -23.55,
                approx_address: "Praça da Sé".to_string(),
            },
            urgency: UrgencyLevel::Low,
            photo_url: None,
            anonymous: true,
            privacy_consent: true,
            reporter_identity_id: None,
        }
    }

    async fn open_memory_store() -> QueueStore {
        QueueStore::open(Arc::new(MemoryBackend::new())).await
    }

    /// Backend whose writes always fail, for degraded-mode tests.
    struct BrokenBackend;

    #[async_trait]
    impl KeyValueBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn read(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("read failed".to_string()))
        }

        async fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("write failed".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("remove failed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_enqueue_starts_pending() {
        let mut store = open_memory_store().await;
        let id = store.enqueue(payload("overflowing bin")).await.unwrap();

        let item = store.get(&id).unwrap();
        assert_eq!(item.state, SubmissionState::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.last_error.is_none());
        assert_eq!(store.count_pending(), 1);
    }

    #[tokio::test]
    async fn test_list_all_preserves_insertion_order() {
        let mut store = open_memory_store().await;
        let a = store.enqueue(payload("first")).await.unwrap();
        let b = store.enqueue(payload("second")).await.unwrap();
        let c = store.enqueue(payload("third")).await.unwrap();

        let ids: Vec<_> = store.list_all().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_noop() {
        let mut store = open_memory_store().await;
        store.enqueue(payload("x")).await.unwrap();

        let ghost = SubmissionId::generate();
        store
            .update(&ghost, SubmissionPatch::state(SubmissionState::Failed))
            .await;

        assert_eq!(store.list_failed().len(), 0);
        assert_eq!(store.list_all().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut store = open_memory_store().await;
        let id = store.enqueue(payload("x")).await.unwrap();

        store.remove(&id).await;
        store.remove(&id).await;
        assert_eq!(store.list_all().len(), 0);
    }

    #[tokio::test]
    async fn test_mutations_publish_change_events() {
        let mut store = open_memory_store().await;
        let mut rx = store.subscribe();

        let id = store.enqueue(payload("x")).await.unwrap();
        assert!(rx.try_recv().is_ok());

        store
            .update(&id, SubmissionPatch::state(SubmissionState::Failed))
            .await;
        assert!(rx.try_recv().is_ok());

        store.remove(&id).await;
        assert!(rx.try_recv().is_ok());

        // Removing an already absent id is not externally visible.
        store.remove(&id).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let backend = Arc::new(MemoryBackend::new());

        let id = {
            let mut store = QueueStore::open(backend.clone()).await;
            store.enqueue(payload("durable")).await.unwrap()
        };

        let store = QueueStore::open(backend).await;
        assert_eq!(store.list_all().len(), 1);
        assert_eq!(store.get(&id).unwrap().payload.description, "durable");
    }

    #[tokio::test]
    async fn test_reopen_resets_interrupted_in_flight_to_pending() {
        let backend = Arc::new(MemoryBackend::new());

        let id = {
            let mut store = QueueStore::open(backend.clone()).await;
            let id = store.enqueue(payload("interrupted")).await.unwrap();
            store
                .update(&id, SubmissionPatch::state(SubmissionState::InFlight))
                .await;
            id
        };

        let store = QueueStore::open(backend).await;
        let item = store.get(&id).unwrap();
        assert_eq!(item.state, SubmissionState::Pending);
        assert_eq!(store.count_pending(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_persisted_queue_degrades_to_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write(OUTBOX_KEY, "not json {").await.unwrap();

        let store = QueueStore::open(backend).await;
        assert_eq!(store.list_all().len(), 0);
        assert_eq!(store.count_pending(), 0);
    }

    #[tokio::test]
    async fn test_broken_backend_keeps_item_in_memory() {
        let mut store = QueueStore::open(Arc::new(BrokenBackend)).await;

        let err = store.enqueue(payload("keep me")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        // The submission is not lost: it remains visible and pending.
        assert_eq!(store.count_pending(), 1);
        assert_eq!(store.list_all().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_failed_removes_only_failed() {
        let mut store = open_memory_store().await;
        let a = store.enqueue(payload("a")).await.unwrap();
        let b = store.enqueue(payload("b")).await.unwrap();

        store
            .update(&a, SubmissionPatch::state(SubmissionState::Failed))
            .await;

        assert_eq!(store.clear_failed().await, 1);
        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_some());
        assert_eq!(store.clear_failed().await, 0);
    }

    #[test]
    fn test_count_matches_enqueues_minus_removals() {
        use proptest::prelude::*;

        proptest!(|(ops in proptest::collection::vec(any::<bool>(), 1..40))| {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (listed, pending, expected) = rt.block_on(async {
                let mut store = open_memory_store().await;
                let mut live: Vec<SubmissionId> = Vec::new();

                // true = enqueue, false = remove the oldest live item
                for op in ops {
                    if op {
                        live.push(store.enqueue(payload("p")).await.unwrap());
                    } else if !live.is_empty() {
                        let id = live.remove(0);
                        store.remove(&id).await;
                    }
                }

                (store.list_all().len(), store.count_pending(), live.len())
            });

            prop_assert_eq!(listed, expected);
            prop_assert_eq!(pending, expected);
        });
    }
}
