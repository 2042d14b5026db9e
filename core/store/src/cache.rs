//! Last-known-good snapshot of the server occurrences list.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use relato_common::Occurrence;

use crate::backend::KeyValueBackend;

/// Fixed storage key for the serialized snapshot.
pub const CACHE_KEY: &str = "occurrences_cache";
/// Duplicate timestamp key for lightweight freshness reads.
pub const CACHE_TIMESTAMP_KEY: &str = "occurrences_cache_timestamp";

const MAX_AGE_DAYS: i64 = 7;

/// Persisted layout: the full record list plus its capture time in
/// epoch milliseconds.
#[derive(Debug, Serialize, Deserialize)]
struct CachedData {
    occurrences: Vec<Occurrence>,
    timestamp: i64,
}

/// Read cache of the occurrences list for offline availability.
///
/// Written wholesale on every successful list fetch. A snapshot older than
/// seven days is treated as absent; the load that detects expiry also clears
/// the stored value. Errors never reach the caller: a cache that cannot be
/// written or read is simply absent.
pub struct OccurrenceCache {
    backend: Arc<dyn KeyValueBackend>,
    max_age: Duration,
}

impl OccurrenceCache {
    /// Create a cache with the default 7-day expiry.
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            max_age: Duration::days(MAX_AGE_DAYS),
        }
    }

    /// Override the expiry window (tests).
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Overwrite the snapshot with the given records and the current time.
    pub async fn save(&self, occurrences: &[Occurrence]) {
        let data = CachedData {
            occurrences: occurrences.to_vec(),
            timestamp: Utc::now().timestamp_millis(),
        };

        let json = match serde_json::to_string(&data) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize occurrences cache: {}", e);
                return;
            }
        };

        if let Err(e) = self.backend.write(CACHE_KEY, &json).await {
            warn!("Failed to cache occurrences: {}", e);
            return;
        }
        if let Err(e) = self
            .backend
            .write(CACHE_TIMESTAMP_KEY, &data.timestamp.to_string())
            .await
        {
            warn!("Failed to write cache timestamp: {}", e);
        }

        debug!("Cached {} occurrences", data.occurrences.len());
    }

    /// Return the cached records if present and fresh.
    ///
    /// An expired snapshot is cleared and reported as absent. Date-typed
    /// fields come back reconstructed from their serialized string form.
    pub async fn load(&self) -> Option<Vec<Occurrence>> {
        let raw = match self.backend.read(CACHE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read occurrences cache: {}", e);
                return None;
            }
        };

        let data: CachedData = match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to parse occurrences cache: {}", e);
                return None;
            }
        };

        let age = Utc::now().timestamp_millis() - data.timestamp;
        if age > self.max_age.num_milliseconds() {
            debug!("Occurrences cache expired, clearing");
            self.clear().await;
            return None;
        }

        Some(data.occurrences)
    }

    /// Capture time of the current snapshot, if any.
    pub async fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.backend.read(CACHE_TIMESTAMP_KEY).await.ok()??;
        let millis: i64 = raw.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Remove the snapshot and its timestamp.
    pub async fn clear(&self) {
        if let Err(e) = self.backend.remove(CACHE_KEY).await {
            warn!("Failed to clear occurrences cache: {}", e);
        }
        if let Err(e) = self.backend.remove(CACHE_TIMESTAMP_KEY).await {
            warn!("Failed to clear cache timestamp: {}", e);
        }
    }
}
