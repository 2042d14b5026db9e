//! Online/offline transition tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// How long [`ConnectivityObserver::was_recently_offline`] stays true after
/// recovery, so the UI can show a "reconnected" message before reverting.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(3);

const CHANNEL_CAPACITY: usize = 16;

/// Connectivity transition broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Tracks runtime online/offline transitions.
///
/// The observer only reports state and fires transition events; wiring the
/// online transition to a queue drain is the caller's responsibility.
pub struct ConnectivityObserver {
    online: AtomicBool,
    offline_seen: AtomicBool,
    recovered_at: Mutex<Option<Instant>>,
    grace: Duration,
    tx: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityObserver {
    /// Create an observer with the given initial state.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            online: AtomicBool::new(initially_online),
            offline_seen: AtomicBool::new(false),
            recovered_at: Mutex::new(None),
            grace: RECONNECT_GRACE,
            tx,
        }
    }

    /// Override the recovery grace window (tests).
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// True while offline and for a short window after recovery.
    pub fn was_recently_offline(&self) -> bool {
        if self.offline_seen.load(Ordering::SeqCst) {
            return true;
        }
        match *self.recovered_at.lock().unwrap() {
            Some(at) => at.elapsed() <= self.grace,
            None => false,
        }
    }

    /// Feed a connectivity reading into the observer.
    ///
    /// Only actual transitions mutate state and broadcast an event; repeated
    /// readings of the same state are ignored.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        if online {
            info!("Connectivity restored");
            self.offline_seen.store(false, Ordering::SeqCst);
            *self.recovered_at.lock().unwrap() = Some(Instant::now());
            let _ = self.tx.send(ConnectivityEvent::Online);
        } else {
            warn!("Connectivity lost");
            self.offline_seen.store(true, Ordering::SeqCst);
            let _ = self.tx.send(ConnectivityEvent::Offline);
        }
    }

    /// Subscribe to connectivity transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.tx.subscribe()
    }
}
