//! Relato Sync Engine
//!
//! This module reconciles the offline submission queue with the remote
//! occurrences endpoint, including:
//! - Guarded single-send per submission (no duplicate concurrent attempts)
//! - Sequential queue drain with a re-entrancy guard
//! - Event-driven retry (user action or connectivity recovery, no timers)
//! - Connectivity tracking with a short "just reconnected" window

pub mod connectivity;
pub mod engine;
pub mod transport;

// Re-export main types
pub use connectivity::{ConnectivityEvent, ConnectivityObserver, RECONNECT_GRACE};
pub use engine::{DrainReport, SendOutcome, SyncEngine};
pub use transport::{HttpTransport, SubmissionTransport, SEND_TIMEOUT};
