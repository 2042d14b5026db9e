//! Durable persistence for Relato's offline submission queue and read cache.
//!
//! This module provides a trait-based interface for key-value persistence
//! backends (filesystem, in-memory) plus the two stores built on top of it:
//! the submission outbox and the last-known-good occurrences snapshot.
//!
//! # Design Principles
//! - Backend isolation: no filesystem logic in the queue or cache
//! - Whole-value writes: every persisted value is replaced atomically
//! - Degraded operation: broken persistence never crashes a caller

pub mod backend;
pub mod cache;
pub mod events;
pub mod queue;

pub use backend::{FileBackend, KeyValueBackend, MemoryBackend};
pub use cache::OccurrenceCache;
pub use events::{QueueChanged, QueueEvents};
pub use queue::{QueueStore, QueuedSubmission, SubmissionPatch, SubmissionState, OUTBOX_KEY};
