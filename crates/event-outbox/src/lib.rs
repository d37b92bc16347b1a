//! Store-and-forward buffer for analytics events.
//!
//! This crate provides:
//! - OutboxClient: bounded ingestion queue in front of a background dispatcher
//! - Dispatcher: single-owner loop that admits, flushes and retries events
//! - EventStore: holding area for unconfirmed events (memory or SQLite)
//! - HttpEmitter: per-event or bulk multipart delivery to the collector
//! - RetryPolicy: per-event attempt budget

pub mod config;

mod client;
mod dispatcher;
mod emitter;
mod error;
mod event;
mod retry;
mod store;
mod validation;

pub use client::{EventProducer, OutboxClient};
pub use config::{OutboxConfig, OutboxConfigBuilder};
pub use dispatcher::{Dispatcher, DispatcherStats, FlushReport, ShutdownReport};
pub use emitter::{Emitter, HttpEmitter};
pub use error::{
    EmitError, EmitResult, OutboxError, OutboxResult, StoreError, StoreResult, ValidationError,
};
pub use event::{Event, EventId, StoredEvent};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{EventStore, MemoryStore, SqliteStore};
pub use validation::{EventValidator, JsonEventValidator};
