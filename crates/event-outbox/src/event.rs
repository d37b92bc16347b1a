//! Event payloads and their delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// An already-serialized event payload.
///
/// Immutable once built; ownership moves into the outbox on enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event(Vec<u8>);

impl Event {
    /// Serialize a value to JSON and wrap it as an event.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(Self)
    }

    /// Raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Fill in top-level fields from `context` that the event does not set.
    ///
    /// Payloads that are not JSON objects come back unchanged.
    pub fn with_context(self, context: &BTreeMap<String, Value>) -> Self {
        if context.is_empty() {
            return self;
        }
        let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(&self.0) else {
            return self;
        };

        for (key, value) in context {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }
        match serde_json::to_vec(&Value::Object(object)) {
            Ok(bytes) => Self(bytes),
            Err(_) => self,
        }
    }
}

impl From<Vec<u8>> for Event {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Event {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<String> for Event {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for Event {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Stable identity of one stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An event held by a store together with its delivery history.
///
/// `attempted()` is derived from the attempt counter, so an entry can never
/// claim an attempt without counting one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    id: EventId,
    sequence: u64,
    payload: Event,
    attempts: u32,
    last_attempt: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Wrap a freshly admitted event. Stores call this from `set`.
    pub fn new(sequence: u64, payload: Event) -> Self {
        Self {
            id: EventId::new(),
            sequence,
            payload,
            attempts: 0,
            last_attempt: None,
            created_at: Utc::now(),
        }
    }

    /// Rebuild an entry read back from a durable backend.
    pub fn restore(
        id: EventId,
        sequence: u64,
        payload: Event,
        attempts: u32,
        last_attempt: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            payload,
            attempts,
            last_attempt,
            created_at,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// Admission order within the owning store.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &Event {
        &self.payload
    }

    pub fn attempted(&self) -> bool {
        self.attempts > 0
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Count one failed send made at `now`.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(now);
    }
}
