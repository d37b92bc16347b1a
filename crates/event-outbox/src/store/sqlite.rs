//! SQLite-backed store. Entries survive a restart of the owning process.

use super::EventStore;
use crate::{Event, EventId, StoreError, StoreResult, StoredEvent};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS outbox_events (
        event_id TEXT PRIMARY KEY NOT NULL,
        sequence_number INTEGER NOT NULL,
        payload BLOB NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_outbox_events_sequence
        ON outbox_events(sequence_number);
";

/// Raw row as read from SQLite, decoded outside the row callback.
type EventRow = (String, i64, Vec<u8>, i64, Option<String>, String);

/// Durable [`EventStore`] over a single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    next_sequence: u64,
}

impl SqliteStore {
    /// Open (or create) a store file, resuming any entries left from a
    /// previous run.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        let store = Self::from_connection(conn)?;
        let pending = store.count()?;
        if pending > 0 {
            info!(path = %path.display(), count = pending, "Resumed pending outbox events");
        }
        Ok(store)
    }

    /// Open a throwaway store, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;

        let max_sequence: Option<i64> = conn
            .query_row(
                "SELECT MAX(sequence_number) FROM outbox_events",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        Ok(Self {
            conn,
            next_sequence: max_sequence.map(|s| s as u64 + 1).unwrap_or(0),
        })
    }
}

impl EventStore for SqliteStore {
    fn set(&mut self, event: Event) -> StoreResult<StoredEvent> {
        let stored = StoredEvent::new(self.next_sequence, event);
        self.conn.execute(
            "INSERT INTO outbox_events (event_id, sequence_number, payload, attempts, last_attempt_at, created_at)
             VALUES (?1, ?2, ?3, 0, NULL, ?4)",
            params![
                stored.id().to_string(),
                stored.sequence() as i64,
                stored.payload().as_bytes(),
                stored.created_at().to_rfc3339(),
            ],
        )?;
        self.next_sequence += 1;

        debug!(event_id = %stored.id(), sequence = stored.sequence(), "Stored event");
        Ok(stored)
    }

    fn update(&mut self, event: &StoredEvent) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE outbox_events SET attempts = ?2, last_attempt_at = ?3 WHERE event_id = ?1",
            params![
                event.id().to_string(),
                event.attempts() as i64,
                event.last_attempt().map(|t| t.to_rfc3339()),
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(event.id()));
        }
        Ok(())
    }

    fn remove(&mut self, event: &StoredEvent) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM outbox_events WHERE event_id = ?1",
            params![event.id().to_string()],
        )?;
        Ok(())
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_all(&self) -> StoreResult<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT event_id, sequence_number, payload, attempts, last_attempt_at, created_at
             FROM outbox_events
             ORDER BY sequence_number ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<EventRow>, _>>()?;

        rows.into_iter().map(decode_row).collect()
    }
}

fn decode_row(row: EventRow) -> StoreResult<StoredEvent> {
    let (event_id, sequence, payload, attempts, last_attempt_at, created_at) = row;

    let id = EventId::parse(&event_id)
        .map_err(|e| StoreError::InvalidData(format!("event_id {event_id}: {e}")))?;
    let last_attempt = last_attempt_at.as_deref().map(parse_timestamp).transpose()?;

    Ok(StoredEvent::restore(
        id,
        sequence as u64,
        Event::from(payload),
        attempts as u32,
        last_attempt,
        parse_timestamp(&created_at)?,
    ))
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("timestamp {s}: {e}")))
}
