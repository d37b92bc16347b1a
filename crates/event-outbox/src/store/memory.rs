//! In-memory store. Unflushed entries are lost when the process exits.

use super::EventStore;
use crate::{Event, EventId, StoreError, StoreResult, StoredEvent};
use std::collections::HashMap;

/// HashMap-backed [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<EventId, StoredEvent>,
    next_sequence: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryStore {
    fn set(&mut self, event: Event) -> StoreResult<StoredEvent> {
        let stored = StoredEvent::new(self.next_sequence, event);
        self.next_sequence += 1;
        self.entries.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    fn update(&mut self, event: &StoredEvent) -> StoreResult<()> {
        match self.entries.get_mut(&event.id()) {
            Some(entry) => {
                *entry = event.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(event.id())),
        }
    }

    fn remove(&mut self, event: &StoredEvent) -> StoreResult<()> {
        self.entries.remove(&event.id());
        Ok(())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.entries.len())
    }

    fn get_all(&self) -> StoreResult<Vec<StoredEvent>> {
        let mut all: Vec<_> = self.entries.values().cloned().collect();
        all.sort_by_key(StoredEvent::sequence);
        Ok(all)
    }
}
