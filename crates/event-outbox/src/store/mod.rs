//! Holding area for events that have not yet been confirmed by the collector.
//!
//! A store has no concurrency guarantees of its own. Mutators take
//! `&mut self`, and the dispatcher loop is the only owner, so
//! implementations need no internal locking.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{Event, StoreResult, StoredEvent};

/// Mutation contract every backing store satisfies.
///
/// - `count()` always equals the number of live entries.
/// - `get_all()` returns only live entries, in admission order.
/// - `update()` fails with [`StoreError::NotFound`](crate::StoreError::NotFound)
///   when the entry has already been removed.
/// - `remove()` of an absent entry is a successful no-op.
pub trait EventStore: Send {
    /// Admit a new event and return its stored form.
    fn set(&mut self, event: Event) -> StoreResult<StoredEvent>;

    /// Persist retry bookkeeping for an existing entry.
    fn update(&mut self, event: &StoredEvent) -> StoreResult<()>;

    /// Drop an entry after delivery or retry exhaustion.
    fn remove(&mut self, event: &StoredEvent) -> StoreResult<()>;

    fn count(&self) -> StoreResult<usize>;

    /// Snapshot of every live entry.
    fn get_all(&self) -> StoreResult<Vec<StoredEvent>>;
}

impl<S: EventStore + ?Sized> EventStore for Box<S> {
    fn set(&mut self, event: Event) -> StoreResult<StoredEvent> {
        (**self).set(event)
    }

    fn update(&mut self, event: &StoredEvent) -> StoreResult<()> {
        (**self).update(event)
    }

    fn remove(&mut self, event: &StoredEvent) -> StoreResult<()> {
        (**self).remove(event)
    }

    fn count(&self) -> StoreResult<usize> {
        (**self).count()
    }

    fn get_all(&self) -> StoreResult<Vec<StoredEvent>> {
        (**self).get_all()
    }
}
