//! Retry budget applied to events whose delivery failed.

use crate::StoredEvent;
use chrono::{DateTime, Utc};

/// What the dispatcher does with an event after a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Write the updated bookkeeping back; try again next flush.
    Retry,
    /// Budget exhausted; remove the event permanently.
    GiveUp,
}

/// Bounded (or unlimited) retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// `max_retries == 0` means unlimited.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn unlimited() -> Self {
        Self { max_retries: 0 }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_retries == 0
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Count the failed attempt on `event` and decide its fate.
    ///
    /// An event gives up on the attempt that pushes its count past the
    /// budget, so a budget of N allows N + 1 sends in total.
    pub fn record_failure(&self, event: &mut StoredEvent, now: DateTime<Utc>) -> RetryDecision {
        event.record_attempt(now);

        if !self.is_unlimited() && event.attempts() > self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry
        }
    }
}
