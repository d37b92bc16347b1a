//! The single background loop that owns the store.
//!
//! Every store access happens here, one stimulus at a time: an admitted
//! event, a timer tick, or a control command from the client. A flush runs
//! to completion before the next stimulus is looked at, so flushes never
//! overlap and the store needs no locking.

use crate::{
    EmitError, Emitter, Event, EventStore, EventValidator, JsonEventValidator, OutboxConfig,
    RetryDecision, RetryPolicy, StoredEvent,
};
use chrono::Utc;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Events confirmed by the collector and removed from the store.
    pub delivered: usize,
    /// Failed events written back for a later flush.
    pub retried: usize,
    /// Failed events removed after exhausting the retry budget.
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.retried == 0 && self.dropped == 0
    }
}

/// Running totals kept by the dispatcher.
///
/// `admitted - delivered - dropped == stored` holds as long as the store
/// reported no failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Events inserted into the store.
    pub admitted: u64,
    /// Events discarded by strict validation.
    pub rejected: u64,
    /// Events confirmed by the collector.
    pub delivered: u64,
    /// Events discarded after exhausting retries.
    pub dropped: u64,
    /// Store operations that failed.
    pub store_failures: u64,
    /// Flushes that found at least one stored event.
    pub flushes: u64,
    /// Entries currently held by the store.
    pub stored: usize,
}

/// What the loop reports when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Result of the last flush.
    pub final_flush: FlushReport,
    /// Events still queued when shutdown began; never stored.
    pub discarded: usize,
    /// Totals at exit.
    pub stats: DispatcherStats,
}

/// Requests the client sends into the loop.
pub(crate) enum Control {
    Flush(oneshot::Sender<FlushReport>),
    Stats(oneshot::Sender<DispatcherStats>),
    Shutdown(oneshot::Sender<ShutdownReport>),
}

/// Admission, flush and retry orchestration over one store and one emitter.
pub struct Dispatcher<S, E> {
    config: OutboxConfig,
    store: S,
    emitter: E,
    retry: RetryPolicy,
    validator: Box<dyn EventValidator>,
    stats: DispatcherStats,
}

impl<S: EventStore, E: Emitter> Dispatcher<S, E> {
    /// Create a dispatcher. Strict mode uses a [`JsonEventValidator`] over
    /// `config.required_fields` unless replaced with [`with_validator`](Self::with_validator).
    pub fn new(config: OutboxConfig, store: S, emitter: E) -> Self {
        let validator = JsonEventValidator::with_required_fields(config.required_fields.clone());
        Self {
            retry: config.retry_policy(),
            config,
            store,
            emitter,
            validator: Box::new(validator),
            stats: DispatcherStats::default(),
        }
    }

    /// Replace the validator applied in strict mode.
    pub fn with_validator(mut self, validator: impl EventValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Current totals. A failed store count reports `stored: 0` and is
    /// itself counted as a store failure.
    pub fn stats(&mut self) -> DispatcherStats {
        let stored = match self.store.count() {
            Ok(count) => count,
            Err(e) => {
                self.stats.store_failures += 1;
                error!(error = %e, "Failed to count stored events");
                0
            }
        };
        DispatcherStats { stored, ..self.stats }
    }

    /// Apply the default context, validate and store one event, flushing
    /// when the store reaches `flush_count`. Returns the flush report if a
    /// flush ran.
    pub async fn admit(&mut self, event: Event) -> Option<FlushReport> {
        let event = event.with_context(&self.config.default_context);

        if self.config.strict {
            if let Err(e) = self.validator.validate(&event) {
                self.stats.rejected += 1;
                warn!(error = %e, bytes = event.len(), "Event failed validation, dropping");
                return None;
            }
        }

        match self.store.set(event) {
            Ok(stored) => {
                self.stats.admitted += 1;
                debug!(event_id = %stored.id(), sequence = stored.sequence(), "Admitted event");
            }
            Err(e) => {
                self.stats.store_failures += 1;
                error!(error = %e, "Failed to store event, dropping");
                return None;
            }
        }

        match self.store.count() {
            Ok(count) if count >= self.config.flush_count => {
                debug!(count, flush_count = self.config.flush_count, "Flush threshold reached");
                Some(self.flush().await)
            }
            Ok(_) => None,
            Err(e) => {
                self.stats.store_failures += 1;
                error!(error = %e, "Failed to count stored events");
                None
            }
        }
    }

    /// Attempt delivery of everything currently stored.
    pub async fn flush(&mut self) -> FlushReport {
        let pending = match self.store.count() {
            Ok(0) => return FlushReport::default(),
            Ok(count) => count,
            Err(e) => {
                self.stats.store_failures += 1;
                error!(error = %e, "Failed to count stored events");
                return FlushReport::default();
            }
        };

        let events = match self.store.get_all() {
            Ok(events) => events,
            Err(e) => {
                self.stats.store_failures += 1;
                error!(error = %e, "Failed to read stored events");
                return FlushReport::default();
            }
        };

        let started = Instant::now();
        let report = if self.config.bulk {
            self.emit_bulk(events).await
        } else {
            self.emit_each(events).await
        };

        self.stats.flushes += 1;
        self.stats.delivered += report.delivered as u64;
        self.stats.dropped += report.dropped as u64;

        debug!(
            pending,
            delivered = report.delivered,
            retried = report.retried,
            dropped = report.dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            bulk = self.config.bulk,
            "Flush complete"
        );
        report
    }

    async fn emit_each(&mut self, events: Vec<StoredEvent>) -> FlushReport {
        let mut report = FlushReport::default();

        for event in events {
            match self.emitter.send_one(event.payload().as_bytes()).await {
                Ok(()) => {
                    if self.remove(&event) {
                        report.delivered += 1;
                    }
                }
                Err(err) => self.handle_failure(event, &err, &mut report),
            }
        }

        report
    }

    async fn emit_bulk(&mut self, events: Vec<StoredEvent>) -> FlushReport {
        let mut report = FlushReport::default();

        let result = {
            let payloads: Vec<&[u8]> = events.iter().map(|e| e.payload().as_bytes()).collect();
            self.emitter.send_bulk(&payloads).await
        };

        match result {
            Ok(()) => {
                for event in &events {
                    if self.remove(event) {
                        report.delivered += 1;
                    }
                }
            }
            Err(err) => {
                warn!(count = events.len(), error = %err, "Bulk send failed");
                for event in events {
                    self.handle_failure(event, &err, &mut report);
                }
            }
        }

        report
    }

    fn handle_failure(&mut self, mut event: StoredEvent, err: &EmitError, report: &mut FlushReport) {
        match self.retry.record_failure(&mut event, Utc::now()) {
            RetryDecision::GiveUp => {
                warn!(
                    event_id = %event.id(),
                    attempts = event.attempts(),
                    max_retries = self.retry.max_retries(),
                    error = %err,
                    "Dropping event after exhausting retries"
                );
                if self.remove(&event) {
                    report.dropped += 1;
                }
            }
            RetryDecision::Retry => {
                if self.config.debug {
                    debug!(
                        event_id = %event.id(),
                        attempts = event.attempts(),
                        error = %err,
                        "Event send failed, keeping for retry"
                    );
                }
                match self.store.update(&event) {
                    Ok(()) => report.retried += 1,
                    Err(e) => {
                        self.stats.store_failures += 1;
                        error!(event_id = %event.id(), error = %e, "Failed to update event");
                    }
                }
            }
        }
    }

    /// Remove `event`, reporting whether the store let go of it. An entry
    /// that could not be removed stays eligible for the next flush.
    fn remove(&mut self, event: &StoredEvent) -> bool {
        match self.store.remove(event) {
            Ok(()) => true,
            Err(e) => {
                self.stats.store_failures += 1;
                error!(event_id = %event.id(), error = %e, "Failed to remove event");
                false
            }
        }
    }

    /// Final flush, then refuse and count whatever is still queued.
    async fn shutdown(&mut self, events: &mut mpsc::Receiver<Event>) -> ShutdownReport {
        events.close();
        let final_flush = self.flush().await;

        let mut discarded = 0;
        while events.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(count = discarded, "Discarded events queued after shutdown began");
        }

        ShutdownReport {
            final_flush,
            discarded,
            stats: self.stats(),
        }
    }

    /// Run the loop until shutdown, returning the store.
    ///
    /// Queued events are taken before control commands, so a command sees
    /// every event whose enqueue completed before it was sent. Ticks missed
    /// during a slow flush are delayed rather than replayed.
    pub(crate) async fn run(
        mut self,
        mut events: mpsc::Receiver<Event>,
        mut control: mpsc::Receiver<Control>,
    ) -> S {
        // interval_at panics on a zero period
        let period = self.config.flush_interval().max(Duration::from_millis(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            flush_interval_ms = self.config.flush_interval_ms,
            flush_count = self.config.flush_count,
            bulk = self.config.bulk,
            strict = self.config.strict,
            max_retries = self.config.max_retries,
            "Outbox dispatcher started"
        );

        loop {
            tokio::select! {
                biased;

                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        self.admit(event).await;
                    }
                    None => {
                        self.shutdown(&mut events).await;
                        break;
                    }
                },
                command = control.recv() => match command {
                    Some(Control::Flush(reply)) => {
                        let report = self.flush().await;
                        let _ = reply.send(report);
                    }
                    Some(Control::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Control::Shutdown(reply)) => {
                        let report = self.shutdown(&mut events).await;
                        let _ = reply.send(report);
                        break;
                    }
                    None => {
                        // Client dropped without close
                        self.shutdown(&mut events).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        info!(stats = ?self.stats(), "Outbox dispatcher stopped");
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmitResult, MemoryStore, ValidationError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Emitter whose outcome can be flipped by the test.
    #[derive(Clone, Default)]
    struct SwitchEmitter {
        failing: Arc<AtomicBool>,
        requests: Arc<AtomicUsize>,
    }

    impl SwitchEmitter {
        fn failing() -> Self {
            let emitter = Self::default();
            emitter.failing.store(true, Ordering::SeqCst);
            emitter
        }

        fn outcome(&self) -> EmitResult<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(EmitError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Emitter for SwitchEmitter {
        async fn send_one(&self, _payload: &[u8]) -> EmitResult<()> {
            self.outcome()
        }

        async fn send_bulk(&self, _payloads: &[&[u8]]) -> EmitResult<()> {
            self.outcome()
        }
    }

    fn config() -> crate::config::OutboxConfigBuilder {
        OutboxConfig::builder("http://localhost:8001").flush_count(100)
    }

    #[tokio::test]
    async fn test_flush_on_empty_store_is_noop() {
        let emitter = SwitchEmitter::default();
        let mut dispatcher = Dispatcher::new(config().build().unwrap(), MemoryStore::new(), emitter.clone());

        assert!(dispatcher.flush().await.is_empty());
        assert_eq!(emitter.requests.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats().flushes, 0);
    }

    #[tokio::test]
    async fn test_failed_event_is_updated_not_reinserted() {
        let mut dispatcher = Dispatcher::new(
            config().max_retries(5).build().unwrap(),
            MemoryStore::new(),
            SwitchEmitter::failing(),
        );

        dispatcher.admit(Event::from("e")).await;
        let report = dispatcher.flush().await;

        assert_eq!(report, FlushReport { delivered: 0, retried: 1, dropped: 0 });
        let all = dispatcher.store().get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].attempts(), 1);
        assert!(all[0].attempted());
    }

    #[tokio::test]
    async fn test_recovery_after_failures_delivers() {
        let emitter = SwitchEmitter::failing();
        let mut dispatcher = Dispatcher::new(
            config().max_retries(3).build().unwrap(),
            MemoryStore::new(),
            emitter.clone(),
        );

        dispatcher.admit(Event::from("e")).await;
        dispatcher.flush().await;
        dispatcher.flush().await;

        emitter.failing.store(false, Ordering::SeqCst);
        let report = dispatcher.flush().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(dispatcher.store().count().unwrap(), 0);
        assert_eq!(dispatcher.stats().delivered, 1);
        assert_eq!(dispatcher.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_custom_validator_applies_only_in_strict_mode() {
        struct RejectAll;
        impl EventValidator for RejectAll {
            fn validate(&self, _event: &Event) -> Result<(), ValidationError> {
                Err(ValidationError::Empty)
            }
        }

        let mut lenient = Dispatcher::new(config().build().unwrap(), MemoryStore::new(), SwitchEmitter::default())
            .with_validator(RejectAll);
        lenient.admit(Event::from("anything")).await;
        assert_eq!(lenient.store().count().unwrap(), 1);

        let mut strict = Dispatcher::new(
            config().strict(true).build().unwrap(),
            MemoryStore::new(),
            SwitchEmitter::default(),
        )
        .with_validator(RejectAll);
        strict.admit(Event::from(r#"{"ok":true}"#)).await;
        assert_eq!(strict.store().count().unwrap(), 0);
        assert_eq!(strict.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_threshold_returns_flush_report() {
        let mut dispatcher = Dispatcher::new(
            config().flush_count(2).build().unwrap(),
            MemoryStore::new(),
            SwitchEmitter::default(),
        );

        assert!(dispatcher.admit(Event::from("1")).await.is_none());
        let report = dispatcher.admit(Event::from("2")).await;
        assert_eq!(report.map(|r| r.delivered), Some(2));
    }

    #[tokio::test]
    async fn test_shutdown_discards_events_still_queued() {
        let emitter = SwitchEmitter::default();
        let mut dispatcher = Dispatcher::new(config().build().unwrap(), MemoryStore::new(), emitter.clone());
        dispatcher.admit(Event::from("stored")).await;

        let (tx, mut rx) = mpsc::channel(8);
        for n in 0..3 {
            tx.send(Event::from(format!("queued-{n}"))).await.unwrap();
        }

        let report = dispatcher.shutdown(&mut rx).await;

        assert_eq!(report.discarded, 3);
        assert_eq!(report.final_flush.delivered, 1);
        assert_eq!(report.stats.admitted, 1);
        assert_eq!(report.stats.stored, 0);
        assert_eq!(emitter.requests.load(Ordering::SeqCst), 1);
        assert!(tx.send(Event::from("late")).await.is_err());
    }
}
