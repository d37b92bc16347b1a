//! Producer-facing handle over a running dispatcher.

use crate::dispatcher::Control;
use crate::{
    Dispatcher, DispatcherStats, Emitter, Event, EventStore, FlushReport, HttpEmitter, MemoryStore,
    OutboxConfig, OutboxError, OutboxResult, ShutdownReport,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Capacity of the control channel; commands are rare.
const CONTROL_CAPACITY: usize = 16;

/// Cloneable enqueue handle for producer tasks and threads.
#[derive(Clone)]
pub struct EventProducer {
    events: mpsc::Sender<Event>,
}

impl EventProducer {
    /// Enqueue an event, waiting while the queue is full.
    pub async fn enqueue(&self, event: impl Into<Event>) -> OutboxResult<()> {
        self.events
            .send(event.into())
            .await
            .map_err(|_| OutboxError::Closed)
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, event: impl Into<Event>) -> OutboxResult<()> {
        self.events.try_send(event.into()).map_err(|e| match e {
            TrySendError::Full(_) => OutboxError::QueueFull,
            TrySendError::Closed(_) => OutboxError::Closed,
        })
    }

    /// Enqueue from a synchronous thread, blocking while the queue is full.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_enqueue(&self, event: impl Into<Event>) -> OutboxResult<()> {
        self.events
            .blocking_send(event.into())
            .map_err(|_| OutboxError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Owner of the background dispatcher.
///
/// Dropping the client without calling [`close`](Self::close) stops the
/// loop the same way, minus the report.
pub struct OutboxClient {
    producer: EventProducer,
    control: mpsc::Sender<Control>,
    worker: JoinHandle<()>,
}

impl OutboxClient {
    /// Start the dispatcher loop on the current tokio runtime.
    pub fn spawn<S, E>(dispatcher: Dispatcher<S, E>) -> Self
    where
        S: EventStore + 'static,
        E: Emitter + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(dispatcher.config().queue_buffer.max(1));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);

        let worker = tokio::spawn(async move {
            dispatcher.run(events_rx, control_rx).await;
        });

        Self {
            producer: EventProducer { events: events_tx },
            control: control_tx,
            worker,
        }
    }

    /// Validate `config` and start an HTTP-backed outbox over an in-memory store.
    pub fn connect(config: OutboxConfig) -> OutboxResult<Self> {
        Self::connect_with_store(config, MemoryStore::new())
    }

    /// Validate `config` and start an HTTP-backed outbox over `store`.
    pub fn connect_with_store<S>(config: OutboxConfig, store: S) -> OutboxResult<Self>
    where
        S: EventStore + 'static,
    {
        config.validate()?;
        let emitter = HttpEmitter::new(&config)?;
        info!(endpoint = %emitter.endpoint(), "Connecting outbox");
        Ok(Self::spawn(Dispatcher::new(config, store, emitter)))
    }

    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    pub async fn enqueue(&self, event: impl Into<Event>) -> OutboxResult<()> {
        self.producer.enqueue(event).await
    }

    pub fn try_enqueue(&self, event: impl Into<Event>) -> OutboxResult<()> {
        self.producer.try_enqueue(event)
    }

    /// Flush now. Covers every event whose enqueue completed before the call.
    pub async fn flush(&self) -> OutboxResult<FlushReport> {
        self.request(Control::Flush).await
    }

    pub async fn stats(&self) -> OutboxResult<DispatcherStats> {
        self.request(Control::Stats).await
    }

    /// Final flush and stop. Events still queued behind the shutdown are
    /// discarded and counted in the report.
    pub async fn close(self) -> OutboxResult<ShutdownReport> {
        let report = self.request(Control::Shutdown).await?;
        if let Err(e) = self.worker.await {
            error!(error = %e, "Outbox dispatcher task failed");
        }
        Ok(report)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Control) -> OutboxResult<T> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(command(tx))
            .await
            .map_err(|_| OutboxError::Closed)?;
        rx.await.map_err(|_| OutboxError::Closed)
    }
}
