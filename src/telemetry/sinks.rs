use super::events::QuotaEvent;
use futures::future::{self, BoxFuture, Ready};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// Future returned by the built-in sinks, which finish synchronously.
pub type Done = Ready<Result<(), Infallible>>;

/// A telemetry sink that consumes quota events.
pub trait TelemetrySink:
    tower::Service<QuotaEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// Delivery failure; `emit_best_effort` drops it.
    type SinkError: std::error::Error + Send + 'static;
}

/// Wait for `sink` to be ready, deliver `event`, and ignore any failure.
pub async fn emit_best_effort<S>(sink: S, event: QuotaEvent)
where
    S: tower::Service<QuotaEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready) = sink.ready_oneshot().await {
        let _ = ready.call(event).await;
    }
}

/// Drops every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<QuotaEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Done;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: QuotaEvent) -> Self::Future {
        future::ok(())
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Writes each event as a `tracing` record.
///
/// Rejections log at `info`, store faults at `warn`, admissions at `debug` so
/// the hot path stays quiet under the default filter.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<QuotaEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Done;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        match &event {
            QuotaEvent::Admitted { .. } => {
                tracing::debug!(target: "quotagate::telemetry", kind = event.kind(), event = %event, "quota_event")
            }
            QuotaEvent::StoreFault { .. } => {
                tracing::warn!(target: "quotagate::telemetry", kind = event.kind(), event = %event, "quota_event")
            }
            _ => tracing::info!(target: "quotagate::telemetry", kind = event.kind(), event = %event, "quota_event"),
        }
        future::ok(())
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory, oldest evicted first.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<QuotaEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Holds up to 10k events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<QuotaEvent> {
        self.events.lock().map(|g| g.iter().cloned().collect()).unwrap_or_default()
    }

    /// Events whose [`QuotaEvent::kind`] equals `kind`.
    pub fn of_kind(&self, kind: &str) -> Vec<QuotaEvent> {
        self.events().into_iter().filter(|e| e.kind() == kind).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<QuotaEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Done;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        if let Ok(mut guard) = self.events.lock() {
            while guard.len() >= self.capacity {
                guard.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            guard.push_back(event);
        }
        future::ok(())
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

trait ErasedSink: Send + Sync {
    fn emit(&self, event: QuotaEvent) -> BoxFuture<'static, ()>;
}

impl<S> ErasedSink for S
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    fn emit(&self, event: QuotaEvent) -> BoxFuture<'static, ()> {
        Box::pin(emit_best_effort(self.clone(), event))
    }
}

/// Type-erased, cheaply clonable handle to any [`TelemetrySink`].
///
/// Lets the engine and the HTTP state carry a sink without a type parameter.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<dyn ErasedSink>,
}

impl SharedSink {
    pub fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        S::Future: Send + 'static,
    {
        Self { inner: Arc::new(sink) }
    }

    /// Deliver `event`, ignoring sink errors.
    pub async fn emit(&self, event: QuotaEvent) {
        self.inner.emit(event).await;
    }
}

impl Default for SharedSink {
    fn default() -> Self {
        Self::new(NullSink)
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSink").finish_non_exhaustive()
    }
}
