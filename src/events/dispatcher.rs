use super::CacheEvent;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Error type listeners may return; it is logged and discarded
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Synchronous observer of cache events
pub trait CacheListener: Send + Sync {
    fn handle(&self, event: &CacheEvent) -> Result<(), ListenerError>;
}

impl<F> CacheListener for F
where
    F: Fn(&CacheEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn handle(&self, event: &CacheEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

struct DispatcherInner {
    listeners: RwLock<Vec<Arc<dyn CacheListener>>>,
    sender: broadcast::Sender<CacheEvent>,
    failures: AtomicU64,
}

/// Fans cache events out to registered listeners and broadcast subscribers
///
/// Listeners run inline, in registration order, once the triggering
/// operation has finished. A listener that errors or panics is logged and
/// skipped; the remaining listeners still run. Clones share registrations.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.subscriber_count())
            .field("failures", &self.failure_count())
            .finish()
    }
}

impl EventDispatcher {
    /// Create a dispatcher whose broadcast channel buffers `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: RwLock::new(Vec::new()),
                sender,
                failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn listen(&self, listener: impl CacheListener + 'static) {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Subscribe to events asynchronously; slow receivers may observe `Lagged`
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Total listener failures (errors and panics) swallowed so far
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    pub fn clear_listeners(&self) {
        self.inner.listeners.write().clear();
    }

    /// Whether anyone would observe an event; lets callers skip building one
    pub fn has_observers(&self) -> bool {
        self.listener_count() > 0 || self.subscriber_count() > 0
    }

    pub fn dispatch(&self, event: CacheEvent) {
        // Snapshot so a listener may register further listeners without deadlocking
        let listeners: Vec<Arc<dyn CacheListener>> = self.inner.listeners.read().clone();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.inner.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(event = event.name(), key = event.key(), error = %e, "Cache listener failed");
                }
                Err(_) => {
                    self.inner.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(event = event.name(), key = event.key(), "Cache listener panicked");
                }
            }
        }

        if self.subscriber_count() > 0 {
            // No receivers left between the check and the send is fine
            let _ = self.inner.sender.send(event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(1000)
    }
}
