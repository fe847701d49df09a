//! Typed event fan-out.
//!
//! Built on a broadcast channel so listeners are isolated from one another:
//! a slow listener lags and drops its own backlog, a dropped listener just
//! closes its receiver, and neither outcome ever reaches the emitter or the
//! other listeners. Delivery is FIFO per listener.

use tokio::sync::broadcast;

/// Default buffered capacity per listener.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A typed publish/subscribe bus.
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a bus with the given per-listener buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Publish an event to all current listeners.
    pub fn emit(&self, event: E) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped: all listeners went away");
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
