//! Event Notifier
//!
//! Registry of file-received listeners for one receiver session. Delivery is
//! synchronous, in registration order, on the task that finished the transfer.
//! A listener that returns an error or panics is logged and skipped; the
//! remaining listeners still receive the event.

use crate::types::{FileReceivedEvent, ListenerId};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Receives a notification for every stored push
pub trait FileReceivedListener: Send + Sync {
    /// Called once per stored file with the running session count
    fn file_received(&self, event: &FileReceivedEvent) -> crate::Result<()>;
}

impl<F> FileReceivedListener for F
where
    F: Fn(&FileReceivedEvent) -> crate::Result<()> + Send + Sync,
{
    fn file_received(&self, event: &FileReceivedEvent) -> crate::Result<()> {
        self(event)
    }
}

type Entry = (ListenerId, Arc<dyn FileReceivedListener>);

/// Ordered listener registry
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.len())
            .finish()
    }
}

impl Notifier {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener at the end of the delivery order
    pub fn register(&self, listener: Arc<dyn FileReceivedListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener; returns how many handled it without failing
    pub fn notify(&self, event: &FileReceivedEvent) -> usize {
        // Snapshot so listeners may (un)register from inside their callback
        let snapshot: Vec<Entry> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.file_received(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(listener = id.get(), count = event.count, error = %e, "file-received listener failed");
                }
                Err(_) => {
                    tracing::warn!(listener = id.get(), count = event.count, "file-received listener panicked");
                }
            }
        }
        delivered
    }
}
