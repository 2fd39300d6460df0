//! Pending-request table keyed by correlation id.
//!
//! A requester registers an id before sending, then awaits the receiver.
//! Whoever reads responses off the channel calls [`Correlator::complete`].
//! Cancelling (or dropping the receiver after a timeout) guarantees a late
//! response is discarded rather than applied.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

pub struct Correlator<T> {
    pending: Mutex<HashMap<String, oneshot::Sender<T>>>,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Correlator<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in `id`. A second registration replaces the first.
    pub fn register(&self, id: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.to_string(), tx);
        rx
    }

    /// Hand `value` to the waiter for `id`.
    ///
    /// Returns `false` when nobody is waiting (unknown id, cancelled, or
    /// the waiter already gave up); the value is dropped.
    pub fn complete(&self, id: &str, value: T) -> bool {
        let sender = self.lock().remove(id);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::debug!(correlation_id = id, "Dropping response with no pending request");
                false
            }
        }
    }

    /// Forget `id`. Returns whether it was pending.
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<T>>> {
        // A poisoned table is still structurally valid.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
