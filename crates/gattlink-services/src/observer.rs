//! Observer registry — ordered, synchronous fan-out of transfer events.

use std::sync::{Arc, PoisonError, RwLock};

use crate::report::{PacketEvent, TransferReport};

/// Receives transfer events. Both hooks default to no-ops.
pub trait TransferObserver: Send + Sync {
    /// Called after every write attempt, accepted or not.
    fn on_packet(&self, _event: &PacketEvent) {}

    /// Called once per payload when its transfer ends.
    fn on_transfer(&self, _report: &TransferReport) {}
}

/// Shared list of observers. Clones share the same list.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<Vec<Arc<dyn TransferObserver>>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Returns false if it was already registered.
    pub fn add(&self, observer: Arc<dyn TransferObserver>) -> bool {
        let mut list = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        if list.iter().any(|o| same(o, &observer)) {
            return false;
        }
        list.push(observer);
        true
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove(&self, observer: &Arc<dyn TransferObserver>) -> bool {
        let mut list = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|o| !same(o, observer));
        list.len() != before
    }

    pub fn clear(&self) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn packet(&self, event: &PacketEvent) {
        for observer in self.snapshot() {
            observer.on_packet(event);
        }
    }

    pub(crate) fn transfer(&self, report: &TransferReport) {
        for observer in self.snapshot() {
            observer.on_transfer(report);
        }
    }

    // Observers may add or remove observers from inside a callback.
    fn snapshot(&self) -> Vec<Arc<dyn TransferObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn same(a: &Arc<dyn TransferObserver>, b: &Arc<dyn TransferObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
