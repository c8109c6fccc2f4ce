//! The radio-facing seam: the write primitive and its completion signal.
//!
//! Both are owned by the platform GATT layer. The transfer driver only
//! consumes their contract, so any radio stack (or the loopback peripheral)
//! can sit behind them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A characteristic that accepts small fixed-size writes.
pub trait PacketWriter: Send + Sync {
    /// Hand one packet to the radio.
    ///
    /// Returns immediately. `true` means the write was accepted for
    /// transmission, not that the peer received it.
    fn submit(&self, packet: &[u8]) -> bool;

    /// Whether the target service and characteristic are present at all.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Raised by the radio layer each time a characteristic write finishes.
///
/// Completions are counted, not correlated: a waiter only learns that
/// "the most recent write" finished.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Report that a write finished on the air.
    pub fn write_completed(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Total completions reported so far.
    pub fn completed(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn waiter(&self) -> CompletionWaiter {
        CompletionWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver-side view of a [`CompletionSignal`].
#[derive(Debug)]
pub struct CompletionWaiter {
    rx: watch::Receiver<u64>,
}

impl CompletionWaiter {
    /// Discard completions seen so far. Call right before submitting.
    pub fn arm(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Wait for a completion newer than the last `arm`, bounded by `timeout`.
    pub async fn wait(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.rx.changed()).await,
            Ok(Ok(()))
        )
    }
}
