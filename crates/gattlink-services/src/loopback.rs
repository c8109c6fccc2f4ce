//! Loopback peripheral — an in-process stand-in for a radio characteristic.
//!
//! Accepted packets are recorded in order and the completion signal fires
//! after `ack_latency`. Refusals come from a script first, then from
//! `reject_probability`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use gattlink_core::config::LoopbackConfig;

use crate::writer::{CompletionSignal, PacketWriter};

pub struct LoopbackPeripheral {
    completion: CompletionSignal,
    ack_latency: Duration,
    reject_probability: f64,
    script: Mutex<VecDeque<bool>>,
    ready: AtomicBool,
    received: Mutex<Vec<Bytes>>,
}

impl LoopbackPeripheral {
    pub fn new(completion: CompletionSignal, config: &LoopbackConfig) -> Self {
        Self {
            completion,
            ack_latency: config.ack_latency(),
            reject_probability: config.reject_probability.clamp(0.0, 1.0),
            script: Mutex::new(VecDeque::new()),
            ready: AtomicBool::new(true),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Builder form of [`script`](Self::script).
    pub fn with_script(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.script(results);
        self
    }

    /// Queue accept (`true`) / refuse (`false`) results for the next
    /// submissions. Scripted results take precedence over the probability.
    pub fn script(&self, results: impl IntoIterator<Item = bool>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(results);
    }

    /// Simulate the characteristic appearing or going away.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Accepted packets so far, in submission order.
    pub fn received(&self) -> Vec<Bytes> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_received(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.received.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn decide(&self) -> bool {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match scripted {
            Some(accepted) => accepted,
            None if self.reject_probability > 0.0 => {
                !rand::thread_rng().gen_bool(self.reject_probability)
            }
            None => true,
        }
    }

    fn complete_later(&self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) if !self.ack_latency.is_zero() => h,
            _ => {
                self.completion.write_completed();
                return;
            }
        };
        let completion = self.completion.clone();
        let latency = self.ack_latency;
        handle.spawn(async move {
            tokio::time::sleep(latency).await;
            completion.write_completed();
        });
    }
}

impl PacketWriter for LoopbackPeripheral {
    fn submit(&self, packet: &[u8]) -> bool {
        if !self.is_ready() || !self.decide() {
            tracing::trace!(len = packet.len(), "loopback refused write");
            return false;
        }
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Bytes::copy_from_slice(packet));
        self.complete_later();
        true
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
