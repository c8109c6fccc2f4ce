//! Transfer tracking — keeps recent reports and running totals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::observer::TransferObserver;
use crate::report::{PacketEvent, TransferId, TransferOutcome, TransferReport};

const DEFAULT_RETAIN: usize = 256;

#[derive(Default)]
struct Totals {
    transfers: AtomicU64,
    delivered: AtomicU64,
    degraded: AtomicU64,
    aborted: AtomicU64,
    cancelled: AtomicU64,
    unavailable: AtomicU64,
    rejected: AtomicU64,
    bytes: AtomicU64,
    packets_submitted: AtomicU64,
    packets_refused: AtomicU64,
    retries: AtomicU64,
    unretried_failures: AtomicU64,
    ack_timeouts: AtomicU64,
}

/// Aggregate counters since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub transfers: u64,
    pub delivered: u64,
    pub degraded: u64,
    pub aborted: u64,
    pub cancelled: u64,
    pub unavailable: u64,
    pub rejected: u64,
    pub bytes: u64,
    pub packets_submitted: u64,
    pub packets_refused: u64,
    pub retries: u64,
    pub unretried_failures: u64,
    pub ack_timeouts: u64,
}

impl TransferStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Observer that records finished transfers.
#[derive(Clone)]
pub struct TransferTracker {
    reports: Arc<DashMap<TransferId, TransferReport>>,
    totals: Arc<Totals>,
    retain: usize,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::with_retain(DEFAULT_RETAIN)
    }

    /// Keep at most `retain` reports; older ids are evicted first.
    pub fn with_retain(retain: usize) -> Self {
        Self {
            reports: Arc::new(DashMap::new()),
            totals: Arc::new(Totals::default()),
            retain: retain.max(1),
        }
    }

    pub fn get(&self, id: TransferId) -> Option<TransferReport> {
        self.reports.get(&id).map(|r| r.clone())
    }

    /// Number of reports currently retained.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn stats(&self) -> TransferStats {
        let t = &self.totals;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TransferStats {
            transfers: load(&t.transfers),
            delivered: load(&t.delivered),
            degraded: load(&t.degraded),
            aborted: load(&t.aborted),
            cancelled: load(&t.cancelled),
            unavailable: load(&t.unavailable),
            rejected: load(&t.rejected),
            bytes: load(&t.bytes),
            packets_submitted: load(&t.packets_submitted),
            packets_refused: load(&t.packets_refused),
            retries: load(&t.retries),
            unretried_failures: load(&t.unretried_failures),
            ack_timeouts: load(&t.ack_timeouts),
        }
    }

    /// Log totals, plus each retained transfer that did not end cleanly.
    pub fn print_stats(&self) {
        let stats = self.stats();
        if stats.transfers == 0 {
            return;
        }

        tracing::info!(
            transfers = stats.transfers,
            delivered = stats.delivered,
            degraded = stats.degraded,
            aborted = stats.aborted,
            cancelled = stats.cancelled,
            bytes = stats.bytes,
            retries = stats.retries,
            unretried_failures = stats.unretried_failures,
            ack_timeouts = stats.ack_timeouts,
            "transfer tracker stats"
        );

        for entry in self.reports.iter() {
            let report = entry.value();
            if matches!(report.outcome, TransferOutcome::Degraded | TransferOutcome::Aborted) {
                tracing::info!(
                    transfer_id = report.id,
                    outcome = ?report.outcome,
                    unretried_failures = report.unretried_failures,
                    "  lossy transfer"
                );
            }
        }
    }

    fn evict(&self) {
        while self.reports.len() > self.retain {
            let oldest = self.reports.iter().map(|e| *e.key()).min();
            match oldest {
                Some(id) => {
                    self.reports.remove(&id);
                }
                None => break,
            }
        }
    }
}

impl Default for TransferTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferObserver for TransferTracker {
    fn on_packet(&self, event: &PacketEvent) {
        self.totals.packets_submitted.fetch_add(1, Ordering::Relaxed);
        if !event.accepted {
            self.totals.packets_refused.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_transfer(&self, report: &TransferReport) {
        let t = &self.totals;
        t.transfers.fetch_add(1, Ordering::Relaxed);
        t.bytes.fetch_add(report.bytes as u64, Ordering::Relaxed);
        t.retries.fetch_add(report.retries as u64, Ordering::Relaxed);
        t.unretried_failures
            .fetch_add(report.unretried_failures as u64, Ordering::Relaxed);
        t.ack_timeouts
            .fetch_add(report.ack_timeouts as u64, Ordering::Relaxed);

        let counter = match report.outcome {
            TransferOutcome::Delivered => &t.delivered,
            TransferOutcome::Degraded => &t.degraded,
            TransferOutcome::Aborted => &t.aborted,
            TransferOutcome::Cancelled => &t.cancelled,
            TransferOutcome::ChannelUnavailable => &t.unavailable,
            TransferOutcome::Rejected => &t.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.reports.insert(report.id, report.clone());
        self.evict();
    }
}
