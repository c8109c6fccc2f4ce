//! Gattlink integration test harness.
//!
//! Every test wires the full stack in-process:
//!
//!   TransferLink -> TransferWorker -> TransferDriver -> LoopbackPeripheral
//!
//! and runs on tokio's paused clock, so backoffs and ack latencies cost
//! no wall time.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use gattlink_core::{GattlinkConfig, Reassembler};
use gattlink_services::{
    CompletionSignal, DriverSettings, LoopbackPeripheral, ObserverRegistry, PacketEvent,
    TransferDriver, TransferId, TransferLink, TransferObserver, TransferReport, TransferTracker,
    TransferWorker,
};

mod queueing;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Records the order in which packets and reports went past.
#[derive(Default)]
pub struct EventLog {
    pub packets: Mutex<Vec<(TransferId, bool)>>,
    pub finished: Mutex<Vec<TransferId>>,
}

impl TransferObserver for EventLog {
    fn on_packet(&self, event: &PacketEvent) {
        self.packets
            .lock()
            .unwrap()
            .push((event.transfer_id, event.accepted));
    }

    fn on_transfer(&self, report: &TransferReport) {
        self.finished.lock().unwrap().push(report.id);
    }
}

pub struct Harness {
    pub link: TransferLink,
    pub peripheral: Arc<LoopbackPeripheral>,
    pub tracker: TransferTracker,
    pub log: Arc<EventLog>,
    pub shutdown: broadcast::Sender<()>,
    pub worker: JoinHandle<Result<()>>,
    pub packet_size: usize,
}

/// Start a worker on the current runtime with `config`.
pub fn start(config: &GattlinkConfig) -> Harness {
    let completion = CompletionSignal::new();
    let peripheral = Arc::new(LoopbackPeripheral::new(completion.clone(), &config.loopback));

    let tracker = TransferTracker::new();
    let log = Arc::new(EventLog::default());
    let observers = ObserverRegistry::new();
    observers.add(Arc::new(tracker.clone()));
    observers.add(log.clone());

    let driver = TransferDriver::new(
        peripheral.clone(),
        &completion,
        DriverSettings::from_config(config),
        observers,
    )
    .expect("valid packet size");

    let (link, request_rx) = gattlink_services::channel(config.queue.request_capacity);
    let (shutdown, _) = broadcast::channel(1);
    let worker = tokio::spawn(
        TransferWorker::new(
            driver,
            request_rx,
            shutdown.subscribe(),
            config.queue.request_capacity,
            config.queue.backlog_gap(),
        )
        .run(),
    );

    Harness {
        link,
        peripheral,
        tracker,
        log,
        shutdown,
        worker,
        packet_size: config.link.packet_size,
    }
}

pub fn start_default() -> Harness {
    start(&GattlinkConfig::default())
}

/// Deterministic, non-repeating-looking payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Rebuild one message from the packets the peripheral accepted.
pub fn reassemble(packets: &[Bytes], len: usize, packet_size: usize) -> Result<Bytes> {
    let mut reassembler = Reassembler::new(len, packet_size);
    for (i, packet) in packets.iter().enumerate() {
        if let Some(message) = reassembler.push(packet)? {
            if i + 1 != packets.len() {
                bail!("message complete after {} of {} packets", i + 1, packets.len());
            }
            return Ok(message);
        }
    }
    bail!(
        "message incomplete: {} of {} bytes",
        reassembler.received(),
        len
    )
}
