//! gattlinkd — Gattlink transfer daemon.
//!
//! Reads hex-encoded payloads from stdin, one per line, and pushes each
//! through the transfer engine to a loopback peripheral. Every finished
//! payload is printed to stdout as a JSON report, and the run's totals
//! follow as a final JSON line on exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use gattlink_core::{GattlinkConfig, Reassembler};
use gattlink_services::{
    CompletionSignal, DriverSettings, LoopbackPeripheral, ObserverRegistry, TransferDriver,
    TransferError, TransferLink, TransferObserver, TransferOutcome, TransferReport,
    TransferTracker, TransferWorker,
};

const BACKLOG_RETRY: Duration = Duration::from_millis(10);

/// Prints one JSON line per finished payload.
struct ReportPrinter;

impl TransferObserver for ReportPrinter {
    fn on_transfer(&self, report: &TransferReport) {
        match report.to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode report"),
        }
    }
}

/// Plays the receiving side: reassembles what the loopback peripheral took in.
struct PeerView {
    peripheral: Arc<LoopbackPeripheral>,
    packet_size: usize,
}

impl TransferObserver for PeerView {
    fn on_transfer(&self, report: &TransferReport) {
        let packets = self.peripheral.take_received();
        if report.outcome != TransferOutcome::Delivered {
            return;
        }

        let mut reassembler = Reassembler::new(report.bytes, self.packet_size);
        let mut message = None;
        for packet in &packets {
            match reassembler.push(packet) {
                Ok(done) => message = done.or(message),
                Err(e) => {
                    tracing::warn!(transfer_id = report.id, error = %e, "peer rejected packet");
                    return;
                }
            }
        }
        match message {
            Some(m) => tracing::info!(
                transfer_id = report.id,
                payload = %hex::encode_upper(&m),
                "peer reassembled payload"
            ),
            None if report.bytes == 0 => {
                tracing::info!(transfer_id = report.id, "peer received empty payload")
            }
            None => tracing::warn!(
                transfer_id = report.id,
                received = reassembler.received(),
                expected = report.bytes,
                "peer payload incomplete"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("--version") {
        println!("gattlinkd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load config
    if let Err(e) = GattlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GattlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GattlinkConfig::default()
    });
    tracing::info!(
        packet_size = config.link.packet_size,
        max_submit_retries = config.transfer.max_submit_retries,
        exhausted_retries = ?config.transfer.exhausted_retries,
        "gattlinkd starting"
    );

    // Peripheral and observers
    let completion = CompletionSignal::new();
    let peripheral = Arc::new(LoopbackPeripheral::new(completion.clone(), &config.loopback));

    let tracker = TransferTracker::new();
    let observers = ObserverRegistry::new();
    observers.add(Arc::new(tracker.clone()));
    observers.add(Arc::new(PeerView {
        peripheral: peripheral.clone(),
        packet_size: config.link.packet_size,
    }));
    observers.add(Arc::new(ReportPrinter));

    let driver = TransferDriver::new(
        peripheral.clone(),
        &completion,
        DriverSettings::from_config(&config),
        observers,
    )
    .context("failed to build transfer driver")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let (link, request_rx) = gattlink_services::channel(config.queue.request_capacity);

    let mut worker_task = tokio::spawn(
        TransferWorker::new(
            driver,
            request_rx,
            shutdown_tx.subscribe(),
            config.queue.request_capacity,
            config.queue.backlog_gap(),
        )
        .run(),
    );

    let input_task = tokio::spawn(read_payloads(link));

    let stats_printer = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                tracker.print_stats();
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            let _ = (&mut worker_task).await;
        }
        r = &mut worker_task => tracing::info!("transfer worker exited: {:?}", r),
        r = stats_printer    => tracing::error!("stats printer exited: {:?}", r),
    }

    input_task.abort();
    tracker.print_stats();
    match tracker.stats().to_json() {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to encode stats"),
    }
    Ok(())
}

/// Forward stdin lines to the link until EOF. Dropping the link lets the
/// worker drain its backlog and exit.
async fn read_payloads(link: TransferLink) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        let payload = match hex::decode(line) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring line that is not hex");
                continue;
            }
        };
        // stdin is the slow side: wait out a full backlog instead of dropping
        let payload = bytes::Bytes::from(payload);
        loop {
            match link.request_send(payload.clone()) {
                Ok(ticket) => {
                    tracing::debug!(transfer_id = ticket.id(), "payload accepted");
                    break;
                }
                Err(TransferError::QueueFull) => {
                    tokio::time::sleep(BACKLOG_RETRY).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "payload not accepted");
                    return Ok(());
                }
            }
        }
    }

    tracing::info!("stdin closed");
    Ok(())
}
