//! Transfer driver — pushes one payload through the write primitive.
//!
//! Per packet:
//!   1. checkpoint the fragment state
//!   2. produce the next packet
//!   3. submit it
//!   4. if refused and the payload's retry budget allows: back off, roll back,
//!      and produce the identical packet again
//!   5. if refused past the budget: skip it (`proceed`) or stop (`abort`)
//!   6. wait, bounded, for the write-complete signal; a timeout is not an error
//!
//! The retry budget is shared by all packets of a payload, not per packet.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use gattlink_core::config::{EmptyPayloadPolicy, ExhaustedRetryPolicy, GattlinkConfig};
use gattlink_core::{Fragmenter, TransferState, WireError};

use crate::link::CancelToken;
use crate::observer::ObserverRegistry;
use crate::report::{PacketEvent, TransferId, TransferOutcome, TransferReport};
use crate::writer::{CompletionSignal, CompletionWaiter, PacketWriter};

/// Knobs for one driver, usually taken from [`GattlinkConfig`].
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub packet_size: usize,
    pub max_submit_retries: u32,
    pub retry_backoff: Duration,
    pub ack_timeout: Duration,
    pub exhausted_retries: ExhaustedRetryPolicy,
    pub empty_payload: EmptyPayloadPolicy,
}

impl DriverSettings {
    pub fn from_config(config: &GattlinkConfig) -> Self {
        Self {
            packet_size: config.link.packet_size,
            max_submit_retries: config.transfer.max_submit_retries,
            retry_backoff: config.transfer.retry_backoff(),
            ack_timeout: config.transfer.ack_timeout(),
            exhausted_retries: config.transfer.exhausted_retries,
            empty_payload: config.transfer.empty_payload,
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from_config(&GattlinkConfig::default())
    }
}

#[derive(Debug, Default)]
struct Tally {
    packets: u32,
    submissions: u32,
    retries: u32,
    unretried_failures: u32,
    ack_timeouts: u32,
}

/// Exclusive owner of one peripheral's write channel.
pub struct TransferDriver {
    writer: Arc<dyn PacketWriter>,
    completion: CompletionWaiter,
    fragmenter: Fragmenter,
    settings: DriverSettings,
    observers: ObserverRegistry,
}

impl TransferDriver {
    pub fn new(
        writer: Arc<dyn PacketWriter>,
        completion: &CompletionSignal,
        settings: DriverSettings,
        observers: ObserverRegistry,
    ) -> Result<Self, WireError> {
        Ok(Self {
            writer,
            completion: completion.waiter(),
            fragmenter: Fragmenter::new(settings.packet_size)?,
            settings,
            observers,
        })
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Drive `payload` to the end and report how it went.
    ///
    /// Returns only once every packet has been handled or the transfer
    /// stopped early; never fails.
    pub async fn send_payload(
        &mut self,
        id: TransferId,
        payload: &[u8],
        cancel: &CancelToken,
    ) -> TransferReport {
        let started = Instant::now();
        let mut tally = Tally::default();
        let outcome = self.drive(id, payload, cancel, &mut tally).await;

        let report = TransferReport {
            id,
            bytes: payload.len(),
            packets: tally.packets,
            submissions: tally.submissions,
            retries: tally.retries,
            unretried_failures: tally.unretried_failures,
            ack_timeouts: tally.ack_timeouts,
            outcome,
            elapsed: started.elapsed(),
        };

        match outcome {
            TransferOutcome::Delivered => tracing::info!(
                transfer_id = id,
                bytes = report.bytes,
                packets = report.packets,
                retries = report.retries,
                "transfer complete"
            ),
            _ => tracing::warn!(
                transfer_id = id,
                bytes = report.bytes,
                packets = report.packets,
                retries = report.retries,
                unretried_failures = report.unretried_failures,
                ?outcome,
                "transfer ended early or degraded"
            ),
        }
        self.observers.transfer(&report);
        report
    }

    async fn drive(
        &mut self,
        id: TransferId,
        payload: &[u8],
        cancel: &CancelToken,
        tally: &mut Tally,
    ) -> TransferOutcome {
        if payload.is_empty() && self.settings.empty_payload == EmptyPayloadPolicy::Reject {
            return TransferOutcome::Rejected;
        }
        if cancel.is_cancelled() {
            return TransferOutcome::Cancelled;
        }
        if !self.writer.is_ready() {
            tracing::warn!(transfer_id = id, "write characteristic unavailable");
            return TransferOutcome::ChannelUnavailable;
        }

        let mut state = TransferState::new();
        let mut error_budget = 0u32;

        while !state.is_final() {
            if cancel.is_cancelled() {
                tracing::info!(transfer_id = id, sent = state.cursor(), "transfer cancelled");
                return TransferOutcome::Cancelled;
            }

            let checkpoint = state.checkpoint();
            let Some(packet) = self.fragmenter.next_packet(payload, &mut state) else {
                break;
            };

            self.completion.arm();
            let accepted = self.writer.submit(packet.as_bytes());
            tally.submissions += 1;

            tracing::debug!(
                transfer_id = id,
                packet = %packet.to_hex(),
                sequence = ?packet.sequence(),
                accepted,
                "packet submitted"
            );
            self.observers.packet(&PacketEvent {
                transfer_id: id,
                sequence: packet.sequence(),
                bytes: bytes::Bytes::copy_from_slice(packet.as_bytes()),
                accepted,
                is_final: packet.is_final(),
            });

            if !accepted {
                if error_budget < self.settings.max_submit_retries {
                    error_budget += 1;
                    tally.retries += 1;
                    tracing::warn!(
                        transfer_id = id,
                        attempt = error_budget,
                        sequence = ?packet.sequence(),
                        "write refused, retrying packet"
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                    state.rollback(checkpoint);
                    continue;
                }

                tally.unretried_failures += 1;
                match self.settings.exhausted_retries {
                    ExhaustedRetryPolicy::Abort => {
                        tracing::warn!(transfer_id = id, "write refused with retry budget spent, aborting");
                        return TransferOutcome::Aborted;
                    }
                    ExhaustedRetryPolicy::Proceed => {
                        tracing::warn!(
                            transfer_id = id,
                            sequence = ?packet.sequence(),
                            "write refused with retry budget spent, packet skipped"
                        );
                    }
                }
            }

            tally.packets += 1;
            if !self.completion.wait(self.settings.ack_timeout).await {
                tally.ack_timeouts += 1;
                tracing::trace!(transfer_id = id, "no write-complete signal, moving on");
            }
        }

        if tally.unretried_failures > 0 {
            TransferOutcome::Degraded
        } else {
            TransferOutcome::Delivered
        }
    }
}
