//! Per-packet and per-payload status records.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

/// Identifies one payload handed to a link.
pub type TransferId = u64;

/// How a payload transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Every packet was accepted by the write primitive.
    Delivered,
    /// The retry budget ran out and later refused packets were skipped.
    Degraded,
    /// The retry budget ran out and the payload was abandoned.
    Aborted,
    /// Cancelled at a packet boundary, or before it started.
    Cancelled,
    /// The write primitive had no usable characteristic.
    ChannelUnavailable,
    /// Empty payload refused by configuration.
    Rejected,
}

/// Summary of one payload transfer, handed to observers and to the caller's ticket.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub id: TransferId,
    /// Payload length.
    pub bytes: usize,
    /// Packets counted as sent, including refused ones skipped after the budget.
    pub packets: u32,
    /// Calls made to the write primitive.
    pub submissions: u32,
    /// Rolled-back retries.
    pub retries: u32,
    /// Refused writes that were not retried.
    pub unretried_failures: u32,
    /// Packets whose completion signal never arrived in time.
    pub ack_timeouts: u32,
    pub outcome: TransferOutcome,
    #[serde(rename = "elapsed_us", serialize_with = "as_micros")]
    pub elapsed: Duration,
}

impl TransferReport {
    /// Report for a payload that never reached the driver.
    pub fn cancelled(id: TransferId, bytes: usize) -> Self {
        Self {
            id,
            bytes,
            packets: 0,
            submissions: 0,
            retries: 0,
            unretried_failures: 0,
            ack_timeouts: 0,
            outcome: TransferOutcome::Cancelled,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.outcome == TransferOutcome::Delivered
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn as_micros<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(elapsed.as_micros().min(u64::MAX as u128) as u64)
}

/// One call to the write primitive.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub transfer_id: TransferId,
    /// Tag carried by the packet; `None` for the lead packet.
    pub sequence: Option<u8>,
    pub bytes: Bytes,
    pub accepted: bool,
    pub is_final: bool,
}

impl PacketEvent {
    pub fn hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }
}
