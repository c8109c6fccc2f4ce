//! Fragmenter — splits one payload into wire packets.
//!
//! The fragmenter is stateless; all per-payload progress lives in
//! [`TransferState`], which the driver owns for the duration of one payload
//! and can roll back to a [`Checkpoint`] when a write is refused.

use crate::wire::{check_packet_size, Packet, WireError, TAG_LEN};

/// Progress through a single payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    cursor: usize,
    sequence: u8,
    first: bool,
    last: bool,
}

/// Rollback point captured before a packet is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    cursor: usize,
    sequence: u8,
    first: bool,
    last: bool,
}

impl TransferState {
    pub fn new() -> Self {
        Self {
            cursor: 0,
            sequence: 0,
            first: true,
            last: false,
        }
    }

    /// Payload bytes already consumed.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Tag the next tagged packet will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn is_first(&self) -> bool {
        self.first
    }

    /// True once the final packet has been produced.
    pub fn is_final(&self) -> bool {
        self.last
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cursor: self.cursor,
            sequence: self.sequence,
            first: self.first,
            last: self.last,
        }
    }

    /// Restore the state captured by `checkpoint`, undoing the cursor
    /// advance and tag increment of the packet produced since.
    ///
    /// The final flag is restored as well, so a refused final packet is
    /// produced again instead of ending the transfer with its tail unsent.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.cursor = checkpoint.cursor;
        self.sequence = checkpoint.sequence;
        self.first = checkpoint.first;
        self.last = checkpoint.last;
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits payloads into packets of at most `packet_size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    packet_size: usize,
}

impl Fragmenter {
    pub fn new(packet_size: usize) -> Result<Self, WireError> {
        Ok(Self {
            packet_size: check_packet_size(packet_size)?,
        })
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Produce the next packet and advance `state`.
    ///
    /// Returns `None` once the final packet has been produced. An empty
    /// payload yields a single zero-length lead packet.
    pub fn next_packet(&self, payload: &[u8], state: &mut TransferState) -> Option<Packet> {
        if state.last {
            return None;
        }
        let rest = payload.get(state.cursor..).unwrap_or_default();

        if state.first {
            state.first = false;
            let take = if rest.len() > self.packet_size {
                self.packet_size
            } else {
                state.last = true;
                rest.len()
            };
            state.cursor += take;
            return Some(Packet::lead(&rest[..take], state.last));
        }

        // A full tagged packet is only sent while at least `packet_size`
        // bytes remain, so a remainder of exactly `packet_size - 1` still
        // goes out as the final packet.
        let take = if rest.len() >= self.packet_size {
            self.packet_size - TAG_LEN
        } else {
            state.last = true;
            rest.len()
        };
        let packet = Packet::tagged(state.sequence, &rest[..take], state.last);
        state.cursor += take;
        state.sequence = state.sequence.wrapping_add(1);
        Some(packet)
    }

    /// Fragment a whole payload, assuming every write is accepted.
    pub fn fragment(&self, payload: &[u8]) -> Vec<Packet> {
        let mut state = TransferState::new();
        std::iter::from_fn(|| self.next_packet(payload, &mut state)).collect()
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self {
            packet_size: crate::wire::DEFAULT_PACKET_SIZE,
        }
    }
}
