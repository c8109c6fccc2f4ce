//! Gattlink wire format — the bytes written to the peripheral's characteristic.
//!
//! A payload is carried by one or more packets of at most `packet_size` bytes:
//!
//! ```text
//!   first packet:  [payload bytes ...]              no tag
//!   later packets: [seq: u8][payload bytes ...]     seq starts at 0, wraps at 256
//! ```
//!
//! There is no length field, CRC, or end-of-message marker. Both ends agree on
//! the message length out of band; the receiver stops once it holds that many
//! payload bytes. Changing anything here breaks every deployed peripheral.

use bytes::{BufMut, Bytes, BytesMut};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest single characteristic write the reference peripheral accepts.
pub const DEFAULT_PACKET_SIZE: usize = 20;

/// A tagged packet needs room for the tag plus at least one payload byte.
pub const MIN_PACKET_SIZE: usize = 2;

/// Upper bound of a GATT attribute value.
pub const MAX_PACKET_SIZE: usize = 512;

/// Length of the sequence tag carried by every packet after the first.
pub const TAG_LEN: usize = 1;

// ── Packet ────────────────────────────────────────────────────────────────────

/// How the first byte of a packet is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// First packet of a payload. Every byte is payload.
    Lead,
    /// Any later packet. Byte 0 is the sequence tag.
    Tagged(u8),
}

/// One characteristic write, ready for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    is_final: bool,
    bytes: Bytes,
}

impl Packet {
    /// Build an untagged first packet.
    pub fn lead(payload: &[u8], is_final: bool) -> Self {
        Self {
            kind: PacketKind::Lead,
            is_final,
            bytes: Bytes::copy_from_slice(payload),
        }
    }

    /// Build a packet carrying `sequence` in byte 0.
    pub fn tagged(sequence: u8, payload: &[u8], is_final: bool) -> Self {
        let mut buf = BytesMut::with_capacity(TAG_LEN + payload.len());
        buf.put_u8(sequence);
        buf.put_slice(payload);
        Self {
            kind: PacketKind::Tagged(sequence),
            is_final,
            bytes: buf.freeze(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// True when this packet exhausts the payload.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// The sequence tag, or `None` for the lead packet.
    pub fn sequence(&self) -> Option<u8> {
        match self.kind {
            PacketKind::Lead => None,
            PacketKind::Tagged(seq) => Some(seq),
        }
    }

    /// Exact bytes handed to the write primitive.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload bytes only, with the tag stripped.
    pub fn payload(&self) -> &[u8] {
        match self.kind {
            PacketKind::Lead => &self.bytes,
            PacketKind::Tagged(_) => &self.bytes[TAG_LEN..],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Upper-case hex dump used in diagnostics.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }
}

/// Validate a configured packet size.
pub fn check_packet_size(packet_size: usize) -> Result<usize, WireError> {
    if (MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
        Ok(packet_size)
    } else {
        Err(WireError::InvalidPacketSize(packet_size))
    }
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// Peer-side reassembly of one message whose length is known in advance.
///
/// Packets must arrive in order: the first is taken raw, each later packet
/// must carry the next wrapping tag.
#[derive(Debug)]
pub struct Reassembler {
    expected_len: usize,
    packet_size: usize,
    buf: BytesMut,
    next_seq: Option<u8>,
    complete: bool,
}

impl Reassembler {
    pub fn new(expected_len: usize, packet_size: usize) -> Self {
        Self {
            expected_len,
            packet_size,
            buf: BytesMut::with_capacity(expected_len),
            next_seq: None,
            complete: false,
        }
    }

    /// Feed one received packet. Returns the message once all bytes arrived.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Bytes>, WireError> {
        if packet.len() > self.packet_size {
            return Err(WireError::PacketTooLarge {
                len: packet.len(),
                max: self.packet_size,
            });
        }
        if self.complete {
            return Err(WireError::Overflow {
                expected: self.expected_len,
                got: self.expected_len + packet.len(),
            });
        }

        let data = match self.next_seq {
            None => {
                self.next_seq = Some(0);
                packet
            }
            Some(expected) => {
                let (&tag, rest) = packet.split_first().ok_or(WireError::MissingTag)?;
                if tag != expected {
                    return Err(WireError::SequenceMismatch { expected, got: tag });
                }
                self.next_seq = Some(expected.wrapping_add(1));
                rest
            }
        };

        let got = self.buf.len() + data.len();
        if got > self.expected_len {
            return Err(WireError::Overflow {
                expected: self.expected_len,
                got,
            });
        }
        self.buf.put_slice(data);

        if self.buf.len() == self.expected_len {
            self.complete = true;
            return Ok(Some(self.buf.split().freeze()));
        }
        Ok(None)
    }

    /// Payload bytes collected so far.
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("packet size {0} outside {}..={}", MIN_PACKET_SIZE, MAX_PACKET_SIZE)]
    InvalidPacketSize(usize),

    #[error("packet of {len} bytes exceeds packet size {max}")]
    PacketTooLarge { len: usize, max: usize },

    #[error("tagged packet is empty")]
    MissingTag,

    #[error("sequence tag 0x{got:02x}, expected 0x{expected:02x}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("message overflow: expected {expected} bytes, got {got}")]
    Overflow { expected: usize, got: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
