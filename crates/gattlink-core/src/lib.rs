//! gattlink-core — wire format, fragmentation, and configuration.
//! All other Gattlink crates depend on this one.

pub mod config;
pub mod fragment;
pub mod wire;

pub use config::GattlinkConfig;
pub use fragment::{Checkpoint, Fragmenter, TransferState};
pub use wire::{Packet, PacketKind, Reassembler, WireError};
