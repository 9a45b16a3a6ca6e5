//! Network subsystem for UDP talkgroup ingest

pub mod receiver;
pub mod udp;

pub use receiver::{PacketOutcome, ReceiverStats, StreamReceiver};
pub use udp::create_socket;
