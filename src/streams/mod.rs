//! Live talkgroup state shared by the ingest and mix loops

pub mod channel;
pub mod table;

pub use channel::{ChannelInfo, ChannelState};
pub use table::{AppendOutcome, Contribution, StreamTable, TickDrain};
