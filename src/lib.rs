//! # Quad Stream Mixer
//!
//! Mixes many intermittent mono talkgroup streams, received as UDP datagrams,
//! into one continuous multi-channel PCM stream suitable for piping into an
//! encoder.
//!
//! ## Architecture Overview
//!
//! ```text
//!   UDP datagrams  [u32 len][JSON metadata][s16le mono PCM]
//!         │
//!         ▼
//! ┌──────────────────────────┐
//! │ Ingest loop              │  network::receiver
//! │  parse → StreamEvent     │  protocol
//! └────────────┬─────────────┘
//!              │ start / audio / end
//!              ▼
//! ┌──────────────────────────┐      ┌──────────────────────┐
//! │ Stream table (1 mutex)   │─────▶│ Status notifier      │  status
//! │  id → ChannelState       │      │  active-talkgroups   │
//! └────────────┬─────────────┘      └──────────────────────┘
//!              │ one quantum per channel per tick
//!              ▼
//! ┌──────────────────────────┐
//! │ Mix loop (fixed cadence) │  output::scheduler
//! │  pan → sum → clamp       │  audio::{pan, mix}
//! └────────────┬─────────────┘
//!              ▼
//!   stdout: interleaved s16le, one frame per tick, never skipped
//! ```

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod protocol;
pub mod shutdown;
pub mod status;
pub mod streams;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default input/output sample rate (trunk-recorder sends 8 kHz)
    pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

    /// Bytes per sample (signed 16-bit little-endian)
    pub const SAMPLE_WIDTH: usize = 2;

    /// Default mix tick duration in milliseconds
    pub const DEFAULT_TICK_MS: u64 = 40;

    /// Default address to listen on
    pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

    /// Default UDP port for incoming streams
    pub const DEFAULT_UDP_PORT: u16 = 7355;

    /// Silence after which a channel is evicted
    pub const DEFAULT_STALE_TIMEOUT_MS: u64 = 5000;

    /// Audio payloads smaller than this are keep-alive pings
    pub const DEFAULT_KEEPALIVE_THRESHOLD: usize = 100;

    /// Maximum UDP payload we will accept
    pub const MAX_PACKET_SIZE: usize = 65_535;

    /// Requested kernel receive buffer size
    pub const DEFAULT_RECV_BUFFER_BYTES: usize = 1024 * 1024;

    /// Bounded wait on the socket so shutdown is observed
    pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 1000;

    /// How far the mix loop may fall behind before resynchronising
    pub const DEFAULT_LAG_SLACK_MS: u64 = 100;

    /// Per-channel buffer cap, in milliseconds of audio
    pub const DEFAULT_MAX_BUFFERED_MS: u64 = 60_000;

    /// Default status file consumed by the display overlay
    pub const DEFAULT_STATUS_FILE: &str = "active-talkgroups.txt";
}
