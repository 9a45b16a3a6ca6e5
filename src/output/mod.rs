//! PCM output: the fixed-cadence mix loop and its sink

pub mod scheduler;
pub mod sink;

pub use scheduler::{MixLoop, MixerStats};
pub use sink::FrameSink;
