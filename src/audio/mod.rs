//! Audio primitives: panning, buffering and mixing

pub mod buffer;
pub mod mix;
pub mod pan;

pub use buffer::SampleBuffer;
pub use mix::MixBus;
pub use pan::{assign, CornerGains, OutputLayout, PanPosition};
