//! Deterministic spatial placement of talkgroups
//!
//! Each talkgroup gets a lateral (left/right) and depth (front/rear)
//! coordinate derived from SHA-256, so the same talkgroup always sits in the
//! same spot, across restarts and across machines. Coordinates are clamped to
//! `[PAN_MIN, PAN_MAX]` so nothing is ever hard-panned into one speaker.
//!
//! Gains use equal-power weighting (`cos`/`sin` of the coordinate over a
//! quarter turn) and a corner's gain is the product of its two axis weights.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::f32::consts::FRAC_PI_2;

/// Lower bound for either coordinate
pub const PAN_MIN: f32 = 0.1;

/// Upper bound for either coordinate
pub const PAN_MAX: f32 = 0.9;

/// Maximum number of output channels any layout produces
pub const MAX_OUTPUT_CHANNELS: usize = 4;

/// Position of a talkgroup in the sound field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PanPosition {
    /// 0.0 = left, 1.0 = right
    pub lateral: f32,
    /// 0.0 = front, 1.0 = rear
    pub depth: f32,
}

/// Derive the pan position for a talkgroup
pub fn assign(channel_id: i64) -> PanPosition {
    PanPosition {
        lateral: axis_value("lr", channel_id),
        depth: axis_value("fr", channel_id),
    }
}

fn axis_value(axis: &str, channel_id: i64) -> f32 {
    let digest = Sha256::digest(format!("{}-{}", axis, channel_id).as_bytes());
    let raw = u16::from_be_bytes([digest[0], digest[1]]);
    (raw as f32 / u16::MAX as f32).clamp(PAN_MIN, PAN_MAX)
}

impl PanPosition {
    /// Equal-power (left, right) weights
    pub fn lateral_weights(&self) -> (f32, f32) {
        let angle = self.lateral * FRAC_PI_2;
        (angle.cos(), angle.sin())
    }

    /// Equal-power (front, rear) weights
    pub fn depth_weights(&self) -> (f32, f32) {
        let angle = self.depth * FRAC_PI_2;
        (angle.cos(), angle.sin())
    }
}

/// Output speaker arrangement, fixed for the life of the process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// L, R
    Stereo,
    /// FL, FR, RL, RR
    Quad,
}

impl OutputLayout {
    pub fn channels(&self) -> usize {
        match self {
            OutputLayout::Stereo => 2,
            OutputLayout::Quad => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputLayout::Stereo => "stereo",
            OutputLayout::Quad => "quad",
        }
    }

    /// Per-output-channel gains for a position, in interleave order
    pub fn gains(&self, pan: &PanPosition) -> CornerGains {
        let (left, right) = pan.lateral_weights();
        let mut gains = [0.0; MAX_OUTPUT_CHANNELS];

        match self {
            OutputLayout::Stereo => {
                gains[0] = left;
                gains[1] = right;
            }
            OutputLayout::Quad => {
                let (front, rear) = pan.depth_weights();
                gains[0] = front * left;
                gains[1] = front * right;
                gains[2] = rear * left;
                gains[3] = rear * right;
            }
        }

        CornerGains {
            gains,
            channels: self.channels(),
        }
    }
}

impl std::str::FromStr for OutputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stereo" | "2" => Ok(OutputLayout::Stereo),
            "quad" | "4" => Ok(OutputLayout::Quad),
            other => Err(format!("unknown output layout: {}", other)),
        }
    }
}

/// Gain per output channel for one talkgroup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerGains {
    gains: [f32; MAX_OUTPUT_CHANNELS],
    channels: usize,
}

impl CornerGains {
    pub fn as_slice(&self) -> &[f32] {
        &self.gains[..self.channels]
    }
}
