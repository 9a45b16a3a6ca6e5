//! Per-tick mix accumulator
//!
//! Each contributing talkgroup adds one quantum of mono samples, scaled by
//! its corner gains, into an interleaved `f32` accumulator. Rendering clamps
//! to the i16 range (a hard clip, no limiter) and narrows back to s16le.

use crate::audio::pan::{CornerGains, OutputLayout};
use crate::constants::SAMPLE_WIDTH;

/// Accumulates one output frame
pub struct MixBus {
    layout: OutputLayout,
    quantum_samples: usize,
    accumulator: Vec<f32>,
    contributors: usize,
}

impl MixBus {
    pub fn new(layout: OutputLayout, quantum_samples: usize) -> Self {
        Self {
            layout,
            quantum_samples,
            accumulator: vec![0.0; quantum_samples * layout.channels()],
            contributors: 0,
        }
    }

    /// Zero the accumulator for the next tick
    pub fn reset(&mut self) {
        self.accumulator.fill(0.0);
        self.contributors = 0;
    }

    /// Mix one quantum of s16le mono audio into the frame.
    /// Samples past the quantum are ignored; a short quantum mixes what it has.
    pub fn add(&mut self, mono: &[u8], gains: &CornerGains) {
        let channels = self.layout.channels();
        let gains = gains.as_slice();

        for (frame, sample) in self
            .accumulator
            .chunks_exact_mut(channels)
            .zip(mono.chunks_exact(SAMPLE_WIDTH))
        {
            let value = i16::from_le_bytes([sample[0], sample[1]]) as f32;
            for (out, gain) in frame.iter_mut().zip(gains) {
                *out += value * gain;
            }
        }

        self.contributors += 1;
    }

    /// Talkgroups mixed since the last reset
    pub fn contributors(&self) -> usize {
        self.contributors
    }

    /// Bytes `render` produces
    pub fn frame_bytes(&self) -> usize {
        self.quantum_samples * self.layout.channels() * SAMPLE_WIDTH
    }

    /// Clip and write the frame as interleaved s16le into `out`
    pub fn render(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.frame_bytes());
        for value in &self.accumulator {
            let clipped = value.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            out.extend_from_slice(&clipped.to_le_bytes());
        }
    }
}

/// Encode samples as s16le bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode s16le bytes into samples, ignoring a trailing odd byte
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
