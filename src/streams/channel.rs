//! State kept for one active talkgroup

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::audio::buffer::SampleBuffer;
use crate::audio::pan::{self, PanPosition};
use crate::protocol::ChannelMetadata;

/// One live talkgroup in the stream table
#[derive(Debug)]
pub struct ChannelState {
    pub channel_id: i64,
    /// Audio waiting to be mixed
    pub buffer: SampleBuffer,
    /// Last accepted audio, keep-alive or control event
    pub last_activity: Instant,
    /// Fixed at creation; a function of `channel_id` only
    pub pan: PanPosition,
    pub metadata: ChannelMetadata,
    pub audio_frames_received: u64,
    pub created_at: DateTime<Utc>,
}

impl ChannelState {
    pub fn new(
        channel_id: i64,
        metadata: ChannelMetadata,
        now: Instant,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            channel_id,
            buffer: SampleBuffer::new(buffer_capacity),
            last_activity: now,
            pan: pan::assign(channel_id),
            metadata,
            audio_frames_received: 0,
            created_at: Utc::now(),
        }
    }

    /// Overwrite display metadata and mark the channel alive
    pub fn refresh(&mut self, metadata: ChannelMetadata, now: Instant) {
        self.metadata = metadata;
        self.last_activity = now;
    }

    /// True once the channel has been silent for longer than `timeout`
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            channel_id: self.channel_id,
            tag: self.metadata.tag.clone(),
            short_name: self.metadata.short_name.clone(),
            source: self.metadata.source.clone(),
            pan: self.pan,
            audio_frames_received: self.audio_frames_received,
            buffered_bytes: self.buffer.len(),
            overflow_bytes: self.buffer.overflow_bytes(),
            created_at: self.created_at,
        }
    }
}

/// Point-in-time copy of a channel, handed to status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub channel_id: i64,
    pub tag: String,
    pub short_name: String,
    pub source: String,
    pub pan: PanPosition,
    pub audio_frames_received: u64,
    pub buffered_bytes: usize,
    pub overflow_bytes: u64,
    pub created_at: DateTime<Utc>,
}
