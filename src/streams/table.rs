//! The stream table: every live talkgroup behind a single mutex
//!
//! Both loops go through here. Each method is one short critical section and
//! nothing in this module does I/O, so callers can safely log, notify or
//! write output right after a call returns.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::audio::pan::PanPosition;
use crate::protocol::ChannelMetadata;
use crate::streams::channel::{ChannelInfo, ChannelState};

/// One quantum drained from a channel during a tick
#[derive(Debug, Clone)]
pub struct Contribution {
    pub channel_id: i64,
    pub pan: PanPosition,
    pub audio: Bytes,
}

/// Everything the mix loop needs from the table for one tick
#[derive(Debug, Default)]
pub struct TickDrain {
    /// Ordered by channel id so the float summation order is stable
    pub contributions: Vec<Contribution>,
    /// Channels past the staleness timeout; not drained
    pub stale: Vec<i64>,
}

/// Result of feeding an audio payload into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The channel did not exist and was created from this payload
    pub created: bool,
    /// Old bytes discarded by the buffer cap
    pub dropped_bytes: usize,
}

/// Concurrent map from talkgroup id to channel state
pub struct StreamTable {
    channels: Mutex<HashMap<i64, ChannelState>>,
    /// Per-channel buffer cap in bytes
    buffer_capacity: usize,
}

impl StreamTable {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            buffer_capacity,
        }
    }

    /// Ensure a channel exists and refresh its metadata.
    /// Returns true if it was created by this call.
    pub fn get_or_create(&self, channel_id: i64, metadata: ChannelMetadata, now: Instant) -> bool {
        let mut channels = self.channels.lock();
        match channels.get_mut(&channel_id) {
            Some(channel) => {
                channel.refresh(metadata, now);
                false
            }
            None => {
                channels.insert(
                    channel_id,
                    ChannelState::new(channel_id, metadata, now, self.buffer_capacity),
                );
                true
            }
        }
    }

    /// Refresh metadata of an existing channel. Returns false if absent.
    pub fn update_metadata(&self, channel_id: i64, metadata: ChannelMetadata, now: Instant) -> bool {
        match self.channels.lock().get_mut(&channel_id) {
            Some(channel) => {
                channel.refresh(metadata, now);
                true
            }
            None => false,
        }
    }

    /// Mark a channel alive without touching its audio. Returns false if absent.
    pub fn touch(&self, channel_id: i64, now: Instant) -> bool {
        match self.channels.lock().get_mut(&channel_id) {
            Some(channel) => {
                channel.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Append audio to a channel, creating it inline when its start was missed.
    /// Metadata is only used for a newly created channel.
    pub fn append_audio(
        &self,
        channel_id: i64,
        metadata: ChannelMetadata,
        payload: &[u8],
        now: Instant,
    ) -> AppendOutcome {
        let mut channels = self.channels.lock();
        let created = !channels.contains_key(&channel_id);
        let channel = channels.entry(channel_id).or_insert_with(|| {
            ChannelState::new(channel_id, metadata, now, self.buffer_capacity)
        });

        let dropped_bytes = channel.buffer.push(payload);
        channel.last_activity = now;
        channel.audio_frames_received += 1;

        AppendOutcome {
            created,
            dropped_bytes,
        }
    }

    /// Take exactly `len` bytes from the front of a channel's buffer.
    /// `None` if the channel is absent or holds less than `len`.
    pub fn drain_audio(&self, channel_id: i64, len: usize) -> Option<Bytes> {
        self.channels
            .lock()
            .get_mut(&channel_id)
            .and_then(|channel| channel.buffer.drain(len))
    }

    /// Remove a channel, returning its final state
    pub fn remove(&self, channel_id: i64) -> Option<ChannelInfo> {
        self.channels
            .lock()
            .remove(&channel_id)
            .map(|channel| channel.info())
    }

    /// Find stale channels and drain one quantum from every other channel
    /// that has a full quantum buffered.
    pub fn drain_tick(&self, now: Instant, quantum: usize, stale_timeout: Duration) -> TickDrain {
        let mut drain = TickDrain::default();
        {
            let mut channels = self.channels.lock();
            for (id, channel) in channels.iter_mut() {
                if channel.is_stale(now, stale_timeout) {
                    drain.stale.push(*id);
                    continue;
                }
                if let Some(audio) = channel.buffer.drain(quantum) {
                    drain.contributions.push(Contribution {
                        channel_id: *id,
                        pan: channel.pan,
                        audio,
                    });
                }
            }
        }

        drain.contributions.sort_unstable_by_key(|c| c.channel_id);
        drain.stale.sort_unstable();
        drain
    }

    /// Remove the listed channels if they are still stale at `now`.
    /// A channel that received a signal since it was flagged survives.
    pub fn evict_stale(&self, ids: &[i64], now: Instant, stale_timeout: Duration) -> Vec<ChannelInfo> {
        let mut channels = self.channels.lock();
        let mut evicted = Vec::new();
        for id in ids {
            let still_stale = channels
                .get(id)
                .map_or(false, |channel| channel.is_stale(now, stale_timeout));
            if still_stale {
                if let Some(channel) = channels.remove(id) {
                    evicted.push(channel.info());
                }
            }
        }
        evicted
    }

    /// Ordered snapshot of every live channel
    pub fn snapshot(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self
            .channels
            .lock()
            .values()
            .map(ChannelState::info)
            .collect();
        infos.sort_unstable_by_key(|info| info.channel_id);
        infos
    }

    /// Ordered ids of every live channel
    pub fn snapshot_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.channels.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, channel_id: i64) -> bool {
        self.channels.lock().contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}
