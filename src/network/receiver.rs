//! Ingest loop: datagrams in, stream table updates out
//!
//! Malformed packets are dropped and logged. Protocol races (audio before
//! start, end for an unknown talkgroup, repeated starts) are expected and
//! handled quietly. Only a failing socket ends the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;

use crate::config::{MixerConfig, NetworkConfig};
use crate::error::NetworkError;
use crate::protocol::{parse_datagram, StreamEvent};
use crate::shutdown::Shutdown;
use crate::status::StatusNotifier;
use crate::streams::StreamTable;

/// What handling one datagram did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// A new channel entered the table
    Created(i64),
    /// An existing channel was refreshed or fed audio
    Updated(i64),
    /// Tiny audio payload, liveness only
    KeepAlive(i64),
    /// A channel left the table
    Ended(i64),
    /// Valid but nothing to do
    Ignored,
    /// Could not be parsed
    Malformed,
}

#[derive(Default)]
struct ReceiverCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    malformed_packets: AtomicU64,
    ignored_packets: AtomicU64,
    keepalives: AtomicU64,
    channels_created: AtomicU64,
    channels_ended: AtomicU64,
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub malformed_packets: u64,
    pub ignored_packets: u64,
    pub keepalives: u64,
    pub channels_created: u64,
    pub channels_ended: u64,
}

/// Demultiplexes talkgroup datagrams into the stream table
pub struct StreamReceiver {
    table: Arc<StreamTable>,
    notifier: Arc<dyn StatusNotifier>,
    keepalive_threshold: usize,
    counters: ReceiverCounters,
}

impl StreamReceiver {
    pub fn new(
        table: Arc<StreamTable>,
        notifier: Arc<dyn StatusNotifier>,
        config: &MixerConfig,
    ) -> Self {
        Self {
            table,
            notifier,
            keepalive_threshold: config.keepalive_threshold,
            counters: ReceiverCounters::default(),
        }
    }

    /// Apply one datagram to the stream table
    pub fn handle_datagram(&self, data: &[u8], now: Instant) -> PacketOutcome {
        let packet = match parse_datagram(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping {}-byte packet: {}", data.len(), e);
                self.counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                return PacketOutcome::Malformed;
            }
        };
        let id = packet.channel_id;

        let outcome = match packet.event {
            StreamEvent::Start => {
                let short_name = packet.metadata.short_name.clone();
                let tag = packet.metadata.tag.clone();
                let source = packet.metadata.source.clone();
                let created = !self.table.update_metadata(id, packet.metadata.clone(), now)
                    && self.table.get_or_create(id, packet.metadata, now);
                let active = self.publish();

                if created {
                    let pan = crate::audio::pan::assign(id);
                    tracing::info!(
                        "call_start: {} TG {} ({}) src: {} at pan LR {:.2}/FR {:.2} (Active calls: {})",
                        short_name, id, tag, source, pan.lateral, pan.depth, active
                    );
                    PacketOutcome::Created(id)
                } else {
                    tracing::debug!("call_start for active {} TG {} (src: {})", short_name, id, source);
                    PacketOutcome::Updated(id)
                }
            }
            StreamEvent::Audio if packet.payload.is_empty() => PacketOutcome::Ignored,
            StreamEvent::Audio if packet.payload.len() < self.keepalive_threshold => {
                if self.table.touch(id, now) {
                    self.counters.keepalives.fetch_add(1, Ordering::Relaxed);
                    PacketOutcome::KeepAlive(id)
                } else {
                    PacketOutcome::Ignored
                }
            }
            StreamEvent::Audio => {
                let short_name = packet.metadata.short_name.clone();
                let appended = self
                    .table
                    .append_audio(id, packet.metadata, packet.payload, now);

                if appended.dropped_bytes > 0 {
                    tracing::debug!(
                        "TG {} buffer full, discarded {} oldest bytes",
                        id,
                        appended.dropped_bytes
                    );
                }

                if appended.created {
                    let active = self.publish();
                    tracing::info!(
                        "Missed call_start, creating stream for {} TG {} (Active calls: {})",
                        short_name, id, active
                    );
                    PacketOutcome::Created(id)
                } else {
                    PacketOutcome::Updated(id)
                }
            }
            StreamEvent::End => match self.table.remove(id) {
                Some(info) => {
                    let active = self.publish();
                    tracing::info!(
                        "call_end: {} TG {} after {} audio events (Active calls: {})",
                        info.short_name, id, info.audio_frames_received, active
                    );
                    PacketOutcome::Ended(id)
                }
                None => {
                    tracing::debug!("call_end for inactive TG {}", id);
                    PacketOutcome::Ignored
                }
            },
            StreamEvent::Unknown(name) => {
                tracing::trace!("Ignoring event {:?} for TG {}", name, id);
                PacketOutcome::Ignored
            }
        };

        match outcome {
            PacketOutcome::Created(_) => {
                self.counters.channels_created.fetch_add(1, Ordering::Relaxed);
            }
            PacketOutcome::Ended(_) => {
                self.counters.channels_ended.fetch_add(1, Ordering::Relaxed);
            }
            PacketOutcome::Ignored => {
                self.counters.ignored_packets.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        outcome
    }

    /// Send the current membership to the status notifier. The table lock is
    /// released before the notifier runs. Returns the active channel count.
    fn publish(&self) -> usize {
        let snapshot = self.table.snapshot();
        self.notifier.publish(&snapshot);
        snapshot.len()
    }

    /// Receive datagrams until shutdown or a socket failure.
    /// A socket failure triggers global shutdown.
    pub async fn run(
        &self,
        socket: UdpSocket,
        config: &NetworkConfig,
        shutdown: Shutdown,
    ) -> Result<(), NetworkError> {
        match socket.local_addr() {
            Ok(addr) => tracing::info!("Starting UDP receiver on {}", addr),
            Err(_) => tracing::info!("Starting UDP receiver"),
        }

        let mut buf = vec![0u8; config.max_packet_size];
        let recv_timeout = config.recv_timeout();

        let result = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }

            let received = tokio::select! {
                _ = shutdown.wait() => break Ok(()),
                received = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)) => received,
            };

            match received {
                // Bounded wait elapsed; loop to re-check shutdown
                Err(_) => continue,
                Ok(Ok((len, addr))) => {
                    self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
                    self.counters.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                    tracing::trace!("{} bytes from {}", len, addr);
                    self.handle_datagram(&buf[..len], Instant::now());
                }
                Ok(Err(e)) if is_transient(&e) => {
                    tracing::debug!("Transient receive error: {}", e);
                }
                Ok(Err(e)) => break Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        };

        if let Err(e) = &result {
            tracing::error!("UDP receiver failed: {}", e);
            shutdown.trigger();
        }

        let stats = self.stats();
        tracing::info!(
            "UDP receiver stopped: {} packets, {} bytes, {} malformed",
            stats.packets_received,
            stats.bytes_received,
            stats.malformed_packets
        );
        result
    }

    pub fn stats(&self) -> ReceiverStats {
        let c = &self.counters;
        ReceiverStats {
            packets_received: c.packets_received.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            malformed_packets: c.malformed_packets.load(Ordering::Relaxed),
            ignored_packets: c.ignored_packets.load(Ordering::Relaxed),
            keepalives: c.keepalives.load(Ordering::Relaxed),
            channels_created: c.channels_created.load(Ordering::Relaxed),
            channels_ended: c.channels_ended.load(Ordering::Relaxed),
        }
    }
}

/// ICMP port-unreachable surfaces as ConnectionReset on some platforms
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_datagram;
    use crate::streams::ChannelInfo;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<Vec<i64>>>,
    }

    impl StatusNotifier for Recorder {
        fn publish(&self, active: &[ChannelInfo]) {
            self.published
                .lock()
                .push(active.iter().map(|c| c.channel_id).collect());
        }
    }

    fn receiver() -> (StreamReceiver, Arc<StreamTable>, Arc<Recorder>) {
        let config = MixerConfig::default();
        let table = Arc::new(StreamTable::new(config.max_buffered_bytes()));
        let recorder = Arc::new(Recorder::default());
        let receiver = StreamReceiver::new(table.clone(), recorder.clone(), &config);
        (receiver, table, recorder)
    }

    fn event(name: &str, tg: i64) -> Vec<u8> {
        encode_datagram(
            &json!({ "event": name, "talkgroup": tg, "short_name": "Test", "talkgroup_tag": "Tag" }),
            &[],
        )
    }

    fn audio(tg: i64, bytes: usize) -> Vec<u8> {
        encode_datagram(&json!({ "event": "audio", "talkgroup": tg }), &vec![0x11; bytes])
    }

    #[test]
    fn test_start_audio_end() {
        let (receiver, table, recorder) = receiver();
        let now = Instant::now();

        assert_eq!(receiver.handle_datagram(&event("start", 5), now), PacketOutcome::Created(5));
        assert_eq!(receiver.handle_datagram(&audio(5, 640), now), PacketOutcome::Updated(5));
        assert_eq!(table.snapshot()[0].buffered_bytes, 640);
        assert_eq!(receiver.handle_datagram(&event("end", 5), now), PacketOutcome::Ended(5));
        assert!(table.is_empty());

        assert_eq!(*recorder.published.lock(), vec![vec![5], vec![]]);

        let stats = receiver.stats();
        assert_eq!(stats.channels_created, 1);
        assert_eq!(stats.channels_ended, 1);
    }

    #[test]
    fn test_audio_without_start_creates_channel() {
        let (receiver, table, recorder) = receiver();
        let now = Instant::now();

        assert_eq!(receiver.handle_datagram(&audio(7, 640), now), PacketOutcome::Created(7));
        assert_eq!(table.snapshot()[0].buffered_bytes, 640);
        assert_eq!(table.snapshot()[0].pan, crate::audio::pan::assign(7));
        assert_eq!(*recorder.published.lock(), vec![vec![7]]);
    }

    #[test]
    fn test_keepalive_only_refreshes() {
        let (receiver, table, _) = receiver();
        let start = Instant::now();

        // Keep-alive for an unknown channel does not create it
        assert_eq!(receiver.handle_datagram(&audio(3, 50), start), PacketOutcome::Ignored);
        assert!(table.is_empty());

        receiver.handle_datagram(&event("call_start", 3), start);
        let later = start + std::time::Duration::from_secs(4);
        assert_eq!(receiver.handle_datagram(&audio(3, 50), later), PacketOutcome::KeepAlive(3));

        let info = &table.snapshot()[0];
        assert_eq!(info.buffered_bytes, 0);
        assert_eq!(info.audio_frames_received, 0);
        assert_eq!(receiver.stats().keepalives, 1);
    }

    #[test]
    fn test_repeated_start_updates_metadata() {
        let (receiver, table, recorder) = receiver();
        let now = Instant::now();

        receiver.handle_datagram(&event("start", 9), now);
        let renamed = encode_datagram(
            &json!({ "event": "start", "talkgroup": 9, "short_name": "Other", "talkgroup_tag": "New" }),
            &[],
        );
        assert_eq!(receiver.handle_datagram(&renamed, now), PacketOutcome::Updated(9));
        assert_eq!(table.snapshot()[0].tag, "New");
        assert_eq!(recorder.published.lock().len(), 2);
    }

    #[test]
    fn test_races_and_garbage_are_harmless() {
        let (receiver, table, recorder) = receiver();
        let now = Instant::now();

        assert_eq!(receiver.handle_datagram(&event("end", 1), now), PacketOutcome::Ignored);
        assert_eq!(receiver.handle_datagram(&event("patch", 1), now), PacketOutcome::Ignored);
        assert_eq!(receiver.handle_datagram(&audio(1, 0), now), PacketOutcome::Ignored);
        assert_eq!(receiver.handle_datagram(&[0, 1], now), PacketOutcome::Malformed);
        assert_eq!(
            receiver.handle_datagram(&[9, 0, 0, 0, b'{'], now),
            PacketOutcome::Malformed
        );

        assert_eq!(
            receiver.handle_datagram(&encode_datagram(&json!(["start", 1]), &[]), now),
            PacketOutcome::Malformed
        );
        assert_eq!(
            receiver.handle_datagram(&encode_datagram(&json!([]), &[0x11; 640]), now),
            PacketOutcome::Malformed
        );

        assert!(table.is_empty());
        assert!(recorder.published.lock().is_empty());
        let stats = receiver.stats();
        assert_eq!(stats.malformed_packets, 4);
        assert_eq!(stats.ignored_packets, 3);
    }
}
