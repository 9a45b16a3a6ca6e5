//! Operator-facing status reporting
//!
//! The loops call [`StatusNotifier::publish`] after every membership change,
//! outside the stream table lock. The bundled [`StatusPublisher`] only hands
//! the snapshot over a watch channel; the file write happens on its own task
//! (see [`file::StatusFile`]) so neither loop ever waits on the filesystem.

pub mod file;

use tokio::sync::watch;

use crate::streams::ChannelInfo;

pub use file::StatusFile;

/// Receives the ordered set of active channels whenever it changes
pub trait StatusNotifier: Send + Sync {
    fn publish(&self, active: &[ChannelInfo]);
}

/// Discards every update
pub struct NullNotifier;

impl StatusNotifier for NullNotifier {
    fn publish(&self, _active: &[ChannelInfo]) {}
}

/// Forwards snapshots to a watch channel, keeping only the latest
pub struct StatusPublisher {
    tx: watch::Sender<Vec<ChannelInfo>>,
}

impl StatusPublisher {
    pub fn channel() -> (Self, watch::Receiver<Vec<ChannelInfo>>) {
        let (tx, rx) = watch::channel(Vec::new());
        (Self { tx }, rx)
    }
}

impl StatusNotifier for StatusPublisher {
    fn publish(&self, active: &[ChannelInfo]) {
        self.tx.send_replace(active.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelMetadata;
    use crate::streams::StreamTable;
    use std::time::Instant;

    #[tokio::test]
    async fn test_publisher_keeps_latest() {
        let (publisher, mut rx) = StatusPublisher::channel();
        let table = StreamTable::new(64);
        let now = Instant::now();

        table.get_or_create(1, ChannelMetadata::default(), now);
        publisher.publish(&table.snapshot());
        table.get_or_create(2, ChannelMetadata::default(), now);
        publisher.publish(&table.snapshot());

        rx.changed().await.unwrap();
        let ids: Vec<i64> = rx.borrow_and_update().iter().map(|c| c.channel_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
