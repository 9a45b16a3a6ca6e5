//! Mix loop: one output frame per tick, on an absolute schedule
//!
//! Every tick drains at most one quantum from each live channel, pans and
//! sums them, clips, and writes exactly one frame (silence if nobody spoke).
//! Channels that have been quiet past the staleness timeout are evicted after
//! the frame is written.
//!
//! The schedule accumulates the nominal tick onto a running deadline so
//! jitter does not drift. If the loop falls more than `lag_slack` behind, it
//! logs and restarts the schedule from now. It never emits extra frames to
//! catch up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::mix::MixBus;
use crate::audio::pan::OutputLayout;
use crate::config::MixerConfig;
use crate::error::OutputError;
use crate::output::sink::FrameSink;
use crate::shutdown::Shutdown;
use crate::status::StatusNotifier;
use crate::streams::StreamTable;

/// Mixer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixerStats {
    pub ticks: u64,
    /// Ticks where at least one channel contributed audio
    pub active_ticks: u64,
    pub lag_resyncs: u64,
    pub evictions: u64,
}

/// Compute the deadline after `deadline`. Returns the new deadline and, if
/// the loop was more than `slack` late, how far behind it was.
pub fn advance_deadline(
    deadline: tokio::time::Instant,
    now: tokio::time::Instant,
    tick: Duration,
    slack: Duration,
) -> (tokio::time::Instant, Option<Duration>) {
    let next = deadline + tick;
    if now > next + slack {
        (now, Some(now - next))
    } else {
        (next, None)
    }
}

/// Fixed-cadence mixer over the stream table
pub struct MixLoop {
    table: Arc<StreamTable>,
    notifier: Arc<dyn StatusNotifier>,
    layout: OutputLayout,
    sample_rate: u32,
    quantum_bytes: usize,
    tick: Duration,
    stale_timeout: Duration,
    lag_slack: Duration,
    bus: MixBus,
    frame: Vec<u8>,
    stats: MixerStats,
}

impl MixLoop {
    pub fn new(
        table: Arc<StreamTable>,
        notifier: Arc<dyn StatusNotifier>,
        config: &MixerConfig,
    ) -> Self {
        let bus = MixBus::new(config.layout, config.quantum_samples());
        let mut frame = Vec::with_capacity(config.frame_bytes());
        bus.render(&mut frame);

        Self {
            table,
            notifier,
            layout: config.layout,
            sample_rate: config.sample_rate,
            quantum_bytes: config.quantum_bytes(),
            tick: config.tick(),
            stale_timeout: config.stale_timeout(),
            lag_slack: config.lag_slack(),
            bus,
            frame,
            stats: MixerStats::default(),
        }
    }

    /// Build the next frame. Returns the ids found stale, which the caller
    /// evicts once the frame has been written.
    pub fn mix_tick(&mut self, now: Instant) -> Vec<i64> {
        let drain = self
            .table
            .drain_tick(now, self.quantum_bytes, self.stale_timeout);

        // Table lock is released; mixing happens outside it
        self.bus.reset();
        for contribution in &drain.contributions {
            let gains = self.layout.gains(&contribution.pan);
            self.bus.add(&contribution.audio, &gains);
        }
        self.bus.render(&mut self.frame);

        self.stats.ticks += 1;
        if self.bus.contributors() > 0 {
            self.stats.active_ticks += 1;
        }
        drain.stale
    }

    /// The frame produced by the last `mix_tick`
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Remove channels flagged stale, notifying on any removal.
    /// Returns how many were evicted.
    pub fn evict(&mut self, stale: &[i64], now: Instant) -> usize {
        if stale.is_empty() {
            return 0;
        }

        let evicted = self.table.evict_stale(stale, now, self.stale_timeout);
        if evicted.is_empty() {
            return 0;
        }

        let snapshot = self.table.snapshot();
        for info in &evicted {
            tracing::info!(
                "{} TG {} timed out (missed call_end?) (Active calls: {})",
                info.short_name,
                info.channel_id,
                snapshot.len()
            );
        }
        self.notifier.publish(&snapshot);

        self.stats.evictions += evicted.len() as u64;
        evicted.len()
    }

    /// Emit frames until shutdown or until the sink fails.
    /// A sink failure triggers global shutdown.
    pub async fn run<W>(
        &mut self,
        sink: &mut FrameSink<W>,
        shutdown: Shutdown,
    ) -> Result<(), OutputError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        tracing::info!(
            "Starting audio mixer: {} Hz, s16le, {} channels ({})",
            self.sample_rate,
            self.layout.channels(),
            self.layout.name()
        );
        tracing::info!(
            "Tick {} ms, {} bytes per frame",
            self.tick.as_millis(),
            self.frame.len()
        );

        let mut deadline = tokio::time::Instant::now();

        let result = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }

            let now = Instant::now();
            let stale = self.mix_tick(now);
            if let Err(e) = sink.write_frame(&self.frame).await {
                break Err(e);
            }
            self.evict(&stale, now);

            let (next, lag) = advance_deadline(
                deadline,
                tokio::time::Instant::now(),
                self.tick,
                self.lag_slack,
            );
            if let Some(lag) = lag {
                tracing::warn!("Audio mixer is lagging by {:?}, resynchronising", lag);
                self.stats.lag_resyncs += 1;
            }
            deadline = next;

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = shutdown.wait() => break Ok(()),
            }
        };

        match &result {
            Err(OutputError::Closed) => {
                tracing::warn!("Output closed (broken pipe), stopping mixer");
                shutdown.trigger();
            }
            Err(e) => {
                tracing::error!("Audio mixer failed: {}", e);
                shutdown.trigger();
            }
            Ok(()) => {}
        }

        tracing::info!(
            "Audio mixer stopped after {} ticks ({} with audio, {} resyncs, {} evictions)",
            self.stats.ticks,
            self.stats.active_ticks,
            self.stats.lag_resyncs,
            self.stats.evictions
        );
        result
    }

    pub fn stats(&self) -> MixerStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mix::{bytes_to_samples, samples_to_bytes};
    use crate::audio::pan;
    use crate::protocol::ChannelMetadata;
    use crate::status::NullNotifier;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn mixer(config: &MixerConfig) -> (MixLoop, Arc<StreamTable>) {
        let table = Arc::new(StreamTable::new(config.max_buffered_bytes()));
        let mix = MixLoop::new(table.clone(), Arc::new(NullNotifier), config);
        (mix, table)
    }

    #[test]
    fn test_advance_deadline() {
        let tick = Duration::from_millis(40);
        let slack = Duration::from_millis(100);
        let start = tokio::time::Instant::now();

        let (next, lag) = advance_deadline(start, start + Duration::from_millis(10), tick, slack);
        assert_eq!(next, start + tick);
        assert!(lag.is_none());

        // Late but within slack: keep the absolute schedule
        let (next, lag) = advance_deadline(start, start + Duration::from_millis(120), tick, slack);
        assert_eq!(next, start + tick);
        assert!(lag.is_none());

        let late = start + Duration::from_millis(500);
        let (next, lag) = advance_deadline(start, late, tick, slack);
        assert_eq!(next, late);
        assert_eq!(lag, Some(Duration::from_millis(460)));
    }

    #[test]
    fn test_silent_tick_full_length() {
        let config = MixerConfig::default();
        let (mut mix, _) = mixer(&config);

        assert!(mix.mix_tick(Instant::now()).is_empty());
        assert_eq!(mix.frame().len(), config.frame_bytes());
        assert!(mix.frame().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_channel_panned_into_frame() {
        let config = MixerConfig::default();
        let (mut mix, table) = mixer(&config);
        let now = Instant::now();

        let samples = vec![10_000i16; config.quantum_samples()];
        table.append_audio(42, ChannelMetadata::default(), &samples_to_bytes(&samples), now);

        mix.mix_tick(now);
        let out = bytes_to_samples(mix.frame());
        let gains = OutputLayout::Quad.gains(&pan::assign(42));
        for frame in out.chunks_exact(4) {
            for (value, gain) in frame.iter().zip(gains.as_slice()) {
                assert_eq!(*value, (10_000.0f32 * gain) as i16);
            }
        }

        // Buffer consumed: next tick is silent
        mix.mix_tick(now);
        assert!(mix.frame().iter().all(|b| *b == 0));
        assert_eq!(mix.stats().active_ticks, 1);
        assert_eq!(mix.stats().ticks, 2);
    }

    #[test]
    fn test_partial_quantum_waits() {
        let config = MixerConfig::default();
        let (mut mix, table) = mixer(&config);
        let now = Instant::now();

        table.append_audio(1, ChannelMetadata::default(), &vec![0x7f; config.quantum_bytes() / 2], now);
        mix.mix_tick(now);
        assert!(mix.frame().iter().all(|b| *b == 0));
        assert_eq!(table.snapshot()[0].buffered_bytes, config.quantum_bytes() / 2);
    }

    #[test]
    fn test_stale_channel_evicted_without_mixing() {
        let config = MixerConfig::default();
        let (mut mix, table) = mixer(&config);
        let start = Instant::now();

        let samples = vec![i16::MAX; config.quantum_samples()];
        table.append_audio(8, ChannelMetadata::default(), &samples_to_bytes(&samples), start);

        let later = start + config.stale_timeout() + Duration::from_millis(40);
        let stale = mix.mix_tick(later);
        assert_eq!(stale, vec![8]);
        assert!(mix.frame().iter().all(|b| *b == 0));

        assert_eq!(mix.evict(&stale, later), 1);
        assert!(table.is_empty());
        assert_eq!(mix.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_one_frame_per_tick() {
        let config = MixerConfig::default();
        let (mut mix, _) = mixer(&config);
        let mut sink = FrameSink::new(Vec::new());
        let shutdown = Shutdown::new();

        let stopper = {
            let shutdown = shutdown.clone();
            async move {
                // Ticks at 0, 40, ..., 400 ms
                tokio::time::sleep(Duration::from_millis(420)).await;
                shutdown.trigger();
            }
        };

        let (result, _) = tokio::join!(mix.run(&mut sink, shutdown.clone()), stopper);
        assert!(result.is_ok());
        assert_eq!(sink.frames_written(), 11);
        assert_eq!(sink.get_ref().len(), 11 * config.frame_bytes());
        assert!(sink.get_ref().iter().all(|b| *b == 0));
    }

    struct ClosedPipe;

    impl tokio::io::AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_broken_pipe_triggers_shutdown() {
        let (mut mix, _) = mixer(&MixerConfig::default());
        let mut sink = FrameSink::new(ClosedPipe);
        let shutdown = Shutdown::new();

        let result = mix.run(&mut sink, shutdown.clone()).await;
        assert!(matches!(result, Err(OutputError::Closed)));
        assert!(shutdown.is_triggered());
    }
}
