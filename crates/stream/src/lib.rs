mod prefetch;
mod ring;

use std::thread::{self, JoinHandle};

use audition_decode::{AudioReader, DecodeError, SourceHandle, SourceInfo};
use audition_transport::{StreamResampler, convert_frames};
use basedrop::{Handle, Shared};
use rtrb::{Consumer, RingBuffer};

use prefetch::Prefetcher;
use ring::FrameRing;

const EVENT_QUEUE_SIZE: usize = 16;

/// Out-of-band notifications from the prefetch thread.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Reads kept failing; the source is exhausted.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Resampler error: {0}")]
    Resampler(String),

    #[error("Failed to spawn prefetch thread: {0}")]
    Spawn(std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAheadConfig {
    /// Ring size in output frames.
    pub capacity_frames: usize,
    /// Frames kept decoded ahead of the read cursor.
    pub read_ahead_frames: usize,
}

impl Default for ReadAheadConfig {
    fn default() -> Self {
        Self {
            capacity_frames: 32768,
            read_ahead_frames: 32768,
        }
    }
}

struct Attached {
    ring: Shared<FrameRing>,
    thread: JoinHandle<()>,
    events: Consumer<StreamEvent>,
    info: SourceInfo,
}

/// Control half of the read-ahead buffered source.
///
/// Owns the prefetch thread of the attached source. The matching
/// [`SourceReader`] is handed to the playback path on `attach`.
pub struct ReadAheadSource {
    config: ReadAheadConfig,
    output_rate: u32,
    gc: Handle,
    attached: Option<Attached>,
}

impl ReadAheadSource {
    pub fn new(config: ReadAheadConfig, output_rate: u32, gc: Handle) -> Self {
        Self {
            config,
            output_rate,
            gc,
            attached: None,
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Open a fresh reader on `handle` and start prefetching from frame 0.
    pub fn attach(
        &mut self,
        handle: &SourceHandle,
        read_ahead: usize,
    ) -> Result<SourceReader, StreamError> {
        self.detach();
        let reader = handle.open_reader()?;
        self.attach_reader(reader, read_ahead)
    }

    pub fn attach_reader<R>(
        &mut self,
        reader: R,
        read_ahead: usize,
    ) -> Result<SourceReader, StreamError>
    where
        R: AudioReader + 'static,
    {
        self.detach();

        let info = reader.info().clone();
        let resampler = if info.sample_rate != self.output_rate {
            let resampler =
                StreamResampler::new(info.sample_rate, self.output_rate, info.channels)
                    .map_err(|e| StreamError::Resampler(e.to_string()))?;
            Some(resampler)
        } else {
            None
        };

        let total = convert_frames(info.total_frames, info.sample_rate, self.output_rate);
        let ring = Shared::new(
            &self.gc,
            FrameRing::new(self.config.capacity_frames, info.channels as usize, total),
        );
        let (events_tx, events_rx) = RingBuffer::new(EVENT_QUEUE_SIZE);
        let read_ahead = read_ahead.min(self.config.read_ahead_frames.max(1));
        let prefetcher = Prefetcher::new(ring.clone(), reader, resampler, read_ahead, events_tx);

        let thread = thread::Builder::new()
            .name("audition-prefetch".into())
            .spawn(move || prefetcher.run())
            .map_err(StreamError::Spawn)?;

        log::info!(
            "attached source: {} Hz -> {} Hz, {} ch, {} frames",
            info.sample_rate,
            self.output_rate,
            info.channels,
            total
        );

        self.attached = Some(Attached {
            ring: ring.clone(),
            thread,
            events: events_rx,
            info,
        });
        Ok(SourceReader::new(ring))
    }

    /// Request a seek to `frame` (output rate). Returns the seek epoch, which
    /// the reader reports once it has applied the seek.
    pub fn seek(&self, frame: u64) -> Option<u64> {
        let attached = self.attached.as_ref()?;
        let epoch = attached.ring.request_seek(frame);
        attached.thread.thread().unpark();
        log::debug!("seek to frame {frame} (epoch {epoch})");
        Some(epoch)
    }

    /// Stop the prefetch thread and wait for it. No reads happen afterwards.
    pub fn detach(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.ring.request_stop();
            attached.thread.thread().unpark();
            if attached.thread.join().is_err() {
                log::error!("prefetch thread panicked");
            }
            log::debug!("detached source");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn info(&self) -> Option<&SourceInfo> {
        self.attached.as_ref().map(|a| &a.info)
    }

    /// Stream length in output frames.
    pub fn total_frames(&self) -> u64 {
        self.attached.as_ref().map_or(0, |a| a.ring.total())
    }

    pub fn poll_events(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(attached) = self.attached.as_mut() {
            while let Ok(event) = attached.events.pop() {
                events.push(event);
            }
        }
        events
    }
}

impl Drop for ReadAheadSource {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Consumer half, owned by the playback path.
///
/// None of its methods block, allocate or decode.
pub struct SourceReader {
    ring: Shared<FrameRing>,
    epoch: u64,
}

impl SourceReader {
    pub(crate) fn new(ring: Shared<FrameRing>) -> Self {
        Self { ring, epoch: 0 }
    }

    /// Copy buffered frames into `out` (interleaved). Returns frames copied.
    ///
    /// A pending seek is applied first; that call returns 0 and later calls
    /// only ever return frames decoded for the new position.
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        if self.ring.acknowledge_seek(&mut self.epoch) || self.ring.is_exhausted() {
            return 0;
        }
        self.ring.read_into(self.epoch, out)
    }

    /// Apply a pending seek without reading, so the prefetcher can refill
    /// while playback is stopped.
    pub fn sync(&mut self) {
        self.ring.acknowledge_seek(&mut self.epoch);
    }

    /// Read cursor in output frames.
    pub fn position(&self) -> u64 {
        self.ring.read_cursor()
    }

    /// Seek epoch this reader has applied.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn buffered(&self) -> usize {
        self.ring.available(self.epoch)
    }

    pub fn channels(&self) -> usize {
        self.ring.channels()
    }

    pub fn total_frames(&self) -> u64 {
        self.ring.total()
    }

    /// True once every frame of the stream has been pulled.
    pub fn is_finished(&self) -> bool {
        self.ring.settled(self.epoch) && self.ring.read_cursor() >= self.ring.total()
    }

    pub fn is_exhausted(&self) -> bool {
        self.ring.is_exhausted()
    }

    /// True once the control side has detached this source. Nothing more
    /// will be written to the ring.
    pub fn is_detached(&self) -> bool {
        self.ring.stop_requested()
    }

    pub fn seek_pending(&self) -> bool {
        self.ring.requested_epoch() != self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audition_transport::AudioArc;
    use basedrop::Collector;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn ramp_handle(frames: usize, sample_rate: u32) -> SourceHandle {
        let samples = (0..frames).map(|i| i as f32).collect();
        SourceHandle::from_memory("ramp", AudioArc::new(samples, sample_rate, 1))
    }

    fn pull_until(reader: &mut SourceReader, out: &mut [f32]) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let got = reader.pull(out);
            if got > 0 || Instant::now() > deadline {
                return got;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_threaded_seek_returns_target_frame() {
        let _ = env_logger::builder().is_test(true).try_init();
        let collector = Collector::new();
        let mut source = ReadAheadSource::new(ReadAheadConfig::default(), 44100, collector.handle());
        let mut reader = source.attach(&ramp_handle(441_000, 44100), 32768).unwrap();

        let mut out = [0.0f32; 100];
        assert_eq!(pull_until(&mut reader, &mut out), 100);
        assert_eq!(out[0], 0.0);

        let epoch = source.seek(220_500).unwrap();
        assert_eq!(reader.pull(&mut out), 0);
        assert_eq!(reader.epoch(), epoch);

        assert!(pull_until(&mut reader, &mut out) > 0);
        assert_eq!(out[0], 220_500.0);
        source.detach();
    }

    #[test]
    fn test_detach_stops_reads() {
        struct Counting {
            info: SourceInfo,
            reads: Arc<AtomicUsize>,
        }
        impl AudioReader for Counting {
            fn info(&self) -> &SourceInfo {
                &self.info
            }
            fn read_frames(
                &mut self,
                _start: u64,
                count: usize,
                out: &mut Vec<f32>,
            ) -> Result<usize, DecodeError> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                out.resize(out.len() + count, 0.0);
                Ok(count)
            }
        }

        let collector = Collector::new();
        let reads = Arc::new(AtomicUsize::new(0));
        let reader = Counting {
            info: SourceInfo {
                format_name: "counting".into(),
                sample_rate: 48000,
                channels: 1,
                bits_per_sample: 32,
                total_frames: 48000 * 600,
            },
            reads: reads.clone(),
        };

        let config = ReadAheadConfig {
            capacity_frames: 4096,
            read_ahead_frames: 4096,
        };
        let mut source = ReadAheadSource::new(config, 48000, collector.handle());
        let mut consumer = source.attach_reader(reader, 4096).unwrap();

        // Keep the prefetcher busy.
        let mut out = [0.0f32; 1024];
        for _ in 0..20 {
            consumer.pull(&mut out);
            thread::sleep(Duration::from_millis(1));
        }

        assert!(!consumer.is_detached());
        source.detach();
        assert!(!source.is_attached());
        assert!(consumer.is_detached());
        let after = reads.load(Ordering::SeqCst);

        for _ in 0..20 {
            consumer.pull(&mut out);
        }
        thread::sleep(Duration::from_millis(30));
        assert_eq!(reads.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_resamples_to_output_rate() {
        let collector = Collector::new();
        let mut source = ReadAheadSource::new(ReadAheadConfig::default(), 48000, collector.handle());
        let reader = source.attach(&ramp_handle(44100, 44100), 32768).unwrap();

        assert_eq!(source.total_frames(), 48000);
        assert_eq!(reader.total_frames(), 48000);
        assert_eq!(source.info().map(|i| i.sample_rate), Some(44100));
    }

    #[test]
    fn test_seek_without_source_is_none() {
        let collector = Collector::new();
        let source = ReadAheadSource::new(ReadAheadConfig::default(), 48000, collector.handle());
        assert_eq!(source.seek(10), None);
        assert_eq!(source.total_frames(), 0);
    }
}
