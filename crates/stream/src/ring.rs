use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Restart {
    Unchanged,
    /// The consumer has not picked up the seek yet.
    Waiting,
    At(u64),
}

/// Single-producer single-consumer ring of interleaved frames.
///
/// Cursors are absolute frame indices in the output stream. The prefetch
/// thread owns `write`, the playback side owns `read`; neither stores the
/// other's cursor. Samples are kept as `f32` bit patterns in atomics so both
/// sides can touch the storage without locks.
///
/// Seeks go through an epoch handshake:
/// 1. the control thread stores a target and bumps `seek_epoch`;
/// 2. the consumer moves `read` to the target and publishes `reader_epoch`;
/// 3. the producer sees the acknowledgement, moves `write` onto `read` and
///    publishes `writer_epoch`.
///
/// The consumer only copies frames while `writer_epoch` equals the epoch it
/// acknowledged, so nothing decoded for the old position is ever returned.
pub(crate) struct FrameRing {
    slots: Box<[AtomicU32]>,
    capacity: usize,
    channels: usize,

    read: AtomicU64,
    write: AtomicU64,
    total: AtomicU64,

    seek_epoch: AtomicU64,
    seek_target: AtomicU64,
    reader_epoch: AtomicU64,
    writer_epoch: AtomicU64,

    exhausted: AtomicBool,
    stop: AtomicBool,
}

impl FrameRing {
    pub(crate) fn new(capacity: usize, channels: usize, total: u64) -> Self {
        let capacity = capacity.max(1);
        let channels = channels.max(1);
        let slots = (0..capacity * channels)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            capacity,
            channels,
            read: AtomicU64::new(0),
            write: AtomicU64::new(0),
            total: AtomicU64::new(total),
            seek_epoch: AtomicU64::new(0),
            seek_target: AtomicU64::new(0),
            reader_epoch: AtomicU64::new(0),
            writer_epoch: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Shrink the stream length when the decoder ends early.
    pub(crate) fn mark_end(&self, frames: u64) {
        self.total.fetch_min(frames, Ordering::AcqRel);
    }

    pub(crate) fn read_cursor(&self) -> u64 {
        self.read.load(Ordering::Acquire)
    }

    pub(crate) fn write_cursor(&self) -> u64 {
        self.write.load(Ordering::Acquire)
    }

    // control side

    /// Request a seek; returns the new epoch.
    pub(crate) fn request_seek(&self, frame: u64) -> u64 {
        self.seek_target.store(frame.min(self.total()), Ordering::Release);
        self.seek_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn requested_epoch(&self) -> u64 {
        self.seek_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn set_exhausted(&self) {
        self.exhausted.store(true, Ordering::Release);
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    // consumer side

    /// Apply a pending seek. Returns true if the read cursor moved.
    pub(crate) fn acknowledge_seek(&self, epoch: &mut u64) -> bool {
        let requested = self.seek_epoch.load(Ordering::Acquire);
        if requested == *epoch {
            return false;
        }
        let target = self.seek_target.load(Ordering::Acquire);
        self.read.store(target, Ordering::Release);
        *epoch = requested;
        self.reader_epoch.store(requested, Ordering::Release);
        true
    }

    /// True once the producer has restarted at the consumer's epoch.
    pub(crate) fn settled(&self, epoch: u64) -> bool {
        self.seek_epoch.load(Ordering::Acquire) == epoch
            && self.writer_epoch.load(Ordering::Acquire) == epoch
    }

    /// Frames readable at `epoch`, 0 while a seek is in flight.
    pub(crate) fn available(&self, epoch: u64) -> usize {
        if !self.settled(epoch) {
            return 0;
        }
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        write.saturating_sub(read) as usize
    }

    /// Copy up to `out.len() / channels` frames. Never blocks.
    pub(crate) fn read_into(&self, epoch: u64, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.available(epoch));
        if frames == 0 {
            return 0;
        }

        let read = self.read.load(Ordering::Relaxed);
        let start = (read % self.capacity as u64) as usize;
        for i in 0..frames {
            let slot = ((start + i) % self.capacity) * self.channels;
            let dst = i * self.channels;
            for ch in 0..self.channels {
                out[dst + ch] = f32::from_bits(self.slots[slot + ch].load(Ordering::Relaxed));
            }
        }

        self.read.store(read + frames as u64, Ordering::Release);
        frames
    }

    // producer side

    /// Restart the write cursor once the consumer has acknowledged a seek.
    pub(crate) fn restart_writer(&self, epoch: &mut u64) -> Restart {
        let requested = self.seek_epoch.load(Ordering::Acquire);
        if requested == *epoch {
            return Restart::Unchanged;
        }
        if self.reader_epoch.load(Ordering::Acquire) != requested {
            return Restart::Waiting;
        }
        let target = self.read.load(Ordering::Acquire);
        self.write.store(target, Ordering::Release);
        *epoch = requested;
        self.writer_epoch.store(requested, Ordering::Release);
        Restart::At(target)
    }

    /// Frames the producer may write without overtaking the reader.
    pub(crate) fn free(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Relaxed);
        self.capacity
            .saturating_sub(write.saturating_sub(read) as usize)
    }

    /// Append interleaved frames; returns how many fit.
    pub(crate) fn push(&self, samples: &[f32]) -> usize {
        let frames = (samples.len() / self.channels).min(self.free());
        if frames == 0 {
            return 0;
        }

        let write = self.write.load(Ordering::Relaxed);
        let start = (write % self.capacity as u64) as usize;
        for i in 0..frames {
            let slot = ((start + i) % self.capacity) * self.channels;
            let src = i * self.channels;
            for ch in 0..self.channels {
                self.slots[slot + ch].store(samples[src + ch].to_bits(), Ordering::Relaxed);
            }
        }

        self.write.store(write + frames as u64, Ordering::Release);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_wrap_around() {
        let ring = FrameRing::new(4, 2, 100);
        let epoch = 0;

        assert_eq!(ring.push(&[1.0, 1.5, 2.0, 2.5, 3.0, 3.5]), 3);
        let mut out = [0.0; 4];
        assert_eq!(ring.read_into(epoch, &mut out), 2);
        assert_eq!(out, [1.0, 1.5, 2.0, 2.5]);

        // Wraps past the end of storage.
        assert_eq!(ring.push(&[4.0, 4.5, 5.0, 5.5, 6.0, 6.5, 7.0, 7.5]), 3);
        let mut out = [0.0; 8];
        assert_eq!(ring.read_into(epoch, &mut out), 4);
        assert_eq!(out, [3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0, 6.5]);
    }

    #[test]
    fn test_push_never_overtakes_reader() {
        let ring = FrameRing::new(8, 1, 100);
        assert_eq!(ring.push(&[0.0; 20]), 8);
        assert_eq!(ring.free(), 0);
        assert_eq!(ring.push(&[0.0; 1]), 0);
    }

    #[test]
    fn test_seek_blocks_reads_until_writer_restarts() {
        let ring = FrameRing::new(8, 1, 100);
        let mut reader_epoch = 0;
        let mut writer_epoch = 0;
        ring.push(&[0.0, 1.0, 2.0, 3.0]);

        ring.request_seek(50);
        assert_eq!(ring.restart_writer(&mut writer_epoch), Restart::Waiting);

        assert!(ring.acknowledge_seek(&mut reader_epoch));
        assert_eq!(ring.read_cursor(), 50);
        // Stale frames are still physically in the ring but not readable.
        let mut out = [0.0; 4];
        assert_eq!(ring.read_into(reader_epoch, &mut out), 0);

        assert_eq!(ring.restart_writer(&mut writer_epoch), Restart::At(50));
        assert_eq!(ring.write_cursor(), 50);
        ring.push(&[50.0, 51.0]);
        assert_eq!(ring.read_into(reader_epoch, &mut out), 2);
        assert_eq!(&out[..2], &[50.0, 51.0]);
    }

    #[test]
    fn test_seek_target_clamped_to_total() {
        let ring = FrameRing::new(8, 1, 10);
        let mut epoch = 0;
        ring.request_seek(500);
        ring.acknowledge_seek(&mut epoch);
        assert_eq!(ring.read_cursor(), 10);
    }

    #[test]
    fn test_mark_end_only_shrinks() {
        let ring = FrameRing::new(8, 1, 10);
        ring.mark_end(20);
        assert_eq!(ring.total(), 10);
        ring.mark_end(7);
        assert_eq!(ring.total(), 7);
    }
}
