use std::thread;
use std::time::Duration;

use audition_decode::AudioReader;
use audition_transport::StreamResampler;
use basedrop::Shared;

use crate::StreamEvent;
use crate::ring::{FrameRing, Restart};

/// Source frames decoded per block when no resampler dictates the size.
const READ_CHUNK: usize = 1024;
/// Failed reads retried before the source is marked exhausted.
pub(crate) const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);
const IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Frames were pushed into the ring.
    Filled(usize),
    /// Read-ahead target reached, end of stream, or waiting on the consumer.
    Idle,
    /// A read failed and will be retried.
    Retry,
    Stopped,
}

/// Producer half: decodes ahead of the read cursor on its own thread.
pub(crate) struct Prefetcher<R: AudioReader> {
    ring: Shared<FrameRing>,
    reader: R,
    resampler: Option<StreamResampler>,
    events: rtrb::Producer<StreamEvent>,
    read_ahead: usize,

    epoch: u64,
    /// Next source-rate frame to decode.
    source_pos: u64,
    source_done: bool,
    /// Output-rate frames decoded but not yet pushed.
    pending: Vec<f32>,
    pending_offset: usize,
    /// Output frames to drop after a resampled restart.
    discard: usize,
    scratch: Vec<f32>,
    retries: u32,
}

impl<R: AudioReader> Prefetcher<R> {
    pub(crate) fn new(
        ring: Shared<FrameRing>,
        reader: R,
        resampler: Option<StreamResampler>,
        read_ahead: usize,
        events: rtrb::Producer<StreamEvent>,
    ) -> Self {
        let read_ahead = read_ahead.clamp(1, ring.capacity());
        Self {
            ring,
            reader,
            resampler,
            events,
            read_ahead,
            epoch: 0,
            source_pos: 0,
            source_done: false,
            pending: Vec::new(),
            pending_offset: 0,
            discard: 0,
            scratch: Vec::new(),
            retries: 0,
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            match self.step() {
                Step::Filled(_) => {}
                Step::Idle => thread::park_timeout(IDLE_WAIT),
                Step::Retry => thread::sleep(RETRY_BACKOFF * self.retries),
                Step::Stopped => break,
            }
        }
        log::debug!("prefetch stopped at frame {}", self.ring.write_cursor());
    }

    pub(crate) fn step(&mut self) -> Step {
        if self.ring.stop_requested() || self.ring.is_exhausted() {
            return Step::Stopped;
        }

        match self.ring.restart_writer(&mut self.epoch) {
            Restart::Unchanged => {}
            Restart::Waiting => return Step::Idle,
            Restart::At(frame) => self.restart(frame),
        }

        let write = self.ring.write_cursor();
        let buffered = write.saturating_sub(self.ring.read_cursor()) as usize;
        let total = self.ring.total();
        if buffered >= self.read_ahead || write >= total {
            return Step::Idle;
        }

        if self.pending_frames() == 0 {
            if self.source_done {
                if write < total {
                    log::debug!("decoder ended at {write} of {total} frames");
                    self.ring.mark_end(write);
                }
                return Step::Idle;
            }
            if let Err(err) = self.decode_block() {
                return self.fail(err);
            }
            self.retries = 0;
        }

        let channels = self.ring.channels();
        let room = ((total - write) as usize).min(self.pending_frames());
        let start = self.pending_offset;
        let pushed = self
            .ring
            .push(&self.pending[start..start + room * channels]);
        self.pending_offset += pushed * channels;

        Step::Filled(pushed)
    }

    fn pending_frames(&self) -> usize {
        (self.pending.len() - self.pending_offset) / self.ring.channels()
    }

    fn restart(&mut self, frame: u64) {
        self.pending.clear();
        self.pending_offset = 0;
        self.source_done = false;
        self.discard = 0;

        match self.resampler.as_mut() {
            Some(resampler) => {
                resampler.reset();
                let ratio = resampler.ratio();
                self.source_pos = (frame as f64 / ratio).floor() as u64;
                self.discard = (frame as f64 - self.source_pos as f64 * ratio)
                    .round()
                    .max(0.0) as usize;
            }
            None => self.source_pos = frame,
        }

        log::debug!("prefetch restarted at frame {frame} (source {})", self.source_pos);
    }

    fn decode_block(&mut self) -> Result<(), String> {
        let channels = self.ring.channels();
        let chunk = self
            .resampler
            .as_ref()
            .map_or(READ_CHUNK, |r| r.input_frames_next());

        self.scratch.clear();
        let read = self
            .reader
            .read_frames(self.source_pos, chunk, &mut self.scratch)
            .map_err(|e| e.to_string())?;

        self.pending.clear();
        self.pending_offset = 0;

        let source_total = self.reader.info().total_frames;
        match self.resampler.as_mut() {
            Some(resampler) => {
                if read > 0 {
                    resampler
                        .process(&self.scratch[..read * channels], &mut self.pending)
                        .map_err(|e| e.to_string())?;
                }
                if read < chunk || self.source_pos + read as u64 >= source_total {
                    resampler
                        .flush(&mut self.pending)
                        .map_err(|e| e.to_string())?;
                    self.source_done = true;
                }
            }
            None => {
                self.pending.extend_from_slice(&self.scratch[..read * channels]);
                if read == 0 {
                    self.source_done = true;
                }
            }
        }
        self.source_pos += read as u64;

        if self.discard > 0 {
            let dropped = self.discard.min(self.pending.len() / channels);
            self.pending_offset = dropped * channels;
            self.discard -= dropped;
        }

        Ok(())
    }

    fn fail(&mut self, err: String) -> Step {
        self.retries += 1;
        if self.retries <= MAX_RETRIES {
            log::warn!(
                "read at frame {} failed (attempt {}/{MAX_RETRIES}): {err}",
                self.source_pos,
                self.retries
            );
            return Step::Retry;
        }

        log::error!("source exhausted after {MAX_RETRIES} retries: {err}");
        self.ring.set_exhausted();
        let _ = self.events.push(StreamEvent::Failed(err));
        Step::Stopped
    }
}
