mod output;

use audition_decode::{AudioReader, SourceHandle};
use audition_stream::{ReadAheadConfig, ReadAheadSource, SourceReader, StreamError, StreamEvent};
use audition_transport::{TransportState, frames_to_seconds, seconds_to_frame};
use basedrop::Collector;

pub use output::{AudioEngineHandle, start};

const COMMAND_QUEUE_SIZE: usize = 64;
const STATUS_QUEUE_SIZE: usize = 256;
/// Scratch for one pull: 4096 frames of up to 8 channels.
const SCRATCH_SAMPLES: usize = 4096 * 8;

/// Control thread -> real-time thread.
pub enum Command {
    /// Start playing; `run` numbers this start so the end-of-stream report
    /// can be matched to it.
    Play { run: u64 },
    Stop,
    /// Swap in a new source. `source` increments on every load.
    Attach { reader: SourceReader, source: u64 },
    Detach,
}

/// Real-time thread -> control thread.
///
/// Every report carries the source generation it was produced for, so
/// anything left over from a previous file is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Read cursor in output frames, tagged with the seek epoch it belongs to.
    Position { frame: u64, source: u64, epoch: u64 },
    /// The source ran out (end of stream or exhausted) and the processor
    /// stopped itself during play run `run`.
    Finished { source: u64, run: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Finished,
    SourceFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("command queue full")]
    QueueFull,
}

/// Real-time half of the transport, driven by the output callback.
pub struct TransportProcessor {
    commands: rtrb::Consumer<Command>,
    status: rtrb::Producer<Status>,
    reader: Option<SourceReader>,
    source: u64,
    run: u64,
    playing: bool,
    finished_pending: Option<Status>,
    scratch: Vec<f32>,
}

impl TransportProcessor {
    /// Fill `out` (interleaved, `out_channels` wide). Never blocks or
    /// allocates; writes silence while stopped or starved.
    pub fn process(&mut self, out: &mut [f32], out_channels: usize) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                Command::Play { run } => {
                    self.run = run;
                    self.playing = self.reader.is_some();
                }
                Command::Stop => self.playing = false,
                Command::Attach { reader, source } => {
                    self.reader = Some(reader);
                    self.source = source;
                    self.playing = false;
                    self.finished_pending = None;
                }
                Command::Detach => self.release(),
            }
        }

        // The control side may have detached without getting a command through.
        if self.reader.as_ref().is_some_and(SourceReader::is_detached) {
            self.release();
        }

        out.fill(0.0);
        let out_channels = out_channels.max(1);

        if let Some(reader) = self.reader.as_mut() {
            if self.playing {
                let frames = out.len() / out_channels;
                let src_channels = reader.channels();
                let mut done = 0;

                while done < frames {
                    let chunk = (frames - done).min(self.scratch.len() / src_channels);
                    let got = reader.pull(&mut self.scratch[..chunk * src_channels]);
                    if got == 0 {
                        break;
                    }
                    for i in 0..got {
                        let dst = &mut out[(done + i) * out_channels..(done + i + 1) * out_channels];
                        let src = &self.scratch[i * src_channels..(i + 1) * src_channels];
                        for (ch, sample) in dst.iter_mut().enumerate() {
                            *sample = src[ch % src_channels];
                        }
                    }
                    done += got;
                }

                if reader.is_finished() || reader.is_exhausted() {
                    self.playing = false;
                    self.finished_pending = Some(Status::Finished {
                        source: self.source,
                        run: self.run,
                    });
                }
            } else {
                reader.sync();
            }

            let _ = self.status.push(Status::Position {
                frame: reader.position(),
                source: self.source,
                epoch: reader.epoch(),
            });
        }

        if let Some(finished) = self.finished_pending {
            if self.status.push(finished).is_ok() {
                self.finished_pending = None;
            }
        }
    }

    fn release(&mut self) {
        self.reader = None;
        self.playing = false;
        self.finished_pending = None;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Frames ready to play without touching the decoder.
    pub fn buffered_frames(&self) -> usize {
        self.reader.as_ref().map_or(0, |r| r.buffered())
    }

    /// True when there is nothing left to play.
    pub fn is_source_finished(&self) -> bool {
        self.reader
            .as_ref()
            .is_none_or(|r| r.is_finished() || r.is_exhausted())
    }
}

/// Control half of the transport.
///
/// State changes are mirrored to the processor through the command queue
/// and only take effect locally once the command is queued; `poll` folds
/// the processor's reports back in.
pub struct Transport {
    source: ReadAheadSource,
    commands: rtrb::Producer<Command>,
    status: rtrb::Consumer<Status>,
    collector: Collector,
    output_rate: u32,
    read_ahead: usize,

    state: TransportState,
    loaded: bool,
    /// Output frames.
    position: u64,
    length: u64,
    seek_epoch: u64,
    generation: u64,
    run: u64,
}

impl Transport {
    pub fn new(output_rate: u32, config: ReadAheadConfig) -> (Self, TransportProcessor) {
        let collector = Collector::new();
        let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(COMMAND_QUEUE_SIZE);
        let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(STATUS_QUEUE_SIZE);

        let transport = Self {
            source: ReadAheadSource::new(config, output_rate, collector.handle()),
            commands: command_tx,
            status: status_rx,
            collector,
            output_rate,
            read_ahead: config.read_ahead_frames,
            state: TransportState::Stopped,
            loaded: false,
            position: 0,
            length: 0,
            seek_epoch: 0,
            generation: 0,
            run: 0,
        };

        let processor = TransportProcessor {
            commands: command_rx,
            status: status_tx,
            reader: None,
            source: 0,
            run: 0,
            playing: false,
            finished_pending: None,
            scratch: vec![0.0; SCRATCH_SAMPLES],
        };

        (transport, processor)
    }

    /// Replace the current source. The previous prefetch thread is joined
    /// before the new reader opens.
    pub fn load(&mut self, handle: &SourceHandle) -> Result<(), TransportError> {
        self.unload();
        let reader = self.source.attach(handle, self.read_ahead)?;
        self.install(reader)
    }

    pub fn load_reader<R>(&mut self, reader: R) -> Result<(), TransportError>
    where
        R: AudioReader + 'static,
    {
        self.unload();
        let reader = self.source.attach_reader(reader, self.read_ahead)?;
        self.install(reader)
    }

    fn install(&mut self, reader: SourceReader) -> Result<(), TransportError> {
        let source = self.generation + 1;
        if self.commands.push(Command::Attach { reader, source }).is_err() {
            log::warn!("command queue full, source not attached");
            self.source.detach();
            return Err(TransportError::QueueFull);
        }
        self.generation = source;
        self.loaded = true;
        self.position = 0;
        self.seek_epoch = 0;
        self.length = self.source.total_frames();
        Ok(())
    }

    /// Drop the current source. Works even when the processor is not
    /// draining commands: the detached reader goes silent on its own.
    pub fn unload(&mut self) {
        if !self.loaded {
            return;
        }
        if self.commands.push(Command::Detach).is_err() {
            log::warn!("command queue full, relying on detach flag");
        }
        self.source.detach();
        self.loaded = false;
        self.state = TransportState::Stopped;
        self.position = 0;
        self.length = 0;
        self.collector.collect();
    }

    pub fn start(&mut self) {
        if !self.loaded || self.state.is_playing() {
            return;
        }
        let run = self.run + 1;
        if self.commands.push(Command::Play { run }).is_err() {
            log::warn!("command queue full, start ignored");
            return;
        }
        self.run = run;
        self.state = TransportState::Playing;
        log::debug!("transport started at frame {}", self.position);
    }

    pub fn stop(&mut self) {
        if !self.state.is_playing() {
            return;
        }
        if self.commands.push(Command::Stop).is_err() {
            log::warn!("command queue full, stop ignored");
            return;
        }
        self.state = TransportState::Stopped;
        log::debug!("transport stopped at frame {}", self.position);
    }

    /// Move to `seconds`, clamped to `[0, length)`. Valid while playing or
    /// stopped.
    pub fn seek(&mut self, seconds: f64) {
        if !self.loaded {
            return;
        }
        let frame = seconds_to_frame(seconds, self.output_rate).min(self.length.saturating_sub(1));
        if let Some(epoch) = self.source.seek(frame) {
            self.seek_epoch = epoch;
            self.position = frame;
        }
    }

    /// Fold in processor status and prefetch events.
    pub fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        while let Ok(status) = self.status.pop() {
            match status {
                Status::Position { frame, source, epoch }
                    if source == self.generation && epoch == self.seek_epoch =>
                {
                    self.position = frame;
                }
                // A seek after the processor stopped itself does not restart
                // it, so this applies whatever the seek epoch is.
                Status::Finished { source, run } if source == self.generation && run == self.run => {
                    if self.state.is_playing() {
                        self.state = TransportState::Stopped;
                        log::debug!("transport reached end of stream");
                        events.push(TransportEvent::Finished);
                    }
                }
                _ => {}
            }
        }

        for event in self.source.poll_events() {
            match event {
                StreamEvent::Failed(reason) => {
                    log::error!("playback source failed: {reason}");
                    self.stop();
                    events.push(TransportEvent::SourceFailed(reason));
                }
            }
        }

        self.length = self.source.total_frames();
        self.collector.collect();
        events
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn position_frames(&self) -> u64 {
        self.position
    }

    pub fn position_seconds(&self) -> f64 {
        frames_to_seconds(self.position, self.output_rate)
    }

    pub fn length_seconds(&self) -> f64 {
        frames_to_seconds(self.length, self.output_rate)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}
