mod store;
mod summary;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use audition_decode::{AudioReader, DecodeError, SourceHandle};
use parking_lot::RwLock;
use rtrb::{Consumer, Producer, RingBuffer};

pub use store::{CacheKey, StoreError, SummaryStore};
pub use summary::{Column, Peak, PeakQuery, PeakSummary, SummaryConfig};

/// Frames decoded per scan step.
const SCAN_CHUNK_FRAMES: usize = 65536;
const EVENT_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum WaveformEvent {
    /// Fraction of the file summarized so far.
    Progress(f32),
    Complete,
    Failed(String),
}

struct Scan {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Peak summary of the current source, built in the background.
///
/// Queries may run at any time and see whatever prefix has been scanned.
pub struct WaveformCache {
    summary: Arc<RwLock<PeakSummary>>,
    scan: Option<Scan>,
    events: Option<Consumer<WaveformEvent>>,
}

impl WaveformCache {
    pub fn empty() -> Self {
        Self {
            summary: Arc::new(RwLock::new(PeakSummary::new(1, 2, 1, 0, 0))),
            scan: None,
            events: None,
        }
    }

    /// Start summarizing `handle`, or load the summary from `store` when a
    /// matching one exists.
    pub fn build(
        handle: &SourceHandle,
        config: &SummaryConfig,
        store: Option<&SummaryStore>,
    ) -> Self {
        let info = handle.info();
        let block_frames = config.block_frames(info.total_frames);
        let fan_in = config.fan_in as usize;
        let (mut events_tx, events_rx) = RingBuffer::new(EVENT_QUEUE_SIZE);

        let key = handle
            .path()
            .and_then(|path| CacheKey::for_file(path).ok());
        let store = store.filter(|_| key.is_some()).cloned();

        if let (Some(store), Some(key)) = (&store, &key) {
            match store.load(key, block_frames, fan_in) {
                Ok(Some(summary)) => {
                    log::info!("loaded cached summary for {}", handle.display_name());
                    let _ = events_tx.push(WaveformEvent::Complete);
                    return Self {
                        summary: Arc::new(RwLock::new(summary)),
                        scan: None,
                        events: Some(events_rx),
                    };
                }
                Ok(None) => {}
                Err(e) => log::warn!("ignoring cached summary: {e}"),
            }
        }

        let summary = Arc::new(RwLock::new(PeakSummary::new(
            block_frames,
            fan_in,
            info.channels as usize,
            info.sample_rate,
            info.total_frames,
        )));

        if info.total_frames == 0 {
            let _ = events_tx.push(WaveformEvent::Complete);
            return Self {
                summary,
                scan: None,
                events: Some(events_rx),
            };
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let scanner = Scanner {
            handle: handle.clone(),
            summary: summary.clone(),
            cancel: cancel.clone(),
            events: events_tx,
            persist: store.zip(key),
        };

        let scan = thread::Builder::new()
            .name("audition-waveform".into())
            .spawn(move || scanner.run());

        match scan {
            Ok(thread) => Self {
                summary,
                scan: Some(Scan { cancel, thread }),
                events: Some(events_rx),
            },
            Err(e) => {
                log::error!("failed to spawn waveform thread: {e}");
                Self {
                    summary,
                    scan: None,
                    events: None,
                }
            }
        }
    }

    /// Columns for `pixels` pixels spanning `[start_secs, end_secs)`.
    pub fn query(&self, start_secs: f64, end_secs: f64, pixels: usize) -> PeakQuery {
        let summary = self.summary.read();
        if summary.total_frames() == 0 {
            return PeakQuery::empty(summary.channels(), pixels);
        }
        let rate = summary.sample_rate() as f64;
        summary.query(start_secs * rate, end_secs * rate, pixels)
    }

    pub fn poll_events(&mut self) -> Vec<WaveformEvent> {
        let mut events = Vec::new();
        if let Some(consumer) = self.events.as_mut() {
            while let Ok(event) = consumer.pop() {
                events.push(event);
            }
        }
        events
    }

    pub fn is_complete(&self) -> bool {
        self.summary.read().is_complete()
    }

    pub fn progress(&self) -> f32 {
        self.summary.read().progress()
    }

    /// Per-channel extremes, once the whole file is summarized.
    pub fn stats(&self) -> Option<Vec<Peak>> {
        self.summary.read().stats()
    }

    pub fn channels(&self) -> usize {
        self.summary.read().channels()
    }

    /// Stop any scan and forget the summary.
    pub fn clear(&mut self) {
        self.cancel_scan();
        *self = Self::empty();
    }

    fn cancel_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.cancel.store(true, Ordering::Release);
            if scan.thread.join().is_err() {
                log::error!("waveform thread panicked");
            }
        }
    }
}

impl Default for WaveformCache {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for WaveformCache {
    fn drop(&mut self) {
        self.cancel_scan();
    }
}

struct Scanner {
    handle: SourceHandle,
    summary: Arc<RwLock<PeakSummary>>,
    cancel: Arc<AtomicBool>,
    events: Producer<WaveformEvent>,
    persist: Option<(SummaryStore, CacheKey)>,
}

impl Scanner {
    fn run(mut self) {
        let name = self.handle.display_name();
        match self.scan() {
            Ok(true) => {
                log::info!("summarized {name}");
                self.save();
                let _ = self.events.push(WaveformEvent::Complete);
            }
            Ok(false) => log::debug!("summary of {name} cancelled"),
            Err(e) => {
                log::error!("failed to summarize {name}: {e}");
                let _ = self.events.push(WaveformEvent::Failed(e.to_string()));
            }
        }
    }

    /// Returns false when cancelled.
    fn scan(&mut self) -> Result<bool, DecodeError> {
        let mut reader = self.handle.open_reader()?;
        let total = reader.info().total_frames;
        let mut buffer = Vec::with_capacity(SCAN_CHUNK_FRAMES * reader.info().channels as usize);
        let mut position = 0u64;

        while position < total {
            if self.cancel.load(Ordering::Acquire) {
                return Ok(false);
            }

            buffer.clear();
            let count = SCAN_CHUNK_FRAMES.min((total - position) as usize);
            let read = reader.read_frames(position, count, &mut buffer)?;
            if read == 0 {
                log::warn!("decoder ended at frame {position} of {total}");
                break;
            }
            position += read as u64;

            let progress = {
                let mut summary = self.summary.write();
                summary.append(&buffer);
                summary.progress()
            };
            // Leave room for the final event.
            if self.events.slots() > 1 {
                let _ = self.events.push(WaveformEvent::Progress(progress));
            }
        }

        self.summary.write().finish();
        Ok(true)
    }

    fn save(&self) {
        if let Some((store, key)) = &self.persist {
            let summary = self.summary.read().clone();
            if let Err(e) = store.save(key, &summary) {
                log::warn!("failed to store summary: {e}");
            }
        }
    }
}
