use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use audition_decode::{DecodeError, SourceHandle, SourceInfo};
use audition_engine::{AudioEngineHandle, Transport, TransportError, TransportEvent, TransportProcessor};
use audition_waveform::{PeakQuery, SummaryStore, WaveformCache, WaveformEvent};

use crate::config::Config;
use crate::info::SourceSummary;
use crate::view::ViewModel;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Notifications for the host, drained once per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    Loaded { name: String, length_secs: f64 },
    LoadFailed { name: String, reason: String },
    Unloaded,
    /// Playback reached the end of the file.
    Finished,
    PlaybackFailed(String),
    SummaryProgress(f32),
    SummaryReady,
    SummaryFailed(String),
}

/// Host input, for UIs that route events generically.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Select(PathBuf),
    DropFile(PathBuf),
    Close,
    Play,
    Stop,
    Toggle,
    Seek(f64),
    Rewind,
    Restart,
    SetZoomPercent(f64),
    SetRange(f64, f64),
    SetFollowTransport(bool),
    Scroll(f64),
    Magnify(f64),
    ScrubTo(f32),
    ReleaseScrub,
}

/// Everything the host needs to draw one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub cursor_x: f32,
    pub cursor_visible: bool,
    pub range: (f64, f64),
    pub position_secs: f64,
    pub playing: bool,
    pub peaks: PeakQuery,
    pub summary_progress: f32,
}

/// One-file audio previewer: decoder, read-ahead playback, waveform summary
/// and view, driven by a cooperative `tick`.
pub struct Previewer {
    config: Config,
    transport: Transport,
    _output: Option<AudioEngineHandle>,
    store: Option<SummaryStore>,
    source: Option<SourceHandle>,
    waveform: WaveformCache,
    view: ViewModel,
    scrubbing: bool,
    events: VecDeque<PreviewEvent>,
}

impl Previewer {
    /// Open the default audio output and start an empty previewer.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let (transport, output) = audition_engine::start(config.read_ahead())?;
        Ok(Self::with_transport(config, transport, Some(output)))
    }

    /// Previewer without an audio device; the caller drives the returned
    /// processor at `output_rate`.
    pub fn headless(config: Config, output_rate: u32) -> (Self, TransportProcessor) {
        let (transport, processor) = Transport::new(output_rate, config.read_ahead());
        (Self::with_transport(config, transport, None), processor)
    }

    fn with_transport(config: Config, transport: Transport, output: Option<AudioEngineHandle>) -> Self {
        let store = if config.cache_enabled {
            config
                .cache_dir()
                .map(|dir| SummaryStore::new(dir, config.cache_max_entries))
        } else {
            None
        };
        let view = ViewModel::new(config.max_zoom_percent, config.follow_transport);

        Self {
            config,
            transport,
            _output: output,
            store,
            source: None,
            waveform: WaveformCache::empty(),
            view,
            scrubbing: false,
            events: VecDeque::new(),
        }
    }

    /// Load `path`. Selecting the file that is already loaded does nothing;
    /// a file that fails to open leaves nothing loaded.
    pub fn select(&mut self, path: impl AsRef<Path>) -> Result<(), PreviewError> {
        let path = path.as_ref();
        if self.is_current(path) {
            return Ok(());
        }

        match SourceHandle::open(path) {
            Ok(handle) => self.load(handle),
            Err(e) => {
                self.close();
                self.load_failed(path.display().to_string(), &e);
                Err(e.into())
            }
        }
    }

    pub fn drop_file(&mut self, path: impl AsRef<Path>) -> Result<(), PreviewError> {
        self.select(path)
    }

    /// Load an already opened source, replacing the current one.
    pub fn load(&mut self, handle: SourceHandle) -> Result<(), PreviewError> {
        self.close();

        if let Err(e) = self.transport.load(&handle) {
            self.load_failed(handle.display_name(), &e);
            return Err(e.into());
        }

        self.waveform = WaveformCache::build(&handle, &self.config.summary_config(), self.store.as_ref());
        self.view.reset(self.transport.length_seconds());

        let name = handle.display_name();
        log::info!("loaded {name}");
        self.events.push_back(PreviewEvent::Loaded {
            name,
            length_secs: self.transport.length_seconds(),
        });
        self.source = Some(handle);
        Ok(())
    }

    /// Whether `path` names the loaded file, however it is spelled.
    fn is_current(&self, path: &Path) -> bool {
        let Some(current) = self.source.as_ref().and_then(|s| s.path()) else {
            return false;
        };
        current == path
            || matches!(
                (current.canonicalize(), path.canonicalize()),
                (Ok(a), Ok(b)) if a == b
            )
    }

    fn load_failed(&mut self, name: String, error: &dyn std::error::Error) {
        log::warn!("failed to load {name}: {error}");
        self.events.push_back(PreviewEvent::LoadFailed {
            name,
            reason: error.to_string(),
        });
    }

    /// Tear down the current file, joining its background threads.
    pub fn close(&mut self) {
        self.transport.unload();
        self.waveform.clear();
        self.view.clear();
        self.scrubbing = false;
        if self.source.take().is_some() {
            self.events.push_back(PreviewEvent::Unloaded);
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    pub fn play(&mut self) {
        self.transport.start();
    }

    pub fn stop(&mut self) {
        self.transport.stop();
    }

    pub fn toggle(&mut self) {
        if self.transport.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        self.transport.seek(seconds);
    }

    /// Stop and return to the start.
    pub fn rewind(&mut self) {
        self.transport.stop();
        self.transport.seek(0.0);
    }

    /// Play from the start.
    pub fn restart(&mut self) {
        self.transport.seek(0.0);
        self.transport.start();
    }

    /// Pointer down or drag at pixel `x`: stop and move the transport there.
    pub fn scrub_to(&mut self, x: f32) {
        if !self.is_loaded() || !self.view.can_move_transport() {
            return;
        }
        self.scrubbing = true;
        self.transport.stop();
        self.transport.seek(self.view.x_to_time(x).max(0.0));
    }

    /// Pointer up: resume playback from the scrubbed position.
    pub fn release_scrub(&mut self) {
        if std::mem::take(&mut self.scrubbing) {
            self.transport.start();
        }
    }

    pub fn set_zoom_percent(&mut self, percent: f64) {
        let anchor = self.transport.position_seconds();
        self.view.set_zoom_percent(percent, Some(anchor));
    }

    pub fn magnify(&mut self, scale: f64) {
        let anchor = self.transport.position_seconds();
        self.view.magnify(scale, Some(anchor));
    }

    pub fn set_range(&mut self, start: f64, end: f64) {
        self.view.set_range(start, end);
    }

    pub fn set_follow_transport(&mut self, follow: bool) {
        self.view.set_follow_transport(follow);
    }

    pub fn scroll(&mut self, delta: f64) {
        self.view.scroll(delta);
    }

    pub fn handle(&mut self, intent: Intent) -> Result<(), PreviewError> {
        match intent {
            Intent::Select(path) => return self.select(path),
            Intent::DropFile(path) => return self.drop_file(path),
            Intent::Close => self.close(),
            Intent::Play => self.play(),
            Intent::Stop => self.stop(),
            Intent::Toggle => self.toggle(),
            Intent::Seek(seconds) => self.seek(seconds),
            Intent::Rewind => self.rewind(),
            Intent::Restart => self.restart(),
            Intent::SetZoomPercent(percent) => self.set_zoom_percent(percent),
            Intent::SetRange(start, end) => self.set_range(start, end),
            Intent::SetFollowTransport(follow) => self.set_follow_transport(follow),
            Intent::Scroll(delta) => self.scroll(delta),
            Intent::Magnify(scale) => self.magnify(scale),
            Intent::ScrubTo(x) => self.scrub_to(x),
            Intent::ReleaseScrub => self.release_scrub(),
        }
        Ok(())
    }

    /// Periodic refresh: folds in background events, updates the view and
    /// returns what to draw at `width` pixels.
    pub fn tick(&mut self, width: f32) -> RenderFrame {
        for event in self.transport.poll() {
            self.events.push_back(match event {
                TransportEvent::Finished => PreviewEvent::Finished,
                TransportEvent::SourceFailed(reason) => PreviewEvent::PlaybackFailed(reason),
            });
        }
        for event in self.waveform.poll_events() {
            self.events.push_back(match event {
                WaveformEvent::Progress(p) => PreviewEvent::SummaryProgress(p),
                WaveformEvent::Complete => PreviewEvent::SummaryReady,
                WaveformEvent::Failed(reason) => PreviewEvent::SummaryFailed(reason),
            });
        }

        let playing = self.transport.is_playing();
        let position = self.transport.position_seconds();
        self.view.set_width(width);
        self.view.refresh(position, playing);

        let (start, end) = self.view.range();
        let peaks = if self.is_loaded() {
            self.waveform.query(start, end, width.max(0.0) as usize)
        } else {
            PeakQuery::default()
        };

        RenderFrame {
            cursor_x: self.view.cursor_x(),
            cursor_visible: self.is_loaded() && (playing || self.scrubbing),
            range: (start, end),
            position_secs: position,
            playing,
            peaks,
            summary_progress: self.waveform.progress(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<PreviewEvent> {
        self.events.drain(..).collect()
    }

    pub fn metadata(&self) -> Option<&SourceInfo> {
        self.source.as_ref().map(SourceHandle::info)
    }

    /// Full summary, available once the file has been scanned.
    pub fn summary(&self) -> Option<SourceSummary> {
        let source = self.source.as_ref()?;
        let peaks = self.waveform.stats()?;
        Some(SourceSummary {
            name: source.display_name(),
            info: source.info().clone(),
            peaks: Some(peaks),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn position_seconds(&self) -> f64 {
        self.transport.position_seconds()
    }

    pub fn length_seconds(&self) -> f64 {
        self.transport.length_seconds()
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audition_transport::AudioArc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const RATE: u32 = 44100;

    fn config() -> Config {
        Config {
            buffer_capacity_frames: 8192,
            read_ahead_frames: 8192,
            cache_enabled: false,
            ..Config::default()
        }
    }

    fn write_ramp(path: &Path, seconds: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..seconds * RATE as usize {
            writer.write_sample(((i % 1000) as i32 - 500) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn tone(seconds: usize, value: f32) -> SourceHandle {
        SourceHandle::from_memory("tone", AudioArc::new(vec![value; seconds * RATE as usize], RATE, 1))
    }

    /// Simulate `callbacks` output callbacks of 441 frames.
    fn run(processor: &mut TransportProcessor, callbacks: usize) {
        let mut out = vec![0.0; 441];
        for _ in 0..callbacks {
            let deadline = Instant::now() + Duration::from_secs(5);
            while processor.buffered_frames() < 441
                && !processor.is_source_finished()
                && Instant::now() < deadline
            {
                thread::sleep(Duration::from_millis(1));
            }
            processor.process(&mut out, 1);
        }
    }

    /// Tick until the scan reports completion; returns the events seen.
    fn wait_for_summary(previewer: &mut Previewer) -> Vec<PreviewEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while !events.contains(&PreviewEvent::SummaryReady) && Instant::now() < deadline {
            previewer.tick(100.0);
            events.extend(previewer.drain_events());
            thread::sleep(Duration::from_millis(5));
        }
        events
    }

    #[test]
    fn test_select_and_play() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 10);

        let (mut previewer, mut processor) = Previewer::headless(config(), RATE);
        previewer.select(&path).unwrap();
        run(&mut processor, 1);

        assert_eq!(previewer.metadata().map(|i| i.total_frames), Some(10 * RATE as u64));
        assert!((previewer.length_seconds() - 10.0).abs() < 1e-9);
        assert_eq!(previewer.view().range(), (0.0, 10.0));

        previewer.play();
        run(&mut processor, 100);
        let frame = previewer.tick(1000.0);

        assert!(frame.playing && frame.cursor_visible);
        assert!((frame.position_secs - 1.0).abs() < 1e-6);
        assert!((frame.cursor_x - 100.0).abs() < 1e-3);
        assert_eq!(frame.peaks.pixels(), 1000);

        let events = previewer.drain_events();
        assert!(matches!(events[0], PreviewEvent::Loaded { .. }));
    }

    #[test]
    fn test_reselect_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 1);

        let (mut previewer, _processor) = Previewer::headless(config(), RATE);
        previewer.select(&path).unwrap();
        previewer.seek(0.5);
        previewer.drain_events();

        previewer.handle(Intent::Select(path.clone())).unwrap();
        assert!(previewer.drain_events().is_empty());
        assert!((previewer.position_seconds() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_reselect_through_other_spelling_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 1);
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let (mut previewer, _processor) = Previewer::headless(config(), RATE);
        previewer.select(&path).unwrap();
        previewer.seek(0.5);
        previewer.drain_events();

        let other = dir.path().join("sub").join("..").join("ramp.wav");
        assert_ne!(other, path);
        previewer.select(&other).unwrap();
        assert!(previewer.drain_events().is_empty());
        assert!((previewer.position_seconds() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_unsupported_file_leaves_nothing_loaded() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("ramp.wav");
        write_ramp(&good, 1);
        let bad = dir.path().join("notes.txt");
        std::fs::write(&bad, "definitely not audio, just some text in a file").unwrap();

        let (mut previewer, _processor) = Previewer::headless(config(), RATE);
        previewer.select(&good).unwrap();
        previewer.drain_events();

        let err = previewer.drop_file(&bad).unwrap_err();
        assert!(matches!(err, PreviewError::Decode(DecodeError::UnsupportedFormat(_))));
        assert!(!previewer.is_loaded());
        assert!(previewer.metadata().is_none());

        previewer.play();
        assert!(!previewer.is_playing());

        let events = previewer.drain_events();
        assert_eq!(events[0], PreviewEvent::Unloaded);
        assert!(matches!(events[1], PreviewEvent::LoadFailed { .. }));
    }

    #[test]
    fn test_summary_after_scan() {
        let (mut previewer, _processor) = Previewer::headless(config(), RATE);
        previewer.load(tone(2, 0.5)).unwrap();
        let events = wait_for_summary(&mut previewer);
        assert!(events.contains(&PreviewEvent::SummaryReady));

        let summary = previewer.summary().unwrap();
        assert_eq!(summary.peaks.as_deref().map(|p| p[0].max), Some(0.5));
        assert!(summary.to_string().contains("Max: +0.50"));

        let frame = previewer.tick(50.0);
        assert_eq!(frame.summary_progress, 1.0);
        assert!(!frame.peaks.has_pending());
    }

    #[test]
    fn test_playback_stops_at_end() {
        let (mut previewer, mut processor) = Previewer::headless(config(), RATE);
        previewer.load(tone(1, 0.1)).unwrap();
        run(&mut processor, 1);

        previewer.play();
        run(&mut processor, 120);
        previewer.tick(100.0);

        assert!(!previewer.is_playing());
        assert!(previewer.drain_events().contains(&PreviewEvent::Finished));
    }

    #[test]
    fn test_scrub_then_release_plays_from_pointer() {
        let (mut previewer, mut processor) = Previewer::headless(config(), RATE);
        previewer.load(tone(10, 0.1)).unwrap();
        run(&mut processor, 1);
        previewer.tick(1000.0);

        previewer.scrub_to(250.0);
        assert!(!previewer.is_playing());
        assert!((previewer.position_seconds() - 2.5).abs() < 1e-4);
        assert!(previewer.tick(1000.0).cursor_visible);

        previewer.release_scrub();
        assert!(previewer.is_playing());
        previewer.release_scrub();
        assert!(previewer.is_playing());
    }

    #[test]
    fn test_follow_locks_view_while_playing() {
        let (mut previewer, mut processor) = Previewer::headless(config(), RATE);
        previewer.load(tone(10, 0.1)).unwrap();
        run(&mut processor, 1);

        previewer.handle(Intent::SetFollowTransport(true)).unwrap();
        previewer.handle(Intent::SetZoomPercent(500.0)).unwrap();
        previewer.handle(Intent::Seek(5.0)).unwrap();
        previewer.handle(Intent::Play).unwrap();
        let frame = previewer.tick(1000.0);

        let (start, end) = frame.range;
        assert!((end - start - 2.0).abs() < 1e-9);
        assert!((start - 4.0).abs() < 1e-3);
        assert!((frame.cursor_x - 500.0).abs() < 1.0);

        // Locked while following.
        previewer.scrub_to(10.0);
        assert!(previewer.is_playing());
        previewer.scroll(1.0);
        assert_eq!(previewer.view().range(), frame.range);

        previewer.handle(Intent::Toggle).unwrap();
        previewer.tick(1000.0);
        previewer.scroll(1.0);
        assert!(previewer.view().range().0 < start);
    }

    #[test]
    fn test_rewind_and_restart() {
        let (mut previewer, mut processor) = Previewer::headless(config(), RATE);
        previewer.load(tone(10, 0.1)).unwrap();
        run(&mut processor, 1);

        previewer.seek(3.0);
        previewer.play();
        previewer.rewind();
        assert!(!previewer.is_playing());
        assert_eq!(previewer.position_seconds(), 0.0);

        previewer.seek(3.0);
        previewer.handle(Intent::Restart).unwrap();
        assert!(previewer.is_playing());
        assert_eq!(previewer.position_seconds(), 0.0);
    }

    #[test]
    fn test_close_clears_state() {
        let (mut previewer, _processor) = Previewer::headless(config(), RATE);
        previewer.load(tone(3, 0.1)).unwrap();
        previewer.handle(Intent::Close).unwrap();

        assert!(!previewer.is_loaded());
        assert!(previewer.summary().is_none());
        let frame = previewer.tick(100.0);
        assert_eq!(frame.peaks.pixels(), 0);
        assert!(!frame.cursor_visible);
        assert_eq!(frame.range, (0.0, 0.0));
    }

    #[test]
    fn test_summary_store_used_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 2);
        let config = Config {
            cache_enabled: true,
            cache_dir: Some(dir.path().join("peaks")),
            ..config()
        };

        let (mut previewer, _processor) = Previewer::headless(config, RATE);
        previewer.select(&path).unwrap();
        wait_for_summary(&mut previewer);
        previewer.close();

        previewer.select(&path).unwrap();
        assert!(previewer.summary().is_some());
    }
}
