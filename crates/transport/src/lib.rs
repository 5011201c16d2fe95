mod resample;

use std::sync::Arc;

pub use resample::StreamResampler;

/// Playback state shared by the transport handle and its observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

/// Convert a frame index at `sample_rate` to seconds.
#[inline]
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}

/// Convert seconds to the first whole frame at or after that instant.
///
/// A seek to a fractional sample position lands on `⌈seconds · rate⌉`, so the
/// first frame played is never one that precedes the requested time.
#[inline]
pub fn seconds_to_frame(seconds: f64, sample_rate: u32) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).ceil() as u64
}

/// Map a frame count from one sample rate to another, rounding up.
#[inline]
pub fn convert_frames(frames: u64, from_rate: u32, to_rate: u32) -> u64 {
    if from_rate == to_rate || from_rate == 0 {
        return frames;
    }
    (frames as f64 * to_rate as f64 / from_rate as f64).ceil() as u64
}

/// Shared, immutable audio sample data.
///
/// `AudioArc` keeps interleaved samples in an `Arc<[f32]>` so clones only bump
/// a reference count. It backs in-memory sources, where every reader opened on
/// the source shares the same sample data.
///
/// ```
/// use audition_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let shared = audio.clone();
/// assert_eq!(shared.frames(), 2);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// Create a new `AudioArc` from owned interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    /// All interleaved samples, `[L, R, L, R, ...]` for stereo.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        frames_to_seconds(self.frames() as u64, self.sample_rate)
    }

    /// Interleaved samples for frames `[start, start + count)`, clipped to the end.
    pub fn frame_slice(&self, start: usize, count: usize) -> &[f32] {
        let channels = self.channels as usize;
        let start = start.min(self.frames());
        let end = start.saturating_add(count).min(self.frames());
        &self.samples[start * channels..end * channels]
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}
