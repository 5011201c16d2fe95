use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Frames fed to the sinc resampler per call.
const CHUNK_FRAMES: usize = 1024;

/// Chunked sample-rate converter for interleaved audio.
///
/// Wraps a rubato sinc resampler so that a producer can push decoded blocks as
/// they arrive. The filter delay is trimmed from the start of the output after
/// construction and after every [`reset`](Self::reset), so output frame `n`
/// lines up with input frame `n / ratio`.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    ratio: f64,
    planar: Vec<Vec<f32>>,
    skip: usize,
    consumed: u64,
    emitted: u64,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> anyhow::Result<Self> {
        anyhow::ensure!(from_rate > 0 && to_rate > 0, "sample rates must be non-zero");
        anyhow::ensure!(channels > 0, "channels must be greater than 0");

        let ratio = to_rate as f64 / from_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channels as usize)?;
        let skip = inner.output_delay();

        Ok(Self {
            inner,
            channels: channels as usize,
            ratio,
            planar: vec![Vec::with_capacity(CHUNK_FRAMES); channels as usize],
            skip,
            consumed: 0,
            emitted: 0,
        })
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Number of input frames the next [`process`](Self::process) call expects.
    pub fn input_frames_next(&self) -> usize {
        self.inner.input_frames_next()
    }

    /// Resample one block of interleaved input, appending interleaved output.
    ///
    /// A block shorter than [`input_frames_next`](Self::input_frames_next) is
    /// treated as the final, partial block of the stream.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> anyhow::Result<()> {
        let frames = input.len() / self.channels;
        for channel in self.planar.iter_mut() {
            channel.clear();
        }
        for frame in input.chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.planar[ch].push(sample);
            }
        }

        self.consumed += frames as u64;

        if frames < self.inner.input_frames_next() {
            // Zero padded by rubato; keep only what the real input covers.
            let output = self
                .inner
                .process_partial(Some(self.planar.as_slice()), None)?;
            let limit = self.remaining();
            self.append(&output, limit, out);
        } else {
            let output = self.inner.process(self.planar.as_slice(), None)?;
            self.append(&output, usize::MAX, out);
        }
        Ok(())
    }

    /// Drain the frames still held back by the filter delay.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> anyhow::Result<()> {
        let output = self.inner.process_partial(None::<&[Vec<f32>]>, None)?;
        let limit = self.remaining();
        self.append(&output, limit, out);
        Ok(())
    }

    /// Forget all filter state, e.g. after a seek.
    pub fn reset(&mut self) {
        self.inner.reset();
        self.skip = self.inner.output_delay();
        self.consumed = 0;
        self.emitted = 0;
    }

    /// Output frames still owed for the input consumed so far.
    fn remaining(&self) -> usize {
        let target = (self.consumed as f64 * self.ratio).ceil() as u64;
        target.saturating_sub(self.emitted) as usize
    }

    fn append(&mut self, planar: &[Vec<f32>], limit: usize, out: &mut Vec<f32>) {
        let produced = planar.first().map_or(0, Vec::len);
        let start = self.skip.min(produced);
        self.skip -= start;
        let end = produced.min(start.saturating_add(limit));
        self.emitted += (end - start) as u64;

        out.reserve((end - start) * self.channels);
        for frame in start..end {
            for channel in planar {
                out.push(channel[frame]);
            }
        }
    }
}
