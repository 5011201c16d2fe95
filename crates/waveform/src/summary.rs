use serde::{Deserialize, Serialize};

/// Min/max amplitude over a run of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub min: f32,
    pub max: f32,
}

impl Peak {
    /// Identity for [`merge`](Self::merge).
    const NONE: Peak = Peak {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    #[inline]
    fn include(&mut self, sample: f32) {
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    #[inline]
    pub fn merge(self, other: Peak) -> Peak {
        Peak {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// One rendered pixel of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Column {
    Peak(Peak),
    /// The scan has not reached this part of the file yet.
    Pending,
    /// Past the end of the file.
    Empty,
}

/// Result of a peak query: `channels[ch][pixel]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeakQuery {
    pub channels: Vec<Vec<Column>>,
}

impl PeakQuery {
    pub fn empty(channels: usize, pixels: usize) -> Self {
        Self {
            channels: vec![vec![Column::Empty; pixels]; channels],
        }
    }

    pub fn pixels(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn has_pending(&self) -> bool {
        self.channels
            .iter()
            .flatten()
            .any(|c| matches!(c, Column::Pending))
    }
}

/// Layout of the peak levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Width the finest level is sized for, in pixels.
    pub reference_width: u32,
    /// Deepest zoom the view allows, in percent of the full length.
    pub max_zoom_percent: u32,
    /// Floor for the level 0 block. Above 1 it trades detail on short files
    /// at deep zoom for a smaller summary.
    pub min_block_frames: u32,
    pub max_block_frames: u32,
    /// Blocks of one level merged into a block of the next.
    pub fan_in: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            reference_width: 1024,
            max_zoom_percent: 1500,
            min_block_frames: 1,
            max_block_frames: 1024,
            fan_in: 8,
        }
    }
}

impl SummaryConfig {
    /// Level 0 block size for a file of `total_frames`: the power of two
    /// closest below one pixel's worth of frames at maximum zoom.
    pub fn block_frames(&self, total_frames: u64) -> usize {
        let zoom = self.max_zoom_percent.max(100) as u64;
        let visible = total_frames.saturating_mul(100) / zoom;
        let per_pixel = (visible / self.reference_width.max(1) as u64).max(1);
        let block = 1u64 << (63 - per_pixel.leading_zeros());

        let min = self.min_block_frames.max(1) as u64;
        let max = (self.max_block_frames as u64).max(min);
        block.clamp(min, max) as usize
    }
}

/// Multi-resolution min/max summary of a whole file, built front to back.
///
/// `levels[0]` holds one peak per `block_frames` frames; each block of
/// `levels[n + 1]` merges `fan_in` consecutive blocks of `levels[n]`. Blocks
/// are only ever appended, so anything a query returned stays valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSummary {
    block_frames: usize,
    fan_in: usize,
    channels: usize,
    sample_rate: u32,
    total_frames: u64,
    /// `levels[level][channel][block]`
    levels: Vec<Vec<Vec<Peak>>>,
    complete: bool,
    #[serde(skip)]
    partial: Vec<Peak>,
    #[serde(skip)]
    partial_frames: usize,
}

impl PeakSummary {
    pub fn new(
        block_frames: usize,
        fan_in: usize,
        channels: usize,
        sample_rate: u32,
        total_frames: u64,
    ) -> Self {
        let channels = channels.max(1);
        Self {
            block_frames: block_frames.max(1),
            fan_in: fan_in.max(2),
            channels,
            sample_rate,
            total_frames,
            levels: vec![vec![Vec::new(); channels]],
            complete: total_frames == 0,
            partial: vec![Peak::NONE; channels],
            partial_frames: 0,
        }
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    pub fn fan_in(&self) -> usize {
        self.fan_in
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Frames per block at `level`.
    fn span(&self, level: usize) -> u64 {
        self.block_frames as u64 * (self.fan_in as u64).pow(level as u32)
    }

    /// Frames covered by a level, capped at the file length.
    fn covered(&self, level: usize) -> u64 {
        let blocks = self.levels.get(level).map_or(0, |l| l[0].len()) as u64;
        blocks.saturating_mul(self.span(level)).min(self.total_frames)
    }

    /// Frames summarized so far.
    pub fn summarized_frames(&self) -> u64 {
        if self.complete {
            self.total_frames
        } else {
            self.covered(0)
        }
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 1.0;
        }
        (self.summarized_frames() as f64 / self.total_frames as f64) as f32
    }

    /// Peaks of one level and channel, for inspection.
    pub fn level(&self, level: usize, channel: usize) -> &[Peak] {
        self.levels
            .get(level)
            .and_then(|l| l.get(channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Feed the next interleaved frames of the file.
    pub fn append(&mut self, interleaved: &[f32]) {
        if self.complete {
            return;
        }
        for frame in interleaved.chunks_exact(self.channels) {
            for (peak, &sample) in self.partial.iter_mut().zip(frame) {
                peak.include(sample);
            }
            self.partial_frames += 1;
            if self.partial_frames == self.block_frames {
                self.flush_partial();
            }
        }
    }

    /// Close the summary: emit the last short block and merge every
    /// incomplete group upwards so each level covers the whole file.
    pub fn finish(&mut self) {
        if self.complete {
            return;
        }
        // A decoder may end short of the length it reported.
        let appended = (self.levels[0][0].len() * self.block_frames + self.partial_frames) as u64;
        self.total_frames = self.total_frames.min(appended);

        if self.partial_frames > 0 {
            self.flush_partial();
        }

        let mut level = 0;
        loop {
            let blocks = self.levels[level][0].len();
            if blocks <= 1 {
                break;
            }
            let tail = blocks % self.fan_in;
            if tail != 0 {
                if self.levels.len() == level + 1 {
                    self.levels.push(vec![Vec::new(); self.channels]);
                }
                for ch in 0..self.channels {
                    let merged = merge_all(&self.levels[level][ch][blocks - tail..]);
                    self.levels[level + 1][ch].push(merged);
                }
            }
            level += 1;
        }

        self.complete = true;
    }

    fn flush_partial(&mut self) {
        for ch in 0..self.channels {
            let peak = std::mem::replace(&mut self.partial[ch], Peak::NONE);
            self.levels[0][ch].push(peak);
        }
        self.partial_frames = 0;

        // Cascade every group of `fan_in` that just closed.
        let mut level = 0;
        while self.levels[level][0].len() % self.fan_in == 0 {
            if self.levels.len() == level + 1 {
                self.levels.push(vec![Vec::new(); self.channels]);
            }
            let len = self.levels[level][0].len();
            for ch in 0..self.channels {
                let merged = merge_all(&self.levels[level][ch][len - self.fan_in..]);
                self.levels[level + 1][ch].push(merged);
            }
            level += 1;
        }
    }

    /// Coarsest level whose blocks are no wider than `frames_per_pixel`.
    fn level_for(&self, frames_per_pixel: f64) -> usize {
        let mut level = 0;
        while level + 1 < self.levels.len() && self.span(level + 1) as f64 <= frames_per_pixel {
            level += 1;
        }
        level
    }

    /// One column per pixel per channel over `[start_frame, end_frame)`.
    ///
    /// Each pixel is the union of exactly the level 0 blocks it overlaps,
    /// read from the coarsest level that fits the pixel width and from finer
    /// levels at its edges or where coarse blocks are still being built.
    /// `Pending` marks pixels level 0 has not reached yet.
    pub fn query(&self, start_frame: f64, end_frame: f64, pixels: usize) -> PeakQuery {
        let mut channels = vec![Vec::with_capacity(pixels); self.channels];
        if pixels == 0 || !(end_frame > start_frame) {
            return PeakQuery { channels };
        }

        let frames_per_pixel = (end_frame - start_frame) / pixels as f64;
        let level = self.level_for(frames_per_pixel);

        for pixel in 0..pixels {
            let a = start_frame + pixel as f64 * frames_per_pixel;
            let b = a + frames_per_pixel;

            if b <= 0.0 || a >= self.total_frames as f64 {
                for column in channels.iter_mut() {
                    column.push(Column::Empty);
                }
                continue;
            }

            let first = a.max(0.0).floor() as u64;
            let end = (b.ceil() as u64).min(self.total_frames).max(first + 1);

            match self.pick_level(level, end) {
                Some(l) => {
                    let block = self.block_frames as u64;
                    let lo = (first / block) as usize;
                    let hi = end.div_ceil(block) as usize;
                    for (ch, column) in channels.iter_mut().enumerate() {
                        column.push(Column::Peak(self.range_peak(l, ch, lo, hi)));
                    }
                }
                None => {
                    for column in channels.iter_mut() {
                        column.push(Column::Pending);
                    }
                }
            }
        }

        PeakQuery { channels }
    }

    fn pick_level(&self, preferred: usize, end: u64) -> Option<usize> {
        (0..=preferred).rev().find(|&l| self.covered(l) >= end)
    }

    /// Union of level 0 blocks `lo..hi`: whole blocks of `level` inside the
    /// range, finer levels for the ragged edges.
    fn range_peak(&self, level: usize, channel: usize, lo: usize, hi: usize) -> Peak {
        if lo >= hi {
            return Peak::NONE;
        }
        let blocks = &self.levels[level][channel];
        if level == 0 {
            return merge_all(&blocks[lo.min(blocks.len())..hi.min(blocks.len())]);
        }

        let group = self.fan_in.pow(level as u32);
        let first = lo.div_ceil(group);
        let last = hi / group;
        if first >= last {
            return self.range_peak(level - 1, channel, lo, hi);
        }
        merge_all(&blocks[first.min(blocks.len())..last.min(blocks.len())])
            .merge(self.range_peak(level - 1, channel, lo, first * group))
            .merge(self.range_peak(level - 1, channel, last * group, hi))
    }

    /// Per-channel extremes of the whole file, once complete.
    pub fn stats(&self) -> Option<Vec<Peak>> {
        if !self.complete || self.total_frames == 0 {
            return None;
        }
        let top = self.levels.last()?;
        Some(top.iter().map(|blocks| merge_all(blocks)).collect())
    }

    /// Re-arm the in-progress accumulators after deserializing.
    pub(crate) fn restore(&mut self) {
        self.partial = vec![Peak::NONE; self.channels];
        self.partial_frames = 0;
    }
}

fn merge_all(blocks: &[Peak]) -> Peak {
    blocks.iter().fold(Peak::NONE, |acc, p| acc.merge(*p))
}
