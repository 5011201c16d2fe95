use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{AudioReader, DecodeError, SourceInfo};

/// Sample-exact PCM WAV reader backed by hound.
pub struct WavReader {
    reader: hound::WavReader<BufReader<File>>,
    info: SourceInfo,
    float: bool,
    scale: f32,
}

impl WavReader {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let reader = hound::WavReader::open(path).map_err(from_hound)?;
        let spec = reader.spec();

        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{}: invalid WAV header",
                path.display()
            )));
        }

        let info = SourceInfo {
            format_name: "WAV file".to_string(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            total_frames: reader.duration() as u64,
        };

        Ok(Self {
            reader,
            info,
            float: spec.sample_format == hound::SampleFormat::Float,
            scale: 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32,
        })
    }
}

impl AudioReader for WavReader {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_frames(
        &mut self,
        start: u64,
        count: usize,
        out: &mut Vec<f32>,
    ) -> Result<usize, DecodeError> {
        let total = self.info.total_frames;
        if start >= total || count == 0 {
            return Ok(0);
        }

        let frames = (count as u64).min(total - start) as usize;
        let samples = frames * self.info.channels as usize;
        self.reader.seek(start as u32)?;

        out.reserve(samples);
        if self.float {
            for sample in self.reader.samples::<f32>().take(samples) {
                out.push(sample.map_err(from_hound)?);
            }
        } else {
            let scale = self.scale;
            for sample in self.reader.samples::<i32>().take(samples) {
                out.push(sample.map_err(from_hound)? as f32 * scale);
            }
        }

        Ok(frames)
    }
}

pub(crate) fn from_hound(err: hound::Error) -> DecodeError {
    match err {
        hound::Error::IoError(e) => DecodeError::Io(e),
        hound::Error::Unsupported | hound::Error::FormatError(_) => {
            DecodeError::UnsupportedFormat(err.to_string())
        }
        other => DecodeError::Decode(other.to_string()),
    }
}
