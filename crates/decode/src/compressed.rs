use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{AudioReader, DecodeError, SourceInfo};

/// Reader for every container/codec symphonia can probe.
///
/// Decoded packets are kept in `pending` so consecutive reads continue where
/// the last one stopped; any other start position triggers an accurate seek.
pub struct CompressedReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
    pending: Vec<f32>,
    pending_start: u64,
    end_of_stream: bool,
}

impl CompressedReader {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let format = probe(path)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                DecodeError::UnsupportedFormat(format!("{}: no audio track", path.display()))
            })?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        let sample_rate = params.sample_rate.filter(|&r| r > 0).ok_or_else(|| {
            DecodeError::UnsupportedFormat(format!("{}: unknown sample rate", path.display()))
        })?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(2) as u16;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let format_name = symphonia::default::get_codecs()
            .get_codec(params.codec)
            .map(|d| d.long_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let total_frames = match params.n_frames {
            Some(n) => n,
            None => {
                log::debug!("{}: length missing from header, counting packets", path.display());
                count_frames(path, track_id)?
            }
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            info: SourceInfo {
                format_name,
                sample_rate,
                channels,
                bits_per_sample: params
                    .bits_per_sample
                    .or(params.bits_per_coded_sample)
                    .unwrap_or(0) as u16,
                total_frames,
            },
            pending: Vec::new(),
            pending_start: 0,
            end_of_stream: false,
        })
    }

    fn pending_end(&self) -> u64 {
        self.pending_start + (self.pending.len() / self.info.channels as usize) as u64
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(from_symphonia)?;
        self.decoder.reset();

        self.pending.clear();
        self.pending_start = seeked.actual_ts;
        self.end_of_stream = false;
        Ok(())
    }

    /// Decode the next packet of our track into `pending`. Returns false at
    /// end of stream.
    fn decode_next(&mut self) -> Result<bool, DecodeError> {
        if self.end_of_stream {
            return Ok(false);
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.end_of_stream = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(from_symphonia(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::warn!("skipping corrupt packet at {}: {msg}", packet.ts());
                    continue;
                }
                Err(e) => return Err(from_symphonia(e)),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(sample_buf.samples());
            self.pending_start = packet.ts();
            return Ok(true);
        }
    }
}

impl AudioReader for CompressedReader {
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
        let count = (count as u64).min(total - start) as usize;
        let channels = self.info.channels as usize;

        if start < self.pending_start || start > self.pending_end() {
            self.seek(start)?;
        }

        let mut written = 0;
        while written < count {
            let cursor = start + written as u64;

            if cursor < self.pending_start {
                // Gap between packets; the container had no audio here.
                let gap = ((self.pending_start - cursor) as usize).min(count - written);
                out.resize(out.len() + gap * channels, 0.0);
                written += gap;
                continue;
            }

            let end = self.pending_end();
            if cursor < end {
                let offset = (cursor - self.pending_start) as usize;
                let take = ((end - cursor) as usize).min(count - written);
                out.extend_from_slice(&self.pending[offset * channels..(offset + take) * channels]);
                written += take;
                continue;
            }

            if !self.decode_next()? {
                break;
            }
        }

        Ok(written)
    }
}

fn probe(path: &Path) -> Result<Box<dyn FormatReader>, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| match e {
            SymphoniaError::IoError(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => {
                DecodeError::Io(io)
            }
            other => DecodeError::UnsupportedFormat(format!("{}: {other}", path.display())),
        })?;

    Ok(probed.format)
}

/// Sum packet durations with a throwaway reader when the header has no length.
fn count_frames(path: &Path, track_id: u32) -> Result<u64, DecodeError> {
    let mut format = probe(path)?;
    let mut frames = 0u64;

    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => frames += packet.dur(),
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(frames);
            }
            Err(e) => return Err(from_symphonia(e)),
        }
    }
}

fn from_symphonia(err: SymphoniaError) -> DecodeError {
    match err {
        SymphoniaError::IoError(e) => DecodeError::Io(e),
        other => DecodeError::Decode(other.to_string()),
    }
}
