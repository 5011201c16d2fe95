mod compressed;
mod wav;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use audition_transport::{AudioArc, frames_to_seconds};

pub use compressed::CompressedReader;
pub use wav::WavReader;

/// Stream metadata reported by every decoder back-end.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub format_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// 0 when the codec has no fixed bit depth.
    pub bits_per_sample: u16,
    pub total_frames: u64,
}

impl SourceInfo {
    pub fn duration_secs(&self) -> f64 {
        frames_to_seconds(self.total_frames, self.sample_rate)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Random-access frame reader.
///
/// Every consumer (prefetch thread, summary scan) opens its own reader, so
/// reads never share a cursor.
pub trait AudioReader: Send {
    fn info(&self) -> &SourceInfo;

    /// Append up to `count` interleaved frames starting at frame `start` to
    /// `out`. Returns the number of frames appended; 0 at end of stream.
    fn read_frames(
        &mut self,
        start: u64,
        count: usize,
        out: &mut Vec<f32>,
    ) -> Result<usize, DecodeError>;
}

/// Decoder back-end, selected by sniffing the file header.
pub enum Decoder {
    Wav(WavReader),
    Compressed(CompressedReader),
    Memory(MemoryReader),
}

impl Decoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let mut header = [0u8; 12];
        let read = File::open(path)?.read(&mut header)?;

        if is_riff_wave(&header[..read]) {
            match WavReader::open(path) {
                Ok(reader) => return Ok(Decoder::Wav(reader)),
                Err(DecodeError::UnsupportedFormat(reason)) => {
                    log::debug!("{}: hound rejected WAV ({reason}), probing", path.display());
                }
                Err(e) => return Err(e),
            }
        }

        CompressedReader::open(path).map(Decoder::Compressed)
    }

    /// Short name of the back-end, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Decoder::Wav(_) => "wav",
            Decoder::Compressed(_) => "compressed",
            Decoder::Memory(_) => "memory",
        }
    }
}

impl AudioReader for Decoder {
    fn info(&self) -> &SourceInfo {
        match self {
            Decoder::Wav(r) => r.info(),
            Decoder::Compressed(r) => r.info(),
            Decoder::Memory(r) => r.info(),
        }
    }

    fn read_frames(
        &mut self,
        start: u64,
        count: usize,
        out: &mut Vec<f32>,
    ) -> Result<usize, DecodeError> {
        match self {
            Decoder::Wav(r) => r.read_frames(start, count, out),
            Decoder::Compressed(r) => r.read_frames(start, count, out),
            Decoder::Memory(r) => r.read_frames(start, count, out),
        }
    }
}

fn is_riff_wave(header: &[u8]) -> bool {
    header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE"
}

/// Reader over pre-decoded samples.
pub struct MemoryReader {
    audio: AudioArc,
    info: SourceInfo,
}

impl MemoryReader {
    pub fn new(name: &str, audio: AudioArc) -> Self {
        let info = SourceInfo {
            format_name: name.to_string(),
            sample_rate: audio.sample_rate(),
            channels: audio.channels(),
            bits_per_sample: 32,
            total_frames: audio.frames() as u64,
        };
        Self { audio, info }
    }
}

impl AudioReader for MemoryReader {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_frames(
        &mut self,
        start: u64,
        count: usize,
        out: &mut Vec<f32>,
    ) -> Result<usize, DecodeError> {
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        let slice = self.audio.frame_slice(start, count);
        out.extend_from_slice(slice);
        Ok(slice.len() / self.audio.channels() as usize)
    }
}

#[derive(Debug, Clone)]
enum Origin {
    File(PathBuf),
    Memory { name: String, audio: AudioArc },
}

/// The currently open audio resource.
///
/// Opening validates the resource and reads its metadata; the probing reader
/// is closed before `open` returns. Readers handed out by
/// [`open_reader`](Self::open_reader) are independent and close when dropped.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    origin: Origin,
    info: SourceInfo,
}

impl SourceHandle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let decoder = Decoder::open(path)?;
        let info = decoder.info().clone();

        log::info!(
            "opened {} ({}, {} Hz, {} ch, {} frames)",
            path.display(),
            decoder.kind(),
            info.sample_rate,
            info.channels,
            info.total_frames
        );

        Ok(Self {
            origin: Origin::File(path.to_path_buf()),
            info,
        })
    }

    pub fn from_memory(name: impl Into<String>, audio: AudioArc) -> Self {
        let name = name.into();
        let info = MemoryReader::new(&name, audio.clone()).info;
        Self {
            origin: Origin::Memory { name, audio },
            info,
        }
    }

    pub fn open_reader(&self) -> Result<Decoder, DecodeError> {
        match &self.origin {
            Origin::File(path) => Decoder::open(path),
            Origin::Memory { name, audio } => {
                Ok(Decoder::Memory(MemoryReader::new(name, audio.clone())))
            }
        }
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// File path, `None` for in-memory sources.
    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::File(path) => Some(path),
            Origin::Memory { .. } => None,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.origin {
            Origin::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Origin::Memory { name, .. } => name.clone(),
        }
    }

    /// True if both handles refer to the same resource.
    pub fn same_resource(&self, other: &SourceHandle) -> bool {
        match (&self.origin, &other.origin) {
            (Origin::File(a), Origin::File(b)) => a == b,
            (Origin::Memory { name: a, audio: x }, Origin::Memory { name: b, audio: y }) => {
                a == b && std::ptr::eq(x.samples(), y.samples())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(dir: &TempDir, name: &str, spec: hound::WavSpec, frames: usize) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            for ch in 0..spec.channels {
                let value = ((i * spec.channels as usize + ch as usize) % 1000) as i32 - 500;
                match spec.sample_format {
                    hound::SampleFormat::Int => writer.write_sample(value as i16).unwrap(),
                    hound::SampleFormat::Float => {
                        writer.write_sample(value as f32 / 1000.0).unwrap()
                    }
                }
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn pcm16(channels: u16, sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    fn expected_sample(index: usize) -> f32 {
        ((index % 1000) as i32 - 500) as f32 / 32768.0
    }

    #[test]
    fn test_open_wav_reports_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "tone.wav", pcm16(2, 44100), 44100);

        let handle = SourceHandle::open(&path).unwrap();
        let info = handle.info();

        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_frames, 44100);
        assert!((info.duration_secs() - 1.0).abs() < 1e-9);
        assert_eq!(handle.path(), Some(path.as_path()));
        assert_eq!(handle.display_name(), "tone.wav");
    }

    #[test]
    fn test_wav_random_access_reads() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "ramp.wav", pcm16(1, 8000), 5000);
        let handle = SourceHandle::open(&path).unwrap();
        let mut reader = handle.open_reader().unwrap();
        assert_eq!(reader.kind(), "wav");

        // Backwards and forwards, out of order.
        for &start in &[4000u64, 10, 2500, 0, 4990] {
            let mut out = Vec::new();
            let n = reader.read_frames(start, 16, &mut out).unwrap();
            assert_eq!(n, 16.min(5000 - start as usize));
            for (i, sample) in out.iter().enumerate() {
                assert_eq!(*sample, expected_sample(start as usize + i));
            }
        }
    }

    #[test]
    fn test_wav_read_past_end_returns_zero() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "short.wav", pcm16(2, 8000), 100);
        let mut reader = SourceHandle::open(&path).unwrap().open_reader().unwrap();

        let mut out = Vec::new();
        assert_eq!(reader.read_frames(100, 10, &mut out).unwrap(), 0);
        assert_eq!(reader.read_frames(95, 10, &mut out).unwrap(), 5);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_float_wav_is_read_unscaled() {
        let dir = TempDir::new().unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let path = write_wav(&dir, "float.wav", spec, 10);
        let mut reader = SourceHandle::open(&path).unwrap().open_reader().unwrap();

        let mut out = Vec::new();
        reader.read_frames(3, 1, &mut out).unwrap();
        assert!((out[0] - (-0.497)).abs() < 1e-6);
    }

    #[test]
    fn test_compressed_reader_matches_wav_reader() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "both.wav", pcm16(2, 22050), 3000);

        let mut wav = WavReader::open(&path).unwrap();
        let mut probed = CompressedReader::open(&path).unwrap();
        assert_eq!(probed.info().total_frames, 3000);
        assert_eq!(probed.info().channels, 2);

        for &start in &[0u64, 1500, 200, 2999] {
            let mut a = Vec::new();
            let mut b = Vec::new();
            let na = wav.read_frames(start, 256, &mut a).unwrap();
            let nb = probed.read_frames(start, 256, &mut b).unwrap();
            assert_eq!(na, nb, "frame count at {start}");
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-4, "mismatch at {start}: {x} vs {y}");
            }
        }
    }

    #[test]
    fn test_sequential_compressed_reads_continue() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "seq.wav", pcm16(1, 8000), 4096);
        let mut probed = CompressedReader::open(&path).unwrap();

        let mut out = Vec::new();
        let mut start = 0u64;
        loop {
            let n = probed.read_frames(start, 700, &mut out).unwrap();
            if n == 0 {
                break;
            }
            start += n as u64;
        }

        assert_eq!(out.len(), 4096);
        for (i, sample) in out.iter().enumerate() {
            assert!((sample - expected_sample(i)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_non_audio_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.wav");
        std::fs::write(&path, "these are not the samples you are looking for\n".repeat(64))
            .unwrap();

        match SourceHandle::open(&path) {
            Err(DecodeError::UnsupportedFormat(_)) => {}
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = SourceHandle::open(dir.path().join("missing.flac"));
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }

    #[test]
    fn test_memory_source_reads() {
        let audio = AudioArc::new((0..20).map(|i| i as f32).collect(), 44100, 2);
        let handle = SourceHandle::from_memory("ramp", audio);

        assert_eq!(handle.info().total_frames, 10);
        assert!(handle.path().is_none());

        let mut reader = handle.open_reader().unwrap();
        let mut out = Vec::new();
        assert_eq!(reader.read_frames(8, 5, &mut out).unwrap(), 2);
        assert_eq!(out, vec![16.0, 17.0, 18.0, 19.0]);
        assert_eq!(reader.read_frames(10, 5, &mut out).unwrap(), 0);
    }

    #[test]
    fn test_same_resource() {
        let audio = AudioArc::new(vec![0.0; 4], 44100, 1);
        let a = SourceHandle::from_memory("a", audio.clone());
        let b = SourceHandle::from_memory("a", audio);
        let c = SourceHandle::from_memory("a", AudioArc::new(vec![0.0; 4], 44100, 1));

        assert!(a.same_resource(&b));
        assert!(!a.same_resource(&c));
    }
}
