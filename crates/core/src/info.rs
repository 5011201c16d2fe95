use std::fmt;

use audition_decode::SourceInfo;
use audition_waveform::Peak;

/// Text summary of the loaded file, one fact per line.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub name: String,
    pub info: SourceInfo,
    /// Per-channel extremes, present once the file has been scanned.
    pub peaks: Option<Vec<Peak>>,
}

impl fmt::Display for SourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.info;
        writeln!(f, "{}", info.format_name)?;
        writeln!(f, "{} samplerate", info.sample_rate)?;
        writeln!(f, "{} channels", info.channels)?;
        writeln!(f, "{} bits per sample", info.bits_per_sample)?;
        writeln!(f, "{}", describe_duration(info.duration_secs()))?;
        write!(f, "{} samples", info.total_frames)?;

        if let Some(peaks) = &self.peaks {
            write!(f, "\nMin:")?;
            for peak in peaks {
                write!(f, " {:.2}", peak.min)?;
            }
            write!(f, "\nMax:")?;
            for peak in peaks {
                write!(f, " {:+.2}", peak.max)?;
            }
        }
        Ok(())
    }
}

/// Human readable length using the two most significant units,
/// e.g. `"2 mins 5 secs"`.
pub fn describe_duration(seconds: f64) -> String {
    if !(seconds > 0.0) {
        return "0 secs".to_string();
    }
    if seconds < 1.0 {
        return format!("{} ms", (seconds * 1000.0).round() as u64);
    }

    let total = seconds.round() as u64;
    let units = [
        (total / 3600, "hr", "hrs"),
        (total / 60 % 60, "min", "mins"),
        (total % 60, "sec", "secs"),
    ];

    units
        .iter()
        .skip_while(|(n, ..)| *n == 0)
        .take(2)
        .filter(|(n, ..)| *n > 0)
        .map(|(n, one, many)| format!("{n} {}", if *n == 1 { one } else { many }))
        .collect::<Vec<_>>()
        .join(" ")
}
