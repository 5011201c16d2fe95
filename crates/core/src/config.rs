use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use audition_stream::ReadAheadConfig;
use audition_waveform::SummaryConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ring size of the read-ahead buffer, in output frames.
    pub buffer_capacity_frames: usize,
    pub read_ahead_frames: usize,
    /// View refresh rate the host should tick at.
    pub refresh_hz: u32,
    pub max_zoom_percent: u32,
    pub follow_transport: bool,
    pub summary: SummaryConfig,
    pub cache_enabled: bool,
    /// Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub cache_max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity_frames: 32768,
            read_ahead_frames: 32768,
            refresh_hz: 60,
            max_zoom_percent: 1500,
            follow_transport: false,
            summary: SummaryConfig::default(),
            cache_enabled: true,
            cache_dir: None,
            cache_max_entries: 128,
        }
    }
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("audition").join("config.toml"))
    }

    /// Load from the user config directory, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("ignoring malformed config {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(e) = self.save_to(&path) {
            log::warn!("failed to save config: {e}");
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read_ahead(&self) -> ReadAheadConfig {
        ReadAheadConfig {
            capacity_frames: self.buffer_capacity_frames.max(1),
            read_ahead_frames: self.read_ahead_frames.clamp(1, self.buffer_capacity_frames.max(1)),
        }
    }

    /// Summary layout sized for the view's maximum zoom.
    pub fn summary_config(&self) -> SummaryConfig {
        SummaryConfig {
            max_zoom_percent: self.max_zoom_percent,
            ..self.summary
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_hz.max(1) as f64)
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|p| p.join("audition").join("peaks")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("none.toml")), Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "follow_transport = true\n[summary]\nfan_in = 4\n").unwrap();

        let config = Config::load_from(&path);
        assert!(config.follow_transport);
        assert_eq!(config.summary.fan_in, 4);
        assert_eq!(config.summary.reference_width, 1024);
        assert_eq!(config.refresh_hz, 60);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            max_zoom_percent: 800,
            cache_dir: Some(dir.path().join("peaks")),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "refresh_hz = \"fast\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config {
            buffer_capacity_frames: 4096,
            read_ahead_frames: 10_000,
            max_zoom_percent: 500,
            ..Config::default()
        };
        assert_eq!(config.read_ahead().read_ahead_frames, 4096);
        assert_eq!(config.summary_config().max_zoom_percent, 500);
        assert_eq!(config.refresh_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }
}
