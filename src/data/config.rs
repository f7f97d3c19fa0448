use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::equalizer::EqSettings;
use crate::audio::spectrum::Normalization;
use crate::audio::tap::{MAX_REFRESH_HZ, MIN_REFRESH_HZ};
use crate::error::{Error, Result};
use crate::playback::scheduler::{clamp_crossfade, clamp_volume, SchedulerConfig};

pub const CONFIG_ENV: &str = "RETRO_ENGINE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames decoded and written per tick.
    pub buffer_frames: usize,
    /// Output ring length in seconds.
    pub ring_seconds: f32,
    pub position_interval_ms: u64,
    pub volume: f32,
    pub crossfade_secs: f64,

    pub fft_size: usize,
    pub spectrum_bands: usize,
    pub spectrum_hz: u32,
    pub normalization: Normalization,
    pub smoothing: f32,

    pub eq: EqSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 1024,
            ring_seconds: 0.25,
            position_interval_ms: 100,
            volume: 1.0,
            crossfade_secs: 0.0,
            fft_size: 2048,
            spectrum_bands: 24,
            spectrum_hz: 30,
            normalization: Normalization::AutoGain,
            smoothing: 0.5,
            eq: EqSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Config from `$RETRO_ENGINE_CONFIG`, then the user config dir, else
    /// defaults. A file that fails to parse is reported and ignored.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("{e}; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let cfg: Self = toml::from_str(&raw).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(cfg.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config_err = |reason: String| Error::Config {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| config_err(e.to_string()))?;
        }
        let raw = toml::to_string_pretty(self).map_err(|e| config_err(e.to_string()))?;
        fs::write(path, raw).map_err(|e| config_err(e.to_string()))?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        BaseDirs::new().map(|d| d.config_dir().join("retro-engine").join("config.toml"))
    }

    /// Every field pulled into its usable range.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        self.buffer_frames = self.buffer_frames.clamp(64, 16_384);
        if !self.ring_seconds.is_finite() {
            self.ring_seconds = defaults.ring_seconds;
        }
        self.ring_seconds = self.ring_seconds.clamp(0.02, 2.0);
        self.position_interval_ms = self.position_interval_ms.clamp(10, 250);
        self.volume = clamp_volume(self.volume);
        self.crossfade_secs = clamp_crossfade(self.crossfade_secs).min(30.0);

        self.fft_size = self.fft_size.clamp(1024, 4096).next_power_of_two().min(4096);
        self.spectrum_bands = self.spectrum_bands.clamp(1, 128);
        self.spectrum_hz = self.spectrum_hz.clamp(MIN_REFRESH_HZ, MAX_REFRESH_HZ);
        if !self.smoothing.is_finite() {
            self.smoothing = defaults.smoothing;
        }
        self.smoothing = self.smoothing.clamp(0.01, 1.0);
        self.eq = self.eq.clamp();
        self
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            buffer_frames: self.buffer_frames,
            position_interval: Duration::from_millis(self.position_interval_ms),
            volume: self.volume,
            crossfade_secs: self.crossfade_secs,
            equalizer: self.eq,
        }
    }
}
