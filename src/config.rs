use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    keying::ColorMode,
};

/// Main configuration for the chroma keyer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input sampling and external tool settings
    pub video: VideoConfig,

    /// Classification settings
    pub processing: ProcessingConfig,

    /// Encoded output settings
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed {
                path: path.display().to_string(),
                reason: e.message().to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.processing.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Input sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Sampling rate for extraction and playback rate for reassembly
    pub fps: f64,

    /// Which key colour preset to use
    pub color_mode: ColorMode,

    /// ffmpeg executable used for decoding and encoding
    pub ffmpeg_bin: String,

    /// ffprobe executable used for probing sources
    pub ffprobe_bin: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            color_mode: ColorMode::Green,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl VideoConfig {
    fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "video.fps".to_string(),
                value: self.fps.to_string()
            }.into());
        }

        if self.ffmpeg_bin.trim().is_empty() || self.ffprobe_bin.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "video.ffmpeg_bin".to_string(),
                value: format!("{:?} / {:?}", self.ffmpeg_bin, self.ffprobe_bin)
            }.into());
        }

        Ok(())
    }
}

/// Classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Classify on the GPU; when false the CPU reference classifier is used
    pub gpu_acceleration: bool,

    /// Worker threads for the CPU classifier
    pub processing_threads: usize,

    /// Yield back to the scheduler after this many classified frames
    pub yield_interval: usize,

    /// Upper bound on a single seek-and-decode
    pub seek_timeout_ms: u64,

    /// Upper bound on a single GPU readback
    pub readback_timeout_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            gpu_acceleration: true,
            processing_threads: num_cpus::get(),
            yield_interval: 5,
            seek_timeout_ms: 10_000,
            readback_timeout_ms: 5_000,
        }
    }
}

impl ProcessingConfig {
    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn readback_timeout(&self) -> Duration {
        Duration::from_millis(self.readback_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.processing_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.processing_threads".to_string(),
                value: self.processing_threads.to_string()
            }.into());
        }

        if self.yield_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.yield_interval".to_string(),
                value: self.yield_interval.to_string()
            }.into());
        }

        if self.seek_timeout_ms == 0 || self.readback_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.timeouts".to_string(),
                value: format!("{}/{}", self.seek_timeout_ms, self.readback_timeout_ms)
            }.into());
        }

        Ok(())
    }
}

/// Encoded output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// ffmpeg video encoder
    pub codec: String,

    /// Container format, also used as the output file extension
    pub container: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    /// Wait after the last frame before the sink is finalized
    pub settle_delay_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            container: "mp4".to_string(),
            quality: 85,
            settle_delay_ms: 100,
        }
    }
}

impl OutputConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Map the 0-100 quality scale onto an x264-style CRF
    pub fn crf(&self) -> u8 {
        (51 - ((self.quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }

    fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "output.quality".to_string(),
                value: self.quality.to_string()
            }.into());
        }

        if self.codec.trim().is_empty() || self.container.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "output.codec".to_string(),
                value: format!("{:?} in {:?}", self.codec, self.container)
            }.into());
        }

        Ok(())
    }
}
