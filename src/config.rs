//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the stock 16 kHz capture / 24 kHz playback setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// Applied to every captured sample before it is chunked.
pub const MICROPHONE_GAIN: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Samples per delivered chunk.
    pub block_size: usize,
    /// Capacity of the lock-free queue between the device callback and the collector.
    pub ring_capacity: usize,
    /// Linear gain; amplified samples are clamped to [-1, 1].
    pub gain: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            ring_capacity: 65_536,
            gain: MICROPHONE_GAIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Preferred output rate; the device default is used if unsupported.
    pub sample_rate: u32,
    pub channels: u16,
    pub gain: f32,
    pub reap_interval_ms: u64,
    /// Max voices in flight between the scheduler and the output callback.
    pub voice_queue: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: SYNTHESIS_SAMPLE_RATE,
            channels: 1,
            gain: 1.0,
            reap_interval_ms: 20,
            voice_queue: 64,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(PipelineError::Config("sample rate must be non-zero".into()));
        }
        if self.capture.block_size == 0 {
            return Err(PipelineError::Config("block_size must be non-zero".into()));
        }
        if self.capture.ring_capacity < self.capture.block_size {
            return Err(PipelineError::Config(format!(
                "ring_capacity {} is smaller than one block ({})",
                self.capture.ring_capacity, self.capture.block_size
            )));
        }
        if self.playback.channels == 0 {
            return Err(PipelineError::Config("playback channels must be non-zero".into()));
        }
        if self.playback.voice_queue == 0 {
            return Err(PipelineError::Config("voice_queue must be non-zero".into()));
        }
        for (name, gain) in [("capture", self.capture.gain), ("playback", self.playback.gain)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(PipelineError::Config(format!("invalid {} gain {}", name, gain)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(config.playback.sample_rate, 24_000);
    }

    #[test]
    fn partial_override() {
        let config =
            PipelineConfig::from_json(r#"{ "capture": { "block_size": 1024 } }"#).unwrap();
        assert_eq!(config.capture.block_size, 1024);
        assert_eq!(config.capture.sample_rate, 16_000);
    }

    #[test]
    fn capture_gain_defaults_and_validates() {
        assert_eq!(CaptureConfig::default().gain, MICROPHONE_GAIN);
        let config = PipelineConfig::from_json(r#"{ "capture": { "gain": 1.0 } }"#).unwrap();
        assert_eq!(config.capture.gain, 1.0);

        let err = PipelineConfig::from_json(r#"{ "capture": { "gain": -0.5 } }"#).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn ring_smaller_than_block_rejected() {
        let err = PipelineConfig::from_json(
            r#"{ "capture": { "block_size": 4096, "ring_capacity": 100 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
