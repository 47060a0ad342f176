//! # Configuration
//!
//! Tunable constants for the detector, metronome and exercise loop. Every
//! section falls back to its defaults, so a config file only needs the keys
//! it wants to override.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::tuning::DEFAULT_FRET_COUNT;

/// Top-level configuration for a practice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    /// Highest playable fret.
    pub fret_count: usize,
    pub detector: DetectorConfig,
    pub metronome: MetronomeConfig,
    pub exercise: ExerciseConfig,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            fret_count: DEFAULT_FRET_COUNT,
            detector: DetectorConfig::default(),
            metronome: MetronomeConfig::default(),
            exercise: ExerciseConfig::default(),
        }
    }
}

impl PracticeConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path` - File path of the JSON document
    ///
    /// # Returns
    /// * `Ok(PracticeConfig)` - Parsed config, defaults filled in for missing keys
    /// * `Err(ConfigError)` - File I/O error or JSON deserialization error
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Pitch detection and live-stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// RMS level below which a buffer is treated as silence.
    pub rms_threshold: f32,
    /// Amplitude used to find the trim points of a buffer.
    pub trim_threshold: f32,
    /// Samples per analysis window.
    pub window_size: usize,
    /// Analyses per second of captured audio.
    pub analysis_rate_hz: u32,
    /// Lowest frequency the live stream reports.
    pub min_frequency: f32,
    /// Highest frequency the live stream reports.
    pub max_frequency: f32,
    /// Relative tolerance for matching a frequency to fretboard positions.
    pub match_tolerance: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 0.01,
            trim_threshold: 0.2,
            window_size: 2048,
            analysis_rate_hz: 60,
            min_frequency: 60.0,
            max_frequency: 1200.0,
            match_tolerance: 0.03,
        }
    }
}

impl DetectorConfig {
    pub fn in_range(&self, freq: f32) -> bool {
        freq > self.min_frequency && freq < self.max_frequency
    }
}

/// Beat scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    /// Wall-clock cadence of the look-ahead poll.
    pub poll_interval_ms: u64,
    /// How far ahead of the hardware clock beats are committed.
    pub schedule_ahead_secs: f64,
    /// Gap between `start` and the first beat.
    pub start_delay_secs: f64,
    pub default_bpm: u32,
    pub min_bpm: u32,
    pub max_bpm: u32,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 25,
            schedule_ahead_secs: 0.1,
            start_delay_secs: 0.05,
            default_bpm: 100,
            min_bpm: 40,
            max_bpm: 220,
        }
    }
}

impl MetronomeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn clamp_bpm(&self, bpm: u32) -> u32 {
        bpm.clamp(self.min_bpm, self.max_bpm)
    }
}

/// Ear-training timing and question range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciseConfig {
    /// Pause before a new question's reference tone.
    pub settle_delay_ms: u64,
    /// Pause after a correct answer before advancing.
    pub correct_advance_ms: u64,
    /// Pause after a first miss before the question is replayed.
    pub replay_delay_ms: u64,
    /// Pause after the answer is revealed before advancing.
    pub reveal_advance_ms: u64,
    /// Highest fret used when no guide positions narrow the range.
    pub default_max_fret: usize,
}

impl Default for ExerciseConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            correct_advance_ms: 1500,
            replay_delay_ms: 1000,
            reveal_advance_ms: 3000,
            default_max_fret: 12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            PracticeConfig::from_json(r#"{ "metronome": { "default_bpm": 90 } }"#).unwrap();
        assert_eq!(config.metronome.default_bpm, 90);
        assert_eq!(config.metronome.poll_interval_ms, 25);
        assert_eq!(config.detector, DetectorConfig::default());
        assert_eq!(config.fret_count, DEFAULT_FRET_COUNT);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            PracticeConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn bpm_is_clamped_to_tempo_control_range() {
        let config = MetronomeConfig::default();
        assert_eq!(config.clamp_bpm(10), 40);
        assert_eq!(config.clamp_bpm(500), 220);
        assert_eq!(config.clamp_bpm(120), 120);
    }
}
