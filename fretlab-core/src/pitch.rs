//! # Pitch Detection Module
//!
//! Monophonic fundamental-frequency estimation by time-domain autocorrelation.
//! Each call is independent: the detector keeps no state between buffers.
//!
//! ## Pipeline
//! 1. Silence gate on the RMS level
//! 2. Edge trim at the first/last quiet sample to sharpen the correlation peak
//! 3. Full autocorrelation over the trimmed window (O(n²), fine for ~2048 samples)
//! 4. Skip the initial descent away from lag 0
//! 5. Take the lag of the global maximum beyond that point as the period
//!
//! Range filtering (e.g. only 60-1200 Hz) is left to the caller.

use crate::config::DetectorConfig;

/// Autocorrelation pitch detector with configurable gate thresholds.
#[derive(Debug, Clone, Copy)]
pub struct PitchDetector {
    /// Minimum RMS level; quieter buffers count as silence.
    pub rms_threshold: f32,
    /// Amplitude used to locate the trim points at both ends of the buffer.
    pub trim_threshold: f32,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl PitchDetector {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            rms_threshold: config.rms_threshold,
            trim_threshold: config.trim_threshold,
        }
    }

    /// Estimates the fundamental frequency of a buffer.
    ///
    /// # Arguments
    /// * `buffer` - Time-domain samples, mono
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `Some(frequency)` - Estimated fundamental in Hz
    /// * `None` - No signal: silence, or no periodic peak was found
    pub fn detect(&self, buffer: &[f32], sample_rate: u32) -> Option<f32> {
        if buffer.is_empty() || rms(buffer) < self.rms_threshold {
            return None;
        }

        let window = self.trim(buffer);
        let correlation = autocorrelate(window);
        let period = strongest_period(&correlation)?;

        let frequency = sample_rate as f32 / period as f32;
        frequency.is_finite().then_some(frequency)
    }

    /// Cuts the buffer at the first quiet sample in its first half and the
    /// last quiet sample in its second half.
    fn trim<'a>(&self, buffer: &'a [f32]) -> &'a [f32] {
        let len = buffer.len();
        let half = len / 2;

        let start = (0..half)
            .find(|&i| buffer[i].abs() < self.trim_threshold)
            .unwrap_or(0);
        let end = (1..half)
            .map(|i| len - i)
            .find(|&i| buffer[i].abs() < self.trim_threshold)
            .unwrap_or(len - 1);

        if start < end { &buffer[start..end] } else { buffer }
    }
}

/// Convenience wrapper using the default thresholds.
pub fn detect(buffer: &[f32], sample_rate: u32) -> Option<f32> {
    PitchDetector::default().detect(buffer, sample_rate)
}

fn rms(buffer: &[f32]) -> f32 {
    (buffer.iter().map(|&s| s * s).sum::<f32>() / buffer.len() as f32).sqrt()
}

/// `c[lag] = Σ buf[j] * buf[j + lag]` for every lag in the window.
fn autocorrelate(window: &[f32]) -> Vec<f32> {
    let n = window.len();
    (0..n)
        .map(|lag| {
            window[..n - lag]
                .iter()
                .zip(&window[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Lag of the highest correlation after the initial monotonic descent.
fn strongest_period(correlation: &[f32]) -> Option<usize> {
    let mut lag = 0;
    while lag + 1 < correlation.len() && correlation[lag] > correlation[lag + 1] {
        lag += 1;
    }
    if lag + 1 >= correlation.len() {
        return None;
    }

    let (period, _) = correlation[lag..]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let period = lag + period;

    (period > 0).then_some(period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{note_from_frequency, PitchClass};

    const SAMPLE_RATE: u32 = 44_100;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn silence_is_no_signal() {
        assert_eq!(detect(&vec![0.0; 2048], SAMPLE_RATE), None);
        assert_eq!(detect(&[], SAMPLE_RATE), None);
    }

    #[test]
    fn quiet_noise_floor_is_gated() {
        let whisper = sine(440.0, 0.005, 2048);
        assert_eq!(detect(&whisper, SAMPLE_RATE), None);
    }

    #[test]
    fn detects_concert_a() {
        let freq = detect(&sine(440.0, 0.5, 2048), SAMPLE_RATE).unwrap();
        assert!((freq - 440.0).abs() < 5.0, "got {freq}");
        assert_eq!(note_from_frequency(freq), Some(PitchClass::A));
    }

    #[test]
    fn detects_low_e_string() {
        let freq = detect(&sine(82.41, 0.5, 2048), SAMPLE_RATE).unwrap();
        assert_eq!(note_from_frequency(freq), Some(PitchClass::E));
    }

    #[test]
    fn detects_open_b_string() {
        let freq = detect(&sine(246.94, 0.4, 2048), SAMPLE_RATE).unwrap();
        assert!((freq - 246.94).abs() < 3.0, "got {freq}");
        assert_eq!(note_from_frequency(freq), Some(PitchClass::B));
    }

    #[test]
    fn constant_offset_has_no_period() {
        assert_eq!(detect(&vec![0.5; 512], SAMPLE_RATE), None);
    }
}
