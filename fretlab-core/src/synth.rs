//! # Tone Synthesis
//!
//! Plucked reference tones and metronome clicks, described as [`Voice`]s
//! with an absolute start time on the output device's clock. The [`Mixer`]
//! renders them sample-accurately inside the output callback, so a voice
//! queued ahead of time sounds at its committed time regardless of when the
//! scheduling thread last woke up.

use std::f64::consts::TAU;

/// Oscillator shape of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    /// Softer harmonics, close to a nylon/acoustic pluck.
    Triangle,
}

/// A single enveloped oscillator note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    /// Start time in seconds on the output clock.
    pub start: f64,
    pub frequency: f32,
    pub waveform: Waveform,
    /// Gain at the start of the note.
    pub gain: f32,
    /// Gain reached at the end of the exponential decay.
    pub floor_gain: f32,
    /// Length of the note in seconds; silent afterwards.
    pub duration: f64,
}

impl Voice {
    /// A plucked string: triangle wave, 0.5 decaying to 0.01 over 1.5 s.
    pub fn pluck(frequency: f32, start: f64) -> Self {
        Self {
            start,
            frequency,
            waveform: Waveform::Triangle,
            gain: 0.5,
            floor_gain: 0.01,
            duration: 1.5,
        }
    }

    /// A metronome tick: a short sine blip, higher pitched on the downbeat.
    pub fn click(downbeat: bool, start: f64) -> Self {
        Self {
            start,
            frequency: if downbeat { 1000.0 } else { 800.0 },
            waveform: Waveform::Sine,
            gain: 1.0,
            floor_gain: 0.001,
            duration: 0.1,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Sample value `elapsed` seconds after the voice starts.
    pub fn sample_at(&self, elapsed: f64) -> f32 {
        if elapsed < 0.0 || elapsed >= self.duration {
            return 0.0;
        }
        let decay = (self.floor_gain / self.gain).powf((elapsed / self.duration) as f32);
        let phase = elapsed * self.frequency as f64;
        self.gain * decay * oscillator(self.waveform, phase)
    }
}

/// One cycle per unit of `phase`, peak amplitude 1.
fn oscillator(waveform: Waveform, phase: f64) -> f32 {
    match waveform {
        Waveform::Sine => (TAU * phase).sin() as f32,
        Waveform::Triangle => (1.0 - 4.0 * ((phase + 0.25).fract() - 0.5).abs()) as f32,
    }
}

/// Renders a voice on its own, starting at its first sample.
///
/// Used for simulated plucks that feed the detector without a microphone.
pub fn render(voice: &Voice, sample_rate: u32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| voice.sample_at(i as f64 / sample_rate as f64))
        .collect()
}

/// Sums active voices into interleaved output buffers.
#[derive(Debug, Default)]
pub struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn add(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fills an interleaved buffer whose first frame sits at `first_frame`
    /// on the device clock, then drops voices that have finished.
    ///
    /// # Arguments
    /// * `out` - Interleaved output buffer, `channels` samples per frame
    /// * `channels` - Channel count; every channel gets the same mono mix
    /// * `first_frame` - Device frame index of `out[0]`
    /// * `sample_rate` - Device sample rate in Hz
    pub fn fill(&mut self, out: &mut [f32], channels: usize, first_frame: u64, sample_rate: u32) {
        let channels = channels.max(1);
        let rate = sample_rate as f64;

        for (k, frame) in out.chunks_mut(channels).enumerate() {
            let t = (first_frame + k as u64) as f64 / rate;
            let mixed: f32 = self.voices.iter().map(|v| v.sample_at(t - v.start)).sum();
            let sample = mixed.clamp(-1.0, 1.0);
            frame.iter_mut().for_each(|s| *s = sample);
        }

        let frames = (out.len() / channels) as u64;
        let buffer_end = (first_frame + frames) as f64 / rate;
        self.voices.retain(|v| v.end() > buffer_end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch;
    use crate::tuning::{note_from_frequency, PitchClass};

    #[test]
    fn click_pitch_marks_the_downbeat() {
        assert_eq!(Voice::click(true, 0.0).frequency, 1000.0);
        assert_eq!(Voice::click(false, 0.0).frequency, 800.0);
    }

    #[test]
    fn envelope_decays_and_ends() {
        let pluck = Voice::pluck(110.0, 0.0);
        assert_eq!(pluck.sample_at(-0.01), 0.0);
        assert_eq!(pluck.sample_at(1.5), 0.0);
        // Quarter cycle of a triangle sits at the peak.
        let early = pluck.sample_at(0.25 / 110.0);
        assert!((early - 0.5).abs() < 0.01, "got {early}");
        let late = pluck.sample_at(1.0 + 0.25 / 110.0);
        assert!(late > 0.0 && late < early);
    }

    #[test]
    fn simulated_pluck_is_detected() {
        let voice = Voice::pluck(196.0, 0.0);
        let buffer = render(&voice, 44_100, 2048);
        let freq = pitch::detect(&buffer, 44_100).unwrap();
        assert_eq!(note_from_frequency(freq), Some(PitchClass::G));
    }

    #[test]
    fn mixer_starts_voice_on_its_exact_frame() {
        let mut mixer = Mixer::default();
        // Frame 480 at 48 kHz.
        mixer.add(Voice::click(false, 0.01));

        let mut out = vec![0.0; 2 * 1_000];
        mixer.fill(&mut out, 2, 0, 48_000);

        assert!(out[..2 * 480].iter().all(|&s| s == 0.0));
        assert!(out[2 * 480..2 * 490].iter().any(|&s| s != 0.0));
        // Both channels carry the same mono mix.
        assert!(out.chunks(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn finished_voices_are_dropped() {
        let mut mixer = Mixer::default();
        mixer.add(Voice::click(false, 0.0));
        mixer.add(Voice::pluck(220.0, 0.0));

        let mut out = vec![0.0; 4_800];
        mixer.fill(&mut out, 1, 4_800, 48_000); // covers 0.1 s .. 0.2 s
        assert_eq!(mixer.active_voices(), 1);
    }
}
