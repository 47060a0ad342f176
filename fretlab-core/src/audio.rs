//! # Audio Device Module
//!
//! Real-time audio capture and playback using CPAL (Cross-Platform Audio Library).
//!
//! ## Features
//! - Default input device capture, downmixed to mono `f32`
//! - Default output device with a sample-accurate voice mixer
//! - The output device's frame counter doubles as the hardware clock
//! - [`AudioSink`] seam so the scheduler and exercise loop can run offline
//!
//! CPAL streams are not `Send` on every platform, so streams stay on the
//! thread that built them; other threads talk to them through channels.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::clock::Clock;
use crate::error::AudioError;
use crate::synth::{Mixer, Voice};
use crate::tuning::{FretPosition, Fretboard, PitchClass};

/// Preferred capture sample rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Something that can play [`Voice`]s at absolute times on its own clock.
pub trait AudioSink: Send + Sync {
    /// Current hardware time in seconds, `None` once the device is gone.
    fn now(&self) -> Option<f64>;

    /// Queues a voice; it sounds at `voice.start` on this sink's clock.
    fn schedule(&self, voice: Voice) -> Result<(), AudioError>;
}

/// Plays the reference tone of a position right away.
///
/// # Returns
/// * `Ok(note)` - Pitch class of the played position
/// * `Err(AudioError)` - The output device is unavailable
///
/// # Panics
/// * If the position lies outside the fretboard
pub fn play_tone(
    sink: &dyn AudioSink,
    board: &Fretboard,
    position: FretPosition,
) -> Result<PitchClass, AudioError> {
    let frequency = board.frequency_of(position);
    let now = sink
        .now()
        .ok_or_else(|| AudioError::unavailable("output clock stopped"))?;
    sink.schedule(Voice::pluck(frequency, now))?;
    Ok(board.note_of(position))
}

/// Cloneable, thread-safe handle to a running [`AudioOutput`].
#[derive(Debug, Clone)]
pub struct OutputHandle {
    voices: Sender<Voice>,
    frames: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
    sample_rate: u32,
}

impl OutputHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioSink for OutputHandle {
    fn now(&self) -> Option<f64> {
        if !self.alive.load(Ordering::Acquire) {
            return None;
        }
        Some(self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64)
    }

    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(AudioError::unavailable("output stream stopped"));
        }
        self.voices
            .send(voice)
            .map_err(|_| AudioError::unavailable("output stream closed"))
    }
}

/// The process-wide output stream.
///
/// Dropping it stops the stream; any [`OutputHandle`] still around starts
/// reporting the device as unavailable.
pub struct AudioOutput {
    stream: Option<cpal::Stream>,
    handle: OutputHandle,
}

impl AudioOutput {
    /// Opens the default output device and starts rendering silence.
    ///
    /// # Returns
    /// * `Ok(AudioOutput)` - Running output stream
    /// * `Err(AudioError::DeviceUnavailable)` - No device, unsupported format,
    ///   or the stream failed to start
    pub fn open() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::unavailable("no output device available"))?;
        log::info!("Using audio output device: {}", device_name(&device));

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::unavailable(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        log::info!(
            "Output stream: {} Hz, {} channel(s), {:?}",
            sample_rate,
            config.channels,
            sample_format
        );

        let (voice_tx, voice_rx) = crossbeam_channel::unbounded();
        let frames = Arc::new(AtomicU64::new(0));
        let alive = Arc::new(AtomicBool::new(true));
        let shared = OutputShared {
            voices: voice_rx,
            frames: frames.clone(),
            alive: alive.clone(),
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, shared),
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, shared),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, shared),
            other => {
                return Err(AudioError::unavailable(format!(
                    "unsupported output sample format {other:?}"
                )));
            }
        }
        .map_err(|e| AudioError::unavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::unavailable(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            handle: OutputHandle {
                voices: voice_tx,
                frames,
                alive,
                sample_rate,
            },
        })
    }

    pub fn handle(&self) -> OutputHandle {
        self.handle.clone()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.handle.alive.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            log::info!("Stopping audio output stream");
            if let Err(e) = stream.pause() {
                log::warn!("Error pausing output stream: {e}");
            }
        }
    }
}

/// State moved into the output callback.
struct OutputShared {
    voices: Receiver<Voice>,
    frames: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: OutputShared,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    let OutputShared {
        voices,
        frames,
        alive,
    } = shared;
    let mut mixer = Mixer::default();
    let mut mix_buffer: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(voice) = voices.try_recv() {
                mixer.add(voice);
            }

            mix_buffer.resize(data.len(), 0.0);
            let first_frame = frames.load(Ordering::Relaxed);
            mixer.fill(&mut mix_buffer, channels, first_frame, sample_rate);
            for (out, &sample) in data.iter_mut().zip(&mix_buffer) {
                *out = T::from_sample(sample);
            }

            frames.fetch_add((data.len() / channels.max(1)) as u64, Ordering::Release);
        },
        move |err| {
            log::error!("An error occurred on the output stream: {err}");
            alive.store(false, Ordering::Release);
        },
        None,
    )
}

/// Starts audio capture from the default input device.
///
/// Every callback's samples are downmixed to mono (first channel) and sent
/// through `sender`; frames are dropped if the channel is full.
///
/// # Arguments
/// * `sender` - Channel sender for streaming audio data to the analysis thread
/// * `faults` - Receives a `DeviceUnavailable` if the stream fails after it started
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and sample rate
/// * `Err(AudioError::DeviceUnavailable)` - No device, permission denied, or
///   the stream could not be started
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    faults: Sender<AudioError>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::unavailable("no input device available"))?;
    log::info!("Using audio input device: {}", device_name(&device));

    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::unavailable(e.to_string()))?
        .collect::<Vec<_>>();
    let supported = match find_supported_config(configs, TARGET_SAMPLE_RATE) {
        Some(range) => {
            let rate = TARGET_SAMPLE_RATE
                .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            range.with_sample_rate(cpal::SampleRate(rate))
        }
        None => device
            .default_input_config()
            .map_err(|e| AudioError::unavailable(e.to_string()))?,
    };

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    log::info!(
        "Selected capture format: {} Hz, {} channel(s), {:?}",
        sample_rate,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, sender, faults),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, sender, faults),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, sender, faults),
        other => {
            return Err(AudioError::unavailable(format!(
                "unsupported input sample format {other:?}"
            )));
        }
    }
    .map_err(|e| AudioError::unavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::unavailable(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sender: Sender<Vec<f32>>,
    faults: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = (config.channels as usize).max(1);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .map(|frame| f32::from_sample(frame[0]))
                .collect();
            // Dropping a frame is better than blocking the device thread.
            let _ = sender.try_send(mono);
        },
        move |err| {
            log::error!("An error occurred on the input stream: {err}");
            let _ = faults.try_send(AudioError::unavailable(err.to_string()));
        },
        None,
    )
}

/// Finds the best supported f32 capture configuration for the target rate,
/// preferring mono.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let covers =
                c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            let rate_penalty = if covers { 0 } else { min_diff.min(max_diff) };
            (rate_penalty, c.channels())
        })
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown>".to_string())
}

/// Offline sink that records every scheduled voice against a [`Clock`].
///
/// Used for simulations and tests where no audio hardware is present.
pub struct RecordingSink {
    clock: Arc<dyn Clock>,
    voices: Mutex<Vec<Voice>>,
}

impl RecordingSink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            voices: Mutex::new(Vec::new()),
        }
    }

    /// Voices scheduled so far, in scheduling order.
    pub fn voices(&self) -> Vec<Voice> {
        self.voices.lock().clone()
    }

    pub fn clear(&self) {
        self.voices.lock().clear();
    }
}

impl AudioSink for RecordingSink {
    fn now(&self) -> Option<f64> {
        self.clock.now()
    }

    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        if self.clock.now().is_none() {
            return Err(AudioError::unavailable("recording clock disconnected"));
        }
        self.voices.lock().push(voice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn play_tone_queues_a_pluck_at_the_current_time() {
        let clock = ManualClock::new();
        clock.set(2.0);
        let sink = RecordingSink::new(Arc::new(clock.clone()));
        let board = Fretboard::default();

        let note = play_tone(&sink, &board, board.position(0, 0).unwrap()).unwrap();
        assert_eq!(note, PitchClass::E);

        let voices = sink.voices();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].start, 2.0);
        assert!((voices[0].frequency - 329.63).abs() < 1e-3);
    }

    #[test]
    fn disconnected_sink_reports_device_unavailable() {
        let clock = ManualClock::new();
        let sink = RecordingSink::new(Arc::new(clock.clone()));
        let board = Fretboard::default();
        clock.disconnect();

        let result = play_tone(&sink, &board, board.position(1, 3).unwrap());
        assert!(matches!(result, Err(AudioError::DeviceUnavailable(_))));
        assert!(sink.voices().is_empty());
    }
}
