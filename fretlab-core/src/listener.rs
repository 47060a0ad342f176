//! # Live Pitch Listener
//!
//! Runs the detector continuously over captured audio on a dedicated thread
//! and publishes a [`PitchReading`] for every frame that contains a note.
//!
//! ## Architecture
//! - **Capture**: CPAL input stream (or a simulated pluck) feeding raw chunks
//! - **Listener thread**: sliding-window analysis at a fixed rate per second of audio
//! - **Communication**: crossbeam channels for frames, readings and shutdown

use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio;
use crate::config::DetectorConfig;
use crate::error::AudioError;
use crate::pitch::PitchDetector;
use crate::tuning::{
    FretPosition, Fretboard, PitchClass, calculate_cents_deviation, nearest_note_frequency,
    note_from_frequency,
};

/// Samples per chunk when replaying a simulated source.
const SIMULATED_CHUNK: usize = 512;

/// One detected note from the live stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchReading {
    /// Detected fundamental in Hz.
    pub frequency: f32,
    /// Nearest equal-tempered pitch class.
    pub note: PitchClass,
    /// Deviation from that note in cents.
    pub cents: f32,
    /// Fretboard positions sounding close to the detected frequency.
    pub positions: Vec<FretPosition>,
}

/// Where the listener takes its audio from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// The default input device.
    Device,
    /// A prerecorded or synthesized buffer, replayed in a loop at real-time pace.
    Simulated { samples: Vec<f32>, sample_rate: u32 },
    /// Mono chunks pushed by the caller. Dropping the sender ends the
    /// capture the same way a lost device does.
    Stream {
        chunks: Receiver<Vec<f32>>,
        sample_rate: u32,
    },
}

/// Sliding-window analysis over a continuous sample stream.
///
/// Pure and single-threaded; the listener thread owns one of these.
#[derive(Debug)]
pub struct PitchAnalyzer {
    board: Arc<Fretboard>,
    detector: PitchDetector,
    config: DetectorConfig,
    sample_rate: u32,
    hop: usize,
    pending: Vec<f32>,
    window: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl PitchAnalyzer {
    pub fn new(board: Arc<Fretboard>, config: DetectorConfig, sample_rate: u32) -> Self {
        let hop = (sample_rate / config.analysis_rate_hz.max(1)).max(1) as usize;
        Self {
            board,
            detector: PitchDetector::from_config(&config),
            sample_rate,
            hop,
            pending: Vec::new(),
            window: VecDeque::with_capacity(config.window_size),
            scratch: Vec::with_capacity(config.window_size),
            config,
        }
    }

    /// Feeds new samples and returns a reading for every analysis step that
    /// found a note in range.
    pub fn push(&mut self, samples: &[f32]) -> Vec<PitchReading> {
        self.pending.extend_from_slice(samples);
        let mut readings = Vec::new();

        while self.pending.len() >= self.hop {
            self.window.extend(self.pending.drain(..self.hop));
            while self.window.len() > self.config.window_size {
                self.window.pop_front();
            }
            if self.window.len() < self.config.window_size {
                continue;
            }

            self.scratch.clear();
            self.scratch.extend(self.window.iter().copied());
            if let Some(reading) = self.analyze(&self.scratch) {
                readings.push(reading);
            }
        }
        readings
    }

    /// Analyses a single window.
    ///
    /// # Returns
    /// * `Some(reading)` - A note within the configured frequency range
    /// * `None` - No signal, or a frequency outside the range
    pub fn analyze(&self, window: &[f32]) -> Option<PitchReading> {
        let frequency = self.detector.detect(window, self.sample_rate)?;
        if !self.config.in_range(frequency) {
            log::trace!("Ignoring out-of-range frequency {frequency:.1} Hz");
            return None;
        }

        let note = note_from_frequency(frequency)?;
        let cents = nearest_note_frequency(frequency)
            .map(|target| calculate_cents_deviation(frequency, target))
            .unwrap_or(0.0);

        Some(PitchReading {
            frequency,
            note,
            cents,
            positions: self
                .board
                .positions_near(frequency, self.config.match_tolerance),
        })
    }
}

/// Handle to the running listener thread.
///
/// Stopping (or dropping) the handle shuts the thread down, which releases
/// the capture device. If the device fails mid-stream the thread ends on its
/// own, the readings channel disconnects and [`PitchListener::failure`]
/// reports the cause.
#[derive(Debug)]
pub struct PitchListener {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<AudioError>>>,
}

impl PitchListener {
    /// Acquires the capture source and starts publishing readings.
    ///
    /// Blocks until the device is open so that a permission or device failure
    /// is reported here rather than on the listener thread.
    ///
    /// # Arguments
    /// * `board` - Fretboard used to map readings to positions
    /// * `config` - Detector settings
    /// * `source` - Microphone or simulated buffer
    /// * `readings` - Channel the readings are published on
    pub fn start(
        board: Arc<Fretboard>,
        config: DetectorConfig,
        source: CaptureSource,
        readings: Sender<PitchReading>,
    ) -> Result<Self, AudioError> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let failure = Arc::new(Mutex::new(None));
        let thread_running = running.clone();
        let thread_failure = failure.clone();

        let thread_handle = thread::Builder::new()
            .name("pitch-listener".into())
            .spawn(move || {
                log::info!("[LISTENER] Starting listener thread...");
                let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);
                // Kept alive here so the fault channel only fires on a real fault.
                let (fault_tx, fault_rx) = crossbeam_channel::bounded::<AudioError>(1);

                let (stream, raw_rx, sample_rate) = match source {
                    CaptureSource::Device => {
                        match audio::start_audio_capture(raw_tx, fault_tx.clone()) {
                            Ok((stream, rate)) => (Some(stream), raw_rx, rate),
                            Err(e) => {
                                log::error!("[LISTENER] Could not start audio capture: {e}");
                                thread_running.store(false, Ordering::Release);
                                let _ = ready_tx.send(Err(e));
                                return;
                            }
                        }
                    }
                    CaptureSource::Simulated {
                        samples,
                        sample_rate,
                    } => {
                        spawn_simulated_feed(samples, sample_rate, raw_tx);
                        (None, raw_rx, sample_rate)
                    }
                    CaptureSource::Stream {
                        chunks,
                        sample_rate,
                    } => (None, chunks, sample_rate),
                };
                let _ = ready_tx.send(Ok(()));

                let mut analyzer = PitchAnalyzer::new(board, config, sample_rate);
                let outcome =
                    run_analysis_loop(&mut analyzer, &raw_rx, &fault_rx, &shutdown_rx, &readings);
                if let Err(e) = outcome {
                    log::error!("[LISTENER] Capture lost: {e}");
                    *thread_failure.lock() = Some(e);
                }
                thread_running.store(false, Ordering::Release);
                drop(fault_tx);

                if let Some(stream) = stream {
                    log::info!("[LISTENER] Releasing capture device");
                    if let Err(e) = stream.pause() {
                        log::warn!("[LISTENER] Error pausing stream: {e}");
                    }
                }
                log::info!("[LISTENER] Listener thread finished");
            })
            .map_err(|e| AudioError::unavailable(format!("could not spawn listener: {e}")))?;

        let listener = Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
            running,
            failure,
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(listener),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::unavailable("listener thread exited during startup")),
        }
    }

    /// False once the thread has ended, whether stopped or failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The device failure that ended the capture, if any.
    pub fn failure(&self) -> Option<AudioError> {
        self.failure.lock().clone()
    }

    /// Stops the thread and waits for the capture device to be released.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.shutdown_tx.try_send(());
            if handle.join().is_err() {
                log::error!("[LISTENER] Listener thread panicked");
            }
        }
    }
}

impl Drop for PitchListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs until shutdown or until nobody reads any more; a closed audio
/// channel or a stream fault ends it with `DeviceUnavailable`.
fn run_analysis_loop(
    analyzer: &mut PitchAnalyzer,
    raw_rx: &Receiver<Vec<f32>>,
    fault_rx: &Receiver<AudioError>,
    shutdown_rx: &Receiver<()>,
    readings: &Sender<PitchReading>,
) -> Result<(), AudioError> {
    loop {
        crossbeam_channel::select! {
            recv(raw_rx) -> msg => match msg {
                Ok(samples) => {
                    for reading in analyzer.push(&samples) {
                        if readings.send(reading).is_err() {
                            log::info!("[LISTENER] Reading receiver dropped");
                            return Ok(());
                        }
                    }
                }
                Err(_) => {
                    log::warn!("[LISTENER] Audio channel closed");
                    return Err(AudioError::unavailable("capture stream closed"));
                }
            },
            recv(fault_rx) -> msg => {
                if let Ok(e) = msg {
                    return Err(e);
                }
            },
            recv(shutdown_rx) -> _ => {
                log::info!("[LISTENER] Received shutdown signal");
                return Ok(());
            },
        }
    }
}

/// Replays a buffer in real-time sized chunks until the receiver goes away.
fn spawn_simulated_feed(samples: Vec<f32>, sample_rate: u32, raw_tx: Sender<Vec<f32>>) {
    if samples.is_empty() {
        return;
    }
    let period = Duration::from_secs_f64(SIMULATED_CHUNK as f64 / sample_rate.max(1) as f64);
    thread::spawn(move || {
        let ticker = crossbeam_channel::tick(period);
        for chunk in samples.chunks(SIMULATED_CHUNK).cycle() {
            if ticker.recv().is_err() || raw_tx.send(chunk.to_vec()).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{self, Voice};

    const RATE: u32 = 44_100;

    fn analyzer() -> PitchAnalyzer {
        PitchAnalyzer::new(Arc::new(Fretboard::default()), DetectorConfig::default(), RATE)
    }

    #[test]
    fn open_a_string_maps_to_its_unison_positions() {
        let pluck = synth::render(&Voice::pluck(110.0, 0.0), RATE, 2048);
        let reading = analyzer().analyze(&pluck).unwrap();

        assert_eq!(reading.note, PitchClass::A);
        assert!(reading.cents.abs() < 10.0, "cents {}", reading.cents);
        assert!(reading.positions.contains(&FretPosition { string: 4, fret: 0 }));
        assert!(reading.positions.contains(&FretPosition { string: 5, fret: 5 }));
    }

    #[test]
    fn out_of_range_frequencies_are_dropped() {
        let config = DetectorConfig {
            max_frequency: 200.0,
            ..DetectorConfig::default()
        };
        let analyzer = PitchAnalyzer::new(Arc::new(Fretboard::default()), config, RATE);
        let pluck = synth::render(&Voice::pluck(329.63, 0.0), RATE, 2048);
        assert_eq!(analyzer.analyze(&pluck), None);
    }

    #[test]
    fn push_analyses_at_the_configured_rate() {
        let mut analyzer = analyzer();
        let hop = (RATE / 60) as usize;
        let pluck = synth::render(&Voice::pluck(196.0, 0.0), RATE, 2048 + 10 * hop);

        // Nothing until a full window is buffered.
        assert!(analyzer.push(&pluck[..2000]).is_empty());

        let readings = analyzer.push(&pluck[2000..]);
        assert!(readings.len() >= 9, "got {}", readings.len());
        assert!(readings.iter().all(|r| r.note == PitchClass::G));
    }

    #[test]
    fn silence_produces_no_readings() {
        let mut analyzer = analyzer();
        assert!(analyzer.push(&vec![0.0; RATE as usize / 4]).is_empty());
    }

    #[test]
    fn closed_capture_ends_the_listener_with_device_unavailable() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (chunks_tx, chunks_rx) = crossbeam_channel::unbounded();
        let listener = PitchListener::start(
            Arc::new(Fretboard::default()),
            DetectorConfig::default(),
            CaptureSource::Stream {
                chunks: chunks_rx,
                sample_rate: RATE,
            },
            tx,
        )
        .unwrap();
        assert!(listener.is_running());

        let pluck = synth::render(&Voice::pluck(110.0, 0.0), RATE, RATE as usize / 4);
        chunks_tx.send(pluck).unwrap();
        drop(chunks_tx);

        // Readings already produced arrive, then the channel disconnects.
        let readings: Vec<_> = rx.iter().collect();
        assert!(readings.iter().all(|r| r.note == PitchClass::A));
        assert!(!listener.is_running());
        assert!(matches!(
            listener.failure(),
            Some(AudioError::DeviceUnavailable(_))
        ));
        listener.stop();
    }

    #[test]
    fn stopping_is_not_a_failure() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let (_chunks_tx, chunks_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let listener = PitchListener::start(
            Arc::new(Fretboard::default()),
            DetectorConfig::default(),
            CaptureSource::Stream {
                chunks: chunks_rx,
                sample_rate: RATE,
            },
            tx,
        )
        .unwrap();
        let running = listener.running.clone();
        let failure = listener.failure.clone();
        listener.stop();
        assert!(!running.load(Ordering::Acquire));
        assert!(failure.lock().is_none());
    }

    #[test]
    fn simulated_listener_publishes_readings() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let samples = synth::render(&Voice::pluck(146.83, 0.0), RATE, RATE as usize / 2);
        let listener = PitchListener::start(
            Arc::new(Fretboard::default()),
            DetectorConfig::default(),
            CaptureSource::Simulated {
                samples,
                sample_rate: RATE,
            },
            tx,
        )
        .unwrap();

        let reading = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reading.note, PitchClass::D);
        listener.stop();
    }
}
