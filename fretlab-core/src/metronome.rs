//! # Beat Scheduler
//!
//! A drift-free metronome. A low-priority poll runs on a fixed wall-clock
//! cadence and, on every tick, commits each beat whose target time falls
//! inside a short look-ahead window on the *hardware* clock. Once a beat is
//! queued on the output device its timing no longer depends on the poll, so
//! a stalled tick only delays further look-ahead, never a queued click.
//!
//! Lifecycle is `Stopped -> Running -> Stopped`. Stopping discards phase; a
//! restart begins a fresh measure at beat 0.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::AudioSink;
use crate::config::MetronomeConfig;
use crate::error::AudioError;
use crate::synth::Voice;

/// Fixed time signature: four beats to the bar.
pub const BEATS_PER_MEASURE: u64 = 4;

/// A beat committed to the output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Beats since the last start, 0-based.
    pub index: u64,
    /// Hardware time in seconds the click is queued for.
    pub time: f64,
    /// First beat of a measure, played with the accented click.
    pub downbeat: bool,
}

/// Scheduler state; the poll thread and the control methods share it
/// behind one lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatClockState {
    pub bpm: u32,
    /// Hardware time of the next beat not yet committed.
    pub next_beat_time: f64,
    /// Hardware time of the last committed beat.
    pub last_beat_time: Option<f64>,
    /// Index the next committed beat will carry.
    pub beat_index: u64,
    pub running: bool,
}

impl BeatClockState {
    fn stopped(bpm: u32) -> Self {
        Self {
            bpm,
            next_beat_time: 0.0,
            last_beat_time: None,
            beat_index: 0,
            running: false,
        }
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm as f64
    }

    /// Commits every beat that starts before `horizon`.
    fn take_due_beats(&mut self, horizon: f64) -> Vec<BeatEvent> {
        let mut beats = Vec::new();
        while self.next_beat_time < horizon {
            beats.push(BeatEvent {
                index: self.beat_index,
                time: self.next_beat_time,
                downbeat: self.beat_index % BEATS_PER_MEASURE == 0,
            });
            self.last_beat_time = Some(self.next_beat_time);
            self.next_beat_time += self.seconds_per_beat();
            self.beat_index += 1;
        }
        beats
    }

    /// Changes the tempo for beats not yet committed.
    ///
    /// The next beat lands one new interval after the last committed one,
    /// but never before `earliest`, so a speed-up late in a long beat does
    /// not commit clicks whose time has already passed.
    fn retempo(&mut self, bpm: u32, earliest: Option<f64>) {
        self.bpm = bpm;
        if let Some(last) = self.last_beat_time {
            let next = last + self.seconds_per_beat();
            self.next_beat_time = earliest.map_or(next, |earliest| next.max(earliest));
        }
    }
}

/// State shared with the poll thread.
struct Shared {
    sink: Arc<dyn AudioSink>,
    schedule_ahead: f64,
    state: Mutex<BeatClockState>,
    observers: Mutex<Vec<Sender<BeatEvent>>>,
}

impl Shared {
    /// One look-ahead pass: queue everything due inside the window.
    fn pump(&self) -> Result<usize, AudioError> {
        let mut state = self.state.lock();
        if !state.running {
            return Ok(0);
        }
        let now = self
            .sink
            .now()
            .ok_or_else(|| AudioError::unavailable("output clock stopped"))?;

        let beats = state.take_due_beats(now + self.schedule_ahead);
        for beat in &beats {
            self.sink.schedule(Voice::click(beat.downbeat, beat.time))?;
            log::trace!("Queued beat {} at {:.3}s", beat.index, beat.time);
        }
        drop(state);

        if !beats.is_empty() {
            self.observers.lock().retain(|observer| {
                beats.iter().all(|beat| observer.send(*beat).is_ok())
            });
        }
        Ok(beats.len())
    }
}

/// Poll thread management.
struct Worker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[METRONOME] Poll thread panicked");
            }
        }
    }
}

/// Tempo-locked click generator on top of an [`AudioSink`].
pub struct BeatScheduler {
    config: MetronomeConfig,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl BeatScheduler {
    pub fn new(sink: Arc<dyn AudioSink>, config: MetronomeConfig) -> Self {
        let state = BeatClockState::stopped(config.default_bpm);
        Self {
            shared: Arc::new(Shared {
                sink,
                schedule_ahead: config.schedule_ahead_secs,
                state: Mutex::new(state),
                observers: Mutex::new(Vec::new()),
            }),
            config,
            worker: None,
        }
    }

    /// Starts a fresh measure at `bpm` and begins polling.
    ///
    /// A scheduler that is already running is stopped and restarted, so at
    /// most one poll loop ever exists.
    ///
    /// # Returns
    /// * `Ok(())` - Running; beat 0 lands one start delay from now
    /// * `Err(AudioError::DeviceUnavailable)` - The hardware clock is not available
    pub fn start(&mut self, bpm: u32) -> Result<(), AudioError> {
        self.start_paused(bpm)?;

        let shared = self.shared.clone();
        let interval = self.config.poll_interval();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("metronome-poll".into())
            .spawn(move || {
                log::info!("[METRONOME] Poll loop started");
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            if let Err(e) = shared.pump() {
                                log::error!("[METRONOME] Stopping: {e}");
                                shared.state.lock().running = false;
                                break;
                            }
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::info!("[METRONOME] Poll loop finished");
            })
            .map_err(|e| {
                self.shared.state.lock().running = false;
                AudioError::unavailable(format!("could not spawn metronome thread: {e}"))
            })?;

        self.worker = Some(Worker {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        });
        Ok(())
    }

    /// Arms the scheduler without a poll thread; the caller drives
    /// [`BeatScheduler::pump`] itself. Used by offline simulations.
    pub fn start_paused(&mut self, bpm: u32) -> Result<(), AudioError> {
        self.stop();

        let now = self
            .shared
            .sink
            .now()
            .ok_or_else(|| AudioError::unavailable("output clock unavailable"))?;
        let bpm = self.config.clamp_bpm(bpm);
        {
            let mut state = self.shared.state.lock();
            *state = BeatClockState {
                bpm,
                next_beat_time: now + self.config.start_delay_secs,
                last_beat_time: None,
                beat_index: 0,
                running: true,
            };
        }
        log::info!("[METRONOME] Started at {bpm} BPM");

        // Fill the first window straight away rather than waiting a tick.
        if let Err(e) = self.shared.pump() {
            self.shared.state.lock().running = false;
            return Err(e);
        }
        Ok(())
    }

    /// Runs one look-ahead pass and returns how many beats were queued.
    pub fn pump(&self) -> Result<usize, AudioError> {
        let result = self.shared.pump();
        if result.is_err() {
            self.shared.state.lock().running = false;
        }
        result
    }

    /// Halts polling. Clicks already queued on the device still play.
    pub fn stop(&mut self) {
        let was_running = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut state.running, false)
        };
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        if was_running {
            log::info!("[METRONOME] Stopped");
        }
    }

    /// Changes the tempo of every beat not yet committed.
    ///
    /// The value is clamped to the configured BPM range. If the re-timed
    /// beat would already be due, it moves to one start delay from now.
    pub fn set_bpm(&self, bpm: u32) {
        let bpm = self.config.clamp_bpm(bpm);
        let earliest = self
            .shared
            .sink
            .now()
            .map(|now| now + self.config.start_delay_secs);
        self.shared.state.lock().retempo(bpm, earliest);
    }

    pub fn bpm(&self) -> u32 {
        self.shared.state.lock().bpm
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn state(&self) -> BeatClockState {
        *self.shared.state.lock()
    }

    /// Returns a receiver that sees every beat as it is committed.
    pub fn subscribe(&self) -> Receiver<BeatEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.observers.lock().push(tx);
        rx
    }
}

impl Drop for BeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
