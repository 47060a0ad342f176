//! # Practice Session
//!
//! The service object a front-end talks to. Built once at startup, it owns
//! the fretboard, the theory selection, the exercise, the metronome and at
//! most one pitch listener.
//!
//! ## Threads
//! - **Caller**: every method here runs on the front-end's thread
//! - **Exercise timer**: fires the exercise's delayed transitions while training
//! - **Metronome poll** and **listener**: owned by [`BeatScheduler`] and [`PitchListener`]

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{self, AudioSink};
use crate::clock::Clock;
use crate::config::PracticeConfig;
use crate::error::{AudioError, Result};
use crate::exercise::{
    AnswerOutcome, ExerciseController, ExerciseQuestion, ExerciseScore, Feedback,
};
use crate::listener::{CaptureSource, PitchListener, PitchReading};
use crate::metronome::{BeatEvent, BeatScheduler};
use crate::theory::{self, GuidePosition, PatternKind};
use crate::tuning::{Fretboard, PitchClass, STANDARD_TUNING};

const EXERCISE_TICK: Duration = Duration::from_millis(20);

/// The active scale or chord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TheorySelection {
    pub root: String,
    pub pattern: String,
    pub kind: PatternKind,
}

struct ExerciseTimer {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ExerciseTimer {
    fn spawn(exercise: Arc<Mutex<ExerciseController>>) -> Option<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("exercise-timer".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(EXERCISE_TICK);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            exercise.lock().poll();
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => Some(Self {
                shutdown_tx,
                thread_handle: Some(handle),
            }),
            Err(e) => {
                log::error!("[SESSION] Could not spawn exercise timer: {e}");
                None
            }
        }
    }
}

impl Drop for ExerciseTimer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[SESSION] Exercise timer panicked");
            }
        }
    }
}

pub struct PracticeSession {
    config: PracticeConfig,
    board: Arc<Fretboard>,
    sink: Arc<dyn AudioSink>,
    theory: Option<TheorySelection>,
    guide: Vec<GuidePosition>,
    exercise: Arc<Mutex<ExerciseController>>,
    exercise_timer: Option<ExerciseTimer>,
    metronome: BeatScheduler,
    listener: Option<PitchListener>,
}

impl PracticeSession {
    /// # Arguments
    /// * `config` - Practice settings
    /// * `sink` - Output for reference tones and clicks
    /// * `clock` - Wall clock driving the exercise's delays
    pub fn new(config: PracticeConfig, sink: Arc<dyn AudioSink>, clock: Arc<dyn Clock>) -> Self {
        let board = Arc::new(Fretboard::new(STANDARD_TUNING, config.fret_count));
        let exercise =
            ExerciseController::new(board.clone(), sink.clone(), clock, config.exercise.clone());
        Self::assemble(config, board, sink, exercise)
    }

    /// Same as [`PracticeSession::new`] with a caller-built exercise
    /// controller, e.g. one with a seeded random source.
    pub fn with_exercise(
        config: PracticeConfig,
        sink: Arc<dyn AudioSink>,
        exercise: impl FnOnce(Arc<Fretboard>) -> ExerciseController,
    ) -> Self {
        let board = Arc::new(Fretboard::new(STANDARD_TUNING, config.fret_count));
        let exercise = exercise(board.clone());
        Self::assemble(config, board, sink, exercise)
    }

    fn assemble(
        config: PracticeConfig,
        board: Arc<Fretboard>,
        sink: Arc<dyn AudioSink>,
        exercise: ExerciseController,
    ) -> Self {
        let metronome = BeatScheduler::new(sink.clone(), config.metronome.clone());
        Self {
            config,
            board,
            sink,
            theory: None,
            guide: Vec::new(),
            exercise: Arc::new(Mutex::new(exercise)),
            exercise_timer: None,
            metronome,
            listener: None,
        }
    }

    pub fn board(&self) -> &Fretboard {
        &self.board
    }

    pub fn config(&self) -> &PracticeConfig {
        &self.config
    }

    /// Plays the reference tone of a position.
    ///
    /// # Returns
    /// * `Ok(note)` - The played pitch class
    /// * `Err(FretlabError::Position)` - No such position on this fretboard
    /// * `Err(FretlabError::Audio)` - The output device is unavailable
    pub fn play_tone(&self, string: usize, fret: usize) -> Result<PitchClass> {
        let position = self.board.position(string, fret)?;
        Ok(audio::play_tone(self.sink.as_ref(), &self.board, position)?)
    }

    /// A tap on a position: sounds it, and answers the current question if
    /// ear training is running.
    pub fn tap(&self, string: usize, fret: usize) -> Result<Option<AnswerOutcome>> {
        let note = self.play_tone(string, fret)?;
        log::debug!("Tapped string {string} fret {fret} ({note})");
        let position = self.board.position(string, fret)?;
        Ok(self.exercise.lock().submit_answer(position))
    }

    // --- Theory ---

    /// Selects a scale or chord and recomputes the guide positions.
    ///
    /// Unknown names leave the guide empty. The exercise draws its future
    /// questions from the new guide.
    pub fn set_theory(&mut self, root: &str, pattern: &str, kind: PatternKind) -> &[GuidePosition] {
        self.guide = theory::map(&self.board, root, pattern, kind);
        self.theory = Some(TheorySelection {
            root: root.to_string(),
            pattern: pattern.to_string(),
            kind,
        });
        self.exercise.lock().set_guide_positions(&self.guide);
        log::info!("Theory set to {root} {pattern} ({} positions)", self.guide.len());
        &self.guide
    }

    pub fn clear_theory(&mut self) {
        self.theory = None;
        self.guide.clear();
        self.exercise.lock().set_guide_positions(&[]);
    }

    pub fn theory(&self) -> Option<&TheorySelection> {
        self.theory.as_ref()
    }

    pub fn guide_positions(&self) -> &[GuidePosition] {
        &self.guide
    }

    // --- Ear training ---

    /// Resets the score, asks the first question and starts the exercise timer.
    pub fn start_ear_training(&mut self) -> ExerciseQuestion {
        let question = self.exercise.lock().start_ear_training();
        if self.exercise_timer.is_none() {
            self.exercise_timer = ExerciseTimer::spawn(self.exercise.clone());
        }
        question
    }

    pub fn stop_ear_training(&mut self) {
        self.exercise_timer = None;
        self.exercise.lock().stop();
    }

    /// Grades an answer without sounding it; see [`ExerciseController::submit_answer`].
    pub fn submit_answer(&self, string: usize, fret: usize) -> Result<Option<AnswerOutcome>> {
        let position = self.board.position(string, fret)?;
        Ok(self.exercise.lock().submit_answer(position))
    }

    /// Fires due exercise transitions on the caller's thread.
    pub fn poll_exercise(&self) -> usize {
        self.exercise.lock().poll()
    }

    pub fn current_question(&self) -> Option<ExerciseQuestion> {
        self.exercise.lock().current_question()
    }

    pub fn attempt_count(&self) -> u8 {
        self.exercise.lock().attempt_count()
    }

    pub fn score(&self) -> ExerciseScore {
        self.exercise.lock().score()
    }

    pub fn feedback(&self) -> Option<Feedback> {
        self.exercise.lock().feedback()
    }

    pub fn is_training(&self) -> bool {
        self.exercise.lock().is_active()
    }

    // --- Metronome ---

    pub fn start_metronome(&mut self, bpm: u32) -> std::result::Result<(), AudioError> {
        self.metronome.start(bpm)
    }

    pub fn stop_metronome(&mut self) {
        self.metronome.stop();
    }

    pub fn set_bpm(&self, bpm: u32) {
        self.metronome.set_bpm(bpm);
    }

    pub fn bpm(&self) -> u32 {
        self.metronome.bpm()
    }

    pub fn is_metronome_running(&self) -> bool {
        self.metronome.is_running()
    }

    pub fn subscribe_beats(&self) -> Receiver<BeatEvent> {
        self.metronome.subscribe()
    }

    pub fn metronome(&mut self) -> &mut BeatScheduler {
        &mut self.metronome
    }

    // --- Listening ---

    /// Starts the pitch listener on `source`, replacing any running one.
    ///
    /// The previous listener is stopped first so the capture device is free
    /// before it is opened again.
    pub fn start_listening(
        &mut self,
        source: CaptureSource,
    ) -> std::result::Result<Receiver<PitchReading>, AudioError> {
        self.stop_listening();

        let (tx, rx) = crossbeam_channel::unbounded();
        let listener = PitchListener::start(
            self.board.clone(),
            self.config.detector.clone(),
            source,
            tx,
        )?;
        self.listener = Some(listener);
        Ok(rx)
    }

    pub fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
    }

    /// True while a listener is capturing. Turns false on its own if the
    /// capture device is lost; see [`PracticeSession::listening_failure`].
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(PitchListener::is_running)
    }

    /// The device failure that ended the current listener, if any.
    pub fn listening_failure(&self) -> Option<AudioError> {
        self.listener.as_ref().and_then(PitchListener::failure)
    }
}

impl Drop for PracticeSession {
    fn drop(&mut self) {
        self.stop_listening();
        self.exercise_timer = None;
        self.metronome.stop();
    }
}
