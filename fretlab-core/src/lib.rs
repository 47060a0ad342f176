// fretlab-core/src/lib.rs

//! The core logic for the fretboard practice tool.
//! This crate is responsible for the tone model, pitch detection, theory
//! mapping, the metronome and the ear-training exercise. It is completely
//! headless and contains no front-end code.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod exercise;
pub mod listener;
pub mod metronome;
pub mod pitch;
pub mod session;
pub mod synth;
pub mod theory;
pub mod tuning;

pub use audio::{AudioOutput, AudioSink, OutputHandle, RecordingSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PracticeConfig;
pub use error::{AudioError, FretlabError, PositionError, Result};
pub use exercise::{AnswerOutcome, ExerciseQuestion, ExerciseScore, Feedback};
pub use listener::{CaptureSource, PitchReading};
pub use metronome::{BeatEvent, BeatScheduler};
pub use session::PracticeSession;
pub use theory::{GuidePosition, PatternKind};
pub use tuning::{FretPosition, Fretboard, PitchClass};
