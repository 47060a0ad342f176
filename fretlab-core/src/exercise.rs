//! # Ear Training Exercise
//!
//! Question generation, two-attempt grading and the running score.
//!
//! Each question is answered in at most two attempts:
//! - **Correct** on either attempt: scored as correct, advance after a pause
//! - **Wrong on the first attempt**: no score change, the question is replayed
//! - **Wrong on the second attempt**: scored as missed, the answer is revealed,
//!   advance after a longer pause
//!
//! An answer is correct when it sounds the same pitch class as the target,
//! so any other position of that note on the neck is accepted.
//!
//! Delayed transitions are stored as pending actions tagged with the id of the
//! question they belong to. Creating a question drops all pending actions and
//! [`ExerciseController::poll`] ignores any that are stale.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

use crate::audio::{self, AudioSink};
use crate::clock::Clock;
use crate::config::ExerciseConfig;
use crate::theory::GuidePosition;
use crate::tuning::{FretPosition, Fretboard, STRING_COUNT};

/// Result of the last graded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Feedback {
    Correct,
    Wrong,
}

/// Running score for the session. `correct <= total` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExerciseScore {
    pub total: u32,
    pub correct: u32,
}

impl ExerciseScore {
    /// Share of correct answers as a rounded percentage; 0 before any answer.
    pub fn accuracy(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.correct as f64 * 100.0 / self.total as f64).round() as u32
    }
}

/// The position the user has to find by ear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExerciseQuestion {
    /// Increases with every question; used to discard stale timers.
    pub id: u64,
    pub target: FretPosition,
}

/// What a submitted answer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerOutcome {
    pub feedback: Feedback,
    pub score: ExerciseScore,
    /// The target, once it has been revealed after a second miss.
    pub revealed: Option<FretPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    PlayTarget,
    Advance,
}

#[derive(Debug, Clone, Copy)]
struct PendingAction {
    question_id: u64,
    due: f64,
    action: Action,
}

/// Sole owner and writer of the exercise state.
pub struct ExerciseController {
    board: Arc<Fretboard>,
    sink: Arc<dyn AudioSink>,
    clock: Arc<dyn Clock>,
    config: ExerciseConfig,
    rng: StdRng,
    guide: Vec<FretPosition>,
    active: bool,
    question: Option<ExerciseQuestion>,
    last_question_id: u64,
    attempt: u8,
    resolved: bool,
    score: ExerciseScore,
    feedback: Option<Feedback>,
    pending: Vec<PendingAction>,
}

impl ExerciseController {
    pub fn new(
        board: Arc<Fretboard>,
        sink: Arc<dyn AudioSink>,
        clock: Arc<dyn Clock>,
        config: ExerciseConfig,
    ) -> Self {
        Self::with_rng(board, sink, clock, config, StdRng::from_entropy())
    }

    pub fn with_rng(
        board: Arc<Fretboard>,
        sink: Arc<dyn AudioSink>,
        clock: Arc<dyn Clock>,
        config: ExerciseConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            board,
            sink,
            clock,
            config,
            rng,
            guide: Vec::new(),
            active: false,
            question: None,
            last_question_id: 0,
            attempt: 0,
            resolved: false,
            score: ExerciseScore::default(),
            feedback: None,
            pending: Vec::new(),
        }
    }

    /// Narrows future questions to the given guide positions; an empty list
    /// means the whole neck up to the default fret.
    pub fn set_guide_positions(&mut self, guide: &[GuidePosition]) {
        self.guide = guide.iter().map(|g| g.position).collect();
    }

    /// Resets the score and asks the first question.
    pub fn start_ear_training(&mut self) -> ExerciseQuestion {
        log::info!("Starting ear training");
        self.active = true;
        self.score = ExerciseScore::default();
        self.next_question()
    }

    /// Leaves the exercise and drops any pending transition.
    pub fn stop(&mut self) {
        self.active = false;
        self.question = None;
        self.feedback = None;
        self.attempt = 0;
        self.resolved = false;
        self.pending.clear();
    }

    /// Replaces the current question with a fresh one.
    ///
    /// The target is drawn uniformly from the guide positions when there are
    /// any, otherwise from every string and frets `0..=default_max_fret`. Its
    /// reference tone plays after the settle delay.
    pub fn next_question(&mut self) -> ExerciseQuestion {
        self.pending.clear();
        self.feedback = None;
        self.attempt = 0;
        self.resolved = false;

        self.last_question_id += 1;
        let question = ExerciseQuestion {
            id: self.last_question_id,
            target: self.draw_target(),
        };
        self.question = Some(question);
        log::debug!("Question {} targets {}", question.id, question.target);

        self.schedule(Action::PlayTarget, self.config.settle_delay_ms);
        question
    }

    /// Grades an answer for the current question.
    ///
    /// # Returns
    /// * `Some(outcome)` - The answer was graded
    /// * `None` - No exercise running, or the question is already resolved
    ///   and waiting to advance
    pub fn submit_answer(&mut self, position: FretPosition) -> Option<AnswerOutcome> {
        if !self.active || self.resolved {
            return None;
        }
        let question = self.question?;

        if self.check_answer(position) {
            self.score.total += 1;
            self.score.correct += 1;
            self.feedback = Some(Feedback::Correct);
            self.resolve(self.config.correct_advance_ms);
            return Some(self.outcome(None));
        }

        self.feedback = Some(Feedback::Wrong);
        if self.attempt == 0 {
            self.attempt = 1;
            self.pending.clear();
            self.schedule(Action::PlayTarget, self.config.replay_delay_ms);
            Some(self.outcome(None))
        } else {
            self.score.total += 1;
            self.play_reference(question.target);
            self.resolve(self.config.reveal_advance_ms);
            Some(self.outcome(Some(question.target)))
        }
    }

    /// True when `position` sounds the target's pitch class.
    pub fn check_answer(&self, position: FretPosition) -> bool {
        match self.question {
            Some(question) if self.board.contains(position) => {
                self.board.note_of(position) == self.board.note_of(question.target)
            }
            _ => false,
        }
    }

    /// Fires every pending action that is due; returns how many ran.
    pub fn poll(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let Some(now) = self.clock.now() else {
            return 0;
        };

        let (mut due, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|p| p.due <= now);
        self.pending = rest;
        due.sort_by(|a, b| a.due.total_cmp(&b.due));

        let mut fired = 0;
        for pending in due {
            let Some(question) = self.question else { break };
            if pending.question_id != question.id {
                continue;
            }
            match pending.action {
                Action::PlayTarget => self.play_reference(question.target),
                Action::Advance => {
                    self.next_question();
                }
            }
            fired += 1;
        }
        fired
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn current_question(&self) -> Option<ExerciseQuestion> {
        self.question
    }

    /// Misses so far on the current question (0 or 1).
    pub fn attempt_count(&self) -> u8 {
        self.attempt
    }

    pub fn score(&self) -> ExerciseScore {
        self.score
    }

    pub fn feedback(&self) -> Option<Feedback> {
        self.feedback
    }

    fn draw_target(&mut self) -> FretPosition {
        if !self.guide.is_empty() {
            return self.guide[self.rng.gen_range(0..self.guide.len())];
        }
        let max_fret = self.config.default_max_fret.min(self.board.fret_count());
        FretPosition {
            string: self.rng.gen_range(0..STRING_COUNT),
            fret: self.rng.gen_range(0..=max_fret),
        }
    }

    fn resolve(&mut self, advance_ms: u64) {
        self.resolved = true;
        self.pending.clear();
        self.schedule(Action::Advance, advance_ms);
    }

    fn schedule(&mut self, action: Action, delay_ms: u64) {
        let Some(question) = self.question else { return };
        let now = self.clock.now().unwrap_or(0.0);
        self.pending.push(PendingAction {
            question_id: question.id,
            due: now + delay_ms as f64 / 1000.0,
            action,
        });
    }

    fn outcome(&self, revealed: Option<FretPosition>) -> AnswerOutcome {
        AnswerOutcome {
            feedback: self.feedback.unwrap_or(Feedback::Wrong),
            score: self.score,
            revealed,
        }
    }

    fn play_reference(&self, target: FretPosition) {
        if let Err(e) = audio::play_tone(self.sink.as_ref(), &self.board, target) {
            log::warn!("Could not play reference tone: {e}");
        }
    }
}
