use std::sync::Arc;
use std::time::Duration;

use fretlab_core::exercise::ExerciseController;
use fretlab_core::synth::{self, Voice};
use fretlab_core::{
    AudioError, CaptureSource, ExerciseScore, Feedback, FretPosition, FretlabError, ManualClock,
    PatternKind, PitchClass, PositionError, PracticeConfig, PracticeSession, RecordingSink,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

struct Harness {
    clock: ManualClock,
    sink: Arc<RecordingSink>,
    session: PracticeSession,
}

fn harness(seed: u64) -> Harness {
    let clock = ManualClock::new();
    let sink = Arc::new(RecordingSink::new(Arc::new(clock.clone())));
    let config = PracticeConfig::default();
    let exercise_config = config.exercise.clone();
    let session = {
        let sink = sink.clone();
        let clock = clock.clone();
        PracticeSession::with_exercise(config, sink.clone(), move |board| {
            ExerciseController::with_rng(
                board,
                sink,
                Arc::new(clock),
                exercise_config,
                StdRng::seed_from_u64(seed),
            )
        })
    };
    Harness {
        clock,
        sink,
        session,
    }
}

impl Harness {
    fn target(&self) -> FretPosition {
        self.session.current_question().unwrap().target
    }

    fn wrong_answer(&self) -> FretPosition {
        let board = self.session.board();
        let note = board.note_of(self.target());
        board.positions().find(|&p| board.note_of(p) != note).unwrap()
    }

    fn answer(&self, position: FretPosition) -> Option<fretlab_core::AnswerOutcome> {
        self.session
            .submit_answer(position.string, position.fret)
            .unwrap()
    }

    fn wait(&self, secs: f64) {
        self.clock.advance(secs);
        self.session.poll_exercise();
    }
}

#[test]
fn playing_the_open_high_string_sounds_e() {
    let h = harness(0);
    h.clock.set(1.0);

    let note = h.session.play_tone(0, 0).unwrap();
    assert_eq!(note, PitchClass::E);

    let voices = h.sink.voices();
    assert_eq!(voices.len(), 1);
    assert!((voices[0].frequency - 329.63).abs() < 1e-3);
    assert_eq!(voices[0].start, 1.0);
}

#[test]
fn playing_off_the_board_is_a_range_violation() {
    let h = harness(0);
    let err = h.session.play_tone(6, 0).unwrap_err();
    assert!(matches!(
        err,
        FretlabError::Position(PositionError::RangeViolation { string: 6, fret: 0 })
    ));
    assert!(h.sink.voices().is_empty());
}

#[test]
fn playing_without_a_device_reports_it() {
    let h = harness(0);
    h.clock.disconnect();
    let err = h.session.play_tone(1, 1).unwrap_err();
    assert!(matches!(err, FretlabError::Audio(AudioError::DeviceUnavailable(_))));
}

#[test]
fn a_minor_pentatonic_lights_both_a_positions() {
    let mut h = harness(0);
    let guide = h
        .session
        .set_theory("A", "Minor Pentatonic", PatternKind::Scale)
        .to_vec();

    let high_fifth = guide
        .iter()
        .find(|g| g.position == FretPosition { string: 0, fret: 5 })
        .unwrap();
    let open_a = guide
        .iter()
        .find(|g| g.position == FretPosition { string: 4, fret: 0 })
        .unwrap();
    assert!(high_fifth.is_root && open_a.is_root);
    assert_eq!(high_fifth.note, open_a.note);
    assert!(guide.iter().all(|g| g.interval_label != "2"));
}

#[test]
fn unknown_pattern_clears_the_guide() {
    let mut h = harness(0);
    h.session.set_theory("C", "Major (Ionian)", PatternKind::Scale);
    assert!(!h.session.guide_positions().is_empty());

    assert!(h.session.set_theory("H", "Major (Ionian)", PatternKind::Scale).is_empty());
    assert!(h.session.set_theory("C", "Lydian Dominant", PatternKind::Scale).is_empty());
}

#[test]
fn training_starts_with_an_empty_score() {
    let mut h = harness(1);
    h.session.start_ear_training();
    assert_eq!(h.session.score(), ExerciseScore { total: 0, correct: 0 });
    assert_eq!(h.session.attempt_count(), 0);
    assert_eq!(h.session.feedback(), None);
    h.session.stop_ear_training();
}

#[test]
fn correct_answer_scores_and_moves_on() {
    let mut h = harness(2);
    let first = h.session.start_ear_training();

    let outcome = h.answer(first.target).unwrap();
    assert_eq!(outcome.feedback, Feedback::Correct);
    assert_eq!(h.session.score(), ExerciseScore { total: 1, correct: 1 });

    h.wait(1.6);
    let next = h.session.current_question().unwrap();
    assert!(next.id > first.id);
    assert_eq!(h.session.attempt_count(), 0);
    h.session.stop_ear_training();
}

#[test]
fn miss_then_hit_counts_once_as_correct() {
    let mut h = harness(3);
    let first = h.session.start_ear_training();

    assert_eq!(h.answer(h.wrong_answer()).unwrap().feedback, Feedback::Wrong);
    assert_eq!(h.session.score(), ExerciseScore { total: 0, correct: 0 });
    assert_eq!(h.session.attempt_count(), 1);

    assert_eq!(h.answer(first.target).unwrap().feedback, Feedback::Correct);
    assert_eq!(h.session.score(), ExerciseScore { total: 1, correct: 1 });
    h.session.stop_ear_training();
}

#[test]
fn two_misses_reveal_and_count_as_missed() {
    let mut h = harness(4);
    let first = h.session.start_ear_training();

    h.answer(h.wrong_answer()).unwrap();
    let outcome = h.answer(h.wrong_answer()).unwrap();
    assert_eq!(outcome.revealed, Some(first.target));
    assert_eq!(h.session.score(), ExerciseScore { total: 1, correct: 0 });

    // Further answers to a resolved question are ignored.
    assert_eq!(h.answer(first.target), None);
    assert_eq!(h.session.score(), ExerciseScore { total: 1, correct: 0 });

    h.wait(3.1);
    assert!(h.session.current_question().unwrap().id > first.id);
    h.session.stop_ear_training();
}

#[test]
fn same_note_elsewhere_on_the_neck_is_accepted() {
    let mut h = harness(5);
    h.session.start_ear_training();
    let target = h.target();
    let board = h.session.board();
    let note = board.note_of(target);
    let twin = board
        .positions()
        .find(|&p| p != target && board.note_of(p) == note)
        .unwrap();

    assert_eq!(h.answer(twin).unwrap().feedback, Feedback::Correct);
    h.session.stop_ear_training();
}

#[test]
fn tapping_sounds_the_position_and_answers() {
    let mut h = harness(6);
    let first = h.session.start_ear_training();
    h.sink.clear();

    let outcome = h
        .session
        .tap(first.target.string, first.target.fret)
        .unwrap()
        .unwrap();
    assert_eq!(outcome.feedback, Feedback::Correct);
    assert_eq!(h.sink.voices().len(), 1);
    h.session.stop_ear_training();
}

#[test]
fn metronome_runs_and_stops() {
    let mut h = harness(0);
    let beats = h.session.subscribe_beats();

    h.session.start_metronome(120).unwrap();
    assert!(h.session.is_metronome_running());
    let first = beats.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first.index, 0);
    assert!(first.downbeat);

    h.session.set_bpm(500);
    assert_eq!(h.session.bpm(), 220);

    h.session.stop_metronome();
    assert!(!h.session.is_metronome_running());
}

#[test]
fn restarting_the_listener_replaces_it() {
    let mut h = harness(0);
    let pluck = |freq| CaptureSource::Simulated {
        samples: synth::render(&Voice::pluck(freq, 0.0), 44_100, 22_050),
        sample_rate: 44_100,
    };

    let first = h.session.start_listening(pluck(110.0)).unwrap();
    assert!(h.session.is_listening());
    let second = h.session.start_listening(pluck(196.0)).unwrap();

    let reading = second.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(reading.note, PitchClass::G);

    // The replaced listener is gone; its channel drains and disconnects.
    while first.recv_timeout(Duration::from_millis(200)).is_ok() {}
    assert!(first.try_recv().is_err());

    h.session.stop_listening();
    assert!(!h.session.is_listening());
}

#[test]
fn losing_the_input_feed_stops_listening() {
    let mut h = harness(0);
    let (feed, chunks) = crossbeam_channel::unbounded();
    let readings = h
        .session
        .start_listening(CaptureSource::Stream {
            chunks,
            sample_rate: 44_100,
        })
        .unwrap();
    assert!(h.session.is_listening());
    assert!(h.session.listening_failure().is_none());

    feed.send(synth::render(&Voice::pluck(110.0, 0.0), 44_100, 8_192)).unwrap();
    drop(feed);

    // The readings channel closes once the listener has given up.
    while readings.recv_timeout(Duration::from_secs(2)).is_ok() {}
    assert!(!h.session.is_listening());
    assert!(matches!(
        h.session.listening_failure(),
        Some(AudioError::DeviceUnavailable(_))
    ));
}
