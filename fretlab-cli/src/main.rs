//! # Fretlab - Fretboard Practice CLI
//!
//! Terminal front-end over `fretlab-core`: reference tones, scale and chord
//! maps, a metronome, a live tuner and an ear-training loop.
//!
//! ## Architecture
//! - **Main Thread**: owns the output stream and the practice session
//! - **Core Threads**: metronome poll, exercise timer and pitch listener
//! - **Communication**: crossbeam channels for beats, readings and stdin answers

mod cli;
mod ui;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cli::{Args, Command};
use fretlab_core::audio::TARGET_SAMPLE_RATE;
use fretlab_core::synth::{self, Voice};
use fretlab_core::theory::{self, CHORDS, INTERVAL_LABELS, SCALES};
use fretlab_core::tuning::STANDARD_TUNING;
use fretlab_core::{
    AnswerOutcome, AudioError, AudioOutput, CaptureSource, Feedback, FretlabError, Fretboard,
    PatternKind, PracticeConfig, PracticeSession, RecordingSink, SystemClock,
};
use ui::cent_meter::CentMeter;
use ui::fretboard::FretboardDiagram;

/// Number of readings averaged per printed tuner line.
const SMOOTHING_FACTOR: usize = 5;
/// Width of the cent meter bar in characters.
const METER_WIDTH: usize = 41;
/// How long a single reference tone keeps ringing.
const TONE_RING: Duration = Duration::from_millis(1600);
/// How often the training loop checks for a new question.
const TRAIN_REFRESH: Duration = Duration::from_millis(50);

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&args)))
        .init();

    if let Err(e) = run(args) {
        match device_failure(&e) {
            Some(audio) => eprintln!("[STATUS] {audio}"),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}

/// Log level used when `RUST_LOG` is not set.
fn log_filter(args: &Args) -> &'static str {
    if args.verbose { "debug" } else { "info" }
}

/// Finds a device failure anywhere in the error chain.
fn device_failure(e: &anyhow::Error) -> Option<&AudioError> {
    e.chain().find_map(|cause| {
        cause.downcast_ref::<AudioError>().or_else(|| match cause.downcast_ref::<FretlabError>() {
            Some(FretlabError::Audio(audio)) => Some(audio),
            _ => None,
        })
    })
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => PracticeConfig::load(path)
            .with_context(|| format!("could not load config from {}", path.display()))?,
        None => PracticeConfig::default(),
    };
    log::debug!("Using config: {config:?}");

    match args.command {
        Command::Play { string, fret } => play(config, string, fret),
        Command::Map {
            root,
            pattern,
            kind,
            json,
        } => map(&config, &root, &pattern, kind.kind(), json),
        Command::Patterns => {
            patterns();
            Ok(())
        }
        Command::Metronome { bpm, seconds } => metronome(config, bpm, seconds),
        Command::Listen { seconds, simulate } => listen(config, seconds, simulate),
        Command::Train {
            root,
            pattern,
            kind,
            rounds,
        } => train(config, root.zip(pattern), kind.kind(), rounds),
    }
}

/// Session wired to the default output device. The returned stream must
/// outlive the session.
fn open_session(config: PracticeConfig) -> anyhow::Result<(AudioOutput, PracticeSession)> {
    let output = AudioOutput::open()?;
    let session = PracticeSession::new(
        config,
        Arc::new(output.handle()),
        Arc::new(SystemClock::default()),
    );
    Ok((output, session))
}

fn play(config: PracticeConfig, string: usize, fret: usize) -> anyhow::Result<()> {
    // Reject a bad position before touching the device.
    let position = Fretboard::new(STANDARD_TUNING, config.fret_count).position(string, fret)?;

    let (_output, session) = open_session(config)?;
    let note = session.play_tone(position.string, position.fret)?;
    println!(
        "{note}  {:.2} Hz  ({position})",
        session.board().frequency_of(position)
    );
    thread::sleep(TONE_RING);
    Ok(())
}

fn map(
    config: &PracticeConfig,
    root: &str,
    pattern: &str,
    kind: PatternKind,
    json: bool,
) -> anyhow::Result<()> {
    let board = Fretboard::new(STANDARD_TUNING, config.fret_count);
    let guide = theory::map(&board, root, pattern, kind);

    if json {
        println!("{}", serde_json::to_string_pretty(&guide)?);
        return Ok(());
    }
    if guide.is_empty() {
        println!("No positions for {root} {pattern:?}; see `fretlab patterns`");
        return Ok(());
    }
    println!("{root} {pattern}: {} positions", guide.len());
    print!("{}", FretboardDiagram::new(&board, &guide).render());
    Ok(())
}

fn patterns() {
    for (title, catalogue) in [("Scales", SCALES), ("Chords", CHORDS)] {
        println!("{title}:");
        for (name, offsets) in catalogue {
            let formula: Vec<&str> = offsets
                .iter()
                .map(|&o| INTERVAL_LABELS[o as usize % 12])
                .collect();
            println!("  {name:<22} {}", formula.join(" "));
        }
    }
}

fn metronome(config: PracticeConfig, bpm: Option<u32>, seconds: f64) -> anyhow::Result<()> {
    let bpm = bpm.unwrap_or(config.metronome.default_bpm);
    let (_output, mut session) = open_session(config)?;
    let beats = session.subscribe_beats();

    session.start_metronome(bpm)?;
    println!("Metronome at {} BPM for {seconds}s", session.bpm());

    let deadline = crossbeam_channel::after(Duration::from_secs_f64(seconds.max(0.0)));
    let mut stdout = io::stdout();
    loop {
        select! {
            recv(beats) -> beat => match beat {
                Ok(beat) if beat.downbeat => print!("\n1"),
                Ok(beat) => print!(" {}", beat.index % 4 + 1),
                Err(_) => break,
            },
            recv(deadline) -> _ => break,
        }
        stdout.flush()?;
        if !session.is_metronome_running() {
            println!();
            return Err(AudioError::unavailable("output device stopped").into());
        }
    }
    println!();
    session.stop_metronome();
    Ok(())
}

fn listen(
    config: PracticeConfig,
    seconds: f64,
    simulate: Option<Vec<usize>>,
) -> anyhow::Result<()> {
    // No tones are played while listening, so an offline sink stands in for the output.
    let clock = Arc::new(SystemClock::default());
    let sink = Arc::new(RecordingSink::new(clock.clone()));
    let mut session = PracticeSession::new(config, sink, clock);

    let source = match simulate.as_deref() {
        Some(&[string, fret]) => {
            let position = session.board().position(string, fret)?;
            let frequency = session.board().frequency_of(position);
            println!("Simulating a pluck at {position} ({frequency:.2} Hz)");
            CaptureSource::Simulated {
                samples: synth::render(
                    &Voice::pluck(frequency, 0.0),
                    TARGET_SAMPLE_RATE,
                    TARGET_SAMPLE_RATE as usize,
                ),
                sample_rate: TARGET_SAMPLE_RATE,
            }
        }
        _ => CaptureSource::Device,
    };

    let readings = session.start_listening(source)?;
    println!("Listening for {seconds}s...");
    print_readings(&readings, Duration::from_secs_f64(seconds.max(0.0)));
    let failure = session.listening_failure();
    session.stop_listening();
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_readings(readings: &Receiver<fretlab_core::PitchReading>, duration: Duration) {
    let deadline = crossbeam_channel::after(duration);
    let mut smoothing: VecDeque<f32> = VecDeque::with_capacity(SMOOTHING_FACTOR);
    let mut count = 0usize;

    loop {
        select! {
            recv(readings) -> msg => {
                let Ok(reading) = msg else { break };
                if smoothing.len() == SMOOTHING_FACTOR {
                    smoothing.pop_front();
                }
                smoothing.push_back(reading.cents);
                count += 1;
                if count % SMOOTHING_FACTOR != 0 {
                    continue;
                }

                let cents = smoothing.iter().sum::<f32>() / smoothing.len() as f32;
                let positions: Vec<String> = reading
                    .positions
                    .iter()
                    .map(|p| format!("{}/{}", p.string, p.fret))
                    .collect();
                println!(
                    "{:<2} {:>8.2} Hz {}  {}",
                    reading.note.name(),
                    reading.frequency,
                    CentMeter::new(Some(cents)).render(METER_WIDTH),
                    positions.join(" ")
                );
            },
            recv(deadline) -> _ => break,
        }
    }
}

/// Reads stdin lines on a background thread.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

enum Answer {
    Position(usize, usize),
    Quit,
    Invalid,
}

fn parse_answer(line: &str) -> Answer {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("q" | "quit"), None, None) => Answer::Quit,
        (Some(string), Some(fret), None) => match (string.parse(), fret.parse()) {
            (Ok(string), Ok(fret)) => Answer::Position(string, fret),
            _ => Answer::Invalid,
        },
        _ => Answer::Invalid,
    }
}

fn train(
    config: PracticeConfig,
    theory: Option<(String, String)>,
    kind: PatternKind,
    rounds: u32,
) -> anyhow::Result<()> {
    let (_output, mut session) = open_session(config)?;

    if let Some((root, pattern)) = &theory {
        if session.set_theory(root, pattern, kind).is_empty() {
            println!("No positions for {root} {pattern:?}; using the whole neck");
        } else {
            println!("Questions drawn from {root} {pattern}");
        }
    }

    let answers = spawn_stdin_reader();
    let refresh = crossbeam_channel::tick(TRAIN_REFRESH);
    println!("Listen, then answer with `string fret` (0 = high E). `q` quits.");

    let mut question = session.start_ear_training();
    let mut asked = 1;
    println!("\nQuestion {asked}/{rounds}");

    loop {
        select! {
            recv(answers) -> line => {
                let Ok(line) = line else { break };
                match parse_answer(&line) {
                    Answer::Quit => break,
                    Answer::Invalid => println!("Answer with two numbers, e.g. `2 5`"),
                    Answer::Position(string, fret) => match session.tap(string, fret) {
                        Ok(Some(outcome)) => report(&session, outcome),
                        Ok(None) => println!("Hold on, the next question is coming"),
                        Err(FretlabError::Position(e)) => println!("{e}"),
                        Err(e) => return Err(e.into()),
                    },
                }
            },
            recv(refresh) -> _ => {
                let Some(current) = session.current_question() else { break };
                if current.id != question.id {
                    if asked >= rounds {
                        break;
                    }
                    question = current;
                    asked += 1;
                    println!("\nQuestion {asked}/{rounds}");
                }
            },
        }
    }

    session.stop_ear_training();
    let score = session.score();
    println!(
        "\nScore: {}/{} ({}%)",
        score.correct,
        score.total,
        score.accuracy()
    );
    Ok(())
}

fn report(session: &PracticeSession, outcome: AnswerOutcome) {
    match (outcome.feedback, outcome.revealed) {
        (Feedback::Correct, _) => println!("Correct!"),
        (Feedback::Wrong, None) => println!("Not quite, listen again"),
        (Feedback::Wrong, Some(target)) => {
            let note = session.board().note_of(target);
            println!("It was {note} at {target}");
            print!(
                "{}",
                FretboardDiagram::new(session.board(), session.guide_positions())
                    .with_selected(Some(target))
                    .render()
            );
        }
    }
    println!(
        "Score: {}/{}",
        outcome.score.correct, outcome.score.total
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_parse_from_two_numbers() {
        assert!(matches!(parse_answer(" 2 5 "), Answer::Position(2, 5)));
        assert!(matches!(parse_answer("q"), Answer::Quit));
        assert!(matches!(parse_answer("2"), Answer::Invalid));
        assert!(matches!(parse_answer("a b"), Answer::Invalid));
        assert!(matches!(parse_answer("1 2 3"), Answer::Invalid));
    }

    #[test]
    fn logging_defaults_to_info_unless_verbose() {
        assert_eq!(log_filter(&Args::parse_from(["fretlab", "patterns"])), "info");
        assert_eq!(log_filter(&Args::parse_from(["fretlab", "-v", "patterns"])), "debug");
    }

    #[test]
    fn device_failures_are_found_through_context() {
        let err = anyhow::Error::from(FretlabError::from(AudioError::unavailable("gone")))
            .context("while playing");
        assert!(device_failure(&err).is_some());

        let other = anyhow::anyhow!("bad config");
        assert!(device_failure(&other).is_none());
    }
}
