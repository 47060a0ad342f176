//! Command-line argument parsing.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use fretlab_core::PatternKind;

/// Fretboard practice: reference tones, scale maps, metronome, tuner and ear training.
#[derive(Parser, Debug)]
#[command(name = "fretlab")]
#[command(about = "Fretboard practice tool", long_about = None)]
pub struct Args {
    /// Practice settings as JSON (missing fields keep their defaults)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play the reference tone of a position
    Play {
        /// String index, 0 = high E
        string: usize,
        fret: usize,
    },

    /// Show where a scale or chord lies on the neck
    Map {
        /// Root note, e.g. C, F#, Bb
        root: String,
        /// Pattern name as listed by `patterns`
        pattern: String,
        #[command(flatten)]
        kind: KindArg,
        /// Print the guide positions as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the scale and chord catalogue
    Patterns,

    /// Run the metronome
    Metronome {
        #[arg(long, value_name = "BPM")]
        bpm: Option<u32>,
        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS", default_value = "10")]
        seconds: f64,
    },

    /// Print the live pitch stream
    Listen {
        #[arg(long, value_name = "SECONDS", default_value = "10")]
        seconds: f64,
        /// Feed a synthesized pluck of STRING FRET instead of the microphone
        #[arg(long, num_args = 2, value_names = ["STRING", "FRET"])]
        simulate: Option<Vec<usize>>,
    },

    /// Ear training: answer with `string fret` on stdin
    Train {
        #[arg(long, requires = "pattern")]
        root: Option<String>,
        #[arg(long, requires = "root")]
        pattern: Option<String>,
        #[command(flatten)]
        kind: KindArg,
        /// Stop after this many questions
        #[arg(long, default_value = "10")]
        rounds: u32,
    },
}

#[derive(ClapArgs, Debug, Clone, Copy)]
pub struct KindArg {
    /// Look the pattern up among chords instead of scales
    #[arg(long)]
    pub chord: bool,
}

impl KindArg {
    pub fn kind(self) -> PatternKind {
        if self.chord {
            PatternKind::Chord
        } else {
            PatternKind::Scale
        }
    }
}
