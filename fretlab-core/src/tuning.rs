//! # Tone Model
//!
//! Pure mapping between fretboard positions, frequencies and pitch classes.
//! Nothing in here holds mutable state: the [`Fretboard`] derives its
//! frequency matrix once from a [`TuningSpec`] and is read-only afterwards.
//!
//! ## Features
//! - Equal temperament frequency matrix, `f = f0 * 2^(fret/12)`
//! - Pitch class of any position via `(open class + fret) mod 12`
//! - Nearest equal-tempered pitch class for a measured frequency
//! - Cent deviation and relative-tolerance position matching for the live tuner

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PositionError, UnknownNote};

/// Number of strings on the modelled instrument.
pub const STRING_COUNT: usize = 6;

/// Highest playable fret on the default fretboard (frets `0..=15`).
pub const DEFAULT_FRET_COUNT: usize = 15;

/// Twelve-tone equal temperament note names, starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Reference pitch used for frequency to note conversion.
const A4_FREQUENCY: f32 = 440.0;
/// MIDI note number of A4.
const A4_MIDI: i32 = 69;

/// Static map for note name to pitch class lookups.
///
/// Accepts the sharp spellings from [`NOTE_NAMES`] plus the usual flat
/// spellings, so that `"Bb"` and `"A#"` resolve to the same class.
static NOTE_MAP: Lazy<BTreeMap<&'static str, u8>> = Lazy::new(|| {
    let flats = [("Db", 1), ("Eb", 3), ("Gb", 6), ("Ab", 8), ("Bb", 10)];
    NOTE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i as u8))
        .chain(flats)
        .collect()
});

/// One of the twelve equal-tempered note identities, independent of octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);
    pub const D: PitchClass = PitchClass(2);
    pub const E: PitchClass = PitchClass(4);
    pub const F: PitchClass = PitchClass(5);
    pub const G: PitchClass = PitchClass(7);
    pub const A: PitchClass = PitchClass(9);
    pub const B: PitchClass = PitchClass(11);

    /// Builds a pitch class from any semitone count, reducing it mod 12.
    pub fn new(semitones: i32) -> Self {
        Self(semitones.rem_euclid(12) as u8)
    }

    /// Position of this class in [`NOTE_NAMES`] (0 = C).
    pub fn index(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.0 as usize]
    }

    /// Moves the class up by `semitones`, wrapping around the octave.
    pub fn transpose(self, semitones: i32) -> Self {
        Self::new(self.0 as i32 + semitones)
    }

    /// Distance in semitones from `root` up to `self`, always in `0..12`.
    pub fn interval_from(self, root: PitchClass) -> u8 {
        (self.0 + 12 - root.0) % 12
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<PitchClass> for String {
    fn from(value: PitchClass) -> Self {
        value.name().to_string()
    }
}

impl FromStr for PitchClass {
    type Err = UnknownNote;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NOTE_MAP
            .get(s.trim())
            .map(|&i| PitchClass(i))
            .ok_or_else(|| UnknownNote(s.to_string()))
    }
}

/// Pitch class and frequency of one open string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenString {
    pub pitch_class: PitchClass,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Ordered open-string table, index 0 being the highest string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningSpec {
    pub strings: [OpenString; STRING_COUNT],
}

/// Standard EADGBE tuning, listed from the high E string down to the low E.
pub const STANDARD_TUNING: TuningSpec = TuningSpec {
    strings: [
        OpenString { pitch_class: PitchClass::E, frequency: 329.63 },
        OpenString { pitch_class: PitchClass::B, frequency: 246.94 },
        OpenString { pitch_class: PitchClass::G, frequency: 196.00 },
        OpenString { pitch_class: PitchClass::D, frequency: 146.83 },
        OpenString { pitch_class: PitchClass::A, frequency: 110.00 },
        OpenString { pitch_class: PitchClass::E, frequency: 82.41 },
    ],
};

/// A (string, fret) coordinate on the fretboard.
///
/// Build one with [`Fretboard::position`] to get the bounds check; the
/// fields are public so front-ends can destructure them freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FretPosition {
    pub string: usize,
    pub fret: usize,
}

impl fmt::Display for FretPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "string {} fret {}", self.string, self.fret)
    }
}

/// The fretted surface: a tuning plus a fret count, with its frequency
/// matrix computed up front.
#[derive(Debug, Clone)]
pub struct Fretboard {
    tuning: TuningSpec,
    fret_count: usize,
    /// `[string][fret]` frequencies in Hz.
    frequencies: Vec<Vec<f32>>,
}

impl Default for Fretboard {
    fn default() -> Self {
        Self::new(STANDARD_TUNING, DEFAULT_FRET_COUNT)
    }
}

impl Fretboard {
    /// Creates a fretboard and precomputes every position's frequency.
    ///
    /// # Arguments
    /// * `tuning` - Open string table
    /// * `fret_count` - Highest playable fret (the nut is fret 0)
    pub fn new(tuning: TuningSpec, fret_count: usize) -> Self {
        let frequencies = tuning
            .strings
            .iter()
            .map(|open| {
                (0..=fret_count)
                    .map(|fret| open.frequency * 2.0_f32.powf(fret as f32 / 12.0))
                    .collect()
            })
            .collect();

        Self {
            tuning,
            fret_count,
            frequencies,
        }
    }

    pub fn tuning(&self) -> &TuningSpec {
        &self.tuning
    }

    pub fn string_count(&self) -> usize {
        STRING_COUNT
    }

    pub fn fret_count(&self) -> usize {
        self.fret_count
    }

    /// Validates a coordinate and returns it as a [`FretPosition`].
    pub fn position(&self, string: usize, fret: usize) -> Result<FretPosition, PositionError> {
        let position = FretPosition { string, fret };
        if self.contains(position) {
            Ok(position)
        } else {
            Err(PositionError::RangeViolation { string, fret })
        }
    }

    pub fn contains(&self, position: FretPosition) -> bool {
        position.string < STRING_COUNT && position.fret <= self.fret_count
    }

    /// Frequency in Hz of a position.
    ///
    /// # Panics
    /// * If the position lies outside the fretboard
    pub fn frequency_of(&self, position: FretPosition) -> f32 {
        self.assert_contains(position);
        self.frequencies[position.string][position.fret]
    }

    /// Pitch class of a position, `(open class + fret) mod 12`.
    ///
    /// # Panics
    /// * If the position lies outside the fretboard
    pub fn note_of(&self, position: FretPosition) -> PitchClass {
        self.assert_contains(position);
        self.tuning.strings[position.string]
            .pitch_class
            .transpose(position.fret as i32)
    }

    /// Every position on the board, string-major and fret-ascending.
    pub fn positions(&self) -> impl Iterator<Item = FretPosition> + '_ {
        (0..STRING_COUNT).flat_map(move |string| {
            (0..=self.fret_count).map(move |fret| FretPosition { string, fret })
        })
    }

    /// Positions whose frequency is within `tolerance` (relative) of `freq`.
    ///
    /// A tolerance of 0.03 is roughly half a semitone, which matches the
    /// sensitivity of the live tuner view at both ends of the neck.
    pub fn positions_near(&self, freq: f32, tolerance: f32) -> Vec<FretPosition> {
        self.positions()
            .filter(|&p| (self.frequency_of(p) - freq).abs() < freq * tolerance)
            .collect()
    }

    /// Every position sounding the given pitch class, in any octave.
    pub fn positions_of(&self, pitch_class: PitchClass) -> Vec<FretPosition> {
        self.positions()
            .filter(|&p| self.note_of(p) == pitch_class)
            .collect()
    }

    fn assert_contains(&self, position: FretPosition) {
        assert!(
            self.contains(position),
            "{}",
            PositionError::RangeViolation {
                string: position.string,
                fret: position.fret,
            }
        );
    }
}

/// Finds the nearest equal-tempered pitch class for a frequency.
///
/// Uses `n = round(12 * log2(freq / 440))` and offsets by A4's MIDI number.
///
/// # Returns
/// * `Some(class)` - For any finite frequency above zero
/// * `None` - For zero, negative or non-finite input
pub fn note_from_frequency(freq: f32) -> Option<PitchClass> {
    semitones_from_a4(freq).map(|n| PitchClass::new(n + A4_MIDI))
}

/// Frequency of the equal-tempered note nearest to `freq`.
pub fn nearest_note_frequency(freq: f32) -> Option<f32> {
    semitones_from_a4(freq).map(|n| A4_FREQUENCY * 2.0_f32.powf(n as f32 / 12.0))
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents make a semitone; positive values are sharp, negative flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

fn semitones_from_a4(freq: f32) -> Option<i32> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    Some((12.0 * (freq / A4_FREQUENCY).log2()).round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_follows_equal_temperament() {
        let board = Fretboard::default();
        for position in board.positions() {
            let open = STANDARD_TUNING.strings[position.string].frequency;
            let expected = open * 2.0_f32.powf(position.fret as f32 / 12.0);
            let actual = board.frequency_of(position);
            assert!(((actual - expected) / expected).abs() < 1e-6, "{position}");
        }
    }

    #[test]
    fn open_high_e_and_twelfth_fret_low_e() {
        let board = Fretboard::default();

        let high_e = board.position(0, 0).unwrap();
        assert!((board.frequency_of(high_e) - 329.63).abs() < 1e-3);
        assert_eq!(board.note_of(high_e), PitchClass::E);

        let low_e_octave = board.position(5, 12).unwrap();
        assert!((board.frequency_of(low_e_octave) - 164.82).abs() < 1e-2);
        assert_eq!(board.note_of(low_e_octave), PitchClass::E);
    }

    #[test]
    fn note_from_frequency_rounds_to_nearest() {
        assert_eq!(note_from_frequency(440.0), Some(PitchClass::A));
        assert_eq!(note_from_frequency(261.63), Some(PitchClass::C));
        assert_eq!(note_from_frequency(452.0), Some(PitchClass::A));
        assert_eq!(note_from_frequency(27.5), Some(PitchClass::A));
        assert_eq!(note_from_frequency(0.0), None);
        assert_eq!(note_from_frequency(-10.0), None);
    }

    #[test]
    fn note_of_agrees_with_frequency_lookup() {
        let board = Fretboard::default();
        for position in board.positions() {
            let by_frequency = note_from_frequency(board.frequency_of(position));
            assert_eq!(by_frequency, Some(board.note_of(position)), "{position}");
        }
    }

    #[test]
    fn out_of_range_positions_are_rejected() {
        let board = Fretboard::default();
        assert_eq!(
            board.position(6, 0),
            Err(PositionError::RangeViolation { string: 6, fret: 0 })
        );
        assert!(board.position(0, 16).is_err());
        assert!(board.position(5, 15).is_ok());
    }

    #[test]
    #[should_panic(expected = "position out of range")]
    fn unchecked_access_fails_loudly() {
        let board = Fretboard::default();
        board.frequency_of(FretPosition { string: 2, fret: 40 });
    }

    #[test]
    fn parses_sharp_and_flat_spellings() {
        assert_eq!("C".parse::<PitchClass>(), Ok(PitchClass::C));
        assert_eq!("Bb".parse::<PitchClass>(), "A#".parse::<PitchClass>());
        assert!("H".parse::<PitchClass>().is_err());
    }

    #[test]
    fn positions_near_matches_unison_across_strings() {
        let board = Fretboard::default();
        // A2 at 110 Hz sits on the open A string and the low E string's 5th fret.
        let matches = board.positions_near(110.0, 0.03);
        assert!(matches.contains(&FretPosition { string: 4, fret: 0 }));
        assert!(matches.contains(&FretPosition { string: 5, fret: 5 }));
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn positions_of_finds_every_fret_of_a_note() {
        let board = Fretboard::default();
        let a_positions = board.positions_of(PitchClass::A);
        assert!(a_positions.contains(&FretPosition { string: 0, fret: 5 }));
        assert!(a_positions.contains(&FretPosition { string: 4, fret: 0 }));
        assert!(a_positions.contains(&FretPosition { string: 4, fret: 12 }));
        for position in &a_positions {
            assert_eq!(board.note_of(*position), PitchClass::A);
        }
    }

    #[test]
    fn cents_deviation_sign() {
        assert!(calculate_cents_deviation(445.0, 440.0) > 0.0);
        assert!(calculate_cents_deviation(435.0, 440.0) < 0.0);
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-3);
    }
}
