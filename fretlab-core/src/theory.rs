//! # Theory Mapper
//!
//! Turns a root note plus a scale or chord pattern into every fretboard
//! position that realizes it, labelled with its interval from the root.
//!
//! The result is always recomputed in full (strings × frets) on every
//! configuration change. An unknown root or pattern name yields an empty list,
//! which callers treat as "no guidance".

use serde::Serialize;

use crate::tuning::{FretPosition, Fretboard, PitchClass};

/// Interval labels keyed by semitone distance from the root.
pub const INTERVAL_LABELS: [&str; 12] = [
    "R", "b2", "2", "b3", "3", "4", "#4", "5", "b6", "6", "b7", "7",
];

/// Scale formulas as semitone offsets from the root.
pub const SCALES: &[(&str, &[u8])] = &[
    ("Major (Ionian)", &[0, 2, 4, 5, 7, 9, 11]),
    ("Natural Minor", &[0, 2, 3, 5, 7, 8, 10]),
    ("Major Pentatonic", &[0, 2, 4, 7, 9]),
    ("Minor Pentatonic", &[0, 3, 5, 7, 10]),
    ("Blues Scale", &[0, 3, 5, 6, 7, 10]),
    ("Dorian", &[0, 2, 3, 5, 7, 9, 10]),
    ("Mixolydian", &[0, 2, 4, 5, 7, 9, 10]),
    ("Harmonic Minor", &[0, 2, 3, 5, 7, 8, 11]),
];

/// Chord formulas. Offsets may exceed 11 (e.g. the added ninth, 14).
pub const CHORDS: &[(&str, &[u8])] = &[
    ("Major Triad", &[0, 4, 7]),
    ("Minor Triad", &[0, 3, 7]),
    ("Diminished", &[0, 3, 6]),
    ("Augmented", &[0, 4, 8]),
    ("Major 7th (Maj7)", &[0, 4, 7, 11]),
    ("Minor 7th (m7)", &[0, 3, 7, 10]),
    ("Dominant 7th (7)", &[0, 4, 7, 10]),
    ("Minor 7th b5 (m7b5)", &[0, 3, 6, 10]),
    ("Suspended 4th (sus4)", &[0, 5, 7]),
    ("Add 9", &[0, 4, 7, 14]),
];

/// Which catalogue a pattern name is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PatternKind {
    #[default]
    Scale,
    Chord,
}

impl PatternKind {
    pub fn catalogue(self) -> &'static [(&'static str, &'static [u8])] {
        match self {
            PatternKind::Scale => SCALES,
            PatternKind::Chord => CHORDS,
        }
    }
}

/// Looks up a named pattern's offsets.
pub fn pattern_offsets(name: &str, kind: PatternKind) -> Option<&'static [u8]> {
    kind.catalogue()
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, offsets)| *offsets)
}

/// A highlighted fretboard position for the current theory selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuidePosition {
    pub position: FretPosition,
    pub note: PitchClass,
    pub interval_label: &'static str,
    pub is_root: bool,
}

/// Maps a named root and pattern onto the fretboard.
///
/// # Arguments
/// * `board` - Fretboard to scan
/// * `root` - Root note name (e.g. "C", "F#", "Bb")
/// * `pattern` - Scale or chord name from [`SCALES`] / [`CHORDS`]
/// * `kind` - Which catalogue `pattern` belongs to
///
/// # Returns
/// * Guide positions in string-major, fret-ascending order; empty when the
///   root or the pattern is unknown
pub fn map(
    board: &Fretboard,
    root: &str,
    pattern: &str,
    kind: PatternKind,
) -> Vec<GuidePosition> {
    let parsed_root = root.parse::<PitchClass>();
    let (Ok(root), Some(offsets)) = (parsed_root, pattern_offsets(pattern, kind)) else {
        log::debug!("no guide positions for {root:?} / {pattern:?} ({kind:?})");
        return Vec::new();
    };
    map_offsets(board, root, offsets)
}

/// Maps a root and raw semitone offsets onto the fretboard.
pub fn map_offsets(board: &Fretboard, root: PitchClass, offsets: &[u8]) -> Vec<GuidePosition> {
    let mut targets = [false; 12];
    for &offset in offsets {
        targets[root.transpose(offset as i32).index() as usize] = true;
    }

    board
        .positions()
        .filter_map(|position| {
            let note = board.note_of(position);
            if !targets[note.index() as usize] {
                return None;
            }
            let distance = note.interval_from(root);
            Some(GuidePosition {
                position,
                note,
                interval_label: INTERVAL_LABELS[distance as usize],
                is_root: distance == 0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_major_covers_every_natural_note() {
        let board = Fretboard::default();
        let guide = map(&board, "C", "Major (Ionian)", PatternKind::Scale);

        let naturals = [
            PitchClass::C,
            PitchClass::D,
            PitchClass::E,
            PitchClass::F,
            PitchClass::G,
            PitchClass::A,
            PitchClass::B,
        ];
        let expected: Vec<_> = board
            .positions()
            .filter(|&p| naturals.contains(&board.note_of(p)))
            .collect();
        let actual: Vec<_> = guide.iter().map(|g| g.position).collect();
        assert_eq!(actual, expected);

        for g in &guide {
            assert_eq!(g.is_root, g.note == PitchClass::C);
            assert_eq!(g.is_root, g.interval_label == "R");
        }
    }

    #[test]
    fn output_is_string_major_fret_ascending() {
        let board = Fretboard::default();
        let guide = map(&board, "A", "Minor Pentatonic", PatternKind::Scale);
        let positions: Vec<_> = guide.iter().map(|g| g.position).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn added_ninth_collapses_to_pitch_class_two() {
        let board = Fretboard::default();
        let with_ninth = map_offsets(&board, PitchClass::C, &[0, 4, 7, 14]);
        let with_second = map_offsets(&board, PitchClass::C, &[0, 2, 4, 7]);
        assert_eq!(with_ninth, with_second);
        assert!(with_ninth.iter().any(|g| g.note == PitchClass::D && g.interval_label == "2"));
    }

    #[test]
    fn intervals_are_measured_from_the_root() {
        let board = Fretboard::default();
        let guide = map(&board, "G", "Dominant 7th (7)", PatternKind::Chord);
        let label_of = |class: PitchClass| {
            guide.iter().find(|g| g.note == class).map(|g| g.interval_label)
        };
        assert_eq!(label_of(PitchClass::G), Some("R"));
        assert_eq!(label_of(PitchClass::B), Some("3"));
        assert_eq!(label_of(PitchClass::D), Some("5"));
        assert_eq!(label_of(PitchClass::F), Some("b7"));
        assert_eq!(label_of(PitchClass::C), None);
    }

    #[test]
    fn unknown_names_yield_no_guidance() {
        let board = Fretboard::default();
        assert!(map(&board, "X#", "Major (Ionian)", PatternKind::Scale).is_empty());
        assert!(map(&board, "C", "Lydian Dominant", PatternKind::Scale).is_empty());
        // A chord name looked up in the scale table is unknown too.
        assert!(map(&board, "C", "Major Triad", PatternKind::Scale).is_empty());
    }
}
