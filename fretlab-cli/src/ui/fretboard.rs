//! # Fretboard Diagram
//!
//! Text rendering of the neck, one row per string with the high string on
//! top. Guide positions show their interval label; a selected position is
//! marked on top of that.

use fretlab_core::{FretPosition, Fretboard, GuidePosition};

/// Characters per fret cell.
const CELL_WIDTH: usize = 4;

/// Frets that carry an inlay dot on a real neck.
const INLAY_FRETS: [usize; 5] = [3, 5, 7, 9, 12];

pub struct FretboardDiagram<'a> {
    board: &'a Fretboard,
    guide: &'a [GuidePosition],
    /// Position the user just picked, if any
    selected: Option<FretPosition>,
}

impl<'a> FretboardDiagram<'a> {
    pub fn new(board: &'a Fretboard, guide: &'a [GuidePosition]) -> Self {
        Self {
            board,
            guide,
            selected: None,
        }
    }

    pub fn with_selected(mut self, selected: Option<FretPosition>) -> Self {
        self.selected = selected;
        self
    }

    fn cell(&self, position: FretPosition) -> String {
        if self.selected == Some(position) {
            return "@".to_string();
        }
        match self.guide.iter().find(|g| g.position == position) {
            Some(g) if g.is_root => "(R)".to_string(),
            Some(g) => g.interval_label.to_string(),
            None => String::new(),
        }
    }

    pub fn render(&self) -> String {
        let frets = self.board.fret_count();
        let mut out = String::new();

        // Fret numbers
        out.push_str("    ");
        for fret in 0..=frets {
            out.push_str(&format!("{fret:^CELL_WIDTH$}"));
        }
        out.push('\n');

        for string in 0..self.board.string_count() {
            let open = self.board.tuning().strings[string].pitch_class;
            out.push_str(&format!("{:>2} |", open.name()));
            for fret in 0..=frets {
                let cell = self.cell(FretPosition { string, fret });
                let fill = if cell.is_empty() { "-" } else { cell.as_str() };
                if fill == "-" {
                    out.push_str(&"-".repeat(CELL_WIDTH - 1));
                } else {
                    out.push_str(&format!("{fill:-^w$}", w = CELL_WIDTH - 1));
                }
                out.push(if fret == 0 { '‖' } else { '|' });
            }
            out.push('\n');
        }

        // Inlay row
        out.push_str("    ");
        for fret in 0..=frets {
            let mark = match fret {
                f if f > 0 && f % 12 == 0 => ":",
                f if INLAY_FRETS.contains(&(f % 12)) && f > 0 => ".",
                _ => " ",
            };
            out.push_str(&format!("{mark:^CELL_WIDTH$}"));
        }
        out.push('\n');
        out
    }
}
