//! # Cent Meter
//!
//! A one-line text meter for intonation. The needle sits on a scale from
//! -50 to +50 cents and its glyph marks the accuracy zone.

/// Maximum cent deviation range for the meter display.
/// The meter shows deviations from -50 to +50 cents.
const METER_RANGE: f32 = 50.0;

/// Accuracy zone of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    InTune,
    Close,
    Off,
}

impl Zone {
    pub fn of(cents: f32) -> Self {
        if cents.abs() < 5.0 {
            Zone::InTune
        } else if cents.abs() < 20.0 {
            Zone::Close
        } else {
            Zone::Off
        }
    }

    fn needle(self) -> char {
        match self {
            Zone::InTune => '#',
            Zone::Close => '+',
            Zone::Off => '!',
        }
    }
}

pub struct CentMeter {
    /// Current cent deviation (None if no pitch detected)
    cents: Option<f32>,
}

impl CentMeter {
    pub fn new(cents: Option<f32>) -> Self {
        Self { cents }
    }

    /// Renders `[----|----]` with the needle placed across `width` cells.
    pub fn render(&self, width: usize) -> String {
        let width = width.max(3) | 1; // odd, so the centre is a single cell
        let center = width / 2;
        let mut cells = vec!['-'; width];
        cells[center] = '|';

        if let Some(c) = self.cents {
            let clamped = c.clamp(-METER_RANGE, METER_RANGE);
            let pos = ((clamped + METER_RANGE) / (2.0 * METER_RANGE) * (width - 1) as f32).round();
            cells[pos as usize] = Zone::of(c).needle();
        }

        let bar: String = cells.into_iter().collect();
        match self.cents {
            Some(c) => format!("[{bar}] {c:+5.1}c"),
            None => format!("[{bar}]   --"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needle_tracks_deviation() {
        assert_eq!(CentMeter::new(Some(0.0)).render(11), "[-----#-----]  +0.0c");
        assert_eq!(CentMeter::new(Some(-50.0)).render(11), "[!----|-----] -50.0c");
        assert!(CentMeter::new(Some(80.0)).render(11).starts_with("[-----|----!]"));
        assert!(CentMeter::new(Some(10.0)).render(11).contains('+'));
    }

    #[test]
    fn no_reading_shows_an_empty_meter() {
        assert_eq!(CentMeter::new(None).render(5), "[--|--]   --");
    }
}
