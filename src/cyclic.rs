//! Matching of positions that recur modulo cycle periods.
//!
//! `CyclicPositions` answers questions like "is this position beat 1.5 of
//! some bar" without enumerating bars: each entry describes a position that
//! repeats every `cycle_size` beats, optionally offset from zero.

use crate::phrase::PhraseError;
use serde::{Deserialize, Serialize};

/// One recurring position: `position` beats into every cycle of
/// `cycle_size` beats, with cycles starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CyclicPosition {
    /// Position within the cycle; must satisfy `0 <= position < cycle_size`.
    pub position: f64,
    /// Beat at which the first cycle starts.
    pub offset: f64,
    /// Cycle period in beats.
    pub cycle_size: f64,
}

/// An immutable set of recurring positions with OR-match semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclicPositions {
    entries: Vec<CyclicPosition>,
}

impl CyclicPositions {
    /// Creates a matcher from recurring-position entries.
    ///
    /// # Errors
    ///
    /// Fails if any entry violates `0 <= position < cycle_size`.
    pub fn new(entries: Vec<CyclicPosition>) -> Result<Self, PhraseError> {
        for entry in &entries {
            if !entry.cycle_size.is_finite()
                || entry.cycle_size <= 0.0
                || !entry.position.is_finite()
                || entry.position < 0.0
                || entry.position >= entry.cycle_size
            {
                return Err(PhraseError::InvalidCycle {
                    position: entry.position,
                    cycle: entry.cycle_size,
                });
            }
        }
        Ok(Self { entries })
    }

    /// Convenience constructor for one recurring position per bar:
    /// "`position` of every `cycle_size`-beat cycle starting at 0".
    pub fn every(position: f64, cycle_size: f64) -> Result<Self, PhraseError> {
        Self::new(vec![CyclicPosition {
            position,
            offset: 0.0,
            cycle_size,
        }])
    }

    /// The configured entries.
    pub fn entries(&self) -> &[CyclicPosition] {
        &self.entries
    }

    /// Tests whether `pos` matches any entry.
    ///
    /// For each entry the cycle containing `pos` is located; positions
    /// before the entry's offset never match. Within the cycle, the
    /// in-cycle position must fall in `[position - near_window,
    /// position + near_window)`; a zero window demands exact equality.
    pub fn matches(&self, pos: f64, near_window: f64) -> bool {
        self.entries.iter().any(|entry| {
            let cycle_index = ((pos - entry.offset) / entry.cycle_size).floor();
            if cycle_index < 0.0 {
                return false;
            }
            let in_cycle = (pos - entry.offset) - entry.cycle_size * cycle_index;
            if near_window == 0.0 {
                in_cycle == entry.position
            } else {
                in_cycle >= entry.position - near_window && in_cycle < entry.position + near_window
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(CyclicPositions::every(1.5, 4.0).is_ok());
        assert!(CyclicPositions::every(4.0, 4.0).is_err(), "position must be < cycle");
        assert!(CyclicPositions::every(-0.5, 4.0).is_err());
        assert!(CyclicPositions::every(0.0, 0.0).is_err());
    }

    #[test]
    fn test_exact_match_every_bar() {
        // Beat 1.5 of every 4-beat bar.
        let positions = CyclicPositions::every(1.5, 4.0).unwrap();
        assert!(positions.matches(1.5, 0.0));
        assert!(positions.matches(5.5, 0.0));
        assert!(positions.matches(41.5, 0.0));
        assert!(!positions.matches(2.5, 0.0));
        assert!(!positions.matches(1.501, 0.0));
    }

    #[test]
    fn test_near_window() {
        let positions = CyclicPositions::every(2.0, 4.0).unwrap();
        assert!(positions.matches(1.95, 0.1));
        assert!(positions.matches(6.05, 0.1));
        // Window is half-open on the high side.
        assert!(!positions.matches(2.1, 0.1));
        assert!(positions.matches(1.9, 0.1));
    }

    #[test]
    fn test_offset_skips_earlier_positions() {
        let positions = CyclicPositions::new(vec![CyclicPosition {
            position: 0.0,
            offset: 8.0,
            cycle_size: 4.0,
        }])
        .unwrap();
        assert!(!positions.matches(0.0, 0.0), "before the offset: no cycles yet");
        assert!(!positions.matches(4.0, 0.0));
        assert!(positions.matches(8.0, 0.0));
        assert!(positions.matches(16.0, 0.0));
    }

    #[test]
    fn test_or_semantics_across_entries() {
        let positions = CyclicPositions::new(vec![
            CyclicPosition {
                position: 0.0,
                offset: 0.0,
                cycle_size: 4.0,
            },
            CyclicPosition {
                position: 3.0,
                offset: 0.0,
                cycle_size: 4.0,
            },
        ])
        .unwrap();
        assert!(positions.matches(4.0, 0.0));
        assert!(positions.matches(7.0, 0.0));
        assert!(!positions.matches(5.0, 0.0));
    }
}
