//! Phrase data structures: timed note events and their ordered containers.
//!
//! This module provides the core types for representing musical phrases:
//! immutable note events with stable identity, the position-sorted `Phrase`
//! container with transactional mutation, typed edits for undo/redo, and
//! the beat-range-bounded `SizedPhrase` variant.

mod edit;
mod note_event;
#[allow(clippy::module_inception)]
mod phrase;
mod sized;

pub use edit::{EditStack, PhraseChange, PhraseEdit};
pub use note_event::{Accidental, EventId, NoteEvent, NoteUpdate, Properties};
pub use phrase::Phrase;
pub use sized::{PhraseBounds, SizedPhrase};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by phrase construction and mutation.
///
/// All of these are programming-contract violations: the failed call leaves
/// the phrase completely unchanged, and there is nothing to retry.
#[derive(Debug, Error)]
pub enum PhraseError {
    /// A note position was negative or not a finite number.
    #[error("note position must be finite and >= 0, got {0}")]
    InvalidPosition(f64),

    /// A note duration was zero, negative, or not a finite number.
    #[error("note duration must be finite and > 0, got {0}")]
    InvalidDuration(f64),

    /// A batch operation referenced a note that is not in the phrase.
    #[error("note {0:?} is not present in the phrase")]
    MissingNote(EventId),

    /// A note with this id is already stored (or duplicated within a batch).
    #[error("note {0:?} is already present in the phrase")]
    DuplicateNote(EventId),

    /// A note was refused by the phrase's admission check.
    #[error("note at position {position} (end {end}) is outside the phrase range")]
    OutOfRange { position: f64, end: f64 },

    /// A beat range had `from > to` or a negative start.
    #[error("invalid beat range [{from}, {to})")]
    InvalidRange { from: f64, to: f64 },

    /// A shift would force a position (or a declared range start) negative.
    #[error("shift by {offset} would move positions below zero")]
    ShiftBelowZero { offset: f64 },

    /// A cyclic position entry violated `0 <= position < cycle_size`.
    #[error("cyclic position {position} is outside cycle of size {cycle}")]
    InvalidCycle { position: f64, cycle: f64 },

    /// Two sized phrases with different ranges or time signatures were compared.
    #[error("sized phrases differ in {0}")]
    SizeMismatch(&'static str),

    /// An edit could not be reverted or reapplied against the current state.
    #[error("edit does not apply to the current phrase state: {0}")]
    StaleEdit(&'static str),
}

/// A half-open range of beat positions `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatRange {
    /// Start position in beats (inclusive).
    pub from: f64,
    /// End position in beats (exclusive).
    pub to: f64,
}

impl BeatRange {
    /// Creates a beat range, validating `0 <= from <= to`.
    pub fn new(from: f64, to: f64) -> Result<Self, PhraseError> {
        if !from.is_finite() || !to.is_finite() || from < 0.0 || from > to {
            return Err(PhraseError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Range length in beats.
    pub fn len(&self) -> f64 {
        self.to - self.from
    }

    /// Returns true if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    /// Returns true if `pos` lies inside `[from, to)`.
    pub fn contains(&self, pos: f64) -> bool {
        pos >= self.from && pos < self.to
    }

    /// Returns true if the whole span `[start, end)` lies inside the range.
    ///
    /// The span end may touch `to` exactly: a note ending on the boundary
    /// still fits.
    pub fn contains_span(&self, start: f64, end: f64) -> bool {
        start >= self.from && end <= self.to
    }

    /// Returns the range translated by `offset` beats.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            from: self.from + offset,
            to: self.to + offset,
        }
    }
}

/// Clamps a value to the valid MIDI data range 0-127.
#[inline]
pub fn clamp_midi_data(value: u8) -> u8 {
    value.min(127)
}

/// Clamps a value to the valid MIDI channel range 0-15.
#[inline]
pub fn clamp_channel(channel: u8) -> u8 {
    channel.min(15)
}

/// Clamps a velocity to the audible range 1-127.
///
/// Used when a transformation could push a velocity to zero, which MIDI
/// treats as a note-off.
#[inline]
pub fn clamp_audible_velocity(velocity: i32) -> u8 {
    velocity.clamp(1, 127) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_range_validation() {
        assert!(BeatRange::new(0.0, 4.0).is_ok());
        assert!(BeatRange::new(2.0, 2.0).is_ok());
        assert!(BeatRange::new(4.0, 2.0).is_err());
        assert!(BeatRange::new(-1.0, 2.0).is_err());
        assert!(BeatRange::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_beat_range_containment() {
        let range = BeatRange::new(1.0, 5.0).unwrap();
        assert!(range.contains(1.0));
        assert!(range.contains(4.999));
        assert!(!range.contains(5.0));
        assert!(!range.contains(0.5));

        // Span may touch the exclusive end exactly.
        assert!(range.contains_span(4.0, 5.0));
        assert!(!range.contains_span(4.5, 5.5));
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_midi_data(200), 127);
        assert_eq!(clamp_channel(99), 15);
        assert_eq!(clamp_audible_velocity(0), 1);
        assert_eq!(clamp_audible_velocity(-5), 1);
        assert_eq!(clamp_audible_velocity(300), 127);
    }
}
