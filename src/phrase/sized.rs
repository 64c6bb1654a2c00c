//! Beat-range-bounded phrases.
//!
//! A `SizedPhrase` is a `Phrase` with a fixed declared beat range and time
//! signature. Admission requires every note's full span to fit the range,
//! and the range itself (not the notes' extent) answers span queries. The
//! bounds live inside the wrapped `Phrase`, so code holding the phrase
//! through `Deref`/`DerefMut` (the grid, the adapters) cannot bypass them.

#[cfg(test)]
use super::note_event::NoteEvent;
use super::phrase::Phrase;
use super::{BeatRange, PhraseError};
use crate::timesig::TimeSignature;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// The declared extent of a sized phrase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhraseBounds {
    /// Declared beat range; every note span must fit inside it.
    pub range: BeatRange,
    /// Time signature governing the range.
    pub time_signature: TimeSignature,
}

/// A phrase bounded by a fixed beat range and time signature.
#[derive(Debug, Clone)]
pub struct SizedPhrase {
    phrase: Phrase,
}

impl SizedPhrase {
    /// Creates an empty sized phrase.
    pub fn new(channel: u8, drums: bool, range: BeatRange, time_signature: TimeSignature) -> Self {
        Self {
            phrase: Phrase::with_bounds(
                channel,
                drums,
                PhraseBounds {
                    range,
                    time_signature,
                },
            ),
        }
    }

    /// Wraps a phrase that already carries bounds (persistence path).
    pub(crate) fn from_phrase(phrase: Phrase) -> Self {
        debug_assert!(phrase.bounds().is_some());
        Self { phrase }
    }

    /// The declared beat range, independent of the notes currently stored.
    pub fn beat_range(&self) -> BeatRange {
        self.bounds().range
    }

    /// The declared time signature.
    pub fn time_signature(&self) -> TimeSignature {
        self.bounds().time_signature
    }

    /// Compares the notes of two equally-sized phrases with the
    /// near-equality tolerance `window`.
    ///
    /// # Errors
    ///
    /// Fails if the phrases differ in declared range or time signature;
    /// comparing phrases of different sizes is a contract violation, not a
    /// `false`.
    pub fn matches(&self, other: &SizedPhrase, window: f64) -> Result<bool, PhraseError> {
        if self.beat_range() != other.beat_range() {
            return Err(PhraseError::SizeMismatch("beat range"));
        }
        if self.time_signature() != other.time_signature() {
            return Err(PhraseError::SizeMismatch("time signature"));
        }
        if self.len() != other.len() {
            return Ok(false);
        }
        Ok(self
            .notes()
            .zip(other.notes())
            .all(|(a, b)| a.is_near(b, window)))
    }

    /// Consumes the wrapper, yielding the underlying (still bounded) phrase.
    pub fn into_phrase(self) -> Phrase {
        self.phrase
    }

    fn bounds(&self) -> &PhraseBounds {
        self.phrase
            .bounds()
            .expect("sized phrase always carries bounds")
    }
}

impl Deref for SizedPhrase {
    type Target = Phrase;

    fn deref(&self) -> &Phrase {
        &self.phrase
    }
}

impl DerefMut for SizedPhrase {
    fn deref_mut(&mut self) -> &mut Phrase {
        &mut self.phrase
    }
}
