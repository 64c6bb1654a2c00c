//! phrasekit - a time-indexed musical note phrase engine.
//!
//! This library provides an ordered collection of timed note events with
//! transactional, undoable mutation (`Phrase`, `SizedPhrase`, `EditStack`),
//! a cell-based quantization index tolerant of real-time recording jitter
//! (`Grid`), recurring-position matching (`CyclicPositions`), and tempo-
//! and role-aware humanization of recorded phrases (`BassTempoAdapter`,
//! `DrumsTempoAdapter`).

pub mod adapt;
pub mod cyclic;
pub mod grid;
pub mod midi;
pub mod persist;
pub mod phrase;
pub mod timesig;

// Re-export commonly used types
pub use adapt::{
    AdaptConfig, BassTempoAdapter, DrumKitMap, DrumRole, DrumsTempoAdapter, GrooveProfile,
};
pub use cyclic::{CyclicPosition, CyclicPositions};
pub use grid::{Grid, GridError};
pub use phrase::{
    Accidental, BeatRange, EditStack, EventId, NoteEvent, NoteUpdate, Phrase, PhraseChange,
    PhraseEdit, PhraseError, SizedPhrase,
};
pub use timesig::TimeSignature;
