//! Timed note event representation.
//!
//! A `NoteEvent` is a pitch/velocity/duration value placed at a beat
//! position, with a stable integer identity and a client-property
//! side-table. Musical attributes are immutable: "mutation" means deriving
//! a new event (with a fresh id) and replacing the old one in its phrase.

use super::{clamp_midi_data, PhraseError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{self, AtomicU64};

/// Global counter for generating unique event IDs.
/// Using atomic for thread-safety in case of parallel operations.
static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a note event.
///
/// Identity equality of `NoteEvent` is defined over this id: two distinct
/// events are never equal, even with identical musical attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    /// Smallest possible id, used as the lower bound when slicing the
    /// position-ordered index. Never minted.
    pub(crate) const MIN: EventId = EventId(0);

    /// Generates a new unique event ID.
    ///
    /// Thread-safe: uses atomic increment internally.
    pub fn new() -> Self {
        Self(EVENT_ID_COUNTER.fetch_add(1, atomic::Ordering::Relaxed))
    }

    /// Returns the raw ID value (for serialization/debugging).
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Preferred spelling of a pitch when it falls on a black key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Accidental {
    /// Spell as a flat (e.g. Eb). The default.
    #[default]
    Flat,
    /// Spell as a sharp (e.g. D#).
    Sharp,
}

/// Client-property side-table attached to each note event.
///
/// Keys are caller-defined; values are arbitrary JSON values. The table is
/// the only mutable part of a stored note.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A field-override set for deriving a new note event from an existing one.
///
/// `None` fields keep the source event's value. `copy_properties` controls
/// whether the derived event inherits the source's client-property table
/// or starts with an empty one.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub pitch: Option<u8>,
    pub duration: Option<f64>,
    pub velocity: Option<u8>,
    pub position: Option<f64>,
    pub accidental: Option<Accidental>,
    pub copy_properties: bool,
}

/// A single timed note with identity semantics.
///
/// The id is process-local and regenerated on deserialization; persisted
/// notes are value-equal, not identity-equal, to their originals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEvent {
    #[serde(skip)]
    id: EventId,
    pitch: u8,
    velocity: u8,
    duration: f64,
    position: f64,
    accidental: Accidental,
    properties: Properties,
}

impl NoteEvent {
    /// Creates a new note event with a fresh id.
    ///
    /// # Arguments
    ///
    /// * `pitch` - MIDI note number, clamped to 0-127
    /// * `duration` - Length in beats, must be finite and > 0
    /// * `velocity` - MIDI velocity, clamped to 0-127
    /// * `position` - Start position in beats, must be finite and >= 0
    ///
    /// # Errors
    ///
    /// Fails on a negative/non-finite position or non-positive duration.
    pub fn new(pitch: u8, duration: f64, velocity: u8, position: f64) -> Result<Self, PhraseError> {
        if !position.is_finite() || position < 0.0 {
            return Err(PhraseError::InvalidPosition(position));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(PhraseError::InvalidDuration(duration));
        }
        Ok(Self {
            id: EventId::new(),
            pitch: clamp_midi_data(pitch),
            velocity: clamp_midi_data(velocity),
            duration,
            position,
            accidental: Accidental::default(),
            properties: Properties::new(),
        })
    }

    /// Derives a new event (fresh id) with selected fields overridden.
    ///
    /// # Errors
    ///
    /// Fails if an overridden position or duration is invalid.
    pub fn apply(&self, update: &NoteUpdate) -> Result<Self, PhraseError> {
        let position = update.position.unwrap_or(self.position);
        let duration = update.duration.unwrap_or(self.duration);
        if !position.is_finite() || position < 0.0 {
            return Err(PhraseError::InvalidPosition(position));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(PhraseError::InvalidDuration(duration));
        }
        Ok(Self {
            id: EventId::new(),
            pitch: clamp_midi_data(update.pitch.unwrap_or(self.pitch)),
            velocity: clamp_midi_data(update.velocity.unwrap_or(self.velocity)),
            duration,
            position,
            accidental: update.accidental.unwrap_or(self.accidental),
            properties: if update.copy_properties {
                self.properties.clone()
            } else {
                Properties::new()
            },
        })
    }

    /// Derives a copy with a different pitch, keeping client properties.
    pub fn with_pitch(&self, pitch: u8) -> Self {
        self.apply(&NoteUpdate {
            pitch: Some(pitch),
            copy_properties: true,
            ..NoteUpdate::default()
        })
        .expect("pitch override cannot invalidate position or duration")
    }

    /// Derives a copy with a different duration, keeping client properties.
    pub fn with_duration(&self, duration: f64) -> Result<Self, PhraseError> {
        self.apply(&NoteUpdate {
            duration: Some(duration),
            copy_properties: true,
            ..NoteUpdate::default()
        })
    }

    /// Derives a copy with a different velocity, keeping client properties.
    pub fn with_velocity(&self, velocity: u8) -> Self {
        self.apply(&NoteUpdate {
            velocity: Some(velocity),
            copy_properties: true,
            ..NoteUpdate::default()
        })
        .expect("velocity override cannot invalidate position or duration")
    }

    /// Derives a copy at a different position, keeping client properties.
    pub fn with_position(&self, position: f64) -> Result<Self, PhraseError> {
        self.apply(&NoteUpdate {
            position: Some(position),
            copy_properties: true,
            ..NoteUpdate::default()
        })
    }

    /// Derives a copy with a different accidental, keeping client properties.
    pub fn with_accidental(&self, accidental: Accidental) -> Self {
        self.apply(&NoteUpdate {
            accidental: Some(accidental),
            copy_properties: true,
            ..NoteUpdate::default()
        })
        .expect("accidental override cannot invalidate position or duration")
    }

    /// Unique identity of this event.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// MIDI note number (0-127).
    pub fn pitch(&self) -> u8 {
        self.pitch
    }

    /// MIDI velocity (0-127).
    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// Length in beats.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Start position in beats.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Preferred accidental spelling.
    pub fn accidental(&self) -> Accidental {
        self.accidental
    }

    /// End position of this note (position + duration).
    pub fn end_position(&self) -> f64 {
        self.position + self.duration
    }

    /// Returns true if the note is sounding at `pos` (start inclusive,
    /// end exclusive).
    pub fn is_sounding_at(&self, pos: f64) -> bool {
        pos >= self.position && pos < self.end_position()
    }

    /// Looks up a client property.
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// Sets a client property, returning the previous value if any.
    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.properties.insert(key.into(), value)
    }

    /// Removes a client property.
    pub fn remove_property(&mut self, key: &str) -> Option<serde_json::Value> {
        self.properties.remove(key)
    }

    /// The full client-property table.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Mutable access to the client-property table.
    pub(crate) fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Total storage order: position, then pitch, velocity, duration, then
    /// id as the final tie-break.
    ///
    /// Never returns `Equal` for two distinct events, so an ordered
    /// container keyed by this comparison cannot silently merge two notes
    /// that share all musical attributes.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.position
            .total_cmp(&other.position)
            .then_with(|| self.pitch.cmp(&other.pitch))
            .then_with(|| self.velocity.cmp(&other.velocity))
            .then_with(|| self.duration.total_cmp(&other.duration))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Near-equality on musical attributes, ignoring identity.
    ///
    /// Positions must agree within `±window`, durations within `±2·window`;
    /// pitch and velocity must match exactly. With `window == 0` this is an
    /// exact attribute comparison.
    pub fn is_near(&self, other: &Self, window: f64) -> bool {
        self.pitch == other.pitch
            && self.velocity == other.velocity
            && (self.position - other.position).abs() <= window
            && (self.duration - other.duration).abs() <= 2.0 * window
    }
}

impl PartialEq for NoteEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NoteEvent {}

impl std::hash::Hash for NoteEvent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_and_clamping() {
        let note = NoteEvent::new(200, 1.0, 200, 0.0).unwrap();
        assert_eq!(note.pitch(), 127);
        assert_eq!(note.velocity(), 127);
        assert_eq!(note.accidental(), Accidental::Flat);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(NoteEvent::new(60, 1.0, 100, -0.5).is_err());
        assert!(NoteEvent::new(60, 0.0, 100, 0.0).is_err());
        assert!(NoteEvent::new(60, -1.0, 100, 0.0).is_err());
        assert!(NoteEvent::new(60, 1.0, 100, f64::NAN).is_err());
    }

    #[test]
    fn test_identity_semantics() {
        let a = NoteEvent::new(60, 1.0, 100, 0.0).unwrap();
        let b = NoteEvent::new(60, 1.0, 100, 0.0).unwrap();
        assert_ne!(a, b, "distinct events are never equal");
        assert_eq!(a, a.clone(), "a clone keeps its identity");
        assert!(a.is_near(&b, 0.0), "but they are value-equal");
    }

    #[test]
    fn test_apply_mints_fresh_id() {
        let a = NoteEvent::new(60, 1.0, 100, 0.0).unwrap();
        let b = a.with_position(2.0).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(b.position(), 2.0);
        assert_eq!(b.pitch(), 60);
    }

    #[test]
    fn test_with_wrappers_copy_properties() {
        let mut a = NoteEvent::new(60, 1.0, 100, 0.0).unwrap();
        a.set_property("fingering", serde_json::json!(2));

        let b = a.with_velocity(80);
        assert_eq!(b.property("fingering"), Some(&serde_json::json!(2)));

        let c = a
            .apply(&NoteUpdate {
                velocity: Some(80),
                copy_properties: false,
                ..NoteUpdate::default()
            })
            .unwrap();
        assert!(c.property("fingering").is_none());
    }

    #[test]
    fn test_ordering_tie_break() {
        let a = NoteEvent::new(60, 1.0, 100, 1.0).unwrap();
        let b = NoteEvent::new(60, 1.0, 100, 1.0).unwrap();
        // Identical attributes: the id tie-break keeps them distinct.
        assert_ne!(a.cmp_order(&b), Ordering::Equal);
        assert_eq!(a.cmp_order(&b), b.cmp_order(&a).reverse());

        let later = NoteEvent::new(30, 1.0, 1, 2.0).unwrap();
        assert_eq!(a.cmp_order(&later), Ordering::Less);
    }

    #[test]
    fn test_near_equality_windows() {
        let a = NoteEvent::new(60, 1.0, 100, 1.0).unwrap();
        let b = NoteEvent::new(60, 1.15, 100, 1.05).unwrap();
        assert!(a.is_near(&b, 0.1));
        assert!(!a.is_near(&b, 0.01));

        let c = NoteEvent::new(61, 1.0, 100, 1.0).unwrap();
        assert!(!a.is_near(&c, 0.1), "pitch must match exactly");
    }

    #[test]
    fn test_sounding_at() {
        let note = NoteEvent::new(60, 0.5, 100, 1.0).unwrap();
        assert!(!note.is_sounding_at(0.99));
        assert!(note.is_sounding_at(1.0));
        assert!(note.is_sounding_at(1.49));
        assert!(!note.is_sounding_at(1.5));
    }

    #[test]
    fn test_serde_round_trip_remints_id() {
        let a = NoteEvent::new(60, 1.0, 100, 1.5).unwrap();
        let json = serde_json::to_string(&a).unwrap();
        let b: NoteEvent = serde_json::from_str(&json).unwrap();
        assert!(a.is_near(&b, 0.0));
        assert_ne!(a.id(), b.id());
    }
}
