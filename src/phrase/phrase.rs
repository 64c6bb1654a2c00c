//! The position-sorted note container and its transactional mutation API.
//!
//! A `Phrase` is the system of record for note events. Notes live in an
//! arena keyed by their stable id; a position-ordered index keeps iteration
//! in nondecreasing position order with the id as the final tie-break, so
//! two notes sharing every musical attribute are never silently merged.
//!
//! Every structural mutation is atomic: preconditions are checked in full
//! before anything is touched, and a successful call returns exactly one
//! `PhraseEdit` describing the whole batch, the value observers consume
//! and the undo stack inverts.

use super::edit::{PhraseChange, PhraseEdit};
use super::note_event::{EventId, NoteEvent, Properties};
use super::sized::PhraseBounds;
use super::{clamp_channel, BeatRange, PhraseError};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Beat position ordered by `total_cmp`, so it can key an ordered set.
/// Positions are validated finite and non-negative at note construction.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PosKey(f64);

impl Eq for PosKey {}

impl PartialOrd for PosKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PosKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Position-ordered index entry: `(position, id)` with the id breaking ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    pos: PosKey,
    id: EventId,
}

impl OrderKey {
    fn of(note: &NoteEvent) -> Self {
        Self {
            pos: PosKey(note.position()),
            id: note.id(),
        }
    }

    fn range_start(pos: f64) -> Self {
        Self {
            pos: PosKey(pos),
            id: EventId::MIN,
        }
    }
}

/// An ordered, transactionally-mutated collection of note events.
#[derive(Debug, Clone)]
pub struct Phrase {
    channel: u8,
    drums: bool,
    arena: HashMap<EventId, NoteEvent>,
    index: BTreeSet<OrderKey>,
    bounds: Option<PhraseBounds>,
}

impl Phrase {
    /// Creates an empty phrase.
    ///
    /// # Arguments
    ///
    /// * `channel` - MIDI channel, clamped to 0-15
    /// * `drums` - whether this phrase holds percussion (channel 9 material)
    pub fn new(channel: u8, drums: bool) -> Self {
        Self {
            channel: clamp_channel(channel),
            drums,
            arena: HashMap::new(),
            index: BTreeSet::new(),
            bounds: None,
        }
    }

    /// Creates an empty phrase with admission bounds installed.
    /// Only `SizedPhrase` constructs these.
    pub(crate) fn with_bounds(channel: u8, drums: bool, bounds: PhraseBounds) -> Self {
        Self {
            channel: clamp_channel(channel),
            drums,
            arena: HashMap::new(),
            index: BTreeSet::new(),
            bounds: Some(bounds),
        }
    }

    /// MIDI channel of this phrase (0-15).
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// True if this phrase holds percussion.
    pub fn is_drums(&self) -> bool {
        self.drums
    }

    /// Number of notes stored.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True if the phrase holds no notes.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// True if a note with this id is stored.
    pub fn contains(&self, id: EventId) -> bool {
        self.arena.contains_key(&id)
    }

    /// Looks up a stored note by id.
    pub fn note(&self, id: EventId) -> Option<&NoteEvent> {
        self.arena.get(&id)
    }

    /// Mutable access to one stored note's client-property table.
    ///
    /// Musical attributes stay immutable in place; only the side-table can
    /// be edited without going through produce-new-and-replace.
    pub fn note_properties_mut(&mut self, id: EventId) -> Option<&mut Properties> {
        self.arena.get_mut(&id).map(|n| n.properties_mut())
    }

    /// Iterates notes in nondecreasing position order.
    pub fn notes(&self) -> impl Iterator<Item = &NoteEvent> {
        self.index.iter().map(|key| self.by_key(key))
    }

    /// Iterates notes in nonincreasing position order.
    pub fn notes_rev(&self) -> impl Iterator<Item = &NoteEvent> {
        self.index.iter().rev().map(|key| self.by_key(key))
    }

    /// Iterates notes whose start position lies in `[range.from, range.to)`,
    /// in position order.
    pub fn notes_in_range(&self, range: BeatRange) -> impl Iterator<Item = &NoteEvent> {
        self.index
            .range(OrderKey::range_start(range.from)..OrderKey::range_start(range.to))
            .map(|key| self.by_key(key))
    }

    /// The earliest-positioned note, if any.
    pub fn first(&self) -> Option<&NoteEvent> {
        self.index.first().map(|key| self.by_key(key))
    }

    /// The latest-positioned note, if any.
    pub fn last(&self) -> Option<&NoteEvent> {
        self.index.last().map(|key| self.by_key(key))
    }

    /// The beat span of this phrase.
    ///
    /// A bounded (sized) phrase reports its declared range regardless of
    /// contents; an unbounded phrase reports the span from the earliest
    /// note start to the latest note end, or `None` when empty.
    pub fn notes_range(&self) -> Option<BeatRange> {
        if let Some(bounds) = &self.bounds {
            return Some(bounds.range);
        }
        let from = self.first()?.position();
        let to = self
            .notes()
            .map(|n| n.end_position())
            .fold(f64::NEG_INFINITY, f64::max);
        Some(BeatRange { from, to })
    }

    /// Admission hook: whether this phrase would accept `note`.
    ///
    /// Unbounded phrases admit everything; bounded phrases require the full
    /// note span `[position, position + duration)` inside the declared
    /// range.
    pub fn can_add(&self, note: &NoteEvent) -> bool {
        match &self.bounds {
            None => true,
            Some(bounds) => bounds
                .range
                .contains_span(note.position(), note.end_position()),
        }
    }

    /// Declared bounds, present only on sized phrases.
    pub(crate) fn bounds(&self) -> Option<&PhraseBounds> {
        self.bounds.as_ref()
    }

    /// Adds one note. Convenience over [`Phrase::add_all`].
    pub fn add(&mut self, note: NoteEvent, adjusting: bool) -> Result<PhraseEdit, PhraseError> {
        self.add_all(vec![note], adjusting)
    }

    /// Adds a batch of notes atomically.
    ///
    /// # Errors
    ///
    /// Fails without mutating if any note is refused by admission, is
    /// already stored, or appears twice in the batch.
    pub fn add_all(
        &mut self,
        notes: Vec<NoteEvent>,
        adjusting: bool,
    ) -> Result<PhraseEdit, PhraseError> {
        let mut seen = HashSet::with_capacity(notes.len());
        for note in &notes {
            if self.arena.contains_key(&note.id()) || !seen.insert(note.id()) {
                return Err(PhraseError::DuplicateNote(note.id()));
            }
            if !self.can_add(note) {
                return Err(PhraseError::OutOfRange {
                    position: note.position(),
                    end: note.end_position(),
                });
            }
        }
        for note in &notes {
            self.insert_raw(note.clone());
        }
        Ok(PhraseEdit::new(PhraseChange::Added(notes), adjusting))
    }

    /// Removes one note. Convenience over [`Phrase::remove_all`].
    pub fn remove(&mut self, id: EventId, adjusting: bool) -> Result<PhraseEdit, PhraseError> {
        self.remove_all(&[id], adjusting)
    }

    /// Removes a batch of notes atomically.
    ///
    /// # Errors
    ///
    /// Fails without mutating if any id is absent or listed twice.
    pub fn remove_all(
        &mut self,
        ids: &[EventId],
        adjusting: bool,
    ) -> Result<PhraseEdit, PhraseError> {
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !self.arena.contains_key(id) {
                return Err(PhraseError::MissingNote(*id));
            }
            if !seen.insert(*id) {
                return Err(PhraseError::DuplicateNote(*id));
            }
        }
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            removed.push(self.remove_raw(*id));
        }
        Ok(PhraseEdit::new(PhraseChange::Removed(removed), adjusting))
    }

    /// Replaces a batch of notes atomically: for every `(old, new)` pair the
    /// old note is removed and the new one inserted.
    ///
    /// # Errors
    ///
    /// Fails without mutating if any old id is absent, any new note is
    /// refused by admission, or any new id collides with a surviving note
    /// or another new note.
    pub fn replace_all(
        &mut self,
        pairs: Vec<(EventId, NoteEvent)>,
        adjusting: bool,
    ) -> Result<PhraseEdit, PhraseError> {
        let replaced = self.replace_batch(pairs)?;
        tracing::debug!(count = replaced.len(), adjusting, "phrase replace batch");
        Ok(PhraseEdit::new(PhraseChange::Replaced(replaced), adjusting))
    }

    /// Moves a batch of notes to new positions atomically.
    ///
    /// Each moved note is derived via produce-new-and-replace, so the edit
    /// carries the freshly created notes; `PhraseEdit::new_notes` exposes
    /// them to the caller.
    ///
    /// # Errors
    ///
    /// Fails without mutating if any id is absent, any target position is
    /// invalid, or any derived note is refused by admission.
    pub fn move_all(
        &mut self,
        moves: &[(EventId, f64)],
        adjusting: bool,
    ) -> Result<PhraseEdit, PhraseError> {
        let mut pairs = Vec::with_capacity(moves.len());
        for (id, position) in moves {
            let old = self.arena.get(id).ok_or(PhraseError::MissingNote(*id))?;
            pairs.push((*id, old.with_position(*position)?));
        }
        let moved = self.replace_batch(pairs)?;
        Ok(PhraseEdit::new(PhraseChange::Moved(moved), adjusting))
    }

    /// Removes every note the predicate rejects, in one atomic batch.
    ///
    /// This is the atomic removal-during-iteration operation: one pass, one
    /// `Removed` edit.
    pub fn retain(&mut self, mut pred: impl FnMut(&NoteEvent) -> bool, adjusting: bool) -> PhraseEdit {
        let doomed: Vec<EventId> = self
            .notes()
            .filter(|n| !pred(n))
            .map(|n| n.id())
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            removed.push(self.remove_raw(id));
        }
        PhraseEdit::new(PhraseChange::Removed(removed), adjusting)
    }

    /// Translates the declared range (if any) and every note by `offset`
    /// beats, atomically.
    ///
    /// On a sized phrase the only way positions can go negative is the
    /// declared range start doing so; with `clamp_to_zero` the offset is
    /// limited so the range lands exactly at zero. On an unbounded phrase,
    /// individual note positions are clamped (or the shift fails).
    pub fn shift_all(
        &mut self,
        offset: f64,
        clamp_to_zero: bool,
        adjusting: bool,
    ) -> Result<PhraseEdit, PhraseError> {
        let mut offset = offset;
        if let Some(bounds) = &self.bounds {
            if bounds.range.from + offset < 0.0 {
                if !clamp_to_zero {
                    return Err(PhraseError::ShiftBelowZero { offset });
                }
                offset = -bounds.range.from;
            }
        }

        let mut pairs = Vec::with_capacity(self.arena.len());
        for note in self.notes() {
            let mut new_pos = note.position() + offset;
            if new_pos < 0.0 {
                if !clamp_to_zero {
                    return Err(PhraseError::ShiftBelowZero { offset });
                }
                new_pos = 0.0;
            }
            pairs.push((note.clone(), note.with_position(new_pos)?));
        }

        if let Some(bounds) = &mut self.bounds {
            bounds.range = bounds.range.shifted(offset);
        }
        for (old, new) in &pairs {
            self.remove_raw(old.id());
            self.insert_raw(new.clone());
        }
        Ok(PhraseEdit::new(
            PhraseChange::Shifted { offset, pairs },
            adjusting,
        ))
    }

    /// Exactly inverts an edit previously produced by this phrase.
    ///
    /// Re-inserted notes keep their original ids, so identity survives an
    /// undo/redo round trip.
    ///
    /// # Errors
    ///
    /// Fails without mutating if the phrase has changed in a way that makes
    /// the edit no longer invertible (a stale edit).
    pub fn revert(&mut self, edit: &PhraseEdit) -> Result<(), PhraseError> {
        match edit.change() {
            PhraseChange::Added(notes) => {
                self.check_all_present(notes.iter().map(|n| n.id()), "added note vanished")?;
                for note in notes {
                    self.remove_raw(note.id());
                }
            }
            PhraseChange::Removed(notes) => {
                self.check_all_absent(notes.iter().map(|n| n.id()), "removed note reappeared")?;
                for note in notes {
                    self.insert_raw(note.clone());
                }
            }
            PhraseChange::Moved(pairs) | PhraseChange::Replaced(pairs) => {
                self.swap_pairs(pairs.iter().map(|(old, new)| (new, old)))?;
            }
            PhraseChange::Shifted { offset, pairs } => {
                self.swap_pairs(pairs.iter().map(|(old, new)| (new, old)))?;
                if let Some(bounds) = &mut self.bounds {
                    bounds.range = bounds.range.shifted(-offset);
                }
            }
        }
        Ok(())
    }

    /// Re-applies an edit previously produced (and since reverted).
    ///
    /// # Errors
    ///
    /// Fails without mutating if the edit is stale.
    pub fn reapply(&mut self, edit: &PhraseEdit) -> Result<(), PhraseError> {
        match edit.change() {
            PhraseChange::Added(notes) => {
                self.check_all_absent(notes.iter().map(|n| n.id()), "note to re-add is present")?;
                for note in notes {
                    self.insert_raw(note.clone());
                }
            }
            PhraseChange::Removed(notes) => {
                self.check_all_present(notes.iter().map(|n| n.id()), "note to re-remove is gone")?;
                for note in notes {
                    self.remove_raw(note.id());
                }
            }
            PhraseChange::Moved(pairs) | PhraseChange::Replaced(pairs) => {
                self.swap_pairs(pairs.iter().map(|(old, new)| (old, new)))?;
            }
            PhraseChange::Shifted { offset, pairs } => {
                self.swap_pairs(pairs.iter().map(|(old, new)| (old, new)))?;
                if let Some(bounds) = &mut self.bounds {
                    bounds.range = bounds.range.shifted(*offset);
                }
            }
        }
        Ok(())
    }

    /// Shared replace machinery: full precheck, then apply.
    fn replace_batch(
        &mut self,
        pairs: Vec<(EventId, NoteEvent)>,
    ) -> Result<Vec<(NoteEvent, NoteEvent)>, PhraseError> {
        let removed_ids: HashSet<EventId> = pairs.iter().map(|(old, _)| *old).collect();
        if removed_ids.len() != pairs.len() {
            // The same old note was named twice.
            let dup = pairs
                .iter()
                .map(|(old, _)| *old)
                .find(|id| pairs.iter().filter(|(o, _)| o == id).count() > 1)
                .unwrap_or(pairs[0].0);
            return Err(PhraseError::DuplicateNote(dup));
        }

        let mut new_ids = HashSet::with_capacity(pairs.len());
        for (old, new) in &pairs {
            if !self.arena.contains_key(old) {
                return Err(PhraseError::MissingNote(*old));
            }
            let collides_existing =
                self.arena.contains_key(&new.id()) && !removed_ids.contains(&new.id());
            if collides_existing || !new_ids.insert(new.id()) {
                return Err(PhraseError::DuplicateNote(new.id()));
            }
            if !self.can_add(new) {
                return Err(PhraseError::OutOfRange {
                    position: new.position(),
                    end: new.end_position(),
                });
            }
        }

        let mut replaced = Vec::with_capacity(pairs.len());
        for (old_id, new) in pairs {
            let old = self.remove_raw(old_id);
            self.insert_raw(new.clone());
            replaced.push((old, new));
        }
        Ok(replaced)
    }

    /// Swaps each `(out, in)` pair after verifying the whole batch applies.
    fn swap_pairs<'a>(
        &mut self,
        pairs: impl Iterator<Item = (&'a NoteEvent, &'a NoteEvent)> + Clone,
    ) -> Result<(), PhraseError> {
        let outgoing: HashSet<EventId> = pairs.clone().map(|(out, _)| out.id()).collect();
        for (out, into) in pairs.clone() {
            if !self.arena.contains_key(&out.id()) {
                return Err(PhraseError::StaleEdit("note to swap out is missing"));
            }
            if self.arena.contains_key(&into.id()) && !outgoing.contains(&into.id()) {
                return Err(PhraseError::StaleEdit("note to swap in is already present"));
            }
        }
        for (out, into) in pairs {
            self.remove_raw(out.id());
            self.insert_raw(into.clone());
        }
        Ok(())
    }

    fn check_all_present(
        &self,
        ids: impl Iterator<Item = EventId>,
        what: &'static str,
    ) -> Result<(), PhraseError> {
        for id in ids {
            if !self.arena.contains_key(&id) {
                return Err(PhraseError::StaleEdit(what));
            }
        }
        Ok(())
    }

    fn check_all_absent(
        &self,
        ids: impl Iterator<Item = EventId>,
        what: &'static str,
    ) -> Result<(), PhraseError> {
        for id in ids {
            if self.arena.contains_key(&id) {
                return Err(PhraseError::StaleEdit(what));
            }
        }
        Ok(())
    }

    fn insert_raw(&mut self, note: NoteEvent) {
        self.index.insert(OrderKey::of(&note));
        self.arena.insert(note.id(), note);
    }

    fn remove_raw(&mut self, id: EventId) -> NoteEvent {
        let note = self
            .arena
            .remove(&id)
            .expect("remove_raw caller checked presence");
        self.index.remove(&OrderKey::of(&note));
        note
    }

    fn by_key(&self, key: &OrderKey) -> &NoteEvent {
        self.arena
            .get(&key.id)
            .expect("position index out of sync with note arena")
    }
}
