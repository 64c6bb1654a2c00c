//! Typed phrase edits and the undo/redo stack that consumes them.
//!
//! Every successful `Phrase` mutation returns one `PhraseEdit`: a value
//! carrying enough before/after state to notify observers of the whole
//! batch and to exactly invert it. `EditStack` maintains bounded undo and
//! redo stacks of these edits without any UI dependency.

use super::note_event::NoteEvent;
use super::phrase::Phrase;
use super::PhraseError;

/// Maximum number of edits to keep on each stack.
const MAX_EDIT_HISTORY: usize = 64;

/// What a phrase mutation did, with full payloads.
///
/// `Moved` and `Replaced` both carry `(old, new)` pairs; they are distinct
/// variants so observers can tell a relocation from a wholesale
/// replacement, matching the notification taxonomy.
#[derive(Debug, Clone)]
pub enum PhraseChange {
    /// Notes inserted, in the order they were given.
    Added(Vec<NoteEvent>),
    /// Notes removed, with their final state.
    Removed(Vec<NoteEvent>),
    /// Notes relocated: `(old, new)` per note, identical except position.
    Moved(Vec<(NoteEvent, NoteEvent)>),
    /// Notes replaced: `(old, new)` per note.
    Replaced(Vec<(NoteEvent, NoteEvent)>),
    /// Every note (and any declared range) translated by `offset` beats.
    Shifted {
        offset: f64,
        pairs: Vec<(NoteEvent, NoteEvent)>,
    },
}

/// One atomic, invertible phrase mutation.
///
/// The `adjusting` flag marks an interim edit (e.g. a live drag step) as
/// opposed to a final one. This module never coalesces adjusting edits; it
/// only preserves the tag so a consumer can fold a run of adjusting edits
/// into the single non-adjusting edit that ends it.
#[derive(Debug, Clone)]
pub struct PhraseEdit {
    change: PhraseChange,
    adjusting: bool,
}

impl PhraseEdit {
    pub(crate) fn new(change: PhraseChange, adjusting: bool) -> Self {
        Self { change, adjusting }
    }

    /// The change this edit describes.
    pub fn change(&self) -> &PhraseChange {
        &self.change
    }

    /// True for interim (non-final) edits.
    pub fn is_adjusting(&self) -> bool {
        self.adjusting
    }

    /// True if the edit touched no notes at all.
    pub fn is_no_op(&self) -> bool {
        match &self.change {
            PhraseChange::Added(notes) | PhraseChange::Removed(notes) => notes.is_empty(),
            PhraseChange::Moved(pairs) | PhraseChange::Replaced(pairs) => pairs.is_empty(),
            PhraseChange::Shifted { pairs, .. } => pairs.is_empty(),
        }
    }

    /// The notes this edit created (inserted or produced as replacements).
    pub fn new_notes(&self) -> Vec<&NoteEvent> {
        match &self.change {
            PhraseChange::Added(notes) => notes.iter().collect(),
            PhraseChange::Removed(_) => Vec::new(),
            PhraseChange::Moved(pairs)
            | PhraseChange::Replaced(pairs)
            | PhraseChange::Shifted { pairs, .. } => {
                pairs.iter().map(|(_, new)| new).collect()
            }
        }
    }

    /// A brief human-readable description of the edit, for status displays.
    pub fn description(&self) -> String {
        let tag = if self.adjusting { " (adjusting)" } else { "" };
        match &self.change {
            PhraseChange::Added(notes) => format!("add {} note(s){tag}", notes.len()),
            PhraseChange::Removed(notes) => format!("remove {} note(s){tag}", notes.len()),
            PhraseChange::Moved(pairs) => format!("move {} note(s){tag}", pairs.len()),
            PhraseChange::Replaced(pairs) => format!("replace {} note(s){tag}", pairs.len()),
            PhraseChange::Shifted { offset, pairs } => {
                format!("shift {} note(s) by {offset} beat(s){tag}", pairs.len())
            }
        }
    }
}

/// Bounded undo/redo history over phrase edits.
///
/// Recording a new edit clears the redo stack (a new action branches the
/// timeline). Undo pops the most recent edit, reverts it against the
/// phrase, and pushes it to redo; redo does the reverse without clearing
/// the remaining redo entries.
#[derive(Debug, Default)]
pub struct EditStack {
    undo_stack: Vec<PhraseEdit>,
    redo_stack: Vec<PhraseEdit>,
}

impl EditStack {
    /// Creates an empty edit stack.
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::with_capacity(MAX_EDIT_HISTORY),
            redo_stack: Vec::with_capacity(MAX_EDIT_HISTORY),
        }
    }

    /// Records an edit returned by a phrase mutation.
    ///
    /// No-op edits are dropped rather than stacked. The redo stack is
    /// cleared since history has branched.
    pub fn record(&mut self, edit: PhraseEdit) {
        if edit.is_no_op() {
            return;
        }
        self.redo_stack.clear();
        self.undo_stack.push(edit);
        while self.undo_stack.len() > MAX_EDIT_HISTORY {
            self.undo_stack.remove(0);
        }
    }

    /// Reverts the most recent edit against `phrase`.
    ///
    /// # Returns
    ///
    /// The reverted edit, or `None` if there was nothing to undo.
    ///
    /// # Errors
    ///
    /// If the edit is stale (the phrase was mutated outside this stack),
    /// the failed edit is dropped and the error surfaced; the phrase is
    /// untouched.
    pub fn undo(&mut self, phrase: &mut Phrase) -> Result<Option<PhraseEdit>, PhraseError> {
        let Some(edit) = self.undo_stack.pop() else {
            return Ok(None);
        };
        if let Err(err) = phrase.revert(&edit) {
            tracing::warn!(edit = %edit.description(), %err, "dropping stale undo edit");
            return Err(err);
        }
        self.redo_stack.push(edit.clone());
        Ok(Some(edit))
    }

    /// Re-applies the most recently undone edit against `phrase`.
    ///
    /// # Returns
    ///
    /// The re-applied edit, or `None` if there was nothing to redo.
    pub fn redo(&mut self, phrase: &mut Phrase) -> Result<Option<PhraseEdit>, PhraseError> {
        let Some(edit) = self.redo_stack.pop() else {
            return Ok(None);
        };
        if let Err(err) = phrase.reapply(&edit) {
            tracing::warn!(edit = %edit.description(), %err, "dropping stale redo edit");
            return Err(err);
        }
        // Back onto undo without clearing the remaining redo entries.
        self.undo_stack.push(edit.clone());
        Ok(Some(edit))
    }

    /// True if there are edits available to undo.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// True if there are edits available to redo.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Number of edits on the undo stack.
    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    /// Number of edits on the redo stack.
    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Drops all history, e.g. after loading a new phrase.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrase::NoteEvent;

    fn note(pitch: u8, position: f64) -> NoteEvent {
        NoteEvent::new(pitch, 1.0, 100, position).unwrap()
    }

    #[test]
    fn test_record_and_undo_redo() {
        let mut phrase = Phrase::new(0, false);
        let mut stack = EditStack::new();

        stack.record(phrase.add(note(60, 0.0), false).unwrap());
        stack.record(phrase.add(note(62, 1.0), false).unwrap());
        assert_eq!(phrase.len(), 2);
        assert_eq!(stack.undo_count(), 2);

        stack.undo(&mut phrase).unwrap();
        assert_eq!(phrase.len(), 1);
        assert!(stack.can_redo());

        stack.redo(&mut phrase).unwrap();
        assert_eq!(phrase.len(), 2);
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_multi_level_undo_redo() {
        // Undoing 4 edits must leave all 4 redoable, and redoing them all
        // must leave all 4 undoable again.
        let mut phrase = Phrase::new(0, false);
        let mut stack = EditStack::new();
        for i in 0..4 {
            stack.record(phrase.add(note(60 + i, i as f64), false).unwrap());
        }

        for _ in 0..4 {
            stack.undo(&mut phrase).unwrap();
        }
        assert_eq!(stack.undo_count(), 0);
        assert_eq!(stack.redo_count(), 4);
        assert!(phrase.is_empty());

        for _ in 0..4 {
            stack.redo(&mut phrase).unwrap();
        }
        assert_eq!(stack.undo_count(), 4);
        assert_eq!(stack.redo_count(), 0);
        assert_eq!(phrase.len(), 4);
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut phrase = Phrase::new(0, false);
        let mut stack = EditStack::new();

        stack.record(phrase.add(note(60, 0.0), false).unwrap());
        stack.record(phrase.add(note(62, 1.0), false).unwrap());
        stack.undo(&mut phrase).unwrap();
        assert!(stack.can_redo());

        stack.record(phrase.add(note(64, 2.0), false).unwrap());
        assert!(!stack.can_redo(), "new edit branches the timeline");
    }

    #[test]
    fn test_history_capped() {
        let mut phrase = Phrase::new(0, false);
        let mut stack = EditStack::new();
        for i in 0..(MAX_EDIT_HISTORY + 10) {
            stack.record(phrase.add(note(60, i as f64), false).unwrap());
        }
        assert_eq!(stack.undo_count(), MAX_EDIT_HISTORY);
    }

    #[test]
    fn test_no_op_edit_not_recorded() {
        let mut phrase = Phrase::new(0, false);
        let mut stack = EditStack::new();
        let edit = phrase.retain(|_| true, false);
        stack.record(edit);
        assert!(!stack.can_undo());
    }

    #[test]
    fn test_adjusting_tag_preserved() {
        let mut phrase = Phrase::new(0, false);
        let edit = phrase.add(note(60, 0.0), true).unwrap();
        assert!(edit.is_adjusting());
        assert!(edit.description().contains("adjusting"));
    }

    #[test]
    fn test_undo_surfaces_stale_edit() {
        let mut phrase = Phrase::new(0, false);
        let mut stack = EditStack::new();
        let edit = phrase.add(note(60, 0.0), false).unwrap();
        let id = edit.new_notes()[0].id();
        stack.record(edit);

        // Mutate behind the stack's back.
        phrase.remove(id, false).unwrap();
        assert!(stack.undo(&mut phrase).is_err());
        assert!(!stack.can_undo(), "stale edit is dropped");
    }
}
