//! Cell-based quantization index over a phrase.
//!
//! A `Grid` partitions a beat range into fixed-duration cells and maps each
//! phrase note to a cell, tolerating notes struck slightly early (the
//! pre-cell window of real-time recording jitter). It is a derived cache,
//! not a live view: it reflects the phrase as of the last [`Grid::refresh`]
//! and goes stale the moment the phrase is mutated externally. Every
//! operation takes the phrase explicitly, making that contract visible at
//! the call site.
//!
//! Mutating operations delegate to the phrase's atomic batch API and end
//! with one refresh when anything changed; the cell map is never edited
//! directly.

use crate::phrase::{
    BeatRange, EventId, NoteEvent, NoteUpdate, Phrase, PhraseEdit, PhraseError,
};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Tolerance for "did this value actually change" float comparisons.
const EPS: f64 = 1e-9;

/// Predicate restricting which phrase notes a grid sees.
pub type NoteFilter = Box<dyn Fn(&NoteEvent) -> bool>;

/// Errors raised by grid construction and operations.
#[derive(Debug, Error)]
pub enum GridError {
    /// `cells_per_beat` outside 1-6.
    #[error("cells per beat must be 1-6, got {0}")]
    InvalidCellsPerBeat(u8),

    /// Grid ranges must start and end on whole beats.
    #[error("grid range bounds must be whole beats, got [{from}, {to})")]
    NonIntegerRange { from: f64, to: f64 },

    /// Pre-cell window must lie in `[0, cell_duration)`.
    #[error("pre-cell window {window} must be in [0, {cell_duration})")]
    InvalidPreCellWindow { window: f64, cell_duration: f64 },

    /// A cell index fell outside the grid.
    #[error("cell {cell} outside grid of {count} cells")]
    CellOutOfBounds { cell: usize, count: usize },

    /// A strict position lookup fell outside the grid range.
    #[error("position {0} outside the grid range")]
    PositionOutOfBounds(f64),

    /// A relative in-cell position fell outside `[-pre_cell_window, cell_duration)`.
    #[error("relative position {rel} must be in [-{window}, {cell_duration})")]
    InvalidRelativePosition {
        rel: f64,
        window: f64,
        cell_duration: f64,
    },

    /// An underlying phrase mutation failed.
    #[error(transparent)]
    Phrase(#[from] PhraseError),
}

/// A refreshable cell index over one phrase's notes.
pub struct Grid {
    range: BeatRange,
    cells_per_beat: u8,
    pre_cell_window: f64,
    filter: Option<NoteFilter>,
    cells: Vec<Vec<EventId>>,
}

impl Grid {
    /// Creates a grid over `range` with `cells_per_beat` cells per beat.
    ///
    /// The grid starts empty; call [`Grid::refresh`] to populate it.
    ///
    /// # Errors
    ///
    /// Fails if the range bounds are not whole beats, `cells_per_beat` is
    /// outside 1-6, or `pre_cell_window` is outside `[0, cell_duration)`.
    pub fn new(range: BeatRange, cells_per_beat: u8, pre_cell_window: f64) -> Result<Self, GridError> {
        if !(1..=6).contains(&cells_per_beat) {
            return Err(GridError::InvalidCellsPerBeat(cells_per_beat));
        }
        if range.from.fract() != 0.0 || range.to.fract() != 0.0 {
            return Err(GridError::NonIntegerRange {
                from: range.from,
                to: range.to,
            });
        }
        let cell_duration = 1.0 / f64::from(cells_per_beat);
        if !(0.0..cell_duration).contains(&pre_cell_window) {
            return Err(GridError::InvalidPreCellWindow {
                window: pre_cell_window,
                cell_duration,
            });
        }
        let count = (range.len() * f64::from(cells_per_beat)).round() as usize;
        Ok(Self {
            range,
            cells_per_beat,
            pre_cell_window,
            filter: None,
            cells: vec![Vec::new(); count],
        })
    }

    /// Installs a note filter; only notes the predicate accepts are indexed
    /// or touched by grid operations.
    pub fn with_filter(mut self, filter: impl Fn(&NoteEvent) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Number of cells in the grid.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Duration of one cell in beats.
    pub fn cell_duration(&self) -> f64 {
        1.0 / f64::from(self.cells_per_beat)
    }

    /// Start position of a cell (also valid for `cell == cell_count()`,
    /// giving the range end).
    pub fn cell_start(&self, cell: usize) -> f64 {
        self.range.from + cell as f64 * self.cell_duration()
    }

    /// The beat range this grid covers.
    pub fn range(&self) -> BeatRange {
        self.range
    }

    /// The note ids assigned to `cell` at the last refresh, in position order.
    pub fn cell_notes(&self, cell: usize) -> Result<&[EventId], GridError> {
        self.check_cell(cell)?;
        Ok(&self.cells[cell])
    }

    /// The first note of `cell`, if any.
    pub fn first_cell_note(&self, cell: usize) -> Result<Option<EventId>, GridError> {
        self.check_cell(cell)?;
        Ok(self.cells[cell].first().copied())
    }

    /// Indices of cells holding at least one note.
    pub fn occupied_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(i, _)| i)
    }

    /// Maps a beat position to its cell index.
    ///
    /// A position within the pre-cell window of the next cell's start
    /// belongs to that next cell (it was struck just early).
    ///
    /// # Errors
    ///
    /// With `strict`, fails when the position falls outside the grid;
    /// otherwise the result is clamped to the first/last cell.
    pub fn cell_at(&self, pos: f64, strict: bool) -> Result<usize, GridError> {
        let idx = self.raw_cell_index(pos);
        if idx >= 0 && (idx as usize) < self.cell_count() {
            return Ok(idx as usize);
        }
        if strict || self.cells.is_empty() {
            return Err(GridError::PositionOutOfBounds(pos));
        }
        Ok(idx.clamp(0, self.cell_count() as i64 - 1) as usize)
    }

    /// Rebuilds the cell map from the phrase.
    ///
    /// One position-ordered scan; the walk stops as soon as positions pass
    /// the range end, which is sound because phrases are always sorted.
    pub fn refresh(&mut self, phrase: &Phrase) {
        let count = self.cell_count();
        self.cells = vec![Vec::new(); count];
        for note in phrase.notes() {
            if note.position() >= self.range.to {
                break;
            }
            if !self.accepts(note) {
                continue;
            }
            let idx = self.raw_cell_index(note.position());
            if idx >= 0 && (idx as usize) < count {
                self.cells[idx as usize].push(note.id());
            }
        }
        tracing::debug!(
            cells = count,
            notes = self.cells.iter().map(Vec::len).sum::<usize>(),
            "grid refreshed"
        );
    }

    /// Re-times note-offs: every note of the cell range gets its duration
    /// extended/shortened so it ends at the start of cell `cell_off`,
    /// subject to policy.
    ///
    /// `shorter_ok` / `longer_ok` gate shortening and lengthening; a note
    /// whose change the policy refuses is left alone. A note whose new
    /// shape would duplicate one already claimed in this pass (same start
    /// position and pitch) is removed instead: first wins, duplicates are
    /// discarded.
    pub fn change_duration(
        &mut self,
        phrase: &mut Phrase,
        cells: Range<usize>,
        cell_off: usize,
        shorter_ok: bool,
        longer_ok: bool,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        self.check_cell_range(&cells)?;
        if cell_off > self.cell_count() {
            return Err(GridError::CellOutOfBounds {
                cell: cell_off,
                count: self.cell_count(),
            });
        }
        let target_end = self.cell_start(cell_off);

        let mut claimed = std::collections::HashSet::new();
        let mut replacements = Vec::new();
        let mut removals = Vec::new();
        for cell in cells {
            for id in &self.cells[cell] {
                let note = phrase.note(*id).ok_or(PhraseError::MissingNote(*id))?;
                let new_duration = target_end - note.position();
                if new_duration <= 0.0 {
                    continue;
                }
                let key = (note.position().to_bits(), note.pitch());
                if (new_duration - note.duration()).abs() <= EPS {
                    // Already ends at the target; it holds its claim.
                    claimed.insert(key);
                    continue;
                }
                if new_duration < note.duration() && !shorter_ok {
                    continue;
                }
                if new_duration > note.duration() && !longer_ok {
                    continue;
                }
                if claimed.insert(key) {
                    replacements.push((*id, note.with_duration(new_duration)?));
                } else {
                    removals.push(*id);
                }
            }
        }

        let mut edits = Vec::new();
        if !replacements.is_empty() {
            edits.push(phrase.replace_all(replacements, false)?);
        }
        if !removals.is_empty() {
            edits.push(phrase.remove_all(&removals, false)?);
        }
        if !edits.is_empty() {
            self.refresh(phrase);
        }
        Ok(edits)
    }

    /// Applies `f` to the velocity of every note in the cell range,
    /// clamping results to 0-127.
    pub fn change_velocity(
        &mut self,
        phrase: &mut Phrase,
        cells: Range<usize>,
        f: impl Fn(u8) -> i32,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        self.check_cell_range(&cells)?;
        let mut replacements = Vec::new();
        for cell in cells {
            for id in &self.cells[cell] {
                let note = phrase.note(*id).ok_or(PhraseError::MissingNote(*id))?;
                let new_velocity = f(note.velocity()).clamp(0, 127) as u8;
                if new_velocity != note.velocity() {
                    replacements.push((*id, note.with_velocity(new_velocity)));
                }
            }
        }

        let mut edits = Vec::new();
        if !replacements.is_empty() {
            edits.push(phrase.replace_all(replacements, false)?);
            self.refresh(phrase);
        }
        Ok(edits)
    }

    /// Relocates every note of `from_cell` into `to_cell`, preserving each
    /// note's relative offset within the cell.
    ///
    /// With `keep_note_off` and a move to an earlier cell, durations are
    /// extended so each note-off time is unchanged; otherwise durations are
    /// untouched.
    pub fn move_notes(
        &mut self,
        phrase: &mut Phrase,
        from_cell: usize,
        to_cell: usize,
        keep_note_off: bool,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        self.check_cell(from_cell)?;
        self.check_cell(to_cell)?;
        let ids = self.cells[from_cell].clone();
        self.relocate(phrase, &ids, from_cell, to_cell, keep_note_off)
    }

    /// Relocates only the first note of `from_cell` into `to_cell`.
    pub fn move_first_note(
        &mut self,
        phrase: &mut Phrase,
        from_cell: usize,
        to_cell: usize,
        keep_note_off: bool,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        self.check_cell(from_cell)?;
        self.check_cell(to_cell)?;
        let ids: Vec<EventId> = self.cells[from_cell].first().copied().into_iter().collect();
        self.relocate(phrase, &ids, from_cell, to_cell, keep_note_off)
    }

    /// Shortens every note still sounding at the start of `cell` so that it
    /// ends exactly there.
    ///
    /// Scans the whole phrase (through the filter), not just the grid
    /// range: a long note from before the range still gets stopped.
    pub fn stop_notes_before(
        &mut self,
        phrase: &mut Phrase,
        cell: usize,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        if cell > self.cell_count() {
            return Err(GridError::CellOutOfBounds {
                cell,
                count: self.cell_count(),
            });
        }
        let boundary = self.cell_start(cell);

        let mut replacements = Vec::new();
        for note in phrase.notes() {
            if note.position() >= boundary {
                break;
            }
            if !self.accepts(note) {
                continue;
            }
            if note.end_position() > boundary {
                replacements.push((note.id(), note.with_duration(boundary - note.position())?));
            }
        }

        let mut edits = Vec::new();
        if !replacements.is_empty() {
            edits.push(phrase.replace_all(replacements, false)?);
            self.refresh(phrase);
        }
        Ok(edits)
    }

    /// Adds a note into `cell` at the relative position `rel_pos`, which
    /// must lie in `[-pre_cell_window, cell_duration)`.
    pub fn add_note(
        &mut self,
        phrase: &mut Phrase,
        cell: usize,
        note: &NoteEvent,
        rel_pos: f64,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        self.check_cell(cell)?;
        if !(-self.pre_cell_window..self.cell_duration()).contains(&rel_pos) {
            return Err(GridError::InvalidRelativePosition {
                rel: rel_pos,
                window: self.pre_cell_window,
                cell_duration: self.cell_duration(),
            });
        }
        let position = (self.cell_start(cell) + rel_pos).max(0.0);
        let edit = phrase.add(note.with_position(position)?, false)?;
        self.refresh(phrase);
        Ok(vec![edit])
    }

    /// Cell assignment shared by refresh and lookups; may return an index
    /// outside the grid.
    fn raw_cell_index(&self, pos: f64) -> i64 {
        let duration = self.cell_duration();
        let rel = pos - self.range.from;
        let mut idx = (rel / duration).floor() as i64;
        let next_start = self.range.from + (idx + 1) as f64 * duration;
        if next_start - pos <= self.pre_cell_window {
            idx += 1;
        }
        idx
    }

    fn relocate(
        &mut self,
        phrase: &mut Phrase,
        ids: &[EventId],
        from_cell: usize,
        to_cell: usize,
        keep_note_off: bool,
    ) -> Result<Vec<PhraseEdit>, GridError> {
        if ids.is_empty() || from_cell == to_cell {
            return Ok(Vec::new());
        }
        let offset = self.cell_start(to_cell) - self.cell_start(from_cell);
        let extend = keep_note_off && to_cell < from_cell;

        let mut edits = Vec::new();
        if extend {
            let mut replacements = Vec::with_capacity(ids.len());
            for id in ids {
                let note = phrase.note(*id).ok_or(PhraseError::MissingNote(*id))?;
                let new_pos = (note.position() + offset).max(0.0);
                let update = NoteUpdate {
                    position: Some(new_pos),
                    duration: Some(note.end_position() - new_pos),
                    copy_properties: true,
                    ..NoteUpdate::default()
                };
                replacements.push((*id, note.apply(&update)?));
            }
            edits.push(phrase.replace_all(replacements, false)?);
        } else {
            let mut moves = Vec::with_capacity(ids.len());
            for id in ids {
                let note = phrase.note(*id).ok_or(PhraseError::MissingNote(*id))?;
                moves.push((*id, (note.position() + offset).max(0.0)));
            }
            edits.push(phrase.move_all(&moves, false)?);
        }
        self.refresh(phrase);
        Ok(edits)
    }

    fn accepts(&self, note: &NoteEvent) -> bool {
        self.filter.as_ref().is_none_or(|f| f(note))
    }

    fn check_cell(&self, cell: usize) -> Result<(), GridError> {
        if cell >= self.cell_count() {
            return Err(GridError::CellOutOfBounds {
                cell,
                count: self.cell_count(),
            });
        }
        Ok(())
    }

    fn check_cell_range(&self, cells: &Range<usize>) -> Result<(), GridError> {
        if cells.start > cells.end || cells.end > self.cell_count() {
            return Err(GridError::CellOutOfBounds {
                cell: cells.end,
                count: self.cell_count(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("range", &self.range)
            .field("cells_per_beat", &self.cells_per_beat)
            .field("pre_cell_window", &self.pre_cell_window)
            .field("filtered", &self.filter.is_some())
            .field("cells", &self.cells)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, duration: f64, position: f64) -> NoteEvent {
        NoteEvent::new(pitch, duration, 100, position).unwrap()
    }

    fn grid_0_4() -> Grid {
        Grid::new(BeatRange::new(0.0, 4.0).unwrap(), 4, 0.1).unwrap()
    }

    #[test]
    fn test_constructor_preconditions() {
        let range = BeatRange::new(0.0, 4.0).unwrap();
        assert!(Grid::new(range, 0, 0.0).is_err());
        assert!(Grid::new(range, 7, 0.0).is_err());
        assert!(Grid::new(BeatRange::new(0.5, 4.0).unwrap(), 4, 0.0).is_err());
        assert!(Grid::new(range, 4, 0.25).is_err(), "window must be < cell duration");
        assert_eq!(Grid::new(range, 4, 0.1).unwrap().cell_count(), 16);
    }

    #[test]
    fn test_pre_cell_window_assignment() {
        // A note at 0.95 with a 0.1 window belongs to the cell starting at
        // beat 1 (index 4), not cell 3.
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        let n = note(60, 0.5, 0.95);
        let id = n.id();
        phrase.add(n, false).unwrap();
        grid.refresh(&phrase);

        assert_eq!(grid.cell_at(0.95, true).unwrap(), 4);
        assert_eq!(grid.cell_notes(4).unwrap(), &[id]);
        assert!(grid.cell_notes(3).unwrap().is_empty());
    }

    #[test]
    fn test_early_note_before_range_lands_in_cell_zero() {
        let grid = Grid::new(BeatRange::new(0.0, 4.0).unwrap(), 2, 0.2).unwrap();
        assert_eq!(grid.cell_at(-0.1, true).unwrap(), 0);
        assert!(grid.cell_at(-0.3, true).is_err());
        assert_eq!(grid.cell_at(-0.3, false).unwrap(), 0, "clamped when not strict");
        assert_eq!(grid.cell_at(99.0, false).unwrap(), grid.cell_count() - 1);
    }

    #[test]
    fn test_refresh_is_deterministic() {
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        for pos in [0.0, 0.3, 0.95, 1.5, 2.2, 3.9] {
            phrase.add(note(60, 0.2, pos), false).unwrap();
        }
        grid.refresh(&phrase);
        let first: Vec<Vec<EventId>> = grid.cells.clone();
        grid.refresh(&phrase);
        assert_eq!(first, grid.cells);
    }

    #[test]
    fn test_filter_restricts_index() {
        let mut grid = grid_0_4().with_filter(|n| n.pitch() >= 60);
        let mut phrase = Phrase::new(0, false);
        phrase.add(note(40, 0.5, 0.0), false).unwrap();
        phrase.add(note(72, 0.5, 0.0), false).unwrap();
        grid.refresh(&phrase);
        assert_eq!(grid.cell_notes(0).unwrap().len(), 1);
    }

    #[test]
    fn test_move_notes_preserves_duration_and_offset() {
        // Scenario: a note at 1.0 (duration 0.5) moved from the cell at
        // beat 1 to the cell at beat 2 keeps its duration.
        let mut grid = Grid::new(BeatRange::new(0.0, 4.0).unwrap(), 1, 0.0).unwrap();
        let mut phrase = Phrase::new(0, false);
        phrase.add(note(60, 0.5, 1.0), false).unwrap();
        grid.refresh(&phrase);

        grid.move_notes(&mut phrase, 1, 2, false).unwrap();
        let moved = phrase.notes().next().unwrap();
        assert_eq!(moved.position(), 2.0);
        assert_eq!(moved.duration(), 0.5);
        assert_eq!(grid.cell_notes(2).unwrap().len(), 1, "grid was refreshed");
    }

    #[test]
    fn test_move_notes_keep_note_off_extends_earlier_moves() {
        let mut grid = Grid::new(BeatRange::new(0.0, 4.0).unwrap(), 1, 0.0).unwrap();
        let mut phrase = Phrase::new(0, false);
        phrase.add(note(60, 0.5, 2.25), false).unwrap();
        grid.refresh(&phrase);

        grid.move_notes(&mut phrase, 2, 1, true).unwrap();
        let moved = phrase.notes().next().unwrap();
        assert_eq!(moved.position(), 1.25, "relative offset preserved");
        assert!((moved.end_position() - 2.75).abs() < EPS, "note-off unchanged");
    }

    #[test]
    fn test_change_duration_policy_and_collision() {
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        // Two notes at the same position and pitch with different durations
        // collide once their note-offs are aligned; the first wins.
        let a = note(60, 0.2, 0.0);
        let b = note(60, 0.4, 0.0);
        let c = note(64, 0.1, 0.5);
        phrase.add_all(vec![a, b, c], false).unwrap();
        grid.refresh(&phrase);

        // Align every note in cells 0..4 (the first beat) to end at cell 4.
        grid.change_duration(&mut phrase, 0..4, 4, true, true).unwrap();

        assert_eq!(phrase.len(), 2, "colliding duplicate was removed");
        let survivors: Vec<f64> = phrase.notes().map(|n| n.duration()).collect();
        assert!((survivors[0] - 1.0).abs() < EPS);
        assert!((survivors[1] - 0.5).abs() < EPS);
    }

    #[test]
    fn test_change_duration_respects_policy_flags() {
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        phrase.add(note(60, 2.0, 0.0), false).unwrap();
        grid.refresh(&phrase);

        // Shortening to end at cell 4 (beat 1) refused when !shorter_ok.
        let edits = grid
            .change_duration(&mut phrase, 0..4, 4, false, true)
            .unwrap();
        assert!(edits.is_empty());
        assert_eq!(phrase.notes().next().unwrap().duration(), 2.0);

        grid.change_duration(&mut phrase, 0..4, 4, true, true).unwrap();
        assert_eq!(phrase.notes().next().unwrap().duration(), 1.0);
    }

    #[test]
    fn test_change_velocity_clamps() {
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        phrase.add(note(60, 0.5, 0.0), false).unwrap();
        grid.refresh(&phrase);

        grid.change_velocity(&mut phrase, 0..16, |v| i32::from(v) + 1000)
            .unwrap();
        assert_eq!(phrase.notes().next().unwrap().velocity(), 127);
    }

    #[test]
    fn test_stop_notes_before() {
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        phrase.add(note(60, 3.0, 0.5), false).unwrap(); // sounds through beat 2
        phrase.add(note(62, 0.25, 1.0), false).unwrap(); // already over
        grid.refresh(&phrase);

        let cell_at_beat_2 = grid.cell_at(2.0, true).unwrap();
        grid.stop_notes_before(&mut phrase, cell_at_beat_2).unwrap();

        let durations: Vec<f64> = phrase.notes().map(|n| n.duration()).collect();
        assert!((durations[0] - 1.5).abs() < EPS, "cut to end at beat 2");
        assert_eq!(durations[1], 0.25, "short note untouched");
    }

    #[test]
    fn test_add_note_validates_relative_position() {
        let mut grid = grid_0_4();
        let mut phrase = Phrase::new(0, false);
        let template = note(60, 0.25, 0.0);

        assert!(grid
            .add_note(&mut phrase, 4, &template, 0.25)
            .is_err());
        assert!(grid
            .add_note(&mut phrase, 4, &template, -0.2)
            .is_err());

        grid.add_note(&mut phrase, 4, &template, 0.1).unwrap();
        assert!((phrase.notes().next().unwrap().position() - 1.1).abs() < EPS);
        assert_eq!(grid.cell_notes(4).unwrap().len(), 1);
    }
}
