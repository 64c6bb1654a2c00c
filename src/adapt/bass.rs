//! Tempo adaptation for bass phrases.
//!
//! Bass lines recorded at a comfortable tempo get rhythmically stiff when
//! played back much faster: the recorded push-and-pull reads as sloppiness.
//! This adapter contracts microtiming toward the swing grid, adds a slight
//! forward lean for drive, re-humanizes with clamped Gaussian jitter,
//! accents strong beats, and tightens note lengths, all proportionally to
//! how far the target tempo sits above the slow threshold.

use super::{
    jitter_ms, lerp, microtiming_scale, ms_to_beats, nearest_swing_grid, tempo_factor,
    AdaptConfig, GrooveProfile, CHANGE_EPS,
};
use crate::phrase::{clamp_audible_velocity, EventId, NoteEvent, NoteUpdate, Phrase, PhraseEdit, PhraseError};
use crate::timesig::TimeSignature;
use rand::rngs::StdRng;

/// Microtiming scale at the fast threshold (1.0 at the slow threshold).
const MICRO_SCALE_FAST: f64 = 0.35;

/// Forward lean in milliseconds at the fast threshold; negative means
/// early.
const LEAN_FAST_MS: f64 = -6.0;

/// Jitter sigma in milliseconds at the slow / fast thresholds.
const JITTER_SIGMA_SLOW_MS: f64 = 3.0;
const JITTER_SIGMA_FAST_MS: f64 = 1.5;

/// Hard clamp on a single jitter sample.
const JITTER_MAX_MS: f64 = 8.0;

/// Strong-beat velocity accent at the fast threshold.
const ACCENT_FAST: f64 = 8.0;

/// Legato fraction at the fast threshold (1.0 at the slow threshold).
const LEGATO_FAST: f64 = 0.85;

/// Additional shortening of chromatic-approach notes at the fast threshold.
const APPROACH_SHORTEN_FAST: f64 = 0.6;

/// Stateless tempo adapter for bass phrases.
#[derive(Debug, Clone, Copy)]
pub struct BassTempoAdapter {
    profile: GrooveProfile,
    config: AdaptConfig,
}

impl BassTempoAdapter {
    /// Creates an adapter with the given groove profile and feature config.
    pub fn new(profile: GrooveProfile, config: AdaptConfig) -> Self {
        Self { profile, config }
    }

    /// Computes the replacement map for adapting `phrase` to `tempo`.
    ///
    /// Only notes accepted by `filter` are considered, and a pair is
    /// emitted only when position, velocity or duration actually changed.
    /// Nothing is mutated; commit the map with [`BassTempoAdapter::apply`]
    /// or `Phrase::replace_all`.
    pub fn adapt(
        &self,
        phrase: &Phrase,
        filter: impl Fn(&NoteEvent) -> bool,
        tempo: f64,
        time_signature: TimeSignature,
        rng: &mut StdRng,
    ) -> Vec<(EventId, NoteEvent)> {
        if self.profile == GrooveProfile::Disabled {
            return Vec::new();
        }
        let factor = tempo_factor(tempo);
        let scale = microtiming_scale(1.0, MICRO_SCALE_FAST, factor, self.profile);
        let lean_beats = if self.config.lean {
            ms_to_beats(LEAN_FAST_MS * factor, tempo)
        } else {
            0.0
        };
        let sigma_ms = lerp(JITTER_SIGMA_SLOW_MS, JITTER_SIGMA_FAST_MS, factor);

        let notes: Vec<&NoteEvent> = phrase.notes().filter(|n| filter(n)).collect();
        let mut replacements = Vec::new();
        for (i, note) in notes.iter().enumerate() {
            let grid = nearest_swing_grid(note.position());
            let on_strong_beat = grid.fract() == 0.0 && time_signature.is_strong_position(grid);

            let mut new_pos = grid + (note.position() - grid) * scale + lean_beats;
            if self.config.jitter {
                let jitter = jitter_ms(rng, sigma_ms, JITTER_MAX_MS, on_strong_beat);
                new_pos += ms_to_beats(jitter, tempo);
            }
            new_pos = new_pos.max(0.0);

            let mut velocity = i32::from(note.velocity());
            if on_strong_beat {
                velocity += (ACCENT_FAST * factor).round() as i32;
            }
            let velocity = clamp_audible_velocity(velocity);

            let mut duration = note.duration() * lerp(1.0, LEGATO_FAST, factor);
            if is_chromatic_approach(note, notes.get(i + 1).copied()) {
                duration *= lerp(1.0, APPROACH_SHORTEN_FAST, factor);
            }

            if (new_pos - note.position()).abs() <= CHANGE_EPS
                && velocity == note.velocity()
                && (duration - note.duration()).abs() <= CHANGE_EPS
            {
                continue;
            }
            let update = NoteUpdate {
                position: Some(new_pos),
                velocity: Some(velocity),
                duration: Some(duration),
                copy_properties: true,
                ..NoteUpdate::default()
            };
            match note.apply(&update) {
                Ok(new_note) => replacements.push((note.id(), new_note)),
                // Positions are floored at 0 and durations scaled from
                // valid ones, so this only fires on degenerate input.
                Err(err) => tracing::warn!(%err, "skipping unadaptable note"),
            }
        }
        tracing::debug!(
            tempo,
            factor,
            replaced = replacements.len(),
            "bass tempo adaptation computed"
        );
        replacements
    }

    /// Computes the replacement map and commits it through one atomic
    /// `replace_all`.
    ///
    /// # Returns
    ///
    /// The edit describing the batch, or `None` when nothing changed.
    pub fn apply(
        &self,
        phrase: &mut Phrase,
        filter: impl Fn(&NoteEvent) -> bool,
        tempo: f64,
        time_signature: TimeSignature,
        rng: &mut StdRng,
    ) -> Result<Option<PhraseEdit>, PhraseError> {
        let replacements = self.adapt(phrase, filter, tempo, time_signature, rng);
        if replacements.is_empty() {
            return Ok(None);
        }
        phrase.replace_all(replacements, false).map(Some)
    }
}

/// A chromatic approach note sits 1-2 semitones from the note that follows
/// it; players release these early at speed.
fn is_chromatic_approach(note: &NoteEvent, next: Option<&NoteEvent>) -> bool {
    match next {
        Some(next) => {
            let distance = (i16::from(note.pitch()) - i16::from(next.pitch())).abs();
            (1..=2).contains(&distance)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const NO_RANDOM: AdaptConfig = AdaptConfig {
        jitter: false,
        lean: false,
    };

    fn phrase_with(notes: &[(u8, f64, f64)]) -> Phrase {
        // (pitch, duration, position)
        let mut phrase = Phrase::new(0, false);
        for (pitch, duration, position) in notes {
            phrase
                .add(NoteEvent::new(*pitch, *duration, 100, *position).unwrap(), false)
                .unwrap();
        }
        phrase
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1234)
    }

    #[test]
    fn test_slow_tempo_is_identity_without_randomness() {
        // At the slow threshold the scale is 1.0, so deviations survive
        // unscaled and nothing changes once jitter/lean are off.
        let adapter = BassTempoAdapter::new(GrooveProfile::Neutral, NO_RANDOM);
        let phrase = phrase_with(&[(40, 0.5, 1.05), (43, 0.5, 2.3)]);
        let map = adapter.adapt(&phrase, |_| true, 120.0, TimeSignature::four_four(), &mut rng());
        assert!(map.is_empty());
    }

    #[test]
    fn test_fast_tempo_contracts_deviation() {
        let adapter = BassTempoAdapter::new(
            GrooveProfile::Neutral,
            AdaptConfig {
                jitter: false,
                lean: false,
            },
        );
        // Grid 1.0, deviation +0.05; far from pitch 43 so no approach rule.
        let phrase = phrase_with(&[(40, 0.5, 1.05)]);
        let map = adapter.adapt(&phrase, |_| true, 200.0, TimeSignature::four_four(), &mut rng());
        assert_eq!(map.len(), 1);
        let new_note = &map[0].1;
        assert!((new_note.position() - (1.0 + 0.05 * MICRO_SCALE_FAST)).abs() < 1e-9);
    }

    #[test]
    fn test_forward_lean_only_at_speed() {
        let with_lean = AdaptConfig {
            jitter: false,
            lean: true,
        };
        let adapter = BassTempoAdapter::new(GrooveProfile::Neutral, with_lean);

        // Exactly on the grid: at slow tempo the lean term is zero, so the
        // note position is untouched.
        let slow_phrase = phrase_with(&[(40, 0.5, 4.0 + 1.0 / 3.0)]);
        let slow = adapter.adapt(&slow_phrase, |_| true, 110.0, TimeSignature::four_four(), &mut rng());
        assert!(slow.iter().all(|(_, n)| (n.position() - slow_phrase.notes().next().unwrap().position()).abs() < 1e-9));

        // At the fast threshold the full -6 ms lean applies: -0.02 beats
        // at 200 BPM.
        let fast_phrase = phrase_with(&[(40, 0.5, 4.0 + 1.0 / 3.0)]);
        let original = fast_phrase.notes().next().unwrap().position();
        let fast = adapter.adapt(&fast_phrase, |_| true, 200.0, TimeSignature::four_four(), &mut rng());
        let new_pos = fast
            .iter()
            .find_map(|(id, n)| (*id == fast_phrase.notes().next().unwrap().id()).then_some(n.position()))
            .unwrap();
        assert!((new_pos - (original - 0.02)).abs() < 1e-9);
    }

    #[test]
    fn test_strong_beat_accent_and_clamp() {
        let adapter = BassTempoAdapter::new(GrooveProfile::Neutral, NO_RANDOM);
        let mut phrase = Phrase::new(0, false);
        phrase
            .add(NoteEvent::new(40, 1.0, 100, 4.0).unwrap(), false) // beat 1 of bar 2
            .unwrap();
        phrase
            .add(NoteEvent::new(40, 1.0, 125, 6.0).unwrap(), false) // beat 3 in 4/4
            .unwrap();
        phrase
            .add(NoteEvent::new(40, 1.0, 100, 5.0).unwrap(), false) // weak beat
            .unwrap();

        let map = adapter.adapt(&phrase, |_| true, 200.0, TimeSignature::four_four(), &mut rng());
        let velocity_at = |pos: f64| {
            map.iter()
                .find(|(id, _)| phrase.note(*id).unwrap().position() == pos)
                .map(|(_, n)| n.velocity())
        };
        assert_eq!(velocity_at(4.0), Some(108));
        assert_eq!(velocity_at(6.0), Some(127), "accent clamps at 127");
        // The weak-beat note still appears (legato change) but keeps its
        // velocity.
        assert_eq!(velocity_at(5.0), Some(100));
    }

    #[test]
    fn test_chromatic_approach_shortened_at_speed() {
        let adapter = BassTempoAdapter::new(GrooveProfile::Neutral, NO_RANDOM);
        // 41 -> 40: one semitone, an approach note. The next note is far
        // from anything, so only legato applies to it.
        let phrase = phrase_with(&[(41, 1.0, 0.0), (40, 1.0, 1.0)]);
        let map = adapter.adapt(&phrase, |_| true, 200.0, TimeSignature::four_four(), &mut rng());

        let duration_of = |pitch: u8| {
            map.iter()
                .find(|(id, _)| phrase.note(*id).unwrap().pitch() == pitch)
                .map(|(_, n)| n.duration())
                .unwrap()
        };
        assert!((duration_of(41) - LEGATO_FAST * APPROACH_SHORTEN_FAST).abs() < 1e-9);
        assert!((duration_of(40) - LEGATO_FAST).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_deterministic_and_clamped() {
        let adapter = BassTempoAdapter::new(GrooveProfile::Neutral, AdaptConfig::default());
        let phrase = phrase_with(&[(40, 0.5, 0.0), (41, 0.5, 1.0), (43, 0.5, 2.0), (45, 0.5, 3.0)]);
        let ts = TimeSignature::four_four();

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = adapter.adapt(&phrase, |_| true, 170.0, ts, &mut rng_a);
        let b = adapter.adapt(&phrase, |_| true, 170.0, ts, &mut rng_b);
        assert_eq!(a.len(), b.len());
        for ((id_a, note_a), (id_b, note_b)) in a.iter().zip(b.iter()) {
            assert_eq!(id_a, id_b);
            assert_eq!(note_a.position(), note_b.position());
        }

        // Jitter (plus lean) can never push a note more than the clamp +
        // lean allows from its deterministic base.
        let max_shift = ms_to_beats(JITTER_MAX_MS + 6.0, 170.0);
        for (id, new_note) in &a {
            let old = phrase.note(*id).unwrap();
            let grid = nearest_swing_grid(old.position());
            assert!((new_note.position() - grid).abs() <= (old.position() - grid).abs() + max_shift);
        }
    }

    #[test]
    fn test_disabled_profile_short_circuits() {
        let adapter = BassTempoAdapter::new(GrooveProfile::Disabled, AdaptConfig::default());
        let phrase = phrase_with(&[(40, 0.5, 1.05)]);
        let map = adapter.adapt(&phrase, |_| true, 220.0, TimeSignature::four_four(), &mut rng());
        assert!(map.is_empty());
    }

    #[test]
    fn test_apply_commits_one_edit() {
        let adapter = BassTempoAdapter::new(GrooveProfile::Neutral, NO_RANDOM);
        let mut phrase = phrase_with(&[(40, 1.0, 1.05), (47, 1.0, 2.3)]);
        let edit = adapter
            .apply(&mut phrase, |_| true, 200.0, TimeSignature::four_four(), &mut rng())
            .unwrap()
            .expect("fast tempo changes something");
        assert!(!edit.is_no_op());
        // Positions were contracted toward the swing grid: 1.05 moves back
        // toward 1.0, while 2.3 moves forward toward 2.333.
        let positions: Vec<f64> = phrase.notes().map(|n| n.position()).collect();
        assert!(positions[0] < 1.05);
        assert!(positions[1] > 2.3);
    }
}
