//! Tempo adaptation for drum phrases.
//!
//! Each percussion role reacts differently to speed: the timekeepers (ride
//! and hi-hat) keep most of their recorded feel, the snare and auxiliary
//! voices tighten more, and the bass drum locks hardest to the grid. On
//! top of the per-role microtiming contraction, dynamics are compressed
//! toward a midpoint, ghost notes fade, and note lengths shorten slightly.
//! There is no forward lean for drums; drive comes from the per-role
//! tightening alone.

use super::{
    jitter_ms, lerp, microtiming_scale, ms_to_beats, nearest_swing_grid, tempo_factor,
    AdaptConfig, GrooveProfile, CHANGE_EPS,
};
use crate::phrase::{clamp_audible_velocity, EventId, NoteEvent, NoteUpdate, Phrase, PhraseEdit, PhraseError};
use crate::timesig::TimeSignature;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Microtiming scale at the fast threshold, per role (1.0 at the slow
/// threshold). The bass drum is tightest; ride/hi-hat keep the most feel.
const MICRO_SCALE_FAST_KICK: f64 = 0.30;
const MICRO_SCALE_FAST_SNARE: f64 = 0.45;
const MICRO_SCALE_FAST_OTHER: f64 = 0.45;
const MICRO_SCALE_FAST_CYMBAL: f64 = 0.65;

/// Jitter sigma in milliseconds at the slow / fast thresholds.
const JITTER_SIGMA_SLOW_MS: f64 = 3.5;
const JITTER_SIGMA_FAST_MS: f64 = 2.0;

/// Hard clamp on a single jitter sample.
const JITTER_MAX_MS: f64 = 10.0;

/// Velocity midpoint dynamics are compressed toward.
const DYNAMIC_MIDPOINT: f64 = 64.0;

/// Snare-specific compression amount at the fast threshold.
const SNARE_COMPRESS_FAST: f64 = 0.30;

/// Kit-wide compression amount at the fast threshold.
const GLOBAL_COMPRESS_FAST: f64 = 0.15;

/// Velocities below this count as ghost notes.
const GHOST_VELOCITY: u8 = 45;

/// Ghost-note attenuation at the fast threshold.
const GHOST_ATTENUATION_FAST: f64 = 0.25;

/// Legato fraction at the fast threshold (1.0 at the slow threshold).
const LEGATO_FAST: f64 = 0.90;

/// Classification of a percussion pitch, used to pick adaptation
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrumRole {
    /// Ride, hi-hat and other cymbals: the timekeepers.
    Cymbal,
    /// Snare drum voices, including rimshots and side sticks.
    Snare,
    /// Bass drum voices.
    Kick,
    /// Everything else (toms, percussion).
    Other,
}

/// Pitch→role classifier built from caller-supplied pitch sets.
///
/// The sets come from whatever drum-kit catalog the caller uses; this
/// crate only consumes the classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumKitMap {
    cymbals: HashSet<u8>,
    snares: HashSet<u8>,
    kicks: HashSet<u8>,
}

impl DrumKitMap {
    /// Creates a classifier from explicit pitch sets. Overlaps resolve in
    /// favor of kick, then snare, then cymbal.
    pub fn new(
        cymbals: impl IntoIterator<Item = u8>,
        snares: impl IntoIterator<Item = u8>,
        kicks: impl IntoIterator<Item = u8>,
    ) -> Self {
        Self {
            cymbals: cymbals.into_iter().collect(),
            snares: snares.into_iter().collect(),
            kicks: kicks.into_iter().collect(),
        }
    }

    /// The General MIDI percussion mapping.
    pub fn standard() -> Self {
        Self::new(
            // Hi-hats, rides, crashes, splash, china.
            [42, 44, 46, 49, 51, 52, 53, 55, 57, 59],
            // Acoustic/electric snare plus side stick.
            [37, 38, 40],
            // Acoustic and electric bass drum.
            [35, 36],
        )
    }

    /// Classifies a pitch.
    pub fn role(&self, pitch: u8) -> DrumRole {
        if self.kicks.contains(&pitch) {
            DrumRole::Kick
        } else if self.snares.contains(&pitch) {
            DrumRole::Snare
        } else if self.cymbals.contains(&pitch) {
            DrumRole::Cymbal
        } else {
            DrumRole::Other
        }
    }
}

/// Stateless tempo adapter for drum phrases.
#[derive(Debug, Clone, Copy)]
pub struct DrumsTempoAdapter {
    profile: GrooveProfile,
    config: AdaptConfig,
}

impl DrumsTempoAdapter {
    /// Creates an adapter with the given groove profile and feature config.
    pub fn new(profile: GrooveProfile, config: AdaptConfig) -> Self {
        Self { profile, config }
    }

    /// Computes the replacement map for adapting `phrase` to `tempo`.
    ///
    /// Only notes accepted by `filter` are considered, and a pair is
    /// emitted only when position, velocity or duration actually changed.
    pub fn adapt(
        &self,
        phrase: &Phrase,
        filter: impl Fn(&NoteEvent) -> bool,
        tempo: f64,
        time_signature: TimeSignature,
        kit: &DrumKitMap,
        rng: &mut StdRng,
    ) -> Vec<(EventId, NoteEvent)> {
        if self.profile == GrooveProfile::Disabled {
            return Vec::new();
        }
        let factor = tempo_factor(tempo);
        let sigma_ms = lerp(JITTER_SIGMA_SLOW_MS, JITTER_SIGMA_FAST_MS, factor);

        let mut replacements = Vec::new();
        for note in phrase.notes().filter(|n| filter(n)) {
            let role = kit.role(note.pitch());
            let scale_fast = match role {
                DrumRole::Kick => MICRO_SCALE_FAST_KICK,
                DrumRole::Snare => MICRO_SCALE_FAST_SNARE,
                DrumRole::Cymbal => MICRO_SCALE_FAST_CYMBAL,
                DrumRole::Other => MICRO_SCALE_FAST_OTHER,
            };
            let scale = microtiming_scale(1.0, scale_fast, factor, self.profile);

            let grid = nearest_swing_grid(note.position());
            let on_strong_beat = grid.fract() == 0.0 && time_signature.is_strong_position(grid);

            let mut new_pos = grid + (note.position() - grid) * scale;
            if self.config.jitter {
                let jitter = jitter_ms(rng, sigma_ms, JITTER_MAX_MS, on_strong_beat);
                new_pos += ms_to_beats(jitter, tempo);
            }
            new_pos = new_pos.max(0.0);

            let mut velocity = f64::from(note.velocity());
            if role == DrumRole::Snare {
                velocity = DYNAMIC_MIDPOINT
                    + (velocity - DYNAMIC_MIDPOINT) * (1.0 - SNARE_COMPRESS_FAST * factor);
            }
            velocity = DYNAMIC_MIDPOINT
                + (velocity - DYNAMIC_MIDPOINT) * (1.0 - GLOBAL_COMPRESS_FAST * factor);
            if note.velocity() < GHOST_VELOCITY {
                velocity *= 1.0 - GHOST_ATTENUATION_FAST * factor;
            }
            let velocity = clamp_audible_velocity(velocity.round() as i32);

            let duration = note.duration() * lerp(1.0, LEGATO_FAST, factor);

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
                Err(err) => tracing::warn!(%err, "skipping unadaptable note"),
            }
        }
        tracing::debug!(
            tempo,
            factor,
            replaced = replacements.len(),
            "drums tempo adaptation computed"
        );
        replacements
    }

    /// Computes the replacement map and commits it through one atomic
    /// `replace_all`.
    pub fn apply(
        &self,
        phrase: &mut Phrase,
        filter: impl Fn(&NoteEvent) -> bool,
        tempo: f64,
        time_signature: TimeSignature,
        kit: &DrumKitMap,
        rng: &mut StdRng,
    ) -> Result<Option<PhraseEdit>, PhraseError> {
        let replacements = self.adapt(phrase, filter, tempo, time_signature, kit, rng);
        if replacements.is_empty() {
            return Ok(None);
        }
        phrase.replace_all(replacements, false).map(Some)
    }
}
