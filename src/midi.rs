//! Boundary conversion from phrases to MIDI track events.
//!
//! Produces the ordered note-on/note-off event stream an external MIDI
//! file writer or sequencer consumes. Beat positions are quantized to a
//! fixed 480 ticks-per-quarter-note resolution; at equal ticks, note-offs
//! sort before note-ons so a repeated pitch retriggers instead of being
//! swallowed.

use crate::phrase::Phrase;
use midly::num::{u28, u4, u7};
use midly::{MidiMessage, TrackEvent, TrackEventKind};

/// Ticks per beat (quarter note) - standard MIDI resolution.
pub const TICKS_PER_BEAT: u32 = 480;

/// Converts a beat position to ticks at the fixed resolution.
pub fn beats_to_ticks(beats: f64) -> u32 {
    (beats.max(0.0) * f64::from(TICKS_PER_BEAT)).round() as u32
}

/// A note-on or note-off at an absolute tick, before delta encoding.
/// Priority orders events sharing a tick: note-offs first.
struct TimedEvent {
    tick: u32,
    priority: u8,
    message: MidiMessage,
}

/// Converts a phrase to delta-timed MIDI track events.
///
/// Each note yields a `(note_on, note_off)` pair on the phrase's channel.
/// A note whose duration rounds to zero ticks still gets one tick between
/// on and off. The result carries no end-of-track marker; the consuming
/// writer owns track framing.
pub fn phrase_to_midi_events(phrase: &Phrase) -> Vec<TrackEvent<'static>> {
    let mut timed = Vec::with_capacity(phrase.len() * 2);
    for note in phrase.notes() {
        let on_tick = beats_to_ticks(note.position());
        let off_tick = beats_to_ticks(note.end_position()).max(on_tick + 1);
        timed.push(TimedEvent {
            tick: on_tick,
            priority: 1,
            message: MidiMessage::NoteOn {
                key: u7::new(note.pitch()),
                vel: u7::new(note.velocity().max(1)),
            },
        });
        timed.push(TimedEvent {
            tick: off_tick,
            priority: 0,
            message: MidiMessage::NoteOff {
                key: u7::new(note.pitch()),
                vel: u7::new(0),
            },
        });
    }
    timed.sort_by_key(|e| (e.tick, e.priority));

    let channel = u4::new(phrase.channel());
    let mut events = Vec::with_capacity(timed.len());
    let mut last_tick = 0;
    for event in timed {
        events.push(TrackEvent {
            delta: u28::new(event.tick - last_tick),
            kind: TrackEventKind::Midi {
                channel,
                message: event.message,
            },
        });
        last_tick = event.tick;
    }
    events
}
