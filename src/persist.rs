//! Phrase persistence: a pipe-delimited text grammar and a compact binary
//! format.
//!
//! The text grammar is for human-inspectable save files and tests:
//!
//! ```text
//! NoteEvent:   <pitch>,<accidental>,<velocity>,<duration>:<position>
//! Phrase:      [<channel>|<NoteEvent>|<NoteEvent>|...]
//! SizedPhrase: [<channel>|<from>|<to>|<num>/<den>|<NoteEvent>|...]
//! ```
//!
//! The channel token is prefixed with `d` for drum phrases (e.g. `d9`).
//! Loading remints note ids: a round trip reproduces value-equal notes,
//! never identity-equal ones. Malformed input fails with a descriptive
//! error and no partial object.
//!
//! The binary format serializes the same document through bincode.

use crate::phrase::{
    Accidental, NoteEvent, Phrase, PhraseBounds, PhraseError, Properties, SizedPhrase,
};
use crate::timesig::TimeSignatureError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when parsing persisted phrases.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input was empty where a value was required.
    #[error("empty {0}")]
    Empty(&'static str),

    /// Structural problem: missing delimiter, wrong field count, etc.
    #[error("malformed {what}: '{text}'")]
    Malformed { what: &'static str, text: String },

    /// A numeric field failed to parse.
    #[error("invalid number '{text}' in {what}")]
    InvalidNumber { what: &'static str, text: String },

    /// The accidental token was neither `b` nor `#`.
    #[error("invalid accidental '{0}' (expected 'b' or '#')")]
    InvalidAccidental(String),

    /// The time signature field was unusable.
    #[error(transparent)]
    TimeSignature(#[from] TimeSignatureError),

    /// A parsed value violated a phrase precondition.
    #[error(transparent)]
    Phrase(#[from] PhraseError),

    /// Binary (de)serialization failed.
    #[error(transparent)]
    Binary(#[from] bincode::Error),

    /// A note's client-property table failed to (de)serialize.
    #[error("invalid property table: {0}")]
    Properties(#[from] serde_json::Error),
}

/// Serializable phrase document for the binary format.
#[derive(Debug, Serialize, Deserialize)]
struct PhraseDoc {
    channel: u8,
    drums: bool,
    bounds: Option<PhraseBounds>,
    notes: Vec<NoteDoc>,
}

/// One note in the binary document. Client properties are carried as a
/// JSON object string: bincode is not self-describing, so arbitrary JSON
/// values cannot pass through it directly.
#[derive(Debug, Serialize, Deserialize)]
struct NoteDoc {
    pitch: u8,
    velocity: u8,
    duration: f64,
    position: f64,
    accidental: Accidental,
    properties: String,
}

impl NoteDoc {
    fn from_note(note: &NoteEvent) -> Result<Self, ParseError> {
        Ok(Self {
            pitch: note.pitch(),
            velocity: note.velocity(),
            duration: note.duration(),
            position: note.position(),
            accidental: note.accidental(),
            properties: serde_json::to_string(note.properties())?,
        })
    }

    fn into_note(self) -> Result<NoteEvent, ParseError> {
        let mut note = NoteEvent::new(self.pitch, self.duration, self.velocity, self.position)?
            .with_accidental(self.accidental);
        let properties: Properties = serde_json::from_str(&self.properties)?;
        for (key, value) in properties {
            note.set_property(key, value);
        }
        Ok(note)
    }
}

/// Formats a note event in the text grammar.
pub fn note_event_to_string(note: &NoteEvent) -> String {
    let accidental = match note.accidental() {
        Accidental::Flat => "b",
        Accidental::Sharp => "#",
    };
    format!(
        "{},{},{},{}:{}",
        note.pitch(),
        accidental,
        note.velocity(),
        note.duration(),
        note.position()
    )
}

/// Parses a note event from the text grammar. The parsed note gets a fresh
/// id.
pub fn parse_note_event(s: &str) -> Result<NoteEvent, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::Empty("note event"));
    }
    let (head, position) = s.rsplit_once(':').ok_or_else(|| ParseError::Malformed {
        what: "note event (missing ':')",
        text: s.to_string(),
    })?;
    let fields: Vec<&str> = head.split(',').collect();
    if fields.len() != 4 {
        return Err(ParseError::Malformed {
            what: "note event (expected pitch,accidental,velocity,duration)",
            text: s.to_string(),
        });
    }

    let pitch: u8 = fields[0].trim().parse().map_err(|_| ParseError::InvalidNumber {
        what: "pitch",
        text: fields[0].to_string(),
    })?;
    let accidental = match fields[1].trim() {
        "b" => Accidental::Flat,
        "#" => Accidental::Sharp,
        other => return Err(ParseError::InvalidAccidental(other.to_string())),
    };
    let velocity: u8 = fields[2].trim().parse().map_err(|_| ParseError::InvalidNumber {
        what: "velocity",
        text: fields[2].to_string(),
    })?;
    let duration: f64 = fields[3].trim().parse().map_err(|_| ParseError::InvalidNumber {
        what: "duration",
        text: fields[3].to_string(),
    })?;
    let position: f64 = position.trim().parse().map_err(|_| ParseError::InvalidNumber {
        what: "position",
        text: position.to_string(),
    })?;

    let note = NoteEvent::new(pitch, duration, velocity, position)?;
    Ok(match accidental {
        Accidental::Flat => note,
        Accidental::Sharp => note.with_accidental(Accidental::Sharp),
    })
}

/// Formats a phrase in the text grammar.
pub fn phrase_to_string(phrase: &Phrase) -> String {
    let mut parts = vec![channel_token(phrase)];
    parts.extend(phrase.notes().map(note_event_to_string));
    format!("[{}]", parts.join("|"))
}

/// Parses a phrase from the text grammar.
pub fn parse_phrase(s: &str) -> Result<Phrase, ParseError> {
    let mut tokens = unwrap_brackets(s)?;
    let (channel, drums) = parse_channel_token(tokens.next().ok_or(ParseError::Empty("phrase"))?)?;
    let mut phrase = Phrase::new(channel, drums);
    add_note_tokens(&mut phrase, tokens)?;
    Ok(phrase)
}

/// Formats a sized phrase in the text grammar.
pub fn sized_phrase_to_string(phrase: &SizedPhrase) -> String {
    let range = phrase.beat_range();
    let mut parts = vec![
        channel_token(phrase),
        range.from.to_string(),
        range.to.to_string(),
        phrase.time_signature().to_string(),
    ];
    parts.extend(phrase.notes().map(note_event_to_string));
    format!("[{}]", parts.join("|"))
}

/// Parses a sized phrase from the text grammar.
pub fn parse_sized_phrase(s: &str) -> Result<SizedPhrase, ParseError> {
    let mut tokens = unwrap_brackets(s)?;
    let (channel, drums) =
        parse_channel_token(tokens.next().ok_or(ParseError::Empty("sized phrase"))?)?;
    let from = parse_float(tokens.next(), "range start")?;
    let to = parse_float(tokens.next(), "range end")?;
    let time_signature = tokens
        .next()
        .ok_or(ParseError::Empty("time signature"))?
        .trim()
        .parse()?;

    let range = crate::phrase::BeatRange::new(from, to)?;
    let mut phrase = SizedPhrase::new(channel, drums, range, time_signature);
    add_note_tokens(&mut phrase, tokens)?;
    Ok(phrase)
}

/// Serializes a phrase (sized or not) to the binary format.
pub fn to_binary(phrase: &Phrase) -> Result<Vec<u8>, ParseError> {
    let doc = PhraseDoc {
        channel: phrase.channel(),
        drums: phrase.is_drums(),
        bounds: phrase.bounds().copied(),
        notes: phrase
            .notes()
            .map(NoteDoc::from_note)
            .collect::<Result<_, _>>()?,
    };
    Ok(bincode::serialize(&doc)?)
}

/// Deserializes a phrase from the binary format. Note ids are reminted.
pub fn from_binary(data: &[u8]) -> Result<Phrase, ParseError> {
    let doc: PhraseDoc = bincode::deserialize(data)?;
    let mut phrase = match doc.bounds {
        Some(bounds) => Phrase::with_bounds(doc.channel, doc.drums, bounds),
        None => Phrase::new(doc.channel, doc.drums),
    };
    let notes = doc
        .notes
        .into_iter()
        .map(NoteDoc::into_note)
        .collect::<Result<Vec<_>, _>>()?;
    phrase.add_all(notes, false)?;
    Ok(phrase)
}

/// Deserializes a sized phrase from the binary format.
pub fn sized_from_binary(data: &[u8]) -> Result<SizedPhrase, ParseError> {
    let phrase = from_binary(data)?;
    if phrase.bounds().is_none() {
        return Err(ParseError::Malformed {
            what: "sized phrase (document has no bounds)",
            text: format!("{} bytes", data.len()),
        });
    }
    Ok(SizedPhrase::from_phrase(phrase))
}

fn channel_token(phrase: &Phrase) -> String {
    if phrase.is_drums() {
        format!("d{}", phrase.channel())
    } else {
        phrase.channel().to_string()
    }
}

fn parse_channel_token(token: &str) -> Result<(u8, bool), ParseError> {
    let token = token.trim();
    let (digits, drums) = match token.strip_prefix('d') {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    let channel: u8 = digits.parse().map_err(|_| ParseError::InvalidNumber {
        what: "channel",
        text: token.to_string(),
    })?;
    Ok((channel, drums))
}

fn unwrap_brackets(s: &str) -> Result<std::str::Split<'_, char>, ParseError> {
    let s = s.trim();
    let inner = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| ParseError::Malformed {
            what: "phrase (missing brackets)",
            text: s.to_string(),
        })?;
    if inner.is_empty() {
        return Err(ParseError::Empty("phrase"));
    }
    Ok(inner.split('|'))
}

fn parse_float(token: Option<&str>, what: &'static str) -> Result<f64, ParseError> {
    let token = token.ok_or(ParseError::Empty(what))?;
    token.trim().parse().map_err(|_| ParseError::InvalidNumber {
        what,
        text: token.to_string(),
    })
}

fn add_note_tokens<'a>(
    phrase: &mut Phrase,
    tokens: impl Iterator<Item = &'a str>,
) -> Result<(), ParseError> {
    let mut notes = Vec::new();
    for token in tokens {
        notes.push(parse_note_event(token)?);
    }
    phrase.add_all(notes, false)?;
    Ok(())
}
