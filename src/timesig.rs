//! Time signature representation.
//!
//! Carries beats-per-bar for strong-beat detection and bar arithmetic.
//! The denominator is kept for display and persistence; positions in this
//! crate are always expressed in beats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for an unusable time signature value or string.
#[derive(Debug, Error)]
#[error("invalid time signature: {0}")]
pub struct TimeSignatureError(String);

/// A musical time signature such as 4/4 or 3/4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    upper: u8,
    lower: u8,
}

impl TimeSignature {
    /// Creates a time signature.
    ///
    /// # Errors
    ///
    /// Fails if the numerator is zero or the denominator is not a power of
    /// two in 1-32.
    pub fn new(upper: u8, lower: u8) -> Result<Self, TimeSignatureError> {
        if upper == 0 {
            return Err(TimeSignatureError(format!("{upper}/{lower}")));
        }
        if !matches!(lower, 1 | 2 | 4 | 8 | 16 | 32) {
            return Err(TimeSignatureError(format!("{upper}/{lower}")));
        }
        Ok(Self { upper, lower })
    }

    /// Common-time 4/4.
    pub fn four_four() -> Self {
        Self { upper: 4, lower: 4 }
    }

    /// Beats per bar (the numerator).
    pub fn beats_per_bar(&self) -> u8 {
        self.upper
    }

    /// The denominator (beat unit as a power of two).
    pub fn lower(&self) -> u8 {
        self.lower
    }

    /// The zero-based beat index within the bar containing `pos`.
    pub fn beat_in_bar(&self, pos: f64) -> u8 {
        let whole = pos.max(0.0).floor() as u64;
        (whole % u64::from(self.upper)) as u8
    }

    /// Whether the given zero-based beat of a bar is a strong beat.
    ///
    /// Beat 0 is always strong; in 4/4, beat 2 (the musician's "beat 3")
    /// is too.
    pub fn is_strong_beat(&self, beat_in_bar: u8) -> bool {
        beat_in_bar == 0 || (self.upper == 4 && self.lower == 4 && beat_in_bar == 2)
    }

    /// Whether `pos` falls on a strong whole beat of its bar.
    pub fn is_strong_position(&self, pos: f64) -> bool {
        self.is_strong_beat(self.beat_in_bar(pos))
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.upper, self.lower)
    }
}

impl FromStr for TimeSignature {
    type Err = TimeSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (upper, lower) = s
            .split_once('/')
            .ok_or_else(|| TimeSignatureError(s.to_string()))?;
        let upper: u8 = upper
            .trim()
            .parse()
            .map_err(|_| TimeSignatureError(s.to_string()))?;
        let lower: u8 = lower
            .trim()
            .parse()
            .map_err(|_| TimeSignatureError(s.to_string()))?;
        Self::new(upper, lower)
    }
}
