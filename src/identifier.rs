//! Canonical tract identifiers.
//!
//! Tabular and geometry sources disagree on how a GEOID is encoded: the
//! walkability CSV often loses leading zeros (state FIPS `06` becomes `6`),
//! some exports carry an extra leading digit, and GeoJSON may store the id as
//! a number. Both sides are run through the same [`IdentifierNormalizer`]
//! before any comparison.

use crate::types::{CanonicalId, RawIdentifier};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_WIDTH: usize = 11;
pub const DEFAULT_PAD: char = '0';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("invalid identifier {raw}: {reason}")]
    InvalidIdentifier { raw: String, reason: String },
    #[error("pad character {0:?} must be an ASCII letter or digit")]
    InvalidPad(char),
}

impl IdentifierError {
    fn invalid(raw: &RawIdentifier, reason: impl Into<String>) -> Self {
        IdentifierError::InvalidIdentifier {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// What to do with an identifier longer than the canonical width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Rightmost `width` characters win.
    #[default]
    KeepTrailing,
    KeepLeading,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub id: CanonicalId,
    /// Original text when characters were dropped to reach the width.
    pub truncated: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct IdentifierNormalizer {
    width: usize,
    pad: char,
    overflow: OverflowPolicy,
}

impl Default for IdentifierNormalizer {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            pad: DEFAULT_PAD,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl IdentifierNormalizer {
    /// The pad must pass the same character check as identifiers, otherwise
    /// a padded id would not survive a second normalization.
    pub fn new(width: usize, pad: char, overflow: OverflowPolicy) -> Result<Self, IdentifierError> {
        if !pad.is_ascii_alphanumeric() {
            return Err(IdentifierError::InvalidPad(pad));
        }
        Ok(Self {
            width: width.max(1),
            pad,
            overflow,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn normalize(&self, raw: &RawIdentifier) -> Result<Normalized, IdentifierError> {
        let text = match raw {
            RawIdentifier::Text(s) => s.trim().to_string(),
            RawIdentifier::Integer(n) if *n < 0 => {
                return Err(IdentifierError::invalid(raw, "negative number"));
            }
            RawIdentifier::Integer(n) => n.to_string(),
        };

        if text.is_empty() {
            return Err(IdentifierError::invalid(raw, "empty"));
        }
        if let Some(c) = text.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(IdentifierError::invalid(
                raw,
                format!("unexpected character {:?}", c),
            ));
        }

        // ASCII only from here, so byte length == char count.
        let len = text.len();
        if len <= self.width {
            let mut padded = String::with_capacity(self.width);
            padded.extend(std::iter::repeat(self.pad).take(self.width - len));
            padded.push_str(&text);
            return Ok(Normalized {
                id: CanonicalId(padded),
                truncated: None,
            });
        }

        let kept = match self.overflow {
            OverflowPolicy::KeepTrailing => text[len - self.width..].to_string(),
            OverflowPolicy::KeepLeading => text[..self.width].to_string(),
            OverflowPolicy::Reject => {
                return Err(IdentifierError::invalid(
                    raw,
                    format!("{} characters, expected at most {}", len, self.width),
                ));
            }
        };

        Ok(Normalized {
            id: CanonicalId(kept),
            truncated: Some(text),
        })
    }

    /// Re-normalizes an already canonical id. Always a no-op for ids built by
    /// the same normalizer.
    pub fn renormalize(&self, id: &CanonicalId) -> Result<Normalized, IdentifierError> {
        self.normalize(&RawIdentifier::Text(id.as_str().to_string()))
    }
}
