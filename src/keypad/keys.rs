//! Keypad input codes and key mapping
//!
//! Provides the input code type shared by the whole engine, the explicit
//! set type used for per-state valid inputs, and the mapping from raw
//! keypad characters to codes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fsm::EngineError;

/// Number of distinct input codes: digits 0-9, `*` and confirm.
pub const MAX_INPUT: usize = 12;

/// A single keypad input code in `0..MAX_INPUT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct InputCode(u8);

impl InputCode {
    /// Create an input code, rejecting values outside the keypad range
    pub fn new(code: u8) -> Result<Self, EngineError> {
        if usize::from(code) < MAX_INPUT {
            Ok(Self(code))
        } else {
            Err(EngineError::InputOutOfRange(code))
        }
    }

    /// The raw numeric code
    pub const fn value(self) -> u8 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for InputCode {
    type Error = EngineError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}

impl From<InputCode> for u8 {
    fn from(code: InputCode) -> Self {
        code.0
    }
}

impl fmt::Display for InputCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of input codes a state accepts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSet(BTreeSet<InputCode>);

impl InputSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code; returns false if it was already present
    pub fn insert(&mut self, code: InputCode) -> bool {
        self.0.insert(code)
    }

    pub fn contains(&self, code: InputCode) -> bool {
        self.0.contains(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate codes in ascending order
    pub fn iter(&self) -> impl Iterator<Item = InputCode> + '_ {
        self.0.iter().copied()
    }

    /// Build a set from raw codes, failing on the first out-of-range code
    pub fn from_codes(codes: &[u8]) -> Result<Self, EngineError> {
        codes.iter().map(|&c| InputCode::new(c)).collect()
    }
}

impl FromIterator<InputCode> for InputSet {
    fn from_iter<I: IntoIterator<Item = InputCode>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Maps raw keypad characters to input codes
///
/// `*` maps to the go-back code, ASCII digits to their own value, the
/// optional confirm key to the continue code, and anything else to the
/// repeat code. Line terminators carry no input and are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    /// Code that replays the current state's content
    pub repeat: InputCode,
    /// Code produced by `*`
    pub back: InputCode,
    /// Code used for continue/confirm
    pub proceed: InputCode,
    /// Optional character that produces the continue code
    pub confirm_key: Option<char>,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            repeat: InputCode(0),
            back: InputCode(10),
            proceed: InputCode(11),
            confirm_key: None,
        }
    }
}

impl KeyMap {
    /// Map one raw character to an input code
    pub fn map_key(&self, key: char) -> Option<InputCode> {
        match key {
            '\r' | '\n' => None,
            '*' => Some(self.back),
            c if Some(c) == self.confirm_key => Some(self.proceed),
            c => match c.to_digit(10) {
                // digits are always inside the keypad range
                Some(d) => Some(InputCode(d as u8)),
                None => Some(self.repeat),
            },
        }
    }
}
