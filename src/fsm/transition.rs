//! Per-state transition tables
//!
//! Each state owns a fixed-size table indexed by input code. Targets are not
//! validated when recorded: dialogues are built incrementally and forward
//! references to states that do not exist yet are normal. Bad targets
//! surface when they are traversed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keypad::{InputCode, MAX_INPUT};

/// Identifier of a state, assigned in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(usize);

impl StateId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mapping from input code to destination state for one state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTable {
    targets: [Option<StateId>; MAX_INPUT],
    fallback: Option<StateId>,
}

impl TransitionTable {
    /// Create a table with no transitions and no fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition to `target` on `input`, replacing any previous one
    pub fn set(&mut self, input: InputCode, target: StateId) {
        self.targets[input.index()] = Some(target);
    }

    /// Make every unset input lead to `target`
    pub fn set_fallback(&mut self, target: StateId) {
        self.fallback = Some(target);
    }

    /// The recorded target for `input`, or state 0 if none was recorded
    ///
    /// The default is indistinguishable from an explicit transition to
    /// state 0; use [`entry`](Self::entry) or [`resolve`](Self::resolve)
    /// when that matters.
    pub fn get(&self, input: InputCode) -> StateId {
        self.targets[input.index()].unwrap_or_default()
    }

    /// The explicitly recorded target for `input`
    pub fn entry(&self, input: InputCode) -> Option<StateId> {
        self.targets[input.index()]
    }

    /// The target dispatch follows: an explicit entry, else the fallback
    pub fn resolve(&self, input: InputCode) -> Option<StateId> {
        self.entry(input).or(self.fallback)
    }

    pub fn fallback(&self) -> Option<StateId> {
        self.fallback
    }
}

impl fmt::Display for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, target) in self.targets.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match target {
                Some(id) => write!(f, "{id}")?,
                None => write!(f, "-")?,
            }
        }
        if let Some(fallback) = self.fallback {
            write!(f, " (else {fallback})")?;
        }
        Ok(())
    }
}
