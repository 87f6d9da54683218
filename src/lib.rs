//! voice-ballot: audio-guided dialogue engine for accessible voting terminals
//!
//! The engine drives a voter through a ballot dialogue using spoken prompts
//! and a numeric keypad, with no reliance on the screen:
//! - Finite state machine with per-state valid inputs and transition tables
//! - Timed, interruptable playback of ordered audio/caption segments
//! - Silence timeouts with auto-repeat and a maximum-repeat fail-safe
//! - Keypad listener and IPC front-end feeding a single dispatch section
//!
//! Audio decoding, ballot authoring and the button GUI are external
//! collaborators reached through the traits in [`playback`] and the
//! protocol in [`ipc`].

pub mod config;
pub mod dialogue;
pub mod events;
pub mod fsm;
pub mod ipc;
pub mod keypad;
pub mod lifecycle;
pub mod playback;

#[cfg(test)]
pub(crate) mod testing;

pub use events::EngineEvent;
pub use fsm::{EngineConfig, EngineError, FiniteStateMachine, InputOutcome, StateId, StateSpec};
pub use keypad::{InputCode, InputSet, KeyMap};
