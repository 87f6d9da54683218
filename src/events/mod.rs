//! Events module for dialogue progress
//!
//! Provides structured event types for state entry, segment playback,
//! input handling and session end. Events are broadcast to IPC
//! subscribers such as the button GUI.

use serde::{Deserialize, Serialize};

use crate::fsm::StateId;
use crate::keypad::InputCode;

/// Events emitted by the state machine and its playback scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A state became current and started presenting its content
    StateEntered { state: StateId },

    /// A segment of the current state started playing
    SegmentStarted { state: StateId, segment: usize },

    /// The state timed out without input and replayed its content
    ContentRepeated { state: StateId, play_count: u32 },

    /// Input was accepted and the state's action ran
    InputAccepted { state: StateId, input: InputCode },

    /// Input was not valid for the current state
    InputRejected { state: StateId, input: InputCode },

    /// Input arrived while a non-interruptable state was still playing
    InputDropped { state: StateId, input: InputCode },

    /// The stop state finished playing; the session is over
    SessionStopped,

    /// The session was halted by a fatal error
    SessionFault { message: String },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::StateEntered { state } => write!(f, "STATE_ENTERED ({state})"),
            EngineEvent::SegmentStarted { state, segment } => {
                write!(f, "SEGMENT_STARTED ({state}/{segment})")
            }
            EngineEvent::ContentRepeated { state, play_count } => {
                write!(f, "CONTENT_REPEATED ({state}, {play_count}x)")
            }
            EngineEvent::InputAccepted { state, input } => {
                write!(f, "INPUT_ACCEPTED ({state}: {input})")
            }
            EngineEvent::InputRejected { state, input } => {
                write!(f, "INPUT_REJECTED ({state}: {input})")
            }
            EngineEvent::InputDropped { state, input } => {
                write!(f, "INPUT_DROPPED ({state}: {input})")
            }
            EngineEvent::SessionStopped => write!(f, "SESSION_STOPPED"),
            EngineEvent::SessionFault { message } => write!(f, "SESSION_FAULT ({message})"),
        }
    }
}
