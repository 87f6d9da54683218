//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::EngineEvent;
use crate::fsm::{InputOutcome, Lifecycle, StateId};
use crate::keypad::InputSet;

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from the button GUI to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current session status
    GetStatus,

    /// An on-screen keypad button was pressed
    Press { code: u8 },

    /// Louder (`up`) or quieter by one step
    AdjustGain { up: bool },

    /// Faster or slower speech by one level
    AdjustSpeed { faster: bool },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to engine event notifications
    Subscribe,
}

/// Responses from daemon to GUI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current session status
    Status(SessionStatus),

    /// Result of a button press
    Input(InputOutcome),

    /// Gain after an adjustment
    Gain { level: f32 },

    /// Speech speed after an adjustment
    Speed { level: u8 },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to GUI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: EngineEvent },
}

/// Session status snapshot
///
/// `valid_inputs` lets the GUI enable only the buttons the current state
/// accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Daemon version
    pub version: String,

    pub lifecycle: Lifecycle,

    pub current_state: Option<StateId>,

    pub valid_inputs: InputSet,

    pub speed: u8,

    pub gain: f32,

    /// Uptime in seconds
    pub uptime_secs: u64,
}
