//! Engine error taxonomy

use crate::keypad::InputCode;

use super::transition::StateId;

/// Errors raised by the state machine and its playback scheduler
///
/// Recoverable errors leave the engine untouched. Fatal errors halt the
/// voting session: a mis-transitioned ballot dialogue is worse than a
/// restarted one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("input {input} is not valid in state {state}")]
    InvalidInput { state: StateId, input: InputCode },

    #[error("state machine is not running; call start() first")]
    NotRunning,

    #[error("no transition defined from state {state} on input {input}")]
    NoTransition { state: StateId, input: InputCode },

    #[error("transition from state {from} on input {input} targets unknown state {target}")]
    UnknownState {
        from: StateId,
        input: InputCode,
        target: StateId,
    },

    #[error("no playable media for {media} in any supported format")]
    MissingContent { media: String },

    #[error("failed to open media {path}: {reason}")]
    Playback { path: String, reason: String },

    #[error("state {state} repeated {repeats} times without input")]
    TimeoutExceeded { state: StateId, repeats: u32 },

    #[error("input code {0} is outside the keypad range")]
    InputOutOfRange(u8),

    #[error("state {0} does not exist")]
    NoSuchState(StateId),

    #[error("start state is not set")]
    StartStateUnset,

    #[error("stop state is not set")]
    StopStateUnset,

    #[error("state machine has already been started")]
    AlreadyStarted,
}

impl EngineError {
    /// Whether this error ends the voting session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownState { .. }
                | EngineError::MissingContent { .. }
                | EngineError::Playback { .. }
                | EngineError::TimeoutExceeded { .. }
        )
    }

    /// Stable machine-readable code for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput { .. } => "invalid_input",
            EngineError::NotRunning => "not_running",
            EngineError::NoTransition { .. } => "no_transition",
            EngineError::UnknownState { .. } => "unknown_state",
            EngineError::MissingContent { .. } => "missing_content",
            EngineError::Playback { .. } => "playback",
            EngineError::TimeoutExceeded { .. } => "timeout_exceeded",
            EngineError::InputOutOfRange(_) => "input_out_of_range",
            EngineError::NoSuchState(_) => "no_such_state",
            EngineError::StartStateUnset => "start_state_unset",
            EngineError::StopStateUnset => "stop_state_unset",
            EngineError::AlreadyStarted => "already_started",
        }
    }
}
