//! Dialogue state machine module
//!
//! Builds the ballot dialogue out of content states connected by
//! per-state transition tables, and runs it against keypad input.

mod action;
mod content;
mod error;
mod machine;
pub(crate) mod session;
mod transition;

pub use action::StateAction;
pub use content::{ContentState, StateSpec};
pub use error::EngineError;
pub use machine::{FiniteStateMachine, InputOutcome, KeyPress};
pub use session::{EngineConfig, Lifecycle, Timing, VoiceSettings};
pub use transition::{StateId, TransitionTable};
