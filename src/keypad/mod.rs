//! Keypad module for voter input
//!
//! Maps raw keypad characters (digits, `*`, an optional confirm key) to
//! input codes and feeds them to the state machine from a reader thread.

mod keys;
mod listener;

pub use keys::{InputCode, InputSet, KeyMap, MAX_INPUT};
pub use listener::{KeypadError, KeypadEvent, KeypadListener};
