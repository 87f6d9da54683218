//! Side-effect hooks attached to states

use crate::keypad::InputCode;

/// Action a state runs once per accepted input
///
/// Invoked after the state's playback has been halted and before the next
/// state is presented. Any `Fn(InputCode)` closure is an action.
pub trait StateAction: Send + Sync {
    fn perform(&self, input: InputCode);
}

impl<F> StateAction for F
where
    F: Fn(InputCode) + Send + Sync,
{
    fn perform(&self, input: InputCode) {
        self(input)
    }
}
