//! Ballot dialogue state machine
//!
//! Owns the content states and their transition tables. All input, from
//! the keypad thread, the IPC server or a state's own action, goes through
//! [`FiniteStateMachine::give_input`], a single critical section that
//! applies at most one transition at a time.
//!
//! Lifecycle: NotStarted -> Running -> Stopped. Stopped is terminal and is
//! reached when the stop state finishes playing, on [`stop`], or on a fatal
//! fault.
//!
//! [`stop`]: FiniteStateMachine::stop

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::events::EngineEvent;
use crate::keypad::{InputCode, InputSet, KeypadEvent};
use crate::playback::{CaptionDisplay, Playback};

use super::content::{ContentState, StateSpec};
use super::error::EngineError;
use super::session::{EngineConfig, Lifecycle, Session};
use super::transition::{StateId, TransitionTable};

/// Result of a dispatched input that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InputOutcome {
    /// The machine moved to a new state
    Transitioned { from: StateId, to: StateId },
    /// The stop state was presented and the session is over
    Stopped { from: StateId },
    /// The state is not interruptable and was still playing
    Dropped { state: StateId },
    /// Another input was being dispatched
    Busy,
}

/// An accepted input and the state it was given in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    pub state: StateId,
    pub input: InputCode,
}

pub struct FiniteStateMachine {
    states: Vec<Arc<ContentState>>,
    transitions: Vec<TransitionTable>,
    start_state: Option<StateId>,
    stop_state: Option<StateId>,
    session: Arc<Session>,
    dispatch: tokio::sync::Mutex<()>,
    current: Mutex<Option<StateId>>,
    history: Mutex<Vec<KeyPress>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FiniteStateMachine {
    pub fn new(
        playback: Arc<dyn Playback>,
        captions: Arc<dyn CaptionDisplay>,
        config: EngineConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            states: Vec::new(),
            transitions: Vec::new(),
            start_state: None,
            stop_state: None,
            session: Arc::new(Session::new(playback, captions, &config, events)),
            dispatch: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    // ---- construction ----

    /// Append a state; ids are assigned in insertion order from 0
    pub fn add_state(&mut self, spec: StateSpec) -> StateId {
        let id = StateId::new(self.states.len());
        self.states.push(Arc::new(ContentState::new(id, spec)));
        self.transitions.push(TransitionTable::new());
        debug!(state = %id, "state added");
        id
    }

    /// Record that `input` in state `from` leads to `to`
    ///
    /// `to` may name a state that has not been added yet.
    pub fn add_transition(
        &mut self,
        from: StateId,
        to: StateId,
        input: InputCode,
    ) -> Result<(), EngineError> {
        let table = self
            .transitions
            .get_mut(from.index())
            .ok_or(EngineError::NoSuchState(from))?;
        table.set(input, to);
        Ok(())
    }

    /// Target for inputs of `from` without an explicit transition
    pub fn set_default_transition(&mut self, from: StateId, to: StateId) -> Result<(), EngineError> {
        let table = self
            .transitions
            .get_mut(from.index())
            .ok_or(EngineError::NoSuchState(from))?;
        table.set_fallback(to);
        Ok(())
    }

    pub fn set_start_state(&mut self, id: StateId) -> Result<(), EngineError> {
        self.check_state(id)?;
        self.start_state = Some(id);
        Ok(())
    }

    pub fn set_stop_state(&mut self, id: StateId) -> Result<(), EngineError> {
        self.check_state(id)?;
        self.stop_state = Some(id);
        Ok(())
    }

    /// Repeat ceiling for every state that does not set its own
    pub fn set_max_repeats(&self, max_repeats: u32) {
        self.session.set_max_repeats(max_repeats);
    }

    fn check_state(&self, id: StateId) -> Result<(), EngineError> {
        if id.index() < self.states.len() {
            Ok(())
        } else {
            Err(EngineError::NoSuchState(id))
        }
    }

    // ---- lifecycle ----

    /// Make the start state current and present it
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, since presenting the
    /// start state spawns its playback timers.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.session.lifecycle() != Lifecycle::NotStarted {
            return Err(EngineError::AlreadyStarted);
        }
        let start = self.start_state.ok_or(EngineError::StartStateUnset)?;
        self.stop_state.ok_or(EngineError::StopStateUnset)?;

        self.session.set_lifecycle(Lifecycle::Running);
        info!(state = %start, states = self.states.len(), "voting session started");

        self.enter(start, true)
    }

    /// Halt the session and cancel any playback
    pub fn stop(&self) {
        let was_running = self.session.is_running();
        self.session.set_lifecycle(Lifecycle::Stopped);
        if let Some(state) = self.current_content() {
            state.cancel();
        }
        if was_running {
            info!("voting session stopped");
            self.session.emit(EngineEvent::SessionStopped);
        }
    }

    /// Start the machine if needed and dispatch keypad input until it stops
    ///
    /// Returns the fault that halted the session, if any.
    pub async fn run(&self, mut keys: mpsc::Receiver<KeypadEvent>) -> Result<(), EngineError> {
        if self.session.lifecycle() == Lifecycle::NotStarted {
            self.start()?;
        }

        let mut lifecycle = self.session.watch_lifecycle();
        let mut input_open = true;

        while self.is_running() {
            tokio::select! {
                event = keys.recv(), if input_open => match event {
                    Some(KeypadEvent::Key(input)) => match self.give_input(input).await {
                        Ok(outcome) => debug!(?outcome, "input dispatched"),
                        Err(e) if e.is_fatal() => break,
                        Err(EngineError::NotRunning) => break,
                        Err(e) => warn!(error = %e, "input not applied"),
                    },
                    Some(KeypadEvent::Closed) | None => {
                        info!("input source closed");
                        input_open = false;
                    }
                },
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        match self.session.fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    // ---- dispatch ----

    /// Apply one input to the current state
    pub async fn give_input(&self, input: InputCode) -> Result<InputOutcome, EngineError> {
        if !self.session.is_running() {
            return Err(EngineError::NotRunning);
        }
        let Ok(_guard) = self.dispatch.try_lock() else {
            debug!(input = %input, "dispatch in progress, input ignored");
            return Ok(InputOutcome::Busy);
        };
        if !self.session.is_running() {
            return Err(EngineError::NotRunning);
        }

        let from = self.current_state().ok_or(EngineError::NotRunning)?;
        let state = Arc::clone(&self.states[from.index()]);

        if !state.accept(input) {
            debug!(state = %from, input = %input, "input not valid here");
            self.session.emit(EngineEvent::InputRejected { state: from, input });
            return Err(EngineError::InvalidInput { state: from, input });
        }

        let target = self.transitions[from.index()]
            .resolve(input)
            .ok_or(EngineError::NoTransition { state: from, input })?;
        if target.index() >= self.states.len() {
            return Err(self.fail(EngineError::UnknownState { from, input, target }));
        }

        if state.is_interruptable() {
            state.cancel();
            tokio::time::sleep(self.session.timing().settle_delay).await;
            if !self.session.is_running() {
                return Err(EngineError::NotRunning);
            }
        } else if state.is_active() {
            debug!(state = %from, input = %input, "still playing, input dropped");
            self.session.emit(EngineEvent::InputDropped { state: from, input });
            return Ok(InputOutcome::Dropped { state: from });
        } else {
            state.cancel();
        }

        self.session.clear_captions();
        state.run_action(input);
        lock(&self.history).push(KeyPress { state: from, input });
        self.session.emit(EngineEvent::InputAccepted { state: from, input });
        info!(from = %from, to = %target, input = %input, "transition");

        if Some(target) == self.stop_state {
            self.enter(target, false)?;
            let stop = &self.states[target.index()];
            stop.finished().await;
            stop.cancel();
            if self.session.is_running() {
                self.session.set_lifecycle(Lifecycle::Stopped);
                info!("ballot dialogue complete");
                self.session.emit(EngineEvent::SessionStopped);
            }
            return Ok(InputOutcome::Stopped { from });
        }

        self.enter(target, true)?;
        if !self.session.is_running() {
            self.states[target.index()].cancel();
        }
        Ok(InputOutcome::Transitioned { from, to: target })
    }

    fn enter(&self, id: StateId, allow_repeat: bool) -> Result<(), EngineError> {
        *lock(&self.current) = Some(id);
        self.session.emit(EngineEvent::StateEntered { state: id });
        self.states[id.index()]
            .present(&self.session, allow_repeat)
            .map_err(|e| self.fail(e))
    }

    /// Halt the session on a fatal error and hand the error back
    fn fail(&self, err: EngineError) -> EngineError {
        if let Some(state) = self.current_content() {
            state.cancel();
        }
        self.session.raise(err.clone());
        err
    }

    // ---- voice controls ----

    /// Set the output gain, clamped to `0.0..=1.0`
    pub fn set_gain(&self, level: f32) -> f32 {
        let level = self.session.set_gain(level);
        if let Some(state) = self.current_content() {
            state.set_gain(level);
        }
        level
    }

    /// Raise or lower the gain by one step
    pub fn adjust_gain(&self, up: bool) -> f32 {
        let step = self.session.gain_step();
        let current = self.session.gain();
        self.set_gain(if up { current + step } else { current - step })
    }

    /// Move the speech speed one level; applies from the next presentation
    pub fn adjust_speed(&self, faster: bool) -> u8 {
        let speed = self.session.step_speed(faster);
        info!(speed, "speech speed changed");
        speed
    }

    pub fn gain(&self) -> f32 {
        self.session.gain()
    }

    pub fn speed(&self) -> u8 {
        self.session.speed()
    }

    // ---- queries ----

    pub fn current_state(&self) -> Option<StateId> {
        *lock(&self.current)
    }

    fn current_content(&self) -> Option<Arc<ContentState>> {
        self.current_state()
            .and_then(|id| self.states.get(id.index()))
            .cloned()
    }

    /// Inputs the current state accepts; empty when no state is current
    pub fn valid_inputs(&self) -> InputSet {
        self.current_content()
            .map(|state| state.valid_inputs().clone())
            .unwrap_or_default()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.session.lifecycle()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// The fatal error that halted the session, if any
    pub fn fault(&self) -> Option<EngineError> {
        self.session.fault()
    }

    /// Accepted inputs in order
    pub fn history(&self) -> Vec<KeyPress> {
        lock(&self.history).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.session.subscribe()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, id: StateId) -> Option<&ContentState> {
        self.states.get(id.index()).map(Arc::as_ref)
    }

    pub fn transition(&self, from: StateId, input: InputCode) -> Option<StateId> {
        self.transitions.get(from.index())?.resolve(input)
    }

    pub fn start_state(&self) -> Option<StateId> {
        self.start_state
    }

    pub fn stop_state(&self) -> Option<StateId> {
        self.stop_state
    }

    /// One line per state: `id: targets`
    pub fn transitions_to_string(&self) -> String {
        let mut out = String::new();
        for (index, table) in self.transitions.iter().enumerate() {
            let _ = writeln!(out, "{index}: {table}");
        }
        out
    }
}

impl std::fmt::Debug for FiniteStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiniteStateMachine")
            .field("states", &self.states.len())
            .field("start_state", &self.start_state)
            .field("stop_state", &self.stop_state)
            .field("current", &self.current_state())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
