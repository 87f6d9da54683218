//! Dialogue files: a ballot dialogue described in JSON
//!
//! States are referred to by name so transitions can point forward to
//! states defined later in the file. Actions are named and resolved from
//! an [`ActionRegistry`] supplied by the host.
//!
//! ```json
//! {
//!   "start": "welcome",
//!   "stop": "goodbye",
//!   "states": [
//!     { "name": "welcome", "inputs": [11],
//!       "segments": [{ "media": "welcome.wav", "caption": "Welcome" }],
//!       "transitions": { "11": "goodbye" } },
//!     { "name": "goodbye", "segments": [{ "media": "goodbye.wav" }] }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fsm::{EngineError, FiniteStateMachine, StateAction, StateId, StateSpec};
use crate::keypad::{InputCode, InputSet};
use crate::playback::{Caption, MediaRef, Segment};

/// Errors loading or building a dialogue
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("failed to read dialogue {path}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid dialogue: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("state {0} is defined twice")]
    DuplicateState(String),

    #[error("state {state} refers to undefined state {target}")]
    UnknownTarget { state: String, target: String },

    #[error("state {state} uses unregistered action {action}")]
    UnknownAction { state: String, action: String },

    #[error("state {state} maps input {input} which it does not accept")]
    UnacceptedInput { state: String, input: u8 },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Named state actions available to dialogue files
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn StateAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, action: impl StateAction + 'static) {
        self.actions.insert(name.into(), Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StateAction>> {
        self.actions.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    /// Default repeat ceiling for every state
    #[serde(default)]
    pub max_repeats: Option<u32>,
    pub start: String,
    pub stop: String,
    pub states: Vec<StateDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<u8>,
    #[serde(default)]
    pub segments: Vec<SegmentDef>,
    #[serde(default = "enabled")]
    pub interruptable: bool,
    #[serde(default = "enabled")]
    pub repeatable: bool,
    #[serde(default)]
    pub max_repeats: Option<u32>,
    #[serde(default)]
    pub action: Option<String>,
    /// Input code to target state name
    #[serde(default)]
    pub transitions: BTreeMap<u8, String>,
    /// Target for valid inputs without an entry in `transitions`
    #[serde(default)]
    pub otherwise: Option<String>,
}

/// A segment; the caption defaults to the `.txt` file next to the media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDef {
    pub media: PathBuf,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_file: Option<PathBuf>,
    /// Play without a caption
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub verbatim: bool,
}

fn enabled() -> bool {
    true
}

impl SegmentDef {
    fn to_segment(&self) -> Segment {
        let media = if self.verbatim {
            MediaRef::verbatim(&self.media)
        } else {
            MediaRef::new(&self.media)
        };
        let caption = match (&self.caption, &self.caption_file) {
            _ if self.silent => None,
            (Some(text), _) => Some(Caption::Text(text.clone())),
            (None, Some(file)) => Some(Caption::File(file.clone())),
            (None, None) => Some(Caption::File(self.media.with_extension("txt"))),
        };
        Segment { media, caption }
    }
}

impl Dialogue {
    pub fn load(path: &Path) -> Result<Self, DialogueError> {
        let json = std::fs::read_to_string(path).map_err(|source| DialogueError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, DialogueError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add the dialogue's states to `machine` and wire them up
    ///
    /// Returns the id assigned to each state name.
    pub fn build(
        &self,
        machine: &mut FiniteStateMachine,
        actions: &ActionRegistry,
    ) -> Result<HashMap<String, StateId>, DialogueError> {
        let base = machine.len();
        let mut ids = HashMap::with_capacity(self.states.len());
        for (offset, state) in self.states.iter().enumerate() {
            if ids
                .insert(state.name.clone(), StateId::new(base + offset))
                .is_some()
            {
                return Err(DialogueError::DuplicateState(state.name.clone()));
            }
        }

        let lookup = |from: &str, target: &str| {
            ids.get(target)
                .copied()
                .ok_or_else(|| DialogueError::UnknownTarget {
                    state: from.to_string(),
                    target: target.to_string(),
                })
        };

        let mut wiring = Vec::with_capacity(self.states.len());
        for state in &self.states {
            let accepted = InputSet::from_codes(&state.inputs)?;
            let mut edges = Vec::with_capacity(state.transitions.len());
            for (&input, target) in &state.transitions {
                let input = InputCode::new(input)?;
                if !accepted.contains(input) {
                    return Err(DialogueError::UnacceptedInput {
                        state: state.name.clone(),
                        input: input.value(),
                    });
                }
                edges.push((input, lookup(&state.name, target)?));
            }
            let fallback = state
                .otherwise
                .as_deref()
                .map(|target| lookup(&state.name, target))
                .transpose()?;
            wiring.push((edges, fallback));
        }
        let start = lookup("start", &self.start)?;
        let stop = lookup("stop", &self.stop)?;

        let specs = self
            .states
            .iter()
            .map(|state| self.state_spec(state, actions))
            .collect::<Result<Vec<_>, _>>()?;
        for spec in specs {
            machine.add_state(spec);
        }

        for (offset, (edges, fallback)) in wiring.into_iter().enumerate() {
            let from = StateId::new(base + offset);
            for (input, to) in edges {
                machine.add_transition(from, to, input)?;
            }
            if let Some(to) = fallback {
                machine.set_default_transition(from, to)?;
            }
        }

        machine.set_start_state(start)?;
        machine.set_stop_state(stop)?;
        if let Some(max_repeats) = self.max_repeats {
            machine.set_max_repeats(max_repeats);
        }

        info!(states = self.states.len(), start = %self.start, stop = %self.stop, "dialogue built");
        Ok(ids)
    }

    fn state_spec(
        &self,
        state: &StateDef,
        actions: &ActionRegistry,
    ) -> Result<StateSpec, DialogueError> {
        let mut spec = StateSpec::new(InputSet::from_codes(&state.inputs)?)
            .segments(state.segments.iter().map(SegmentDef::to_segment))
            .interruptable(state.interruptable)
            .repeatable(state.repeatable);

        if let Some(max_repeats) = state.max_repeats {
            spec = spec.max_repeats(max_repeats);
        }
        if let Some(name) = &state.action {
            let action = actions.get(name).ok_or_else(|| DialogueError::UnknownAction {
                state: state.name.clone(),
                action: name.clone(),
            })?;
            spec = spec.shared_action(action);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::*;
    use crate::testing::{code, inputs, test_config, MockPlayback, RecordingCaptions};

    const BALLOT: &str = r#"{
        "max_repeats": 5,
        "start": "welcome",
        "stop": "goodbye",
        "states": [
            {
                "name": "welcome",
                "inputs": [0, 11],
                "segments": [
                    { "media": "welcome.wav", "caption": "Welcome to the polls" },
                    { "media": "instructions.wav" }
                ],
                "interruptable": false,
                "transitions": { "11": "mayor" },
                "otherwise": "welcome"
            },
            {
                "name": "mayor",
                "inputs": [1, 2, 10],
                "segments": [{ "media": "mayor.mp3", "caption_file": "contests/mayor.txt" }],
                "action": "record",
                "max_repeats": 2,
                "transitions": { "1": "goodbye", "2": "goodbye", "10": "welcome" }
            },
            {
                "name": "goodbye",
                "segments": [{ "media": "recording.wav", "verbatim": true, "silent": true }],
                "repeatable": false
            }
        ]
    }"#;

    fn machine() -> FiniteStateMachine {
        let (events, _) = broadcast::channel(16);
        FiniteStateMachine::new(
            Arc::new(MockPlayback::new(Duration::from_secs(1))),
            Arc::new(RecordingCaptions::default()),
            test_config(),
            events,
        )
    }

    fn registry() -> (ActionRegistry, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut actions = ActionRegistry::new();
        actions.register("record", move |_: InputCode| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (actions, count)
    }

    #[test]
    fn test_parse_defaults() {
        let dialogue = Dialogue::from_json(BALLOT).unwrap();
        assert_eq!(dialogue.states.len(), 3);

        let welcome = &dialogue.states[0];
        assert!(!welcome.interruptable);
        assert!(welcome.repeatable);
        assert_eq!(welcome.transitions.get(&11).map(String::as_str), Some("mayor"));

        let segment = welcome.segments[1].to_segment();
        assert_eq!(
            segment.caption,
            Some(Caption::File(PathBuf::from("instructions.txt")))
        );

        let goodbye = dialogue.states[2].segments[0].to_segment();
        assert!(goodbye.media.verbatim);
        assert_eq!(goodbye.caption, None);
    }

    #[test]
    fn test_build_wires_states() {
        let dialogue = Dialogue::from_json(BALLOT).unwrap();
        let (actions, _) = registry();
        let mut fsm = machine();

        let ids = dialogue.build(&mut fsm, &actions).unwrap();
        let (welcome, mayor, goodbye) = (ids["welcome"], ids["mayor"], ids["goodbye"]);

        assert_eq!(fsm.len(), 3);
        assert_eq!(fsm.start_state(), Some(welcome));
        assert_eq!(fsm.stop_state(), Some(goodbye));
        assert_eq!(fsm.transition(welcome, code(11)), Some(mayor));
        assert_eq!(fsm.transition(welcome, code(0)), Some(welcome));
        assert_eq!(fsm.transition(mayor, code(10)), Some(welcome));
        assert_eq!(fsm.transition(goodbye, code(1)), None);

        let state = fsm.state(mayor).unwrap();
        assert_eq!(state.valid_inputs(), &inputs(&[1, 2, 10]));
        assert_eq!(state.max_repeats(), Some(2));
        assert!(!fsm.state(goodbye).unwrap().is_repeatable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_built_dialogue_runs_actions() {
        let dialogue = Dialogue::from_json(BALLOT).unwrap();
        let (actions, count) = registry();
        let mut fsm = machine();
        let ids = dialogue.build(&mut fsm, &actions).unwrap();

        fsm.start().unwrap();
        // welcome is not interruptable: wait for both segments
        tokio::time::sleep(Duration::from_secs(3)).await;
        fsm.give_input(code(11)).await.unwrap();
        assert_eq!(fsm.current_state(), Some(ids["mayor"]));

        fsm.give_input(code(1)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!fsm.is_running());
    }

    #[test]
    fn test_demo_dialogue_builds() {
        let dialogue = Dialogue::from_json(include_str!("../demos/dialogue.json")).unwrap();
        let mut actions = ActionRegistry::new();
        actions.register("record-selection", |_: InputCode| {});

        let ids = dialogue.build(&mut machine(), &actions).unwrap();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_unknown_target() {
        let json = r#"{ "start": "a", "stop": "a",
            "states": [{ "name": "a", "inputs": [1], "transitions": { "1": "nowhere" } }] }"#;
        let err = Dialogue::from_json(json)
            .unwrap()
            .build(&mut machine(), &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DialogueError::UnknownTarget { ref target, .. } if target == "nowhere"));
    }

    #[test]
    fn test_unknown_action() {
        let json = r#"{ "start": "a", "stop": "a",
            "states": [{ "name": "a", "action": "print" }] }"#;
        let mut fsm = machine();
        let err = Dialogue::from_json(json)
            .unwrap()
            .build(&mut fsm, &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DialogueError::UnknownAction { .. }));
        assert!(fsm.is_empty());
    }

    #[test]
    fn test_duplicate_state() {
        let json = r#"{ "start": "a", "stop": "a",
            "states": [{ "name": "a" }, { "name": "a" }] }"#;
        let err = Dialogue::from_json(json)
            .unwrap()
            .build(&mut machine(), &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DialogueError::DuplicateState(name) if name == "a"));
    }

    #[test]
    fn test_input_out_of_range() {
        let json = r#"{ "start": "a", "stop": "a",
            "states": [{ "name": "a", "inputs": [12] }] }"#;
        let err = Dialogue::from_json(json)
            .unwrap()
            .build(&mut machine(), &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DialogueError::Engine(EngineError::InputOutOfRange(12))));
    }

    #[test]
    fn test_bad_transition_key_leaves_machine_untouched() {
        let json = r#"{ "start": "a", "stop": "b",
            "states": [
                { "name": "a", "inputs": [1], "transitions": { "15": "b" } },
                { "name": "b" }
            ] }"#;
        let mut fsm = machine();
        let err = Dialogue::from_json(json)
            .unwrap()
            .build(&mut fsm, &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DialogueError::Engine(EngineError::InputOutOfRange(15))));
        assert_eq!(fsm.len(), 0);
        assert_eq!(fsm.start_state(), None);
    }

    #[test]
    fn test_transition_on_unaccepted_input() {
        let json = r#"{ "start": "a", "stop": "b",
            "states": [
                { "name": "a", "inputs": [1], "transitions": { "2": "b" } },
                { "name": "b" }
            ] }"#;
        let mut fsm = machine();
        let err = Dialogue::from_json(json)
            .unwrap()
            .build(&mut fsm, &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DialogueError::UnacceptedInput { ref state, input: 2 } if state == "a"));
        assert!(fsm.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ballot.json");
        std::fs::write(&path, BALLOT).unwrap();
        assert_eq!(Dialogue::load(&path).unwrap().start, "welcome");

        let missing = Dialogue::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, DialogueError::Read { .. }));
    }
}
