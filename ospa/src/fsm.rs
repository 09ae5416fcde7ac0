//! Finite-state-machine model: states, transitions, actions, steps, and
//! the conversation memory.
//!
//! A [`Step`] is one turn of the agent loop: the state that was active,
//! the ordered actions that ran, and a completion timestamp. [`Memory`] is
//! the ordered sequence of steps; the caller owns it and passes it through
//! the chat loop by value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::tool::SEND_MESSAGE_TOOL_NAME;

/// A named node in the agent's FSM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// State name, unique within one machine. Empty for dynamically
    /// created states.
    #[serde(default)]
    pub name: String,
    /// Short natural-language label for the situation this state covers.
    #[serde(default)]
    pub scenario: String,
    /// Prompt fragment injected into the action-selection turn.
    #[serde(default)]
    pub instruction: String,
}

impl State {
    /// Create a new state.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        scenario: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            scenario: scenario.into(),
            instruction: instruction.into(),
        }
    }
}

/// A state machine: an initial state, the set of states keyed by name, and
/// the allowed out-transitions per state.
///
/// An empty machine (no states) is legal and signals "create states
/// dynamically".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine {
    /// Name of the initial state. Empty for an empty machine.
    #[serde(default)]
    pub initial_state_name: String,
    /// States keyed by name. Ordered for stable rendering.
    #[serde(default)]
    pub states: BTreeMap<String, State>,
    /// Allowed next-state names per state name. A state absent from this
    /// map may transition to any state.
    #[serde(default)]
    pub out_transitions: BTreeMap<String, Vec<String>>,
}

impl StateMachine {
    /// Whether the machine defines no states.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The initial state, when the machine is non-empty.
    #[must_use]
    pub fn initial_state(&self) -> Option<&State> {
        self.states.get(&self.initial_state_name)
    }

    /// Look up a state by name.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// The states the machine may move to from `current`.
    ///
    /// Returns the configured out-transitions for `current`, or every
    /// state when `current` has no outgoing constraint.
    #[must_use]
    pub fn next_allowed_states(&self, current: &str) -> Vec<&State> {
        match self.out_transitions.get(current) {
            Some(names) => names.iter().filter_map(|n| self.states.get(n)).collect(),
            None => self.states.values().collect(),
        }
    }

    /// Check the structural invariants: the initial state exists and every
    /// transition key and target refers to a known state. An empty machine
    /// is valid.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if !self.states.contains_key(&self.initial_state_name) {
            return Err(Error::config(format!(
                "initial state '{}' is not defined in the state machine",
                self.initial_state_name
            )));
        }
        for (from, targets) in &self.out_transitions {
            if !self.states.contains_key(from) {
                return Err(Error::config(format!(
                    "transition source '{from}' is not a defined state"
                )));
            }
            for to in targets {
                if !self.states.contains_key(to) {
                    return Err(Error::config(format!(
                        "transition target '{to}' (from '{from}') is not a defined state"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One intended tool invocation within a step.
///
/// An action is pending while `result` is absent and completed once the
/// executor has set it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Tool name.
    pub name: String,
    /// Arguments the model supplied for the tool.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Execution result; `None` while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
}

impl Action {
    /// Create a pending action.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            result: None,
        }
    }

    /// Create a pending `send_message_to_user` action.
    #[must_use]
    pub fn send_message(agent_message: impl Into<String>) -> Self {
        let mut arguments = Map::new();
        arguments.insert(
            "agent_message".to_owned(),
            Value::String(agent_message.into()),
        );
        Self::new(SEND_MESSAGE_TOOL_NAME, arguments)
    }

    /// Whether the executor has completed this action.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.result.is_some()
    }

    /// Whether this is the yield-to-user tool.
    #[must_use]
    pub fn is_send_message(&self) -> bool {
        self.name == SEND_MESSAGE_TOOL_NAME
    }

    /// The `agent_message` argument, when this is a send-message action.
    #[must_use]
    pub fn agent_message(&self) -> Option<&str> {
        if !self.is_send_message() {
            return None;
        }
        self.arguments.get("agent_message").and_then(Value::as_str)
    }
}

/// One completed turn of the agent loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Name of the state this step ran in.
    pub state_name: String,
    /// The actions of the step, in execution order.
    pub actions: Vec<Action>,
    /// Completion time of the step.
    pub timestamp: DateTime<Utc>,
}

impl Step {
    /// Create a step stamped with the current time.
    #[must_use]
    pub fn new(state_name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            state_name: state_name.into(),
            actions,
            timestamp: Utc::now(),
        }
    }
}

/// Ordered sequence of steps for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    /// The steps, oldest first.
    #[serde(default)]
    pub history: Vec<Step>,
}

impl Memory {
    /// Create an empty memory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    /// Whether no steps have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Append a completed step.
    pub fn push(&mut self, step: Step) {
        self.history.push(step);
    }

    /// The most recent step.
    #[must_use]
    pub fn last_step(&self) -> Option<&Step> {
        self.history.last()
    }

    /// Mutable access to the most recent step.
    pub fn last_step_mut(&mut self) -> Option<&mut Step> {
        self.history.last_mut()
    }

    /// The state name of the most recent step.
    #[must_use]
    pub fn current_state_name(&self) -> Option<&str> {
        self.last_step().map(|s| s.state_name.as_str())
    }

    /// The last `send_message_to_user` action in memory, searched from the
    /// most recent step backwards.
    pub fn last_send_message_mut(&mut self) -> Option<&mut Action> {
        self.history
            .iter_mut()
            .rev()
            .flat_map(|step| step.actions.iter_mut().rev())
            .find(|action| action.is_send_message())
    }

    /// Render the most recent `max_len` steps in chronological order.
    ///
    /// The rendering is deterministic for a given memory: each step shows
    /// its state name, its actions as `name(args) -> result`, and its
    /// RFC 3339 timestamp.
    #[must_use]
    pub fn print_history(&self, max_len: usize) -> String {
        let skip = self.history.len().saturating_sub(max_len);
        let mut out = String::new();
        for (i, step) in self.history.iter().enumerate().skip(skip) {
            out.push_str(&format!(
                "Step {} [state: {}] at {}\n",
                i + 1,
                if step.state_name.is_empty() {
                    "<dynamic>"
                } else {
                    step.state_name.as_str()
                },
                step.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ));
            for action in &step.actions {
                let args = Value::Object(action.arguments.clone());
                let result = action
                    .result
                    .as_ref()
                    .map_or_else(|| "<pending>".to_owned(), |r| {
                        serde_json::to_string(&Value::Object(r.clone())).unwrap_or_default()
                    });
                out.push_str(&format!(
                    "  - {}({}) -> {}\n",
                    action.name,
                    serde_json::to_string(&args).unwrap_or_default(),
                    result,
                ));
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_machine() -> StateMachine {
        let mut states = BTreeMap::new();
        states.insert(
            "greeting".to_owned(),
            State::new("greeting", "Opening the conversation", "Greet the user."),
        );
        states.insert(
            "conversation".to_owned(),
            State::new("conversation", "Main dialogue", "Answer the user."),
        );
        states.insert(
            "closing".to_owned(),
            State::new("closing", "Wrapping up", "Say goodbye."),
        );
        let mut out = BTreeMap::new();
        out.insert("greeting".to_owned(), vec!["conversation".to_owned()]);
        out.insert(
            "conversation".to_owned(),
            vec!["conversation".to_owned(), "closing".to_owned()],
        );
        StateMachine {
            initial_state_name: "greeting".to_owned(),
            states,
            out_transitions: out,
        }
    }

    mod state_machine {
        use super::*;

        #[test]
        fn empty_machine_is_valid() {
            assert!(StateMachine::default().validate().is_ok());
            assert!(StateMachine::default().is_empty());
        }

        #[test]
        fn valid_machine_passes() {
            assert!(sample_machine().validate().is_ok());
        }

        #[test]
        fn missing_initial_state_fails() {
            let mut machine = sample_machine();
            machine.initial_state_name = "nope".to_owned();
            assert!(matches!(
                machine.validate(),
                Err(Error::Config { .. })
            ));
        }

        #[test]
        fn unknown_transition_target_fails() {
            let mut machine = sample_machine();
            machine
                .out_transitions
                .insert("closing".to_owned(), vec!["missing".to_owned()]);
            assert!(machine.validate().is_err());
        }

        #[test]
        fn next_allowed_follows_transitions() {
            let machine = sample_machine();
            let next: Vec<_> = machine
                .next_allowed_states("greeting")
                .iter()
                .map(|s| s.name.clone())
                .collect();
            assert_eq!(next, vec!["conversation"]);
        }

        #[test]
        fn unconstrained_state_may_go_anywhere() {
            let machine = sample_machine();
            assert_eq!(machine.next_allowed_states("closing").len(), 3);
        }
    }

    mod action {
        use super::*;

        #[test]
        fn pending_until_result_set() {
            let mut action = Action::new("get_time", Map::new());
            assert!(!action.is_completed());
            action.result = Some(Map::new());
            assert!(action.is_completed());
        }

        #[test]
        fn send_message_accessor() {
            let action = Action::send_message("hello");
            assert!(action.is_send_message());
            assert_eq!(action.agent_message(), Some("hello"));

            let other = Action::new("get_time", Map::new());
            assert_eq!(other.agent_message(), None);
        }
    }

    mod memory {
        use super::*;

        fn completed(mut action: Action) -> Action {
            action.result = Some(Map::new());
            action
        }

        #[test]
        fn push_and_current_state() {
            let mut memory = Memory::new();
            assert!(memory.current_state_name().is_none());
            memory.push(Step::new("greeting", vec![completed(Action::send_message("hi"))]));
            assert_eq!(memory.current_state_name(), Some("greeting"));
        }

        #[test]
        fn last_send_message_finds_most_recent() {
            let mut memory = Memory::new();
            memory.push(Step::new("greeting", vec![completed(Action::send_message("first"))]));
            memory.push(Step::new(
                "conversation",
                vec![
                    completed(Action::new("get_time", Map::new())),
                    completed(Action::send_message("second")),
                ],
            ));
            let action = memory.last_send_message_mut().unwrap();
            assert_eq!(action.agent_message(), Some("second"));
        }

        #[test]
        fn print_history_is_deterministic_and_bounded() {
            let mut memory = Memory::new();
            for i in 0..5 {
                memory.push(Step::new(
                    "conversation",
                    vec![completed(Action::send_message(format!("msg {i}")))],
                ));
            }
            let rendered = memory.print_history(2);
            assert!(!rendered.contains("msg 2"));
            assert!(rendered.contains("msg 3"));
            assert!(rendered.contains("msg 4"));
            assert_eq!(rendered, memory.print_history(2));
        }

        #[test]
        fn print_history_shows_pending_marker() {
            let mut memory = Memory::new();
            memory.push(Step::new("s", vec![Action::send_message("x")]));
            assert!(memory.print_history(10).contains("<pending>"));
        }
    }
}
