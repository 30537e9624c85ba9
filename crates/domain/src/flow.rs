//! Flow definitions — named FSM templates over states, transitions, and
//! a state-to-node map. Loaded from YAML files or registered over HTTP.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::NodeRef;

/// States that no transition may leave except via the RESET control event.
pub const TERMINAL_STATES: &[&str] = &["end", "error", "aborted"];

/// Trigger event that advances the synthetic single-node flow.
pub const STEP_DONE: &str = "STEP_DONE";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub event: String,
    pub to: String,
    /// When set, the target state's node runs only once every
    /// prerequisite branch has recorded a STEP_DONE.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fan_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub states: Vec<String>,
    pub initial_state: String,
    pub transitions: Vec<Transition>,
    /// state → node reference (`builtin://id` or an https URL).
    #[serde(default)]
    pub state_node_map: BTreeMap<String, String>,
    /// States that pause the session for human input instead of
    /// executing a node.
    #[serde(default)]
    pub user_input_states: Vec<String>,
}

impl FlowDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let flow: Self = serde_yaml::from_str(yaml)?;
        flow.validate()?;
        Ok(flow)
    }

    /// The synthetic two-state flow backing implicit single-node
    /// sessions: `[execute] --STEP_DONE--> [end]`.
    pub fn single_node(node_ref: &str) -> Self {
        let mut state_node_map = BTreeMap::new();
        state_node_map.insert("execute".to_owned(), node_ref.to_owned());
        Self {
            name: format!("single:{node_ref}"),
            description: String::new(),
            states: vec!["execute".into(), "end".into()],
            initial_state: "execute".into(),
            transitions: vec![Transition {
                from: "execute".into(),
                event: STEP_DONE.into(),
                to: "end".into(),
                fan_in: false,
            }],
            state_node_map,
            user_input_states: Vec::new(),
        }
    }

    /// Structural validation: every referenced state is declared, the
    /// initial state exists, and every node reference parses. Cycles are
    /// allowed — there is no topological assumption.
    pub fn validate(&self) -> Result<()> {
        let known = |s: &str| self.states.iter().any(|k| k == s);

        if !known(&self.initial_state) {
            return Err(Error::BadRequest(format!(
                "flow {}: initial_state {:?} is not in the state set",
                self.name, self.initial_state
            )));
        }
        for t in &self.transitions {
            for s in [&t.from, &t.to] {
                if !known(s) {
                    return Err(Error::BadRequest(format!(
                        "flow {}: transition references unknown state {s:?}",
                        self.name
                    )));
                }
            }
            if t.event.trim().is_empty() {
                return Err(Error::BadRequest(format!(
                    "flow {}: transition {} -> {} has an empty event",
                    self.name, t.from, t.to
                )));
            }
        }
        for (state, node_ref) in &self.state_node_map {
            if !known(state) {
                return Err(Error::BadRequest(format!(
                    "flow {}: state_node_map references unknown state {state:?}",
                    self.name
                )));
            }
            NodeRef::parse(node_ref)?;
        }
        for state in &self.user_input_states {
            if !known(state) {
                return Err(Error::BadRequest(format!(
                    "flow {}: user_input_states references unknown state {state:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve the transition out of `from` for `event`, if any.
    pub fn transition_for(&self, from: &str, event: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.event == event)
    }

    /// Trigger events accepted in `state` (for `GET .../state`).
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event.as_str())
            .collect()
    }

    pub fn is_terminal(state: &str) -> bool {
        TERMINAL_STATES.contains(&state)
    }

    pub fn is_user_input(&self, state: &str) -> bool {
        self.user_input_states.iter().any(|s| s == state)
    }

    /// Source states of every transition entering `to`, excluding
    /// `advanced_from`. These are the fan-in prerequisites for `to`.
    pub fn fan_in_prerequisites(&self, to: &str, advanced_from: &str) -> Vec<String> {
        let mut prereqs: Vec<String> = self
            .transitions
            .iter()
            .filter(|t| t.to == to && t.from != advanced_from)
            .map(|t| t.from.clone())
            .collect();
        prereqs.sort();
        prereqs.dedup();
        prereqs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROCUREMENT_YAML: &str = r#"
name: procurement
description: price comparison to delivery note
states: [search, compare, quote, quote_done, contract, end, error, aborted]
initial_state: search
transitions:
  - { from: search, event: STEP_DONE, to: compare }
  - { from: compare, event: STEP_DONE, to: quote, fan_in: true }
  - { from: quote, event: STEP_DONE, to: quote_done }
  - { from: quote_done, event: USER_CONFIRM, to: contract }
  - { from: quote_done, event: USER_ROLLBACK, to: quote }
  - { from: contract, event: STEP_DONE, to: end }
state_node_map:
  search: builtin://search
  compare: builtin://doc_writer
  quote: builtin://doc_writer
  contract: https://hooks.example.com/contract
user_input_states: [quote_done]
"#;

    #[test]
    fn loads_yaml_flow() {
        let flow = FlowDefinition::from_yaml(PROCUREMENT_YAML).unwrap();
        assert_eq!(flow.name, "procurement");
        assert_eq!(flow.initial_state, "search");
        assert!(flow.transition_for("compare", "STEP_DONE").unwrap().fan_in);
        assert!(flow.is_user_input("quote_done"));
    }

    #[test]
    fn cyclic_flows_are_permitted() {
        let flow = FlowDefinition::from_yaml(PROCUREMENT_YAML).unwrap();
        // quote_done --USER_ROLLBACK--> quote forms a cycle.
        let t = flow.transition_for("quote_done", "USER_ROLLBACK").unwrap();
        assert_eq!(t.to, "quote");
    }

    #[test]
    fn rejects_unknown_state_in_transition() {
        let yaml = r#"
name: broken
states: [a, end]
initial_state: a
transitions:
  - { from: a, event: GO, to: missing }
"#;
        assert!(FlowDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn rejects_bad_node_ref() {
        let yaml = r#"
name: broken
states: [a, end]
initial_state: a
transitions:
  - { from: a, event: GO, to: end }
state_node_map:
  a: ftp://nope
"#;
        assert!(FlowDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn single_node_flow_shape() {
        let flow = FlowDefinition::single_node("builtin://search");
        assert_eq!(flow.initial_state, "execute");
        let t = flow.transition_for("execute", STEP_DONE).unwrap();
        assert_eq!(t.to, "end");
        assert!(FlowDefinition::is_terminal("end"));
        flow.validate().unwrap();
    }

    #[test]
    fn fan_in_prerequisites_exclude_advancing_branch() {
        let yaml = r#"
name: fanin
states: [a, b, c, join, end]
initial_state: a
transitions:
  - { from: a, event: STEP_DONE, to: join, fan_in: true }
  - { from: b, event: STEP_DONE, to: join, fan_in: true }
  - { from: c, event: STEP_DONE, to: join, fan_in: true }
  - { from: join, event: STEP_DONE, to: end }
"#;
        let flow = FlowDefinition::from_yaml(yaml).unwrap();
        let prereqs = flow.fan_in_prerequisites("join", "a");
        assert_eq!(prereqs, vec!["b".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn events_from_lists_outgoing_triggers() {
        let flow = FlowDefinition::from_yaml(PROCUREMENT_YAML).unwrap();
        let mut events = flow.events_from("quote_done");
        events.sort();
        assert_eq!(events, vec!["USER_CONFIRM", "USER_ROLLBACK"]);
    }
}
