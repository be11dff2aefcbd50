//! Live agent-activity panel.
//!
//! The engine only ever talks to an [`ActivitySink`] through patches. Fields
//! left `None` in an [`ActivityPatch`] are untouched. The current snapshot is
//! read only to extend incremental fields (edges, seen agents, the delegation
//! log).

use std::collections::BTreeMap;

use hearth_types::{Delegation, TraceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Active,
    Tool,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AgentEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivitySnapshot {
    pub active: bool,
    pub active_agent: Option<String>,
    pub thinking: String,
    pub agents_seen: Vec<String>,
    pub agent_states: BTreeMap<String, AgentState>,
    pub active_edges: Vec<AgentEdge>,
    pub routed_agent: Option<String>,
    pub routed_confidence: Option<f64>,
    pub delegations: Vec<Delegation>,
}

// Outer `None` leaves a field alone; `Some(None)` clears it.
#[allow(clippy::option_option)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityPatch {
    pub active: Option<bool>,
    pub active_agent: Option<Option<String>>,
    pub thinking: Option<String>,
    pub agents_seen: Option<Vec<String>>,
    pub agent_states: Option<BTreeMap<String, AgentState>>,
    pub active_edges: Option<Vec<AgentEdge>>,
    pub routed_agent: Option<Option<String>>,
    pub routed_confidence: Option<Option<f64>>,
    pub delegations: Option<Vec<Delegation>>,
}

pub trait ActivitySink: Send {
    fn apply(&mut self, patch: ActivityPatch);
    fn snapshot(&self) -> ActivitySnapshot;
}

/// In-memory sink holding the latest snapshot.
#[derive(Debug, Default)]
pub struct ActivityPanel {
    state: ActivitySnapshot,
}

impl ActivityPanel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivitySink for ActivityPanel {
    fn apply(&mut self, patch: ActivityPatch) {
        let state = &mut self.state;
        if let Some(active) = patch.active {
            state.active = active;
        }
        if let Some(agent) = patch.active_agent {
            state.active_agent = agent;
        }
        if let Some(thinking) = patch.thinking {
            state.thinking = thinking;
        }
        if let Some(seen) = patch.agents_seen {
            state.agents_seen = seen;
        }
        if let Some(states) = patch.agent_states {
            state.agent_states = states;
        }
        if let Some(edges) = patch.active_edges {
            state.active_edges = edges;
        }
        if let Some(agent) = patch.routed_agent {
            state.routed_agent = agent;
        }
        if let Some(confidence) = patch.routed_confidence {
            state.routed_confidence = confidence;
        }
        if let Some(delegations) = patch.delegations {
            state.delegations = delegations;
        }
    }

    fn snapshot(&self) -> ActivitySnapshot {
        self.state.clone()
    }
}

impl ActivityPatch {
    /// Reset the panel for a new foreground run.
    #[must_use]
    pub fn run_started() -> Self {
        Self {
            active: Some(true),
            active_agent: Some(None),
            thinking: Some(String::new()),
            agents_seen: Some(Vec::new()),
            agent_states: Some(BTreeMap::new()),
            active_edges: Some(Vec::new()),
            routed_agent: Some(None),
            routed_confidence: Some(None),
            delegations: Some(Vec::new()),
        }
    }

    #[must_use]
    pub fn run_complete() -> Self {
        Self {
            active: Some(false),
            active_agent: Some(None),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn thinking(text: &str) -> Self {
        Self {
            thinking: Some(text.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn routed(agent: String, confidence: Option<f64>) -> Self {
        Self {
            routed_agent: Some(Some(agent)),
            routed_confidence: Some(confidence),
            ..Self::default()
        }
    }

    /// Translate a trace notification into a patch against `current`.
    #[must_use]
    pub fn from_trace(trace: &TraceEvent, current: &ActivitySnapshot) -> Self {
        let mut patch = Self::default();
        let mut seen = current.agents_seen.clone();
        let mut states = current.agent_states.clone();
        let mut edges = current.active_edges.clone();
        let agent = trace.agent.clone().or_else(|| current.active_agent.clone());

        match (trace.event.as_str(), agent) {
            ("agent_start", Some(agent)) => {
                if let Some(previous) = &current.active_agent
                    && *previous != agent
                {
                    push_edge(&mut edges, previous, &agent);
                }
                push_unique(&mut seen, &agent);
                states.insert(agent.clone(), AgentState::Active);
                patch.active = Some(true);
                patch.active_agent = Some(Some(agent));
            }
            ("tool_call" | "tool_start", Some(agent)) => {
                states.insert(agent, AgentState::Tool);
            }
            ("tool_end" | "tool_result", Some(agent)) => {
                states.insert(agent, AgentState::Active);
            }
            ("agent_end", Some(agent)) => {
                states.insert(agent, AgentState::Done);
            }
            ("complete" | "end", _) => {
                patch.active = Some(false);
                patch.active_agent = Some(None);
            }
            (other, _) => tracing::trace!(event = other, "Unhandled trace event"),
        }

        for name in &trace.agents {
            push_unique(&mut seen, name);
        }

        if seen != current.agents_seen {
            patch.agents_seen = Some(seen);
        }
        if states != current.agent_states {
            patch.agent_states = Some(states);
        }
        if edges != current.active_edges {
            patch.active_edges = Some(edges);
        }
        patch
    }

    /// Append a delegation to the log and draw its edge.
    #[must_use]
    pub fn from_delegation(delegation: Delegation, current: &ActivitySnapshot) -> Self {
        let mut seen = current.agents_seen.clone();
        let mut edges = current.active_edges.clone();
        if !delegation.from.is_empty() && !delegation.to.is_empty() {
            push_unique(&mut seen, &delegation.from);
            push_unique(&mut seen, &delegation.to);
            push_edge(&mut edges, &delegation.from, &delegation.to);
        }
        let mut log = current.delegations.clone();
        log.push(delegation);

        Self {
            agents_seen: Some(seen),
            active_edges: Some(edges),
            delegations: Some(log),
            ..Self::default()
        }
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

fn push_edge(edges: &mut Vec<AgentEdge>, from: &str, to: &str) {
    let edge = AgentEdge {
        from: from.to_string(),
        to: to.to_string(),
    };
    if !edges.contains(&edge) {
        edges.push(edge);
    }
}
