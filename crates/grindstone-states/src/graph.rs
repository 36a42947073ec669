//! State graph: recognition states as nodes, named transition actions as
//! directed edges. Multiple actions may share an edge; the graph need not
//! be connected or acyclic. Path search is breadth-first over unweighted
//! edges, ties broken by action insertion order, so a given graph always
//! yields the same route.

use std::collections::{HashMap, HashSet, VecDeque};

use grindstone_core::error::{GrindError, Result};
use grindstone_core::types::{ActionEdge, RecognitionState};

/// Outcome of a path query. `Unreachable` is a normal result: some screens
/// can only be left through an app restart, which is the caller's recovery
/// flow, not a graph defect.
#[derive(Debug, Clone, PartialEq)]
pub enum PathResult {
    Path(Vec<ActionEdge>),
    Unreachable,
}

impl PathResult {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, PathResult::Unreachable)
    }
}

/// Per-application catalog of states and the actions between them.
#[derive(Default)]
pub struct StateGraph {
    states: HashMap<String, RecognitionState>,
    /// State ids per application, in insertion order.
    app_states: HashMap<String, Vec<String>>,
    /// All actions in insertion order; edge lists index into this.
    actions: Vec<ActionEdge>,
    edges_from: HashMap<String, Vec<usize>>,
    /// One fallback sentinel per application.
    sentinels: HashMap<String, RecognitionState>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state. Ids are unique per application; re-adding an id
    /// is a configuration defect.
    pub fn add_state(&mut self, state: RecognitionState) -> Result<()> {
        if self.states.contains_key(&state.state_id) {
            return Err(GrindError::Config(format!(
                "Duplicate state id: {}",
                state.state_id
            )));
        }
        self.sentinels
            .entry(state.app_id.clone())
            .or_insert_with(|| RecognitionState::unknown(&state.app_id));
        self.app_states
            .entry(state.app_id.clone())
            .or_default()
            .push(state.state_id.clone());
        tracing::debug!(app = %state.app_id, state = %state.state_id, "State registered");
        self.states.insert(state.state_id.clone(), state);
        Ok(())
    }

    /// Register a transition action. Both endpoints must already exist.
    pub fn add_action(&mut self, action: ActionEdge) -> Result<()> {
        for endpoint in [&action.from_state, &action.to_state] {
            if !self.states.contains_key(endpoint) {
                return Err(GrindError::Config(format!(
                    "Action '{}' references unknown state: {endpoint}",
                    action.name
                )));
            }
        }
        let index = self.actions.len();
        self.edges_from
            .entry(action.from_state.clone())
            .or_default()
            .push(index);
        self.actions.push(action);
        Ok(())
    }

    pub fn state(&self, state_id: &str) -> Option<&RecognitionState> {
        self.states.get(state_id)
    }

    /// All matchable states of an application, in registration order. The
    /// sentinel is not included: it is never matched, only produced as the
    /// recognizer's fallback.
    pub fn states_for(&self, app_id: &str) -> Vec<&RecognitionState> {
        self.app_states
            .get(app_id)
            .map(|ids| ids.iter().filter_map(|id| self.states.get(id)).collect())
            .unwrap_or_default()
    }

    /// The application's `unknown` fallback state.
    pub fn unknown_state(&self, app_id: &str) -> RecognitionState {
        self.sentinels
            .get(app_id)
            .cloned()
            .unwrap_or_else(|| RecognitionState::unknown(app_id))
    }

    /// Outgoing actions of a state, in insertion order.
    pub fn actions_from(&self, state_id: &str) -> Vec<&ActionEdge> {
        self.edges_from
            .get(state_id)
            .map(|idxs| idxs.iter().map(|&i| &self.actions[i]).collect())
            .unwrap_or_default()
    }

    /// Depth of a state's parent chain (0 for a top-level state). Used by
    /// the recognizer to prefer more-specific states on score ties.
    pub fn parent_depth(&self, state_id: &str) -> usize {
        let mut depth = 0;
        let mut seen = HashSet::new();
        let mut current = state_id;
        while let Some(state) = self.states.get(current) {
            match &state.parent_state {
                Some(parent) if seen.insert(parent.clone()) => {
                    depth += 1;
                    current = parent;
                }
                _ => break,
            }
        }
        depth
    }

    /// Shortest action sequence from `from` to `to`. BFS over unweighted
    /// edges; among equally short routes the one using earlier-inserted
    /// actions wins, which makes replays reproducible.
    pub fn path(&self, from: &str, to: &str) -> PathResult {
        if from == to {
            return PathResult::Path(Vec::new());
        }
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(from);
        let mut queue: VecDeque<(&str, Vec<usize>)> = VecDeque::new();
        queue.push_back((from, Vec::new()));

        while let Some((state, route)) = queue.pop_front() {
            if let Some(edge_idxs) = self.edges_from.get(state) {
                for &idx in edge_idxs {
                    let edge = &self.actions[idx];
                    if !visited.insert(edge.to_state.as_str()) {
                        continue;
                    }
                    let mut next_route = route.clone();
                    next_route.push(idx);
                    if edge.to_state == to {
                        let path = next_route.iter().map(|&i| self.actions[i].clone()).collect();
                        return PathResult::Path(path);
                    }
                    queue.push_back((edge.to_state.as_str(), next_route));
                }
            }
        }
        PathResult::Unreachable
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}
