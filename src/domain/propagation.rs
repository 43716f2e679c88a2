//! Relevant/enabled state propagation.
//!
//! Each state has an own half (set by the expression evaluator) and an
//! inherited half (set by the parent). When a node's effective state flips,
//! the new value cascades down as the inherited half of every descendant.
//! Notifications fire after the cascade below the node has completed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::domain::error::TreeResult;
use crate::domain::events::ChangeKind;
use crate::domain::flags::NodeFlags;
use crate::domain::instance::FormInstance;
use crate::domain::node::NodeId;

/// Cascade strategy for relevant/enabled flips. Both produce the same flags
/// and the same notifications; only the number of visited nodes differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropagationMode {
    /// Stop descending below a node whose effective state did not change.
    #[default]
    ShortCircuit,
    /// Visit every descendant of a flipped node.
    FullWalk,
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropagationMode::ShortCircuit => "short-circuit",
            PropagationMode::FullWalk => "full-walk",
        })
    }
}

impl FromStr for PropagationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short-circuit" | "short_circuit" => Ok(PropagationMode::ShortCircuit),
            "full-walk" | "full_walk" => Ok(PropagationMode::FullWalk),
            other => Err(format!(
                "unknown propagation mode '{}', expected short-circuit or full-walk",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StateKind {
    Relevant,
    Enabled,
}

impl StateKind {
    fn bit(self, inherited: bool) -> NodeFlags {
        match (self, inherited) {
            (StateKind::Relevant, false) => NodeFlags::RELEVANT,
            (StateKind::Relevant, true) => NodeFlags::RELEVANT_INHERITED,
            (StateKind::Enabled, false) => NodeFlags::ENABLED,
            (StateKind::Enabled, true) => NodeFlags::ENABLED_INHERITED,
        }
    }

    fn effective(self, flags: NodeFlags) -> bool {
        match self {
            StateKind::Relevant => flags.is_relevant(),
            StateKind::Enabled => flags.is_enabled(),
        }
    }

    fn change(self) -> ChangeKind {
        match self {
            StateKind::Relevant => ChangeKind::Relevant,
            StateKind::Enabled => ChangeKind::Enabled,
        }
    }
}

impl FormInstance {
    /// Sets the own (`inherited == false`) or inherited half of relevance.
    ///
    /// Returns whether the node's effective relevance changed. On a change
    /// the new value reaches every attribute and child as their inherited half.
    #[instrument(level = "trace", skip(self))]
    pub fn set_relevant(&mut self, id: NodeId, value: bool, inherited: bool) -> TreeResult<bool> {
        self.propagate(id, StateKind::Relevant, value, inherited)
    }

    /// Same as [`set_relevant`](Self::set_relevant) for the enabled state,
    /// which cascades to children only.
    #[instrument(level = "trace", skip(self))]
    pub fn set_enabled(&mut self, id: NodeId, value: bool, inherited: bool) -> TreeResult<bool> {
        self.propagate(id, StateKind::Enabled, value, inherited)
    }

    /// Sets the required bit; notifies when it changed. No cascade.
    pub fn set_required(&mut self, id: NodeId, value: bool) -> TreeResult<bool> {
        let node = self.get_mut(id)?;
        if node.flags.is_required() == value {
            return Ok(false);
        }
        node.flags.set(NodeFlags::REQUIRED, value);
        self.emit(id, ChangeKind::Required);
        Ok(true)
    }

    /// Number of nodes the most recent relevant/enabled call touched.
    pub fn last_cascade_visits(&self) -> usize {
        self.last_cascade_visits
    }

    fn propagate(&mut self, id: NodeId, kind: StateKind, value: bool, inherited: bool) -> TreeResult<bool> {
        let mut visits = 0;
        let changed = self.cascade(id, kind, value, inherited, &mut visits)?;
        self.last_cascade_visits = visits;
        trace!("{:?} cascade from {:?}: {} nodes visited", kind, id, visits);
        Ok(changed)
    }

    fn cascade(
        &mut self,
        id: NodeId,
        kind: StateKind,
        value: bool,
        inherited: bool,
        visits: &mut usize,
    ) -> TreeResult<bool> {
        *visits += 1;
        let mode = self.propagation;
        let node = self.get_mut(id)?;
        let before = kind.effective(node.flags);
        node.flags.set(kind.bit(inherited), value);
        let after = kind.effective(node.flags);
        let changed = before != after;

        if changed || mode == PropagationMode::FullWalk {
            let targets: Vec<NodeId> = match kind {
                StateKind::Relevant => node.attributes.iter().chain(&node.children).copied().collect(),
                StateKind::Enabled => node.children.clone(),
            };
            for target in targets {
                self.cascade(target, kind, after, true, visits)?;
            }
        }
        if changed {
            self.emit(id, kind.change());
        }
        Ok(changed)
    }
}
