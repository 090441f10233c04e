//! Change notifications for presentation layers.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::message::SimTime;
use crate::node::{Node, NodeId, NodeState};

/// Node state captured after a callback modified it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub node: NodeId,
    /// State after the change.
    pub state: NodeState,
    /// Algorithm fields after the change.
    pub fields: Map<String, Value>,
    /// Clock value of the change.
    pub at: SimTime,
}

impl NodeSnapshot {
    /// Captures the current state of a node.
    pub fn capture(node: &Node, at: SimTime) -> Self {
        Self {
            node: node.id(),
            state: node.state(),
            fields: node.fields().clone(),
            at,
        }
    }
}

/// Receives node snapshots when change tracking is enabled.
pub trait ChangeObserver {
    /// Called after a node was modified.
    fn on_change(&mut self, snapshot: NodeSnapshot);
}

/// Observer collecting every snapshot.
///
/// Clones share the same storage, so a handle can be kept outside the simulation.
#[derive(Clone, Default)]
pub struct ChangeLog {
    snapshots: Rc<RefCell<Vec<NodeSnapshot>>>,
}

impl ChangeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the collected snapshots.
    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Number of collected snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.borrow().len()
    }

    /// Returns `true` if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.snapshots.borrow().is_empty()
    }
}

impl ChangeObserver for ChangeLog {
    fn on_change(&mut self, snapshot: NodeSnapshot) {
        self.snapshots.borrow_mut().push(snapshot);
    }
}
