//! Simulated computers.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::InvalidTransition;

/// Node identifier.
pub type NodeId = u32;

/// Lifecycle state of a node.
///
/// `Collapsed` and `Terminated` are absorbing: once reached, the node never becomes `Active` again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Node is running its algorithm.
    #[default]
    Active,
    /// Node has failed.
    Collapsed,
    /// Node's algorithm has declared it finished.
    Terminated,
}

impl NodeState {
    /// Returns `true` for `Collapsed` and `Terminated`.
    pub fn is_absorbing(&self) -> bool {
        !matches!(self, NodeState::Active)
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Active => "active",
            NodeState::Collapsed => "collapsed",
            NodeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// One simulated computer.
///
/// Identifier and adjacency are fixed before the run starts. Scratch fields belong to the algorithm, message counters
/// belong to the communication layer. Writes through [`Node::set_field`] and [`Node::set_state`] raise the `changed`
/// flag which is read by change observers.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Node {
    id: NodeId,
    neighbors: Vec<NodeId>,
    state: NodeState,
    is_root: bool,
    fields: Map<String, Value>,
    sent_count: u64,
    received_count: u64,
    #[serde(skip)]
    changed: bool,
}

impl Node {
    /// Creates an active node without neighbors.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Returns the node identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns neighbor identifiers in adjacency order.
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Checks whether `other` is adjacent to this node.
    pub fn is_neighbor(&self, other: NodeId) -> bool {
        self.neighbors.contains(&other)
    }

    /// Returns the current state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Returns `true` while the node is `Active`.
    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    /// Returns `true` if this node was selected as root.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Changes the node state.
    ///
    /// Leaving an absorbing state is rejected. Setting the current state again is a no-op.
    pub fn set_state(&mut self, state: NodeState) -> Result<(), InvalidTransition> {
        if self.state == state {
            return Ok(());
        }
        if self.state.is_absorbing() {
            log::warn!("Node {} cannot change state from {} to {}", self.id, self.state, state);
            return Err(InvalidTransition {
                node: self.id,
                from: self.state,
                to: state,
            });
        }
        log::info!("Node {} is changing state from {} to {}", self.id, self.state, state);
        self.state = state;
        self.changed = true;
        Ok(())
    }

    /// Marks the node as finished. Returns `false` if the node was already in an absorbing state.
    pub fn terminate(&mut self) -> bool {
        if self.state.is_absorbing() {
            return false;
        }
        self.set_state(NodeState::Terminated).is_ok()
    }

    /// Marks the node as failed. Returns `false` if the node was already in an absorbing state.
    pub fn collapse(&mut self) -> bool {
        if self.state.is_absorbing() {
            return false;
        }
        self.set_state(NodeState::Collapsed).is_ok()
    }

    /// Returns an algorithm-defined field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a numeric field as `f64`.
    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    /// Returns an integer field as `i64`.
    pub fn field_i64(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// Sets an algorithm-defined field, flagging a change if the value differs.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if self.fields.get(&name) != Some(&value) {
            log::debug!("Node {} is changing {} to {}", self.id, name, value);
            self.fields.insert(name, value);
            self.changed = true;
        }
    }

    /// Removes an algorithm-defined field.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        let removed = self.fields.shift_remove(name);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    /// Returns all algorithm-defined fields in insertion order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Number of messages this node has successfully enqueued.
    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    /// Number of messages delivered to this node.
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Returns `true` if the node was modified since the flag was last reset.
    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn reset_changed(&mut self) {
        self.changed = false;
    }

    pub(crate) fn set_root(&mut self, is_root: bool) {
        self.is_root = is_root;
    }

    pub(crate) fn add_neighbor(&mut self, other: NodeId) {
        self.neighbors.push(other);
    }

    pub(crate) fn clear_neighbors(&mut self) {
        self.neighbors.clear();
    }

    pub(crate) fn dedup_neighbors(&mut self) {
        self.neighbors.sort_unstable();
        self.neighbors.dedup();
    }

    pub(crate) fn set_initial_field(&mut self, name: String, value: Value) {
        self.fields.insert(name, value);
    }

    pub(crate) fn add_sent(&mut self, count: u64) {
        self.sent_count += count;
    }

    pub(crate) fn add_received(&mut self, count: u64) {
        self.received_count += count;
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "id = {}, neighbors = {:?}, state = {}", self.id, self.neighbors, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorbing_states() {
        let mut node = Node::new(1);
        assert!(node.terminate());
        assert_eq!(node.state(), NodeState::Terminated);
        assert!(!node.collapse());
        let err = node.set_state(NodeState::Active).unwrap_err();
        assert_eq!(err.from, NodeState::Terminated);
        assert_eq!(node.state(), NodeState::Terminated);

        let mut node = Node::new(2);
        assert!(node.collapse());
        assert!(!node.terminate());
        assert_eq!(node.state(), NodeState::Collapsed);
    }

    #[test]
    fn test_change_flag() {
        let mut node = Node::new(1);
        assert!(!node.has_changed());
        node.set_field("distance", 3);
        assert!(node.has_changed());
        node.reset_changed();
        node.set_field("distance", 3);
        assert!(!node.has_changed());
        node.set_field("distance", 4);
        assert!(node.has_changed());
        assert_eq!(node.field_i64("distance"), Some(4));
    }
}
