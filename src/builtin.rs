//! Reference algorithms available through [`AlgorithmRegistry::with_builtins`](crate::AlgorithmRegistry::with_builtins).

use serde_json::{json, Value};

use crate::algorithm::{Algorithm, Inbox};
use crate::communication::Communication;
use crate::message::{Payload, SimTime};
use crate::node::{Node, NodeId};

fn sender(payload: &Payload) -> Option<NodeId> {
    payload.get("from").and_then(Value::as_u64).and_then(|id| NodeId::try_from(id).ok())
}

/// Flooding from the root.
///
/// The root broadcasts during init. Every other node forwards the first message it receives to all neighbors except
/// the sender and terminates. Works under both disciplines.
pub struct Flood;

impl Algorithm for Flood {
    fn name(&self) -> &str {
        "flood"
    }

    fn init(&self, node: &mut Node, comm: &mut Communication) {
        if node.is_root() {
            node.set_field("hops", 0);
            comm.send_to_all(node, json!({"from": node.id(), "hops": 0}), None, None);
            node.terminate();
        }
    }

    fn step(&self, node: &mut Node, comm: &mut Communication, _at: SimTime, inbox: Inbox) {
        let Some(first) = inbox.payloads().first() else {
            return;
        };
        let hops = first.get("hops").and_then(Value::as_u64).unwrap_or_default() + 1;
        let parent = sender(first);
        node.set_field("hops", hops);
        node.set_field("parent", parent);
        let payload = json!({"from": node.id(), "hops": hops});
        for dst in node.neighbors().to_vec() {
            if Some(dst) != parent {
                comm.send(node, dst, payload.clone(), None, None);
            }
        }
        node.terminate();
    }
}

/// Breadth-first spanning tree rooted at the root node.
///
/// Each node keeps the shortest known `distance` and the matching `parent`, and rebroadcasts whenever it improves.
/// Under the synchronous discipline a node terminates once a full round passed after its last improvement.
/// Distances carried in messages may be corrupted, which is the point of running it under faults.
pub struct Bfs;

impl Algorithm for Bfs {
    fn name(&self) -> &str {
        "bfs"
    }

    fn init(&self, node: &mut Node, comm: &mut Communication) {
        if node.is_root() {
            node.set_field("distance", 0);
            node.set_field("updated", comm.now().as_round());
            comm.send_to_all(node, json!({"from": node.id(), "distance": 0}), None, None);
        }
    }

    fn step(&self, node: &mut Node, comm: &mut Communication, at: SimTime, inbox: Inbox) {
        let mut improved = false;
        for payload in inbox.payloads() {
            let Some(distance) = payload.get("distance").and_then(Value::as_i64) else {
                continue;
            };
            let candidate = distance.saturating_add(1);
            if node.field_i64("distance").map_or(true, |current| candidate < current) {
                node.set_field("distance", candidate);
                node.set_field("parent", sender(payload));
                improved = true;
            }
        }
        if improved {
            node.set_field("updated", at.as_round());
            let distance = node.field_i64("distance").unwrap_or_default();
            comm.send_to_all(node, json!({"from": node.id(), "distance": distance}), None, None);
            return;
        }
        if let (SimTime::Round(round), Some(updated)) = (at, node.field("updated").and_then(Value::as_u64)) {
            if round > updated + 1 {
                node.terminate();
            }
        }
    }
}

/// Ping-pong between the root and its first neighbor.
///
/// A counter travels back and forth and is incremented on every hop. Both nodes terminate once it reaches `limit`.
pub struct Echo {
    /// Number of hops before stopping.
    pub limit: u64,
}

impl Default for Echo {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

impl Algorithm for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn init(&self, node: &mut Node, comm: &mut Communication) {
        node.set_field("count", 0);
        if !node.is_root() {
            return;
        }
        if let Some(peer) = node.neighbors().first().copied() {
            comm.send(node, peer, json!({"from": node.id(), "count": 0}), None, None);
        }
    }

    fn step(&self, node: &mut Node, comm: &mut Communication, _at: SimTime, inbox: Inbox) {
        for payload in inbox.payloads() {
            let count = payload.get("count").and_then(Value::as_u64).unwrap_or_default();
            node.set_field("count", count);
            if count >= self.limit {
                node.terminate();
                return;
            }
            if let Some(peer) = sender(payload) {
                comm.send(node, peer, json!({"from": node.id(), "count": count + 1}), None, None);
            }
            if count + 1 >= self.limit {
                node.terminate();
                return;
            }
        }
    }
}
