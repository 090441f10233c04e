//! End-of-run statistics.

use serde::Serialize;

use crate::communication::Communication;
use crate::config::Mode;
use crate::fault::CollapseEvent;
use crate::log_info;
use crate::message::SimTime;
use crate::node::{NodeId, NodeState};
use crate::scheduler::RunOutcome;

/// Number of nodes listed in [`RunReport::chattiest`].
pub const TOP_NODES: usize = 10;

/// Message counters of a single node.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeTraffic {
    /// Node identifier.
    pub id: NodeId,
    /// Final state.
    pub state: NodeState,
    /// Messages sent.
    pub sent: u64,
    /// Messages received.
    pub received: u64,
}

impl NodeTraffic {
    /// Sent plus received messages.
    pub fn total(&self) -> u64 {
        self.sent + self.received
    }
}

/// Summary of a finished run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    /// Scheduling discipline.
    pub mode: Mode,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Number of nodes.
    pub nodes: usize,
    /// Messages that entered the ordering structure.
    pub sent: u64,
    /// Messages delivered to an active node.
    pub delivered: u64,
    /// Messages dropped by the loss gate.
    pub lost: u64,
    /// Messages altered by the corruption gate.
    pub corrupted: u64,
    /// Sends to non-adjacent or inactive nodes.
    pub dropped_unreachable: u64,
    /// Queued messages whose receiver left the active state.
    pub dropped_inactive: u64,
    /// Mean of sent and received messages per node.
    pub average_per_node: f64,
    /// Nodes with the most traffic, at most [`TOP_NODES`].
    pub chattiest: Vec<NodeTraffic>,
    /// Collapses in the order they happened.
    #[serde(skip)]
    pub collapses: Vec<CollapseEvent>,
    /// Number of nodes that terminated.
    pub terminated: usize,
    /// Number of edges sampled as unordered.
    pub unordered_edges: usize,
    /// Per-node counters in declared order.
    pub traffic: Vec<NodeTraffic>,
}

impl RunReport {
    pub(crate) fn collect(comm: &Communication, outcome: RunOutcome) -> Self {
        let traffic = comm
            .network()
            .nodes()
            .iter()
            .map(|n| NodeTraffic {
                id: n.id(),
                state: n.state(),
                sent: n.sent_count(),
                received: n.received_count(),
            })
            .collect::<Vec<_>>();
        let mut chattiest = traffic.clone();
        // stable sort keeps declared order among equals
        chattiest.sort_by(|a, b| b.total().cmp(&a.total()));
        chattiest.truncate(TOP_NODES);

        let counters = comm.traffic();
        let faults = comm.fault_stats();
        let nodes = traffic.len();
        let average_per_node = if nodes == 0 {
            0.
        } else {
            (counters.sent + counters.delivered) as f64 / (2 * nodes) as f64
        };
        Self {
            mode: comm.mode(),
            outcome,
            nodes,
            sent: counters.sent,
            delivered: counters.delivered,
            lost: faults.lost,
            corrupted: faults.corrupted,
            dropped_unreachable: counters.dropped_unreachable,
            dropped_inactive: counters.dropped_inactive,
            average_per_node,
            chattiest,
            collapses: faults.collapses.clone(),
            terminated: traffic.iter().filter(|t| t.state == NodeState::Terminated).count(),
            unordered_edges: faults.unordered_edges,
            traffic,
        }
    }

    /// Identifiers of collapsed nodes in collapse order.
    pub fn collapsed(&self) -> Vec<NodeId> {
        self.collapses.iter().map(|c| c.node).collect()
    }

    /// Final clock value.
    pub fn final_time(&self) -> SimTime {
        self.outcome.final_time
    }

    /// Logs the report at info level.
    pub fn log(&self) {
        let at = self.outcome.final_time;
        log_info!(at, "{} run over {} nodes finished", self.mode, self.nodes);
        if let Some(rounds) = self.outcome.rounds {
            log_info!(at, "rounds executed: {}{}", rounds, if self.outcome.cap_reached { " (cap reached)" } else { "" });
        }
        log_info!(at, "messages sent: {}, delivered: {}", self.sent, self.delivered);
        log_info!(at, "messages lost: {}, corrupted: {}", self.lost, self.corrupted);
        log_info!(
            at,
            "dropped at send: {}, discarded at delivery: {}",
            self.dropped_unreachable,
            self.dropped_inactive
        );
        log_info!(at, "average messages per node: {:.2}", self.average_per_node);
        log_info!(at, "top {} chatty nodes:", self.chattiest.len());
        for node in &self.chattiest {
            log_info!(at, "    node {}: {} messages", node.id, node.total());
        }
        log_info!(at, "terminated nodes: {}", self.terminated);
        log_info!(at, "collapsed nodes: {:?}", self.collapsed());
        log_info!(at, "unordered edges: {}", self.unordered_edges);
    }
}
