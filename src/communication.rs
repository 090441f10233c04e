//! Message dispatch between nodes.
//!
//! [`Communication`] is the handle algorithms receive in their callbacks. It owns the network, the ordering structure
//! of the run and the fault injector, computes edge delays and invokes algorithm entry points.

use std::rc::Rc;

use rand::Rng;
use rand_pcg::Pcg64;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::algorithm::{Algorithm, Inbox, Phase};
use crate::config::{DelayModel, Mode, SimulationConfig};
use crate::fault::{FaultInjector, FaultSpec, FaultStats};
use crate::message::{Message, Payload, SimTime};
use crate::node::{Node, NodeId, NodeState};
use crate::observer::{ChangeObserver, NodeSnapshot};
use crate::queue::{MessageQueue, RoundQueue, TimeQueue};
use crate::topology::Network;
use crate::{log_debug, log_warn};

/// Message counters of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrafficStats {
    /// Messages that entered the ordering structure.
    pub sent: u64,
    /// Messages handed to an active destination.
    pub delivered: u64,
    /// Sends dropped because the nodes are not adjacent or one of them cannot communicate.
    pub dropped_unreachable: u64,
    /// Queued messages discarded because the destination left the active state.
    pub dropped_inactive: u64,
}

/// Communication layer of a simulation.
pub struct Communication {
    network: Network,
    queue: MessageQueue,
    faults: FaultInjector,
    algorithm: Rc<dyn Algorithm>,
    mode: Mode,
    delay: DelayModel,
    edge_delays: FxHashMap<(NodeId, NodeId), f64>,
    last_arrival: FxHashMap<(NodeId, NodeId), SimTime>,
    clock: SimTime,
    rng: Pcg64,
    observer: Option<Box<dyn ChangeObserver>>,
    track_changes: bool,
    current: Option<usize>,
    traffic: TrafficStats,
}

impl Communication {
    pub(crate) fn new(
        network: Network,
        algorithm: Rc<dyn Algorithm>,
        faults: FaultInjector,
        config: &SimulationConfig,
        mut rng: Pcg64,
    ) -> Self {
        let (queue, clock) = match config.mode {
            Mode::Sync => (MessageQueue::Round(RoundQueue::new()), SimTime::Round(0)),
            Mode::Async => (MessageQueue::Time(TimeQueue::new()), SimTime::Time(0.)),
        };
        let mut edge_delays = FxHashMap::default();
        if config.mode == Mode::Async && config.delay == DelayModel::RandomConstant {
            for edge in network.edges() {
                edge_delays.insert(edge, rng.gen::<f64>());
            }
        }
        Self {
            network,
            queue,
            faults,
            algorithm,
            mode: config.mode,
            delay: config.delay,
            edge_delays,
            last_arrival: FxHashMap::default(),
            clock,
            rng,
            observer: None,
            track_changes: config.track_changes,
            current: None,
            traffic: TrafficStats::default(),
        }
    }

    /// Sends a message from `source` to the adjacent node `dst`.
    ///
    /// Nothing happens if the nodes are not adjacent, if `source` has collapsed or if `dst` is not active. `sent_at`
    /// defaults to the current clock; earlier values are clamped to it. The message may be lost or corrupted according
    /// to `faults`. On success the sender's counter is updated and its collapse triggers are checked.
    pub fn send(
        &mut self,
        source: &mut Node,
        dst: NodeId,
        payload: impl Into<Payload>,
        sent_at: Option<SimTime>,
        faults: Option<&FaultSpec>,
    ) {
        let src = source.id();
        if !source.is_neighbor(dst) {
            log_debug!(self.clock, "dropping message {} -> {}: nodes are not adjacent", src, dst);
            self.traffic.dropped_unreachable += 1;
            return;
        }
        if source.state() == NodeState::Collapsed {
            log_debug!(self.clock, "dropping message {} -> {}: sender collapsed", src, dst);
            self.traffic.dropped_unreachable += 1;
            return;
        }
        match self.network.node(dst) {
            Some(target) if target.is_active() => {}
            Some(target) => {
                log_debug!(self.clock, "dropping message {} -> {}: receiver is {}", src, dst, target.state());
                self.traffic.dropped_unreachable += 1;
                return;
            }
            None => {
                log_debug!(self.clock, "dropping message {} -> {}: unknown receiver", src, dst);
                self.traffic.dropped_unreachable += 1;
                return;
            }
        }

        let (sent, arrival) = self.schedule(src, dst, sent_at);
        let Some(payload) = self.faults.transmit(faults, payload.into(), sent, &mut self.rng) else {
            return;
        };
        self.last_arrival.insert((src, dst), arrival);
        let message = Message {
            src,
            dst,
            sent,
            arrival,
            payload,
        };
        log_debug!(self.clock, "sending {}", message);
        self.queue.push(message);
        self.traffic.sent += 1;
        source.add_sent(1);
        // round triggers are only checked on receipt
        self.faults.evaluate_collapse(source, None, self.clock, &mut self.rng);
    }

    /// Sends the same payload to every neighbor of `source`, in adjacency order.
    pub fn send_to_all(
        &mut self,
        source: &mut Node,
        payload: impl Into<Payload>,
        sent_at: Option<SimTime>,
        faults: Option<&FaultSpec>,
    ) {
        let payload = payload.into();
        let neighbors = source.neighbors().to_vec();
        for dst in neighbors {
            self.send(source, dst, payload.clone(), sent_at, faults);
        }
    }

    // arrival on an ordered edge never precedes the previous arrival on the same directed edge
    fn schedule(&mut self, src: NodeId, dst: NodeId, sent_at: Option<SimTime>) -> (SimTime, SimTime) {
        match self.mode {
            Mode::Sync => {
                let now = self.clock.as_round();
                let sent = sent_at.map_or(now, |t| t.as_round().max(now));
                let mut arrival = sent + 1;
                if self.faults.is_edge_ordered(src, dst) {
                    if let Some(last) = self.last_arrival.get(&(src, dst)) {
                        arrival = arrival.max(last.as_round());
                    }
                }
                (SimTime::Round(sent), SimTime::Round(arrival))
            }
            Mode::Async => {
                let now = self.clock.as_f64();
                let sent = sent_at.map_or(now, |t| t.as_f64().max(now));
                let delay = match self.delay {
                    DelayModel::Constant(delay) => delay,
                    DelayModel::Random => self.rng.gen::<f64>(),
                    DelayModel::RandomConstant => self
                        .edge_delays
                        .get(&(src.min(dst), src.max(dst)))
                        .copied()
                        .unwrap_or_default(),
                };
                let mut arrival = sent + delay;
                if self.faults.is_edge_ordered(src, dst) {
                    if let Some(last) = self.last_arrival.get(&(src, dst)) {
                        arrival = arrival.max(last.as_f64());
                    }
                }
                (SimTime::Time(sent), SimTime::Time(arrival))
            }
        }
    }

    /// Delivers a message to its destination.
    ///
    /// Messages for inactive nodes are discarded. Otherwise the receiver's counter is updated and its collapse
    /// triggers are checked; a node that collapses here is not stepped.
    pub fn deliver(&mut self, message: Message) {
        let Some(idx) = self.network.index_of(message.dst) else {
            return;
        };
        let round = self.current_round();
        let node = &mut self.network.nodes_mut()[idx];
        if !node.is_active() {
            log_debug!(self.clock, "discarding {}: receiver is {}", message, node.state());
            self.traffic.dropped_inactive += 1;
            return;
        }
        node.add_received(1);
        self.traffic.delivered += 1;
        if self.faults.evaluate_collapse(node, round, self.clock, &mut self.rng) {
            self.observe(idx);
            return;
        }
        self.invoke_at(
            idx,
            Phase::Step {
                at: message.arrival,
                inbox: Inbox::Message(message.payload),
            },
        );
    }

    /// Delivers the bucket of `round` to the node at position `idx` and steps it.
    pub(crate) fn deliver_round(&mut self, idx: usize, round: u64) {
        let at = SimTime::Round(round);
        let node = &mut self.network.nodes_mut()[idx];
        if !node.is_active() {
            return;
        }
        let batch = match &mut self.queue {
            MessageQueue::Round(queue) => queue.pop_all(node.id(), round),
            MessageQueue::Time(_) => Vec::new(),
        };
        node.add_received(batch.len() as u64);
        self.traffic.delivered += batch.len() as u64;
        if self.faults.evaluate_collapse(node, Some(round), at, &mut self.rng) {
            self.observe(idx);
            return;
        }
        let inbox = Inbox::Round(batch.into_iter().map(|m| m.payload).collect());
        self.invoke_at(idx, Phase::Step { at, inbox });
    }

    /// Runs the global random-collapse step and drops pending messages of nodes that left the active state.
    pub(crate) fn end_round(&mut self, round: u64) {
        let at = SimTime::Round(round);
        let collapsed = self.faults.collapse_randomly(self.network.nodes_mut(), at, &mut self.rng);
        for id in collapsed {
            if let Some(idx) = self.network.index_of(id) {
                self.observe(idx);
            }
        }
        if let MessageQueue::Round(queue) = &mut self.queue {
            for node in self.network.nodes().iter().filter(|n| !n.is_active()) {
                self.traffic.dropped_inactive += queue.clear_destination(node.id()) as u64;
            }
        }
    }

    /// Pops the earliest message of the asynchronous discipline and advances the clock to its arrival.
    pub(crate) fn next_message(&mut self) -> Option<Message> {
        let MessageQueue::Time(queue) = &mut self.queue else {
            return None;
        };
        let message = queue.pop()?;
        self.clock = message.arrival;
        Some(message)
    }

    /// Calls an algorithm entry point for the node `id`.
    ///
    /// Nodes in an absorbing state are skipped. Re-entrant calls for the node whose callback is running are ignored.
    pub fn invoke(&mut self, id: NodeId, phase: Phase) {
        match self.network.index_of(id) {
            Some(idx) => self.invoke_at(idx, phase),
            None => log_warn!(self.clock, "cannot invoke {}: unknown node {}", self.algorithm.name(), id),
        }
    }

    pub(crate) fn invoke_at(&mut self, idx: usize, phase: Phase) {
        if self.current == Some(idx) {
            log_warn!(self.clock, "ignoring re-entrant call of {}", self.algorithm.name());
            return;
        }
        if !self.network.nodes()[idx].is_active() {
            return;
        }
        let algorithm = Rc::clone(&self.algorithm);
        let outer = self.current.replace(idx);
        // the node leaves the network for the duration of the callback
        let mut node = std::mem::take(&mut self.network.nodes_mut()[idx]);
        match phase {
            Phase::Init => algorithm.init(&mut node, self),
            Phase::Step { at, inbox } => algorithm.step(&mut node, self, at, inbox),
        }
        self.network.nodes_mut()[idx] = node;
        self.current = outer;
        self.observe(idx);
    }

    fn observe(&mut self, idx: usize) {
        if !self.track_changes {
            return;
        }
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        let node = &mut self.network.nodes_mut()[idx];
        if node.has_changed() {
            observer.on_change(NodeSnapshot::capture(node, self.clock));
            node.reset_changed();
        }
    }

    fn current_round(&self) -> Option<u64> {
        match self.mode {
            Mode::Sync => Some(self.clock.as_round()),
            Mode::Async => None,
        }
    }

    pub(crate) fn set_clock(&mut self, clock: SimTime) {
        self.clock = clock;
    }

    pub(crate) fn set_observer(&mut self, observer: Box<dyn ChangeObserver>) {
        self.observer = Some(observer);
    }

    /// Returns the current clock value.
    pub fn now(&self) -> SimTime {
        self.clock
    }

    /// Returns the scheduling discipline.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns the network.
    ///
    /// While a callback runs, the slot of the node being processed holds a placeholder.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Returns the random generator of the run, so that randomized algorithms stay reproducible.
    pub fn rng(&mut self) -> &mut Pcg64 {
        &mut self.rng
    }

    /// Number of messages waiting for delivery.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns the message counters.
    pub fn traffic(&self) -> &TrafficStats {
        &self.traffic
    }

    /// Returns the fault counters.
    pub fn fault_stats(&self) -> &FaultStats {
        self.faults.stats()
    }

    pub(crate) fn algorithm(&self) -> &dyn Algorithm {
        self.algorithm.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;
    use crate::algorithm::FnAlgorithm;
    use crate::config::TopologyKind;
    use crate::fault::{CollapseConfig, CollapseRule, FaultConfig, ReorderConfig};
    use crate::observer::ChangeLog;

    fn setup(mode: Mode, delay: DelayModel, faults: FaultConfig) -> Communication {
        let config = SimulationConfig {
            node_count: 3,
            topology: TopologyKind::Line,
            mode,
            delay,
            ..Default::default()
        };
        let mut rng = Pcg64::seed_from_u64(7);
        let network = Network::build(&config, &mut rng).unwrap();
        let faults = FaultInjector::new(faults, &mut rng);
        let algorithm = FnAlgorithm::new("record")
            .with_init(|_, _| {})
            .with_step(|node, _, _, inbox| {
                let mut seen = node.field("seen").and_then(|v| v.as_array().cloned()).unwrap_or_default();
                seen.extend(inbox.payloads().iter().cloned());
                node.set_field("seen", seen);
            });
        Communication::new(network, Rc::new(algorithm), faults, &config, rng)
    }

    fn with_node<F: FnOnce(&mut Communication, &mut Node)>(comm: &mut Communication, id: NodeId, f: F) {
        let idx = comm.network.index_of(id).unwrap();
        let mut node = std::mem::take(&mut comm.network.nodes_mut()[idx]);
        f(comm, &mut node);
        comm.network.nodes_mut()[idx] = node;
    }

    fn drain(comm: &mut Communication) -> Vec<Message> {
        std::iter::from_fn(|| comm.next_message()).collect()
    }

    #[test]
    fn test_unreachable_targets_are_dropped() {
        let mut comm = setup(Mode::Async, DelayModel::default(), FaultConfig::new());
        with_node(&mut comm, 0, |comm, node| {
            comm.send(node, 2, "far", None, None);
            comm.send(node, 0, "self", None, None);
        });
        comm.network.nodes_mut()[1].terminate();
        with_node(&mut comm, 0, |comm, node| comm.send(node, 1, "done", None, None));
        assert_eq!(comm.pending(), 0);
        assert_eq!(comm.traffic().dropped_unreachable, 3);
        assert_eq!(comm.network().node(0).unwrap().sent_count(), 0);
    }

    #[test]
    fn test_send_to_all_follows_adjacency() {
        let mut comm = setup(Mode::Sync, DelayModel::default(), FaultConfig::new());
        with_node(&mut comm, 1, |comm, node| comm.send_to_all(node, json!({"hello": 1}), None, None));
        let MessageQueue::Round(queue) = &mut comm.queue else {
            panic!("expected round queue");
        };
        assert_eq!(queue.pop_all(0, 1).len(), 1);
        assert_eq!(queue.pop_all(2, 1).len(), 1);
        assert_eq!(comm.network().node(1).unwrap().sent_count(), 2);
    }

    #[test]
    fn test_ordered_edge_is_monotonic() {
        let mut comm = setup(Mode::Async, DelayModel::Random, FaultConfig::new());
        with_node(&mut comm, 0, |comm, node| {
            for i in 0..100 {
                comm.send(node, 1, i, None, None);
            }
        });
        let messages = drain(&mut comm);
        assert_eq!(messages.len(), 100);
        assert!(messages.windows(2).all(|w| w[0].arrival.as_f64() <= w[1].arrival.as_f64()));
        let order = messages.iter().map(|m| m.payload.as_u64().unwrap()).collect::<Vec<_>>();
        assert_eq!(order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_unordered_edge_allows_overtaking() {
        let faults = FaultConfig {
            reorder: ReorderConfig::new().with_edge(0, 1, 1.),
            ..Default::default()
        };
        let mut comm = setup(Mode::Async, DelayModel::Random, faults);
        with_node(&mut comm, 0, |comm, node| {
            for i in 0..100 {
                comm.send(node, 1, i, None, None);
            }
        });
        let order = drain(&mut comm)
            .iter()
            .map(|m| m.payload.as_u64().unwrap())
            .collect::<Vec<_>>();
        assert_ne!(order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sent_time_is_clamped() {
        let mut comm = setup(Mode::Async, DelayModel::Constant(2.), FaultConfig::new());
        comm.set_clock(SimTime::Time(5.));
        with_node(&mut comm, 0, |comm, node| {
            comm.send(node, 1, "past", Some(SimTime::Time(1.)), None);
            comm.send(node, 1, "future", Some(SimTime::Time(10.)), None);
        });
        let arrivals = drain(&mut comm).iter().map(|m| m.arrival.as_f64()).collect::<Vec<_>>();
        assert_eq!(arrivals, vec![7., 12.]);
    }

    #[test]
    fn test_collapse_after_send() {
        let faults = FaultConfig {
            collapse: CollapseConfig::new().with_rule(
                0,
                CollapseRule {
                    sent_msg_count: Some(2),
                    ..Default::default()
                },
            ),
            ..Default::default()
        };
        let mut comm = setup(Mode::Async, DelayModel::default(), faults);
        with_node(&mut comm, 0, |comm, node| {
            for i in 0..5 {
                comm.send(node, 1, i, None, None);
            }
        });
        assert_eq!(comm.pending(), 2);
        assert_eq!(comm.network().node(0).unwrap().state(), NodeState::Collapsed);
        assert_eq!(comm.fault_stats().collapses.len(), 1);
    }

    #[test]
    fn test_sync_ordered_edge_is_monotonic() {
        let mut comm = setup(Mode::Sync, DelayModel::default(), FaultConfig::new());
        with_node(&mut comm, 0, |comm, node| {
            comm.send(node, 1, "first", Some(SimTime::Round(5)), None);
            comm.send(node, 1, "second", None, None);
        });
        let MessageQueue::Round(queue) = &mut comm.queue else {
            panic!("expected round queue");
        };
        assert!(queue.pop_all(1, 1).is_empty());
        let payloads = queue.pop_all(1, 6).into_iter().map(|m| m.payload).collect::<Vec<_>>();
        assert_eq!(payloads, vec![json!("first"), json!("second")]);
    }

    #[test]
    fn test_round_triggers_ignored_at_send() {
        let faults = FaultConfig {
            collapse: CollapseConfig::new().with_rule(
                0,
                CollapseRule {
                    round: Some(0),
                    ..Default::default()
                },
            ),
            ..Default::default()
        };
        let mut comm = setup(Mode::Sync, DelayModel::default(), faults);
        with_node(&mut comm, 0, |comm, node| {
            for i in 0..5 {
                comm.send(node, 1, i, None, None);
            }
        });
        assert_eq!(comm.pending(), 5);
        assert!(comm.network().node(0).unwrap().is_active());
    }

    #[test]
    fn test_deliver_steps_active_nodes_only() {
        let log = ChangeLog::new();
        let mut comm = setup(Mode::Async, DelayModel::default(), FaultConfig::new());
        comm.track_changes = true;
        comm.set_observer(Box::new(log.clone()));
        with_node(&mut comm, 0, |comm, node| {
            comm.send(node, 1, "a", None, None);
            comm.send(node, 1, "b", None, None);
        });
        let first = comm.next_message().unwrap();
        comm.deliver(first);
        comm.network.nodes_mut()[1].terminate();
        let second = comm.next_message().unwrap();
        comm.deliver(second);

        let node = comm.network().node(1).unwrap();
        assert_eq!(node.field("seen"), Some(&json!(["a"])));
        assert_eq!(node.received_count(), 1);
        assert_eq!(comm.traffic().dropped_inactive, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshots()[0].at, SimTime::Time(1.));
    }
}
