//! Fault injection: message loss and corruption, node collapse, and edge reordering.
//!
//! Faults are simulated behaviors, not errors. Everything that happens is recorded in [`FaultStats`], which is owned
//! by the [`FaultInjector`] of a run and handed to reporting code when the run ends.

pub mod collapse;
pub mod corruption;
pub mod reorder;

use rand::seq::index::sample;
use rand::Rng;
use serde_json::Value;

use crate::error::ConfigError;
use crate::message::{Payload, SimTime};
use crate::node::{Node, NodeId, NodeState};
use crate::{log_debug, log_info};

pub use collapse::{CollapseCause, CollapseConfig, CollapseRule, OverallCollapse};
pub use corruption::{FaultSpec, FieldCorruption, Transmission};
pub use reorder::{ReorderConfig, ReorderPolicy};

/// Fault configuration of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaultConfig {
    /// Collapse triggers.
    pub collapse: CollapseConfig,
    /// Reorder-eligible edges.
    pub reorder: ReorderConfig,
}

impl FaultConfig {
    /// Creates a configuration without faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"collapse": {...}, "reorder": {...}}`. Both keys are optional.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value
            .as_object()
            .ok_or_else(|| ConfigError::Fault("fault configuration must be an object".to_string()))?;
        if let Some(key) = map.keys().find(|k| *k != "collapse" && *k != "reorder") {
            return Err(ConfigError::Fault(format!("unknown key `{}`", key)));
        }
        Ok(Self {
            collapse: map.get("collapse").map(CollapseConfig::from_value).transpose()?.unwrap_or_default(),
            reorder: map.get("reorder").map(ReorderConfig::from_value).transpose()?.unwrap_or_default(),
        })
    }

    /// Parses a JSON document with [`FaultConfig::from_value`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}

/// A recorded collapse.
#[derive(Clone, Debug, PartialEq)]
pub struct CollapseEvent {
    /// Collapsed node.
    pub node: NodeId,
    /// Clock value at the collapse.
    pub at: SimTime,
    /// Trigger that fired.
    pub cause: CollapseCause,
}

/// Counters of injected faults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaultStats {
    /// Messages dropped by the loss gate.
    pub lost: u64,
    /// Messages altered by the corruption gate.
    pub corrupted: u64,
    /// Collapses in the order they happened.
    pub collapses: Vec<CollapseEvent>,
    /// Number of edges sampled as unordered.
    pub unordered_edges: usize,
}

/// Applies faults during a run.
pub struct FaultInjector {
    collapse: CollapseConfig,
    reorder: ReorderPolicy,
    stats: FaultStats,
}

impl FaultInjector {
    /// Creates an injector, sampling reorder-eligible edges.
    pub fn new<R: Rng + ?Sized>(config: FaultConfig, rng: &mut R) -> Self {
        let reorder = ReorderPolicy::sample(&config.reorder, rng);
        let stats = FaultStats {
            unordered_edges: reorder.unordered_count(),
            ..Default::default()
        };
        Self {
            collapse: config.collapse,
            reorder,
            stats,
        }
    }

    /// Runs the loss and corruption gates. Returns `None` if the message is lost.
    pub fn transmit<R: Rng + ?Sized>(
        &mut self,
        spec: Option<&FaultSpec>,
        payload: Payload,
        at: SimTime,
        rng: &mut R,
    ) -> Option<Payload> {
        let Some(spec) = spec else {
            return Some(payload);
        };
        match corruption::transmit(spec, payload.clone(), rng) {
            Transmission::Lost => {
                self.stats.lost += 1;
                log_debug!(at, "message lost: {}", payload);
                None
            }
            Transmission::Corrupted(corrupted) => {
                self.stats.corrupted += 1;
                log_debug!(at, "message corrupted: {} -> {}", payload, corrupted);
                Some(corrupted)
            }
            Transmission::Intact(payload) => Some(payload),
        }
    }

    /// Checks the collapse triggers of an active node and collapses it on the first match.
    ///
    /// Nodes without triggers are skipped. The rule's probability is drawn before the triggers are checked. Returns
    /// `true` if the node collapsed.
    pub fn evaluate_collapse<R: Rng + ?Sized>(
        &mut self,
        node: &mut Node,
        round: Option<u64>,
        at: SimTime,
        rng: &mut R,
    ) -> bool {
        if !node.is_active() {
            return false;
        }
        let Some(rule) = self.collapse.nodes.get(&node.id()) else {
            return false;
        };
        if rng.gen::<f64>() > rule.probability {
            return false;
        }
        match rule.matches(node, round) {
            Some(cause) => self.collapse_node(node, cause, at),
            None => false,
        }
    }

    /// Global random-collapse step, run once per synchronous round.
    ///
    /// Collapses a Poisson-sized batch of uniformly chosen active nodes so that the collapsed share approaches the
    /// configured overall percentage. Returns the collapsed identifiers.
    pub fn collapse_randomly<R: Rng + ?Sized>(&mut self, nodes: &mut [Node], at: SimTime, rng: &mut R) -> Vec<NodeId> {
        let Some(overall) = self.collapse.overall else {
            return Vec::new();
        };
        if nodes.is_empty() || overall.percent <= 0. {
            return Vec::new();
        }
        let collapsed = nodes.iter().filter(|n| n.state() == NodeState::Collapsed).count();
        let deficit = overall.target(nodes.len()).saturating_sub(collapsed);
        let candidates = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_active())
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let batch = overall.batch_size(deficit, candidates.len(), rng);
        log_debug!(
            at,
            "random collapse: target {}, deficit {}, batch {}",
            overall.target(nodes.len()),
            deficit,
            batch
        );
        let mut selected = sample(rng, candidates.len(), batch)
            .into_iter()
            .map(|k| candidates[k])
            .collect::<Vec<_>>();
        selected.sort_unstable();
        let mut out = Vec::with_capacity(selected.len());
        for i in selected {
            if self.collapse_node(&mut nodes[i], CollapseCause::Random, at) {
                out.push(nodes[i].id());
            }
        }
        out
    }

    fn collapse_node(&mut self, node: &mut Node, cause: CollapseCause, at: SimTime) -> bool {
        if !node.collapse() {
            return false;
        }
        log_info!(at, "node {} collapsed ({:?})", node.id(), cause);
        self.stats.collapses.push(CollapseEvent {
            node: node.id(),
            at,
            cause,
        });
        true
    }

    /// Returns `true` if arrivals from `src` to `dst` must stay monotonic.
    pub fn is_edge_ordered(&self, src: NodeId, dst: NodeId) -> bool {
        self.reorder.is_ordered(src, dst)
    }

    /// Returns the fault counters.
    pub fn stats(&self) -> &FaultStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use serde_json::json;

    use super::*;

    fn nodes(n: u32) -> Vec<Node> {
        (0..n).map(Node::new).collect()
    }

    #[test]
    fn test_evaluate_skips_inactive_and_unconfigured() {
        let mut rng = Pcg64::seed_from_u64(1);
        let config = FaultConfig {
            collapse: CollapseConfig::new().with_rule(
                1,
                CollapseRule {
                    sent_msg_count: Some(0),
                    ..Default::default()
                },
            ),
            ..Default::default()
        };
        let mut injector = FaultInjector::new(config, &mut rng);
        let mut other = Node::new(2);
        assert!(!injector.evaluate_collapse(&mut other, Some(0), SimTime::Round(0), &mut rng));

        let mut node = Node::new(1);
        node.terminate();
        assert!(!injector.evaluate_collapse(&mut node, Some(0), SimTime::Round(0), &mut rng));
        assert_eq!(node.state(), NodeState::Terminated);

        let mut node = Node::new(1);
        assert!(injector.evaluate_collapse(&mut node, Some(0), SimTime::Round(0), &mut rng));
        assert_eq!(node.state(), NodeState::Collapsed);
        assert_eq!(injector.stats().collapses[0].cause, CollapseCause::SentCount);
    }

    #[test]
    fn test_zero_probability_never_collapses() {
        let mut rng = Pcg64::seed_from_u64(1);
        let rule = CollapseRule {
            round: Some(0),
            probability: 0.,
            ..Default::default()
        };
        let config = FaultConfig {
            collapse: CollapseConfig::new().with_rule(1, rule),
            ..Default::default()
        };
        let mut injector = FaultInjector::new(config, &mut rng);
        let mut node = Node::new(1);
        for round in 0..50 {
            injector.evaluate_collapse(&mut node, Some(round), SimTime::Round(round), &mut rng);
        }
        assert!(node.is_active());
    }

    #[test]
    fn test_random_collapse_reaches_target() {
        let mut rng = Pcg64::seed_from_u64(3);
        let config = FaultConfig {
            collapse: CollapseConfig::new().with_overall(OverallCollapse { percent: 0.3, rounds: 5 }),
            ..Default::default()
        };
        let mut injector = FaultInjector::new(config, &mut rng);
        let mut nodes = nodes(20);
        let mut reported = Vec::new();
        for round in 0..100 {
            reported.extend(injector.collapse_randomly(&mut nodes, SimTime::Round(round), &mut rng));
        }
        let collapsed = nodes.iter().filter(|n| n.state() == NodeState::Collapsed).count();
        assert_eq!(collapsed, 6);
        assert_eq!(injector.stats().collapses.len(), 6);
        // returned ids are exactly the collapsed nodes, in collapse order
        let recorded = injector.stats().collapses.iter().map(|c| c.node).collect::<Vec<_>>();
        assert_eq!(reported, recorded);
        assert!(reported.iter().all(|id| nodes[*id as usize].state() == NodeState::Collapsed));
    }

    #[test]
    fn test_random_collapse_ignores_terminated() {
        let mut rng = Pcg64::seed_from_u64(3);
        let config = FaultConfig {
            collapse: CollapseConfig::new().with_overall(OverallCollapse::new(1.)),
            ..Default::default()
        };
        let mut injector = FaultInjector::new(config, &mut rng);
        let mut nodes = nodes(4);
        nodes[0].terminate();
        for round in 0..50 {
            injector.collapse_randomly(&mut nodes, SimTime::Round(round), &mut rng);
        }
        assert_eq!(nodes[0].state(), NodeState::Terminated);
        assert!(nodes[1..].iter().all(|n| n.state() == NodeState::Collapsed));
    }

    #[test]
    fn test_transmit_counts() {
        let mut rng = Pcg64::seed_from_u64(3);
        let mut injector = FaultInjector::new(FaultConfig::new(), &mut rng);
        let lossy = FaultSpec::new().with_loss(1.);
        let corrupting = FaultSpec::new().with_corruption(1.).replace_with(0);
        assert_eq!(injector.transmit(None, json!(1), SimTime::Time(0.), &mut rng), Some(json!(1)));
        assert_eq!(injector.transmit(Some(&lossy), json!(1), SimTime::Time(0.), &mut rng), None);
        assert_eq!(injector.transmit(Some(&corrupting), json!(1), SimTime::Time(0.), &mut rng), Some(json!(0)));
        assert_eq!(injector.stats().lost, 1);
        assert_eq!(injector.stats().corrupted, 1);
    }

    #[test]
    fn test_from_json() {
        let config = FaultConfig::from_json_str(r#"{"collapse": {"3": {"received_msg_count": 2}}, "reorder": {"(0,1)": 1}}"#)
            .unwrap();
        assert_eq!(config.collapse.nodes[&3].received_msg_count, Some(2));
        assert_eq!(config.reorder.edges().len(), 1);
        assert!(FaultConfig::from_json_str(r#"{"collapses": {}}"#).is_err());
    }
}
