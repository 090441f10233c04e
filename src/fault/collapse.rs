//! Node collapse triggers.

use rand::Rng;
use rand_distr::{Distribution, Poisson};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::node::{Node, NodeId};

/// Why a node collapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollapseCause {
    /// Round trigger (with recurrence) matched.
    Round,
    /// Received-count threshold reached.
    ReceivedCount,
    /// Sent-count threshold reached.
    SentCount,
    /// Selected by the global random-collapse step.
    Random,
}

fn one() -> u64 {
    1
}

fn certain() -> f64 {
    1.
}

/// Collapse triggers of a single node. Absent triggers are disabled.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollapseRule {
    /// First round at which the node collapses.
    pub round: Option<u64>,
    /// Period of the round trigger; `0` means only `round` itself matches.
    #[serde(default = "one")]
    pub round_reoccurence: u64,
    /// Probability that triggers are checked at all on an evaluation.
    #[serde(default = "certain")]
    pub probability: f64,
    /// Collapse once this many messages were received.
    pub received_msg_count: Option<u64>,
    /// Collapse once this many messages were sent.
    pub sent_msg_count: Option<u64>,
}

impl Default for CollapseRule {
    fn default() -> Self {
        Self {
            round: None,
            round_reoccurence: 1,
            probability: 1.,
            received_msg_count: None,
            sent_msg_count: None,
        }
    }
}

impl CollapseRule {
    /// Returns the first matching trigger, checking round, received count and sent count in that order.
    ///
    /// `round` is `None` outside of the synchronous discipline, which disables the round trigger.
    pub fn matches(&self, node: &Node, round: Option<u64>) -> Option<CollapseCause> {
        if let (Some(current), Some(start)) = (round, self.round) {
            let hit = if self.round_reoccurence > 0 {
                current >= start && (current - start) % self.round_reoccurence == 0
            } else {
                current == start
            };
            if hit {
                return Some(CollapseCause::Round);
            }
        }
        if self.received_msg_count.is_some_and(|n| node.received_count() >= n) {
            return Some(CollapseCause::ReceivedCount);
        }
        if self.sent_msg_count.is_some_and(|n| node.sent_count() >= n) {
            return Some(CollapseCause::SentCount);
        }
        None
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOverall {
    Percent(f64),
    Detailed {
        percent: f64,
        #[serde(default)]
        rounds: Option<u64>,
    },
}

/// Global random-collapse target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverallCollapse {
    /// Fraction of all nodes that should end up collapsed.
    pub percent: f64,
    /// Estimated number of rounds over which collapses are spread.
    pub rounds: u64,
}

impl OverallCollapse {
    /// Default estimate of the run length used to spread collapses.
    pub const DEFAULT_ROUNDS: u64 = 10;

    /// Creates a target with the default round estimate.
    pub fn new(percent: f64) -> Self {
        Self {
            percent,
            rounds: Self::DEFAULT_ROUNDS,
        }
    }

    /// Number of nodes that should be collapsed in total.
    pub fn target(&self, total: usize) -> usize {
        (total as f64 * self.percent).floor() as usize
    }

    /// Draws how many nodes to collapse in this round.
    ///
    /// The batch size is Poisson distributed with mean `deficit / rounds` (at least 1), capped by the deficit and by
    /// the number of candidates.
    pub fn batch_size<R: Rng + ?Sized>(&self, deficit: usize, candidates: usize, rng: &mut R) -> usize {
        if deficit == 0 || candidates == 0 {
            return 0;
        }
        let lambda = (deficit as f64 / self.rounds.max(1) as f64).max(1.);
        let drawn = match Poisson::new(lambda) {
            Ok(poisson) => poisson.sample(rng) as usize,
            Err(_) => 0,
        };
        drawn.min(deficit).min(candidates)
    }
}

/// Collapse configuration: per-node triggers plus an optional global target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollapseConfig {
    /// Per-node triggers.
    pub nodes: FxHashMap<NodeId, CollapseRule>,
    /// Global random-collapse target.
    pub overall: Option<OverallCollapse>,
}

impl CollapseConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds triggers for a node.
    pub fn with_rule(mut self, node: NodeId, rule: CollapseRule) -> Self {
        self.nodes.insert(node, rule);
        self
    }

    /// Sets the global random-collapse target.
    pub fn with_overall(mut self, overall: OverallCollapse) -> Self {
        self.overall = Some(overall);
        self
    }

    /// Parses a mapping like `{"overall": 0.2, "3": {"received_msg_count": 2}}`.
    ///
    /// `overall` accepts either a bare fraction or `{"percent": p, "rounds": r}`.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value
            .as_object()
            .ok_or_else(|| ConfigError::Fault("collapse configuration must be an object".to_string()))?;
        let mut config = Self::new();
        for (key, entry) in map {
            if key == "overall" {
                let raw: RawOverall =
                    serde_json::from_value(entry.clone()).map_err(|e| ConfigError::Fault(format!("overall: {}", e)))?;
                let overall = match raw {
                    RawOverall::Percent(percent) => OverallCollapse::new(percent),
                    RawOverall::Detailed { percent, rounds } => OverallCollapse {
                        percent,
                        rounds: rounds.unwrap_or(OverallCollapse::DEFAULT_ROUNDS),
                    },
                };
                if !(0. ..=1.).contains(&overall.percent) || overall.rounds == 0 {
                    return Err(ConfigError::Fault(format!("invalid overall collapse {:?}", overall)));
                }
                config.overall = Some(overall);
                continue;
            }
            let node = key
                .trim()
                .parse::<NodeId>()
                .map_err(|_| ConfigError::Fault(format!("`{}` is not a node identifier", key)))?;
            let rule: CollapseRule =
                serde_json::from_value(entry.clone()).map_err(|e| ConfigError::Fault(format!("node {}: {}", node, e)))?;
            if !(0. ..=1.).contains(&rule.probability) {
                return Err(ConfigError::Fault(format!("node {}: probability {} is outside [0, 1]", node, rule.probability)));
            }
            config.nodes.insert(node, rule);
        }
        Ok(config)
    }
}
