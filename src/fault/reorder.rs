//! Reorder-eligible edges.

use rand::Rng;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::error::ConfigError;
use crate::node::NodeId;

fn edge_key(u: NodeId, v: NodeId) -> (NodeId, NodeId) {
    (u.min(v), u.max(v))
}

/// Declared edges with the probability of becoming reorder-eligible.
///
/// An edge covers both directions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReorderConfig {
    edges: Vec<((NodeId, NodeId), f64)>,
}

impl ReorderConfig {
    /// Creates an empty configuration: every edge keeps FIFO order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an edge.
    pub fn with_edge(mut self, u: NodeId, v: NodeId, probability: f64) -> Self {
        self.edges.push((edge_key(u, v), probability));
        self
    }

    /// Returns declared edges in declaration order.
    pub fn edges(&self) -> &[((NodeId, NodeId), f64)] {
        &self.edges
    }

    /// Parses a mapping like `{"(0,1)": 1, "(2,3)": 0.5}`.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value
            .as_object()
            .ok_or_else(|| ConfigError::Reorder("reorder configuration must be an object".to_string()))?;
        let mut config = Self::new();
        for (key, p) in map {
            let (u, v) = parse_edge(key)?;
            let p = p
                .as_f64()
                .filter(|p| (0. ..=1.).contains(p))
                .ok_or_else(|| ConfigError::Reorder(format!("edge {}: probability must be a number in [0, 1]", key)))?;
            config = config.with_edge(u, v, p);
        }
        Ok(config)
    }
}

fn parse_edge(key: &str) -> Result<(NodeId, NodeId), ConfigError> {
    let inner = key.trim().trim_start_matches('(').trim_end_matches(')');
    let parts = inner
        .split(|c: char| c == ',' || c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::parse::<NodeId>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::Reorder(format!("`{}` is not an edge", key)))?;
    match parts.as_slice() {
        &[u, v] if u != v => Ok((u, v)),
        _ => Err(ConfigError::Reorder(format!("`{}` is not an edge", key))),
    }
}

/// Edges sampled as unordered at setup.
///
/// Arrivals on every other directed edge are kept monotonic by the communication layer.
#[derive(Clone, Debug, Default)]
pub struct ReorderPolicy {
    unordered: FxHashSet<(NodeId, NodeId)>,
}

impl ReorderPolicy {
    /// Marks each declared edge as unordered with its probability, drawing once per edge in declaration order.
    pub fn sample<R: Rng + ?Sized>(config: &ReorderConfig, rng: &mut R) -> Self {
        let mut unordered = FxHashSet::default();
        for (edge, p) in config.edges() {
            if rng.gen::<f64>() < *p {
                unordered.insert(*edge);
            }
        }
        Self { unordered }
    }

    /// Returns `true` if messages from `src` to `dst` must not overtake each other.
    pub fn is_ordered(&self, src: NodeId, dst: NodeId) -> bool {
        !self.unordered.contains(&edge_key(src, dst))
    }

    /// Number of unordered edges.
    pub fn unordered_count(&self) -> usize {
        self.unordered.len()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_edges() {
        let config = ReorderConfig::from_value(&json!({"(0,1)": 1, "2-3": 0.5, "( 5 , 4 )": 0})).unwrap();
        assert_eq!(config.edges(), &[((0, 1), 1.), ((2, 3), 0.5), ((4, 5), 0.)]);
        assert!(ReorderConfig::from_value(&json!({"(1,1)": 1})).is_err());
        assert!(ReorderConfig::from_value(&json!({"(a,b)": 1})).is_err());
        assert!(ReorderConfig::from_value(&json!({"(0,1,2)": 1})).is_err());
        assert!(ReorderConfig::from_value(&json!({"(0,1)": 1.5})).is_err());
    }

    #[test]
    fn test_sample() {
        let mut rng = Pcg64::seed_from_u64(1);
        let config = ReorderConfig::new().with_edge(0, 1, 1.).with_edge(1, 2, 0.);
        let policy = ReorderPolicy::sample(&config, &mut rng);
        assert!(!policy.is_ordered(0, 1));
        assert!(!policy.is_ordered(1, 0));
        assert!(policy.is_ordered(1, 2));
        assert!(policy.is_ordered(2, 3));
        assert_eq!(policy.unordered_count(), 1);
    }
}
