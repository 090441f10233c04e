//! Node set construction and graph generators.

use std::collections::VecDeque;

use rand::seq::index::sample;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{IdScheme, RootPolicy, SimulationConfig, TopologyKind};
use crate::error::{ConfigError, SimulationError};
use crate::node::{Node, NodeId};
use crate::topology_file::{DeclaredRoot, TopologyFile};
use crate::union_find::UnionFind;

/// Connected graph of simulated nodes.
///
/// Nodes are kept in their declared order, which is also the processing order of the synchronous discipline.
#[derive(Clone, Debug, Default)]
pub struct Network {
    nodes: Vec<Node>,
    index: FxHashMap<NodeId, usize>,
    root: Option<NodeId>,
}

impl Network {
    fn from_nodes(nodes: Vec<Node>) -> Self {
        let index = nodes.iter().enumerate().map(|(i, n)| (n.id(), i)).collect();
        Self { nodes, index, root: None }
    }

    /// Builds a network from run parameters.
    ///
    /// Generated topologies are re-sampled until a connected instance appears, at most
    /// `config.max_topology_attempts` times. Custom topologies are read from `config.topology_file`.
    pub fn build<R: Rng + ?Sized>(config: &SimulationConfig, rng: &mut R) -> Result<Self, SimulationError> {
        if config.topology == TopologyKind::Custom {
            let path = config.topology_file.as_ref().ok_or(ConfigError::MissingTopologyFile)?;
            let file = TopologyFile::load(path)?;
            return Self::from_file(&file, rng);
        }
        let n = config.node_count;
        if n == 0 || n > (NodeId::MAX / 100) as usize {
            return Err(ConfigError::InvalidNodeCount(n).into());
        }

        let mut nodes = assign_ids(n, config.id_scheme, rng);
        let root = select_root(&mut nodes, config.root, rng);
        let mut network = Self::from_nodes(nodes);
        network.root = root;

        let attempts = config.max_topology_attempts.max(1);
        for attempt in 1..=attempts {
            for node in network.nodes.iter_mut() {
                node.clear_neighbors();
            }
            network.generate(config.topology, rng);
            if network.is_connected() {
                log::debug!(
                    "Built {} topology with {} nodes after {} attempt(s)",
                    config.topology,
                    n,
                    attempt
                );
                return Ok(network);
            }
            log::debug!("Generated {} topology is not connected, retrying", config.topology);
        }
        Err(SimulationError::NotConnected { attempts })
    }

    /// Builds a network from a parsed topology file.
    ///
    /// Nothing is retried: a disconnected file fails with [`SimulationError::NotConnected`].
    pub fn from_file<R: Rng + ?Sized>(file: &TopologyFile, rng: &mut R) -> Result<Self, SimulationError> {
        let nodes = file.ids.iter().map(|id| Node::new(*id)).collect();
        let mut network = Self::from_nodes(nodes);
        for (u, v) in &file.edges {
            network.connect_ids(*u, *v);
        }
        for (id, name, value) in &file.attributes {
            if let Some(idx) = network.index.get(id).copied() {
                network.nodes[idx].set_initial_field(name.clone(), value.clone());
            }
        }
        let root_idx = match file.root {
            DeclaredRoot::Random => rng.gen_range(0..network.nodes.len()),
            DeclaredRoot::Node(id) => network.index[&id],
        };
        network.nodes[root_idx].set_root(true);
        network.root = Some(network.nodes[root_idx].id());

        if !network.is_connected() {
            return Err(SimulationError::NotConnected { attempts: 1 });
        }
        Ok(network)
    }

    /// Returns all nodes in declared order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Returns the node with the given identifier.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.get(&id).map(|idx| &self.nodes[*idx])
    }

    /// Returns the position of a node in declared order.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the network has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the root identifier, if a root was selected.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Returns each undirected edge once, as `(smaller, larger)` identifier pairs.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = self
            .nodes
            .iter()
            .flat_map(|n| n.neighbors().iter().map(move |m| (n.id().min(*m), n.id().max(*m))))
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        edges.sort_unstable();
        edges
    }

    /// Checks connectivity with a union-find pass over the adjacency lists.
    pub fn is_connected(&self) -> bool {
        let mut uf = UnionFind::new(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            for neighbor in node.neighbors() {
                if let Some(j) = self.index.get(neighbor) {
                    uf.union(i, *j);
                }
            }
        }
        uf.is_single_set()
    }

    /// Returns the longest shortest-path length, or `None` if the graph is disconnected.
    pub fn diameter(&self) -> Option<usize> {
        let mut diameter = 0;
        for start in 0..self.nodes.len() {
            let mut dist = vec![usize::MAX; self.nodes.len()];
            dist[start] = 0;
            let mut queue = VecDeque::from([start]);
            while let Some(i) = queue.pop_front() {
                for neighbor in self.nodes[i].neighbors() {
                    let j = self.index[neighbor];
                    if dist[j] == usize::MAX {
                        dist[j] = dist[i] + 1;
                        queue.push_back(j);
                    }
                }
            }
            diameter = diameter.max(dist.into_iter().max().unwrap_or(0));
        }
        (diameter != usize::MAX).then_some(diameter)
    }

    fn connect(&mut self, i: usize, j: usize) {
        let (a, b) = (self.nodes[i].id(), self.nodes[j].id());
        self.nodes[i].add_neighbor(b);
        self.nodes[j].add_neighbor(a);
    }

    fn connect_ids(&mut self, u: NodeId, v: NodeId) {
        let (i, j) = (self.index[&u], self.index[&v]);
        if !self.nodes[i].is_neighbor(v) {
            self.connect(i, j);
        }
    }

    fn generate<R: Rng + ?Sized>(&mut self, kind: TopologyKind, rng: &mut R) {
        match kind {
            TopologyKind::Line => self.generate_line(),
            TopologyKind::Clique => self.generate_clique(),
            TopologyKind::Star => self.generate_star(),
            TopologyKind::Tree => self.generate_tree(rng),
            TopologyKind::Random => self.generate_random(rng),
            TopologyKind::Custom => unreachable!("custom topologies are read from files"),
        }
    }

    fn generate_line(&mut self) {
        for i in 1..self.nodes.len() {
            self.connect(i - 1, i);
        }
    }

    fn generate_clique(&mut self) {
        let n = self.nodes.len();
        for i in 0..n {
            for j in i + 1..n {
                self.connect(i, j);
            }
        }
    }

    fn generate_star(&mut self) {
        let hub = self.root.and_then(|id| self.index_of(id)).unwrap_or(0);
        for i in 0..self.nodes.len() {
            if i != hub {
                self.connect(hub, i);
            }
        }
    }

    /// Decodes a random Prüfer sequence into a labeled tree.
    fn generate_tree<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.nodes.len();
        if n < 2 {
            return;
        }
        let mut sequence = (0..n - 2).map(|_| rng.gen_range(0..n)).collect::<VecDeque<_>>();
        let mut occurrences = vec![0usize; n];
        for i in &sequence {
            occurrences[*i] += 1;
        }
        // nodes are sorted by identifier
        let mut remaining = (0..n).collect::<Vec<_>>();
        while remaining.len() > 2 {
            let Some(head) = sequence.pop_front() else {
                break;
            };
            let Some(pos) = remaining.iter().position(|i| occurrences[*i] == 0) else {
                break;
            };
            let leaf = remaining.remove(pos);
            self.connect(leaf, head);
            occurrences[head] -= 1;
        }
        if let [a, b] = remaining.as_slice() {
            self.connect(*a, *b);
        }
    }

    fn generate_random<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.nodes.len();
        match n {
            0 | 1 => {}
            2 => self.connect(0, 1),
            3 => {
                const CONNECTED_GRAPHS: [&[(usize, usize)]; 4] =
                    [&[(0, 1), (1, 2)], &[(0, 1), (0, 2)], &[(0, 2), (1, 2)], &[(0, 1), (1, 2), (0, 2)]];
                let chosen = CONNECTED_GRAPHS[rng.gen_range(0..CONNECTED_GRAPHS.len())];
                for (i, j) in chosen {
                    self.connect(*i, *j);
                }
            }
            _ => {
                let max_degree = (2 * ((n - 1) as f64).ln().floor() as usize).clamp(1, n - 1);
                for i in 0..n {
                    let degree = rng.gen_range(1..=max_degree);
                    // sample among the other n - 1 nodes, skipping `i`
                    for k in sample(rng, n - 1, degree) {
                        let j = if k >= i { k + 1 } else { k };
                        self.connect(i, j);
                    }
                }
                for node in self.nodes.iter_mut() {
                    node.dedup_neighbors();
                }
            }
        }
    }
}

fn assign_ids<R: Rng + ?Sized>(n: usize, scheme: IdScheme, rng: &mut R) -> Vec<Node> {
    match scheme {
        IdScheme::Sequential => (0..n as NodeId).map(Node::new).collect(),
        IdScheme::Random => {
            let upper = (100 * n as NodeId).max(100 + n as NodeId);
            let mut ids = sample(rng, (upper - 100) as usize, n)
                .into_iter()
                .map(|k| 100 + k as NodeId)
                .collect::<Vec<_>>();
            ids.sort_unstable();
            ids.into_iter().map(Node::new).collect()
        }
    }
}

fn select_root<R: Rng + ?Sized>(nodes: &mut [Node], policy: RootPolicy, rng: &mut R) -> Option<NodeId> {
    let idx = match policy {
        RootPolicy::Random => rng.gen_range(0..nodes.len()),
        RootPolicy::MinId => nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| n.id())
            .map(|(i, _)| i)?,
        RootPolicy::None => return None,
    };
    nodes[idx].set_root(true);
    Some(nodes[idx].id())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    use super::*;

    fn config(n: usize, topology: TopologyKind) -> SimulationConfig {
        SimulationConfig {
            node_count: n,
            topology,
            ..Default::default()
        }
    }

    fn assert_symmetric(network: &Network) {
        for node in network.nodes() {
            for neighbor in node.neighbors() {
                assert_ne!(*neighbor, node.id(), "self-loop on {}", node.id());
                assert!(network.node(*neighbor).unwrap().is_neighbor(node.id()));
            }
        }
    }

    #[test]
    fn test_all_generators_connected() {
        let mut rng = Pcg64::seed_from_u64(7);
        for kind in [
            TopologyKind::Line,
            TopologyKind::Clique,
            TopologyKind::Star,
            TopologyKind::Tree,
            TopologyKind::Random,
        ] {
            for n in 1..=30 {
                for scheme in [IdScheme::Sequential, IdScheme::Random] {
                    let config = SimulationConfig {
                        id_scheme: scheme,
                        ..config(n, kind)
                    };
                    let network = Network::build(&config, &mut rng).unwrap();
                    assert_eq!(network.len(), n);
                    assert!(network.is_connected(), "{} with {} nodes", kind, n);
                    assert!(network.diameter().is_some());
                    assert_symmetric(&network);
                }
            }
        }
    }

    #[test]
    fn test_edge_counts() {
        let mut rng = Pcg64::seed_from_u64(1);
        let n = 12;
        let line = Network::build(&config(n, TopologyKind::Line), &mut rng).unwrap();
        assert_eq!(line.edges().len(), n - 1);
        assert_eq!(line.diameter(), Some(n - 1));
        let clique = Network::build(&config(n, TopologyKind::Clique), &mut rng).unwrap();
        assert_eq!(clique.edges().len(), n * (n - 1) / 2);
        assert_eq!(clique.diameter(), Some(1));
        let tree = Network::build(&config(n, TopologyKind::Tree), &mut rng).unwrap();
        assert_eq!(tree.edges().len(), n - 1);
    }

    #[test]
    fn test_star_hub_is_root() {
        let mut rng = Pcg64::seed_from_u64(3);
        let network = Network::build(&config(8, TopologyKind::Star), &mut rng).unwrap();
        let root = network.root().unwrap();
        assert_eq!(network.node(root).unwrap().neighbors().len(), 7);
        assert!(network.node(root).unwrap().is_root());
    }

    #[test]
    fn test_random_ids_unique_and_sorted() {
        let mut rng = Pcg64::seed_from_u64(11);
        let config = SimulationConfig {
            id_scheme: IdScheme::Random,
            root: RootPolicy::MinId,
            ..config(20, TopologyKind::Line)
        };
        let network = Network::build(&config, &mut rng).unwrap();
        let ids = network.nodes().iter().map(|n| n.id()).collect::<Vec<_>>();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|id| (100..2000).contains(id)));
        assert_eq!(network.root(), Some(ids[0]));
    }

    #[test]
    fn test_no_root() {
        let mut rng = Pcg64::seed_from_u64(5);
        let config = SimulationConfig {
            root: RootPolicy::None,
            ..config(4, TopologyKind::Clique)
        };
        let network = Network::build(&config, &mut rng).unwrap();
        assert_eq!(network.root(), None);
        assert!(network.nodes().iter().all(|n| !n.is_root()));
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let mut rng = Pcg64::seed_from_u64(5);
        let err = Network::build(&config(0, TopologyKind::Line), &mut rng).unwrap_err();
        assert!(matches!(err, SimulationError::Config(ConfigError::InvalidNodeCount(0))));
    }

    #[test]
    fn test_from_file() {
        let mut rng = Pcg64::seed_from_u64(5);
        let file = TopologyFile::parse("[ids]\n5 6 7\n[count]\n3\n[root]\n6\n[edges]\n5 6\n6 7\n6 5\n[attributes]\n7 weight=2\n")
            .unwrap();
        let network = Network::from_file(&file, &mut rng).unwrap();
        assert_eq!(network.root(), Some(6));
        assert_eq!(network.node(5).unwrap().neighbors(), &[6]);
        assert_eq!(network.node(6).unwrap().neighbors(), &[5, 7]);
        assert_eq!(network.node(7).unwrap().field_i64("weight"), Some(2));
    }

    #[test]
    fn test_disconnected_file() {
        let mut rng = Pcg64::seed_from_u64(5);
        let file = TopologyFile::parse("[ids]\n1 2 3 4\n[count]\n4\n[root]\nrandom\n[edges]\n1 2\n3 4\n").unwrap();
        let err = Network::from_file(&file, &mut rng).unwrap_err();
        assert!(matches!(err, SimulationError::NotConnected { attempts: 1 }));
    }
}
