//! DistSim is a discrete-event simulator for distributed algorithms. It models a network of independently acting
//! nodes exchanging messages over a graph, under synchronous or asynchronous scheduling, with injected message loss,
//! corruption, reordering and node collapse.
//!
//! ## Contents
//!
//! - [Basic Concepts](crate#basic-concepts)
//! - [Example](crate#example)
//! - [Faults](crate#faults)
//! - [Determinism](crate#determinism)
//!
//! ## Basic Concepts
//!
//! **Node.** A node represents one simulated computer. It has a unique identifier, a list of neighbors, a lifecycle
//! [state](NodeState) and a set of algorithm-defined fields. `Collapsed` and `Terminated` are absorbing: once a node
//! reaches one of them, its algorithm is never called again.
//!
//! **Algorithm.** The user-supplied logic implements the [`Algorithm`] trait with two entry points. `init` is called
//! once per node before the run. `step` is called with a single payload for every delivered message under the
//! asynchronous discipline, and once per round with all payloads due in that round under the synchronous one. Both
//! receive the node and the [`Communication`] handle used to send messages. Algorithms can be registered by name in
//! an [`AlgorithmRegistry`], which also provides a few reference algorithms (`flood`, `bfs`, `echo`).
//!
//! **Message.** A message carries a JSON [payload](Payload) between two adjacent nodes. Its arrival time is computed
//! at send time from the edge delay. Under the synchronous discipline every message arrives in the next round.
//!
//! **Simulation.** A [`Simulation`] is built from a [`SimulationConfig`], an algorithm and a [`FaultConfig`]. Building
//! generates a connected topology, or fails with a [`SimulationError`]. Running it executes the selected discipline
//! to completion and returns a [`RunReport`]. The asynchronous discipline delivers messages in arrival-time order until
//! no messages are left. The synchronous discipline runs rounds until every node has halted or
//! [`SimulationConfig::max_rounds`] is reached.
//!
//! ## Example
//!
//! ```rust
//! use distsim::{FaultConfig, FnAlgorithm, Mode, RootPolicy, Simulation, SimulationConfig, TopologyKind};
//! use serde_json::json;
//!
//! // The root announces a value, every other node records it and terminates
//! let algorithm = FnAlgorithm::new("announce")
//!     .with_init(|node, comm| {
//!         if node.is_root() {
//!             comm.send_to_all(node, json!({"value": 42}), None, None);
//!             node.terminate();
//!         }
//!     })
//!     .with_step(|node, _comm, _at, inbox| {
//!         if let Some(value) = inbox.payloads().first().and_then(|p| p.get("value")) {
//!             node.set_field("value", value.clone());
//!             node.terminate();
//!         }
//!     });
//!
//! let config = SimulationConfig {
//!     node_count: 5,
//!     topology: TopologyKind::Star,
//!     root: RootPolicy::MinId,
//!     mode: Mode::Sync,
//!     ..Default::default()
//! };
//! let mut sim = Simulation::new(config, algorithm, FaultConfig::new()).unwrap();
//! let report = sim.run();
//!
//! assert_eq!(report.terminated, 5);
//! assert!(sim.network().nodes().iter().skip(1).all(|n| n.field_i64("value") == Some(42)));
//! ```
//!
//! ## Faults
//!
//! Faults are simulated behaviors, never errors:
//!
//! - Each send may carry a [`FaultSpec`] with a loss probability and a corruption probability. Loss is checked first,
//!   so a lost message is never corrupted. Corruption alters fields of record payloads or replaces the whole payload.
//! - [`CollapseConfig`] declares per-node collapse triggers (round with recurrence, received and sent message counts)
//!   and an overall fraction of nodes collapsing at random over the run.
//! - [`ReorderConfig`] declares edges that may become unordered. Messages on ordered edges never overtake each other.
//!
//! Fault counters are kept by the [`FaultInjector`] of each run and included in its report.
//!
//! ## Determinism
//!
//! A simulation is single-threaded. Topology generation, delays and faults all draw from one generator seeded with
//! [`SimulationConfig::seed`]. Messages with equal arrival times are delivered in send order and nodes are processed
//! in declared order within a round, so two runs with the same inputs produce the same result.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod algorithm;
pub mod builtin;
pub mod communication;
pub mod config;
pub mod error;
pub mod fault;
pub mod log;
pub mod message;
pub mod node;
pub mod observer;
pub mod queue;
pub mod scheduler;
pub mod simulation;
pub mod stats;
pub mod topology;
pub mod topology_file;
mod union_find;

pub use colored;
#[doc(hidden)]
pub use ::log as __log;

pub use algorithm::{Algorithm, AlgorithmRegistry, Capability, FnAlgorithm, Inbox, Phase};
pub use communication::{Communication, TrafficStats};
pub use config::{DelayModel, IdScheme, Mode, RootPolicy, SimulationConfig, TopologyKind};
pub use error::{ConfigError, InvalidTransition, SimulationError};
pub use fault::{
    CollapseConfig, CollapseRule, FaultConfig, FaultInjector, FaultSpec, FaultStats, FieldCorruption, OverallCollapse,
    ReorderConfig,
};
pub use message::{Message, Payload, SimTime};
pub use node::{Node, NodeId, NodeState};
pub use observer::{ChangeLog, ChangeObserver, NodeSnapshot};
pub use scheduler::{RunOutcome, SchedulerState};
pub use simulation::Simulation;
pub use stats::RunReport;
pub use topology::Network;
pub use topology_file::TopologyFile;
