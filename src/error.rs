//! Error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::algorithm::Capability;
use crate::node::NodeId;

/// Fatal problem with the inputs of a run.
///
/// Raised before any network state becomes usable: a simulation is either fully built or not built at all.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A keyword option (topology, id scheme, root policy, mode, delay model) has an unrecognized value.
    #[error("unknown {kind} keyword `{value}`")]
    UnknownKeyword {
        /// Option name.
        kind: &'static str,
        /// Offending value.
        value: String,
    },
    /// Node count is zero or does not fit the requested topology.
    #[error("invalid node count {0}")]
    InvalidNodeCount(usize),
    /// No algorithm is registered under this name.
    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),
    /// The plugin does not provide a required entry point.
    #[error("algorithm `{algorithm}` does not provide `{capability}`")]
    MissingCapability {
        /// Plugin name.
        algorithm: String,
        /// Missing entry point.
        capability: Capability,
    },
    /// Constant delay is negative or not finite.
    #[error("invalid constant delay {0}")]
    InvalidDelay(f64),
    /// Custom topology requested without a topology file.
    #[error("topology `custom` requires a topology file")]
    MissingTopologyFile,
    /// Topology file is syntactically malformed.
    #[error("topology file line {line}: {message}")]
    TopologyParse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// Topology file is well-formed but inconsistent.
    #[error("invalid topology file: {0}")]
    TopologyInvalid(String),
    /// Fault configuration has an unexpected shape or value.
    #[error("invalid fault configuration: {0}")]
    Fault(String),
    /// Reorder configuration has an unexpected shape or value.
    #[error("invalid reorder configuration: {0}")]
    Reorder(String),
    /// Configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Configuration JSON could not be decoded.
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to set up a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Inputs are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// No connected topology could be produced.
    ///
    /// Kept apart from [`ConfigError`] so that callers can retry with other parameters.
    #[error("network is not connected after {attempts} attempt(s)")]
    NotConnected {
        /// Number of generated instances that were rejected.
        attempts: usize,
    },
}

/// Attempt to move a node out of an absorbing state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("node {node} cannot change state from {from} to {to}")]
pub struct InvalidTransition {
    /// Node identifier.
    pub node: NodeId,
    /// Current (absorbing) state.
    pub from: crate::node::NodeState,
    /// Requested state.
    pub to: crate::node::NodeState,
}
