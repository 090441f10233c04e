//! Run parameters.
//!
//! The engine only consumes resolved values. Collecting them (menus, command line, files) is up to the caller. A
//! configuration can be built in code or loaded from JSON:
//!
//! ```json
//! {
//!     "node_count": 8,
//!     "id_scheme": "random",
//!     "topology": "tree",
//!     "root": "min_id",
//!     "mode": "sync",
//!     "delay": { "constant": 1.0 },
//!     "max_rounds": 100,
//!     "seed": 42,
//!     "algorithm": "bfs"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

macro_rules! keyword_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($(#[$vmeta:meta])* $variant:ident => [$($kw:literal),+]),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace(&[' ', '-'][..], "_");
                match normalized.as_str() {
                    $($($kw)|+ => Ok($name::$variant),)+
                    _ => Err(ConfigError::UnknownKeyword {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ConfigError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for &'static str {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => [$($kw),+][0]),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(<&'static str>::from(*self))
            }
        }
    };
}

keyword_enum!(
    /// How node identifiers are assigned.
    IdScheme, "id scheme", {
        /// `0..N` in creation order.
        Sequential => ["sequential"],
        /// Unique random identifiers from `[100, 100·N)`.
        Random => ["random"],
    }
);

keyword_enum!(
    /// Graph generator.
    TopologyKind, "topology", {
        /// Path through all nodes in identifier order.
        Line => ["line"],
        /// Complete graph.
        Clique => ["clique"],
        /// Every node attached to a hub (the root, or the first node).
        Star => ["star"],
        /// Uniform random labeled tree via Prüfer decoding.
        Tree => ["tree"],
        /// Random degree per node.
        Random => ["random"],
        /// Explicit edge list read from a topology file.
        Custom => ["custom"],
    }
);

keyword_enum!(
    /// Root selection policy.
    RootPolicy, "root policy", {
        /// Uniformly random node.
        Random => ["random"],
        /// Node with the smallest identifier.
        MinId => ["min_id", "minid", "min"],
        /// No root.
        None => ["none", "no_root"],
    }
);

keyword_enum!(
    /// Scheduling discipline.
    Mode, "mode", {
        /// Barrier-synchronized rounds.
        Sync => ["sync"],
        /// Event-queue-driven delivery.
        Async => ["async"],
    }
);

/// Per-edge delay model of the asynchronous discipline.
///
/// The synchronous discipline always uses a delay of one round.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayModel {
    /// The same delay on every edge.
    Constant(f64),
    /// Fresh uniform draw in `[0, 1)` for each message.
    Random,
    /// Uniform draw in `[0, 1)` made once per edge at setup.
    RandomConstant,
}

impl Default for DelayModel {
    fn default() -> Self {
        DelayModel::Constant(1.)
    }
}

impl FromStr for DelayModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(&[' ', '-'][..], "_");
        match normalized.as_str() {
            "random" => Ok(DelayModel::Random),
            "random_constant" => Ok(DelayModel::RandomConstant),
            "constant" => Ok(DelayModel::Constant(1.)),
            other => other
                .strip_prefix("constant:")
                .or_else(|| other.strip_prefix("constant="))
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.)
                .map(DelayModel::Constant)
                .ok_or_else(|| ConfigError::UnknownKeyword {
                    kind: "delay",
                    value: s.to_string(),
                }),
        }
    }
}

/// Resolved parameters of a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of nodes. Ignored for custom topologies, which declare their own count.
    pub node_count: usize,
    /// Identifier scheme.
    pub id_scheme: IdScheme,
    /// Graph generator.
    pub topology: TopologyKind,
    /// Topology file for [`TopologyKind::Custom`].
    pub topology_file: Option<PathBuf>,
    /// Root selection policy. Custom topologies declare their own root.
    pub root: RootPolicy,
    /// Scheduling discipline.
    pub mode: Mode,
    /// Delay model (asynchronous discipline only).
    pub delay: DelayModel,
    /// Last round executed by the synchronous discipline.
    pub max_rounds: u64,
    /// Number of generated topologies to try before giving up on connectivity.
    pub max_topology_attempts: usize,
    /// Random seed.
    pub seed: u64,
    /// Name of a registered algorithm.
    pub algorithm: String,
    /// Report node snapshots to the change observer after each callback.
    pub track_changes: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node_count: 10,
            id_scheme: IdScheme::Sequential,
            topology: TopologyKind::Line,
            topology_file: None,
            root: RootPolicy::Random,
            mode: Mode::Sync,
            delay: DelayModel::default(),
            max_rounds: 1000,
            max_topology_attempts: 1000,
            seed: 123,
            algorithm: String::new(),
            track_changes: false,
        }
    }
}

impl SimulationConfig {
    /// Parses a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks values that deserialization accepts but a run cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let DelayModel::Constant(delay) = self.delay {
            if !delay.is_finite() || delay < 0. {
                return Err(ConfigError::InvalidDelay(delay));
            }
        }
        Ok(())
    }
}
