//! Algorithm plugin interface.

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::builtin::{Bfs, Echo, Flood};
use crate::communication::Communication;
use crate::error::ConfigError;
use crate::message::{Payload, SimTime};
use crate::node::Node;

/// Entry point of an algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Called once per node before the run.
    Init,
    /// Called per delivered message (asynchronous) or per round (synchronous).
    Step,
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Init => f.write_str("init"),
            Capability::Step => f.write_str("step"),
        }
    }
}

/// Payloads handed to a step call.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbox {
    /// A single delivered message (asynchronous discipline).
    Message(Payload),
    /// All messages due in the current round, possibly none (synchronous discipline).
    Round(Vec<Payload>),
}

impl Inbox {
    /// Returns the payloads as a slice regardless of the discipline.
    pub fn payloads(&self) -> &[Payload] {
        match self {
            Inbox::Message(payload) => std::slice::from_ref(payload),
            Inbox::Round(payloads) => payloads,
        }
    }

    /// Returns `true` if there is nothing to process.
    pub fn is_empty(&self) -> bool {
        self.payloads().is_empty()
    }
}

/// Phase of an algorithm invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Phase {
    /// Initialization.
    Init,
    /// Message or round processing.
    Step {
        /// Arrival time or round number.
        at: SimTime,
        /// Delivered payloads.
        inbox: Inbox,
    },
}

/// Distributed algorithm executed by every node.
///
/// Both entry points may mutate node fields, send messages through the communication layer and terminate the node.
/// Callbacks are never invoked for a node in an absorbing state, apart from the call that caused the transition.
pub trait Algorithm {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Returns `true` if the entry point is implemented.
    ///
    /// Checked once when a simulation is built. Missing entry points are fatal configuration errors.
    fn provides(&self, _capability: Capability) -> bool {
        true
    }

    /// Initializes a node. Called once per node before the first delivery.
    fn init(&self, node: &mut Node, comm: &mut Communication);

    /// Processes delivered payloads.
    fn step(&self, node: &mut Node, comm: &mut Communication, at: SimTime, inbox: Inbox);
}

/// Checks that an algorithm provides every entry point.
pub fn validate(algorithm: &dyn Algorithm) -> Result<(), ConfigError> {
    for capability in [Capability::Init, Capability::Step] {
        if !algorithm.provides(capability) {
            log::error!("Algorithm {} does not provide {}", algorithm.name(), capability);
            return Err(ConfigError::MissingCapability {
                algorithm: algorithm.name().to_string(),
                capability,
            });
        }
    }
    Ok(())
}

/// Signature of an init function.
pub type InitFn = fn(&mut Node, &mut Communication);
/// Signature of a step function.
pub type StepFn = fn(&mut Node, &mut Communication, SimTime, Inbox);

/// Algorithm assembled from plain functions.
///
/// ```
/// use distsim::{FnAlgorithm, Inbox};
///
/// let algorithm = FnAlgorithm::new("noop")
///     .with_init(|node, _| {
///         node.set_field("started", true);
///     })
///     .with_step(|node, _, _, _| {
///         node.terminate();
///     });
/// # let _ = algorithm;
/// ```
#[derive(Clone)]
pub struct FnAlgorithm {
    name: String,
    init: Option<InitFn>,
    step: Option<StepFn>,
}

impl FnAlgorithm {
    /// Creates an algorithm without entry points.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: None,
            step: None,
        }
    }

    /// Sets the init function.
    pub fn with_init(mut self, init: InitFn) -> Self {
        self.init = Some(init);
        self
    }

    /// Sets the step function.
    pub fn with_step(mut self, step: StepFn) -> Self {
        self.step = Some(step);
        self
    }
}

impl Algorithm for FnAlgorithm {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self, capability: Capability) -> bool {
        match capability {
            Capability::Init => self.init.is_some(),
            Capability::Step => self.step.is_some(),
        }
    }

    fn init(&self, node: &mut Node, comm: &mut Communication) {
        if let Some(init) = self.init {
            init(node, comm);
        }
    }

    fn step(&self, node: &mut Node, comm: &mut Communication, at: SimTime, inbox: Inbox) {
        if let Some(step) = self.step {
            step(node, comm, at, inbox);
        }
    }
}

/// Algorithms selectable by name.
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    algorithms: FxHashMap<String, Rc<dyn Algorithm>>,
}

impl AlgorithmRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the reference algorithms `flood`, `bfs` and `echo`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Flood);
        registry.register(Bfs);
        registry.register(Echo::default());
        registry
    }

    /// Registers an algorithm under its name, replacing a previous one with the same name.
    pub fn register<A: Algorithm + 'static>(&mut self, algorithm: A) {
        let name = algorithm.name().to_string();
        if self.algorithms.insert(name.clone(), Rc::new(algorithm)).is_some() {
            log::debug!("Replaced algorithm {}", name);
        }
    }

    /// Looks up an algorithm by name.
    pub fn resolve(&self, name: &str) -> Result<Rc<dyn Algorithm>, ConfigError> {
        self.algorithms
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownAlgorithm(name.to_string()))
    }

    /// Returns registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.algorithms.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_missing_capability() {
        let algorithm = FnAlgorithm::new("half").with_init(|_, _| {});
        let err = validate(&algorithm).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCapability {
                capability: Capability::Step,
                ..
            }
        ));
        assert_eq!(err.to_string(), "algorithm `half` does not provide `step`");
    }

    #[test]
    fn test_registry() {
        let registry = AlgorithmRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["bfs", "echo", "flood"]);
        assert_eq!(registry.resolve("bfs").unwrap().name(), "bfs");
        assert!(matches!(registry.resolve("paxos"), Err(ConfigError::UnknownAlgorithm(_))));
        for name in registry.names() {
            assert!(validate(registry.resolve(name).unwrap().as_ref()).is_ok());
        }
    }

    #[test]
    fn test_register_replaces_builtin() {
        let mut registry = AlgorithmRegistry::with_builtins();
        registry.register(crate::builtin::Echo { limit: 3 });
        assert_eq!(registry.names().len(), 3);
        assert_eq!(registry.resolve("echo").unwrap().name(), "echo");
        assert!(matches!(registry.resolve("Flood"), Err(ConfigError::UnknownAlgorithm(_))));
    }

    #[test]
    fn test_inbox_payloads() {
        assert_eq!(Inbox::Message(json!(1)).payloads(), &[json!(1)]);
        assert!(Inbox::Round(vec![]).is_empty());
    }
}
