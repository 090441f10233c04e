//! Simulation setup and execution.

use std::rc::Rc;

use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::algorithm::{validate, Algorithm, AlgorithmRegistry};
use crate::communication::{Communication, TrafficStats};
use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::fault::{FaultConfig, FaultInjector, FaultStats};
use crate::message::SimTime;
use crate::observer::ChangeObserver;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::stats::RunReport;
use crate::topology::Network;
use crate::{log_info, log_warn};

/// A fully built simulation.
///
/// Construction either succeeds with a connected network and a validated algorithm, or fails without leaving any
/// usable state behind. All randomness (topology, delays, faults) comes from a single generator seeded with
/// [`SimulationConfig::seed`], so runs with equal inputs are identical.
pub struct Simulation {
    config: SimulationConfig,
    comm: Communication,
    scheduler: Scheduler,
    report: Option<RunReport>,
}

impl Simulation {
    /// Creates a simulation running `algorithm`.
    pub fn new<A: Algorithm + 'static>(
        config: SimulationConfig,
        algorithm: A,
        faults: FaultConfig,
    ) -> Result<Self, SimulationError> {
        Self::with_algorithm(config, Rc::new(algorithm), faults)
    }

    /// Creates a simulation running the algorithm named by [`SimulationConfig::algorithm`].
    pub fn from_registry(
        config: SimulationConfig,
        registry: &AlgorithmRegistry,
        faults: FaultConfig,
    ) -> Result<Self, SimulationError> {
        let algorithm = registry.resolve(&config.algorithm)?;
        Self::with_algorithm(config, algorithm, faults)
    }

    /// Creates a simulation running a shared algorithm instance.
    pub fn with_algorithm(
        config: SimulationConfig,
        algorithm: Rc<dyn Algorithm>,
        faults: FaultConfig,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        validate(algorithm.as_ref())?;
        let mut rng = Pcg64::seed_from_u64(config.seed);
        let network = Network::build(&config, &mut rng)?;
        log_info!(
            SimTime::default(),
            "built {} network: {} nodes, {} edges, root {:?}",
            config.topology,
            network.len(),
            network.edges().len(),
            network.root()
        );
        check_fault_targets(&network, &faults);
        let injector = FaultInjector::new(faults, &mut rng);
        let comm = Communication::new(network, algorithm, injector, &config, rng);
        Ok(Self {
            scheduler: Scheduler::new(config.max_rounds),
            config,
            comm,
            report: None,
        })
    }

    /// Registers an observer receiving node snapshots. Only used when change tracking is enabled.
    pub fn set_observer(&mut self, observer: impl ChangeObserver + 'static) {
        self.comm.set_observer(Box::new(observer));
    }

    /// Runs the simulation to completion and returns its report.
    ///
    /// A simulation runs only once. Later calls return the report of the first run.
    pub fn run(&mut self) -> RunReport {
        if let Some(report) = &self.report {
            log_warn!(self.comm.now(), "simulation has already finished");
            return report.clone();
        }
        let outcome = self.scheduler.run(&mut self.comm);
        let report = RunReport::collect(&self.comm, outcome);
        self.report = Some(report.clone());
        report
    }

    /// Returns the run parameters.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Returns the network.
    pub fn network(&self) -> &Network {
        self.comm.network()
    }

    /// Returns the scheduler state.
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Returns the current clock value.
    pub fn time(&self) -> SimTime {
        self.comm.now()
    }

    /// Returns the message counters.
    pub fn traffic(&self) -> &TrafficStats {
        self.comm.traffic()
    }

    /// Returns the fault counters.
    pub fn fault_stats(&self) -> &FaultStats {
        self.comm.fault_stats()
    }
}

fn check_fault_targets(network: &Network, faults: &FaultConfig) {
    for id in faults.collapse.nodes.keys() {
        if network.node(*id).is_none() {
            log_warn!(SimTime::default(), "collapse rule for unknown node {}", id);
        }
    }
    for ((u, v), _) in faults.reorder.edges() {
        if !network.node(*u).is_some_and(|n| n.is_neighbor(*v)) {
            log_warn!(SimTime::default(), "reorder entry ({}, {}) is not an edge of the network", u, v);
        }
    }
}
