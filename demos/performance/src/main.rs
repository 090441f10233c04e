use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use distsim::builtin::Echo;
use distsim::{
    AlgorithmRegistry, DelayModel, FaultConfig, IdScheme, Mode, RootPolicy, Simulation, SimulationConfig, TopologyKind,
};
use log::info;

/// Measures simulation throughput with the reference algorithms
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct Args {
    /// Number of nodes
    #[clap(long, short, default_value_t = 1000)]
    nodes: usize,

    /// Topology: line, clique, star, tree or random
    #[clap(long, short, default_value = "random")]
    topology: TopologyKind,

    /// Scheduling discipline: sync or async
    #[clap(long, short, default_value = "sync")]
    mode: Mode,

    /// Delay model: random, random_constant or constant:<value>
    #[clap(long, default_value = "random")]
    delay: DelayModel,

    /// Algorithm: flood, bfs or echo
    #[clap(long, short, default_value = "flood")]
    algorithm: String,

    /// Number of hops of the echo algorithm
    #[clap(long, default_value_t = 10)]
    echo_limit: u64,

    /// Last executed round
    #[clap(long, default_value_t = 1000)]
    max_rounds: u64,

    /// Random seed
    #[clap(long, default_value_t = 123)]
    seed: u64,

    /// JSON file with run parameters, overrides the options above
    #[clap(long)]
    config: Option<PathBuf>,

    /// JSON file with collapse and reorder configuration
    #[clap(long)]
    faults: Option<PathBuf>,
}

fn load_faults(path: &Path) -> Result<FaultConfig, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(FaultConfig::from_json_str(&text)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig {
            node_count: args.nodes,
            id_scheme: IdScheme::Sequential,
            topology: args.topology,
            root: RootPolicy::MinId,
            mode: args.mode,
            delay: args.delay,
            max_rounds: args.max_rounds,
            seed: args.seed,
            algorithm: args.algorithm.clone(),
            ..Default::default()
        },
    };
    let faults = match &args.faults {
        Some(path) => load_faults(path)?,
        None => FaultConfig::new(),
    };
    let mut registry = AlgorithmRegistry::with_builtins();
    registry.register(Echo { limit: args.echo_limit });
    let algorithm = registry.resolve(&config.algorithm)?;

    let t = Instant::now();
    let mut sim = Simulation::with_algorithm(config, algorithm, faults)?;
    info!("Built network with {} nodes in {:.2} s", sim.network().len(), t.elapsed().as_secs_f64());

    let t = Instant::now();
    let report = sim.run();
    let elapsed = t.elapsed().as_secs_f64();
    report.log();
    info!(
        "Processed {} events in {:.2} s ({:.0} events/s)",
        report.outcome.events,
        elapsed,
        report.outcome.events as f64 / elapsed
    );
    Ok(())
}
