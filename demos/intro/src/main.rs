use distsim::{
    CollapseConfig, CollapseRule, FaultConfig, FaultSpec, FieldCorruption, FnAlgorithm, Inbox, Mode, RootPolicy,
    SimTime, Simulation, SimulationConfig, TopologyKind,
};
use serde_json::{json, Value};

// Called once per node before the first round
fn init(node: &mut distsim::Node, comm: &mut distsim::Communication) {
    if node.is_root() {
        node.set_field("distance", 0);
        comm.send_to_all(node, json!({"distance": 0}), None, None);
    }
}

// Called once per round with all messages due in that round
fn step(node: &mut distsim::Node, comm: &mut distsim::Communication, at: SimTime, inbox: Inbox) {
    let best = inbox
        .payloads()
        .iter()
        .filter_map(|p| p.get("distance").and_then(Value::as_i64))
        .min();
    match (best, node.field_i64("distance")) {
        (Some(d), current) if current.map_or(true, |c| d + 1 < c) => {
            node.set_field("distance", d + 1);
            node.set_field("since", at.as_round());
            // Distances may get corrupted on the way
            let faults = FaultSpec::new()
                .with_loss(0.05)
                .with_corruption(0.1)
                .corrupt_field("distance", FieldCorruption::Random);
            comm.send_to_all(node, json!({"distance": d + 1}), None, Some(&faults));
        }
        _ => {
            // Stop after two quiet rounds
            let since = node.field("since").and_then(Value::as_u64).unwrap_or_default();
            if node.field("distance").is_some() && at.as_round() > since + 2 {
                node.terminate();
            }
        }
    }
}

fn main() {
    env_logger::init();

    // Network of 16 nodes connected as a random tree, processed in synchronous rounds
    let config = SimulationConfig {
        node_count: 16,
        topology: TopologyKind::Tree,
        root: RootPolicy::MinId,
        mode: Mode::Sync,
        max_rounds: 100,
        seed: 123,
        ..Default::default()
    };

    // Node 5 fails once it has received three messages
    let faults = FaultConfig {
        collapse: CollapseConfig::new().with_rule(
            5,
            CollapseRule {
                received_msg_count: Some(3),
                ..Default::default()
            },
        ),
        ..Default::default()
    };

    let algorithm = FnAlgorithm::new("distances").with_init(init).with_step(step);
    let mut sim = match Simulation::new(config, algorithm, faults) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Failed to build simulation: {}", e);
            std::process::exit(1);
        }
    };

    // Run simulation until every node has halted and print the outcome
    let report = sim.run();
    report.log();
    for node in sim.network().nodes() {
        println!(
            "node {:>2}: {:<10} distance = {}",
            node.id(),
            node.state().to_string(),
            node.field("distance").cloned().unwrap_or(Value::Null)
        );
    }
    println!("Finished after {} rounds", report.outcome.rounds.unwrap_or_default());
}
