use distsim::{
    Algorithm, Communication, DelayModel, FaultConfig, Inbox, Mode, Node, ReorderConfig, RootPolicy, SimTime,
    Simulation, SimulationConfig, TopologyKind,
};
use serde_json::{json, Value};

// Every node sends a numbered sequence to its neighbors and checks the order of what it receives
struct Sequencer {
    count: u64,
}

impl Algorithm for Sequencer {
    fn name(&self) -> &str {
        "sequencer"
    }

    fn init(&self, node: &mut Node, comm: &mut Communication) {
        for seq in 0..self.count {
            comm.send_to_all(node, json!({"from": node.id(), "seq": seq}), None, None);
        }
    }

    fn step(&self, node: &mut Node, _comm: &mut Communication, at: SimTime, inbox: Inbox) {
        let Inbox::Message(payload) = inbox else {
            return;
        };
        let from = payload["from"].as_u64().unwrap_or_default();
        let seq = payload["seq"].as_u64().unwrap_or_default();
        let key = format!("last_{}", from);
        // Messages on ordered edges never overtake each other
        if node.field(&key).and_then(Value::as_u64).is_some_and(|last| seq < last) {
            let overtaken = node.field_i64("overtaken").unwrap_or_default();
            node.set_field("overtaken", overtaken + 1);
            println!("{} node {} got #{} from {} out of order", at, node.id(), seq, from);
        }
        node.set_field(key, seq);
    }
}

fn main() {
    env_logger::init();

    let config = SimulationConfig {
        node_count: 6,
        topology: TopologyKind::Line,
        root: RootPolicy::None,
        mode: Mode::Async,
        delay: DelayModel::Random,
        seed: 7,
        ..Default::default()
    };

    // Only the edge between nodes 2 and 3 may reorder messages
    let faults = FaultConfig {
        reorder: ReorderConfig::new().with_edge(2, 3, 1.),
        ..Default::default()
    };

    let mut sim = match Simulation::new(config, Sequencer { count: 20 }, faults) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Failed to build simulation: {}", e);
            std::process::exit(1);
        }
    };

    // Run simulation until there are no pending messages and print the final simulation time
    let report = sim.run();
    println!("Delivered {} messages, final time {}", report.delivered, report.final_time());
    for node in sim.network().nodes() {
        println!(
            "node {}: {} overtaken messages",
            node.id(),
            node.field_i64("overtaken").unwrap_or_default()
        );
    }
}
