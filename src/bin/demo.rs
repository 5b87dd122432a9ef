//! Manual smoke-test harness: drives the reference `Network` for a
//! configurable number of epochs with a placeholder payload and prints
//! notarization/finalization progress. Not a trading front-end — the real
//! price-consensus payload generator lives outside this crate's scope.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use streamlet_consensus::Network;

#[derive(Parser)]
struct Args {
    /// Number of epochs to simulate.
    #[arg(long, default_value_t = 8)]
    epochs: u64,

    /// Number of replicas in the network.
    #[arg(long, default_value_t = 4)]
    nodes: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let node_ids: Vec<String> = (0..args.nodes).map(|i| format!("n{i}")).collect();
    let f = (args.nodes.saturating_sub(1)) / 3;

    let mut rng = StdRng::from_seed([0u8; 32]);
    let mut network = Network::new(node_ids.clone(), f, &mut rng)
        .expect("demo roster is non-empty and self-consistent");

    for epoch in 0..args.epochs {
        let payload = format!("demo-payload-{epoch}").into_bytes();
        network.step_epoch(epoch, payload);

        let finalized = network.finalized_by_all();
        println!(
            "epoch {epoch}: finalized_by_all = {} block(s)",
            finalized.len()
        );
    }

    for id in &node_ids {
        let replica = network.replica(id).unwrap();
        println!(
            "{id}: notarized={} finalized={}",
            replica.notarized_blocks().len(),
            replica.finalized().len()
        );
    }
}
