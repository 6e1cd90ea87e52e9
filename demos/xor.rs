//! XOR with multi-colony ACO and PACO.
//!
//! Searches weights and topology for the XOR problem twice: once with several
//! dissipative colonies, once with a fitness-ranked population.
//!
//! Run with: `RUST_LOG=symbios_aco=info cargo run --example xor`

use std::sync::Arc;

use symbios_aco::{
    AcoConfig, AcoError, Fitness, FitnessError, MultiColony, NetworkGraph, PolicyKind,
    PopulationSearch, TracingSink,
};
use tracing_subscriber::EnvFilter;

const CASES: [([f64; 2], f64); 4] = [
    ([0.0, 0.0], 0.0),
    ([0.0, 1.0], 1.0),
    ([1.0, 0.0], 1.0),
    ([1.0, 1.0], 0.0),
];

/// Maximum fitness is 4.0 (perfect solution).
struct XorFitness;

impl Fitness for XorFitness {
    fn evaluate(&self, network: &NetworkGraph) -> Result<f64, FitnessError> {
        let mut total_error = 0.0;
        for (inputs, expected) in &CASES {
            let output = network.process(inputs)?[0];
            total_error += (output - expected).powi(2);
        }
        Ok(4.0 - total_error)
    }
}

fn report(label: &str, network: &NetworkGraph) -> Result<(), AcoError> {
    println!(
        "\n{label}: depth={}, neurons={}, connections={}",
        network.depth(),
        network.neurons.len(),
        network.connections.len()
    );
    for (inputs, expected) in &CASES {
        let output = network.process(inputs)?[0];
        let status = if (output.round() - expected).abs() < 0.1 { "ok" } else { "miss" };
        println!(
            "  {} XOR {} = {:.4} (expected {}) {}",
            inputs[0], inputs[1], output, expected, status
        );
    }
    Ok(())
}

fn main() -> Result<(), AcoError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = AcoConfig::minimal(2, 1);
    config.colony.ant_count = 20;
    config.colony.transfer_interval = 20;
    config.colony.stagnation_window = 8;
    config.population.capacity = 15;
    config.population.ants_per_iteration = 20;
    config.population.update_quota = 3;
    config.population.policy = PolicyKind::Fitness;
    config.population.stagnation_window = 10;

    let iterations = 150;
    let fitness = XorFitness;

    println!("Multi-colony ACO");
    println!("================");
    let mut multi = MultiColony::new(&config, 4)?.with_sink(Arc::new(TracingSink));
    for step in 0..iterations {
        let summaries = multi.step(&fitness)?;
        if step % 25 == 0 || step == iterations - 1 {
            let best = summaries.iter().map(|s| s.best).fold(f64::NEG_INFINITY, f64::max);
            let depth = summaries.iter().map(|s| s.depth).max().unwrap_or(0);
            println!("Step {step:3}: best={best:.4}, deepest={depth}");
        }
    }
    if let Some(colony) = multi.best() {
        println!("Best {}: {:.4}", colony.id(), colony.best_fitness().unwrap_or(f64::NAN));
        report("Colony champion", colony.network())?;
    }

    println!("\nPopulation ACO");
    println!("==============");
    let mut search = PopulationSearch::new(&config)?;
    for step in 0..iterations {
        let summary = search.step(&fitness)?;
        if step % 25 == 0 || step == iterations - 1 {
            println!(
                "Iter {step:3}: best={:.4}, mean={:.4}, population={}",
                summary.best,
                summary.mean,
                search.population().len()
            );
        }
    }
    if let Some(best) = search.best() {
        println!("Global best: {:.4}", best.fitness);
        report("Population champion", &best.network)?;
    }
    Ok(())
}
