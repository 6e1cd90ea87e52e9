//! Integration tests for symbios-aco.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use symbios_aco::{
    growth, AcoConfig, AcoError, AntId, Candidate, ChannelSink, Colony, ColonyId, ColonyState,
    FitnessError, FormulaConfig, Formulas, GrowthConfig, MultiColony, NetworkConfig, NetworkGraph,
    NeuronKind, PheromoneEntry, PheromoneModel, PolicyKind, Population, PopulationConfig,
    PopulationSearch, Solution, StagnationTracker, StatePayload, TopologyGrowth,
};

fn formulas() -> Arc<Formulas> {
    Arc::new(Formulas::compile(&FormulaConfig::default()).unwrap())
}

fn network(inputs: usize, outputs: usize, seed: u64) -> NetworkGraph {
    let config = NetworkConfig {
        num_inputs: inputs,
        num_outputs: outputs,
        ..NetworkConfig::default()
    };
    NetworkGraph::build_random(config, &mut ChaCha8Rng::seed_from_u64(seed))
}

/// Squared-error fitness on XOR, shifted so perfect scores 4.
fn xor_fitness(network: &NetworkGraph) -> Result<f64, FitnessError> {
    let cases = [
        ([0.0, 0.0], 0.0),
        ([0.0, 1.0], 1.0),
        ([1.0, 0.0], 1.0),
        ([1.0, 1.0], 0.0),
    ];
    let mut error = 0.0;
    for (inputs, expected) in cases {
        let out = network.process(&inputs)?[0];
        error += (out - expected) * (out - expected);
    }
    Ok(4.0 - error)
}

fn random_neuron(graph: &NetworkGraph, rng: &mut ChaCha8Rng) -> symbios_aco::NeuronId {
    let index = rng.random_range(0..graph.neurons.len());
    graph.neurons.keys().nth(index).unwrap()
}

#[test]
fn test_shape_invariant_over_random_mutations() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut graph = network(3, 2, 1);
    let mut model = PheromoneModel::from_network(&graph, formulas(), 0.0);
    model.verify_shape(&graph).unwrap();

    for _ in 0..300 {
        let result = match rng.random_range(0..5) {
            0 if !graph.connections.is_empty() => {
                let index = rng.random_range(0..graph.connections.len());
                let id = graph.connections.keys().nth(index).unwrap();
                growth::split_connection(&mut graph, &mut model, id)
            }
            1 => {
                let from = random_neuron(&graph, &mut rng);
                let to = random_neuron(&graph, &mut rng);
                growth::add_connection(&mut graph, &mut model, from, to, rng.random_range(-1.0..1.0))
            }
            2 if graph.connections.len() > 1 => {
                let index = rng.random_range(0..graph.connections.len());
                let id = graph.connections.keys().nth(index).unwrap();
                growth::remove_connection(&mut graph, &mut model, id)
            }
            3 if graph.depth() > 2 => {
                let layer = rng.random_range(1..graph.depth() - 1);
                let from = random_neuron(&graph, &mut rng);
                let to = random_neuron(&graph, &mut rng);
                growth::add_neuron(&mut graph, &mut model, layer, from, to)
            }
            4 => {
                let neuron = random_neuron(&graph, &mut rng);
                growth::remove_neuron(&mut graph, &mut model, neuron)
            }
            _ => continue,
        };
        match result {
            Ok(_) | Err(AcoError::InvalidMutation(_)) => {}
            Err(e) => panic!("unexpected mutation error: {e}"),
        }
        model.verify_shape(&graph).unwrap();
        assert!(graph.process(&[0.1, 0.2, 0.3]).unwrap().iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_growth_heuristic_keeps_mirror_in_shape() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut graph = network(2, 2, 3);
    let mut model = PheromoneModel::from_network(&graph, formulas(), 0.0);
    let growth = TopologyGrowth::new(
        formulas(),
        &GrowthConfig {
            prune_probability: 0.5,
        },
    );
    for iteration in 0..40 {
        growth.grow(&mut graph, &mut model, iteration, &mut rng).unwrap();
        model.verify_shape(&graph).unwrap();
    }
    assert!(graph.depth() > 2);
}

#[test]
fn test_split_preserves_output() {
    let mut rng = ChaCha8Rng::seed_from_u64(77);
    for seed in 0..10 {
        let mut graph = network(3, 2, seed);
        for _ in 0..4 {
            let inputs: Vec<f64> = (0..3).map(|_| rng.random_range(-2.0..2.0)).collect();
            let before = graph.process(&inputs).unwrap();

            let index = rng.random_range(0..graph.connections.len());
            let id = graph.connections.keys().nth(index).unwrap();
            graph.split_connection(id).unwrap();

            let after = graph.process(&inputs).unwrap();
            for (a, b) in before.iter().zip(&after) {
                assert!((a - b).abs() < 1e-9, "split changed output: {a} vs {b}");
            }
        }
    }
}

#[test]
fn test_dissipation_is_strictly_monotone() {
    for rate in [0.01, 0.05, 0.3, 0.9] {
        let mut entry = PheromoneEntry::new(0.5, 0.8);
        for _ in 0..2000 {
            if entry.strength == 0.0 {
                break;
            }
            let before = entry.strength;
            entry.decay(rate);
            assert!(entry.strength < before);
            assert!(entry.strength >= 0.0);
        }
    }
}

#[test]
fn test_reinforcement_saturates_without_overshoot() {
    let mut entry = PheromoneEntry::new(0.0, 0.0);
    let mut previous = entry.strength;
    for i in 0..100 {
        entry.reinforce(0.25, PheromoneEntry::saturate(entry.strength));
        assert!(entry.strength >= previous);
        assert!(entry.strength <= 1.0);
        previous = entry.strength;
        if i > 50 {
            assert!(entry.strength > 0.95);
        }
    }
    assert_eq!(entry.value, 0.25);
}

#[test]
fn test_population_bound_for_every_policy() {
    let policies = [
        PolicyKind::Age,
        PolicyKind::Fitness,
        PolicyKind::Probability,
        PolicyKind::AgeProbability,
        PolicyKind::Similarity,
        PolicyKind::Group,
    ];
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for policy in policies {
        let config = PopulationConfig {
            capacity: 4,
            update_quota: 3,
            policy,
            ..PopulationConfig::default()
        };
        let mut population = Population::new(&config, formulas());
        for round in 0..15u64 {
            let candidates: Vec<Candidate> = (0..6)
                .map(|i| {
                    Candidate::new(network(2, 1, round * 10 + i), rng.random_range(-1.0..1.0))
                        .with_group(i % 3)
                })
                .collect();
            population.accept_ants_of_this_iteration(candidates);
            assert!(
                population.len() <= population.capacity(),
                "{policy:?} exceeded capacity"
            );
        }
        assert_eq!(population.len(), 4, "{policy:?} did not fill up");
    }
}

#[test]
fn test_age_population_is_fifo_without_elitism() {
    let config = PopulationConfig {
        capacity: 5,
        policy: PolicyKind::Age,
        protect_global_best: false,
        ..PopulationConfig::default()
    };
    let mut population = Population::new(&config, formulas());

    let mut first = None;
    for i in 0..5u64 {
        let outcome = population
            .accept_ants_of_this_iteration(vec![Candidate::new(network(2, 1, i), i as f64)]);
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.admitted.len(), 1);
        first.get_or_insert(outcome.admitted[0]);
    }
    assert_eq!(population.len(), 5);

    let outcome =
        population.accept_ants_of_this_iteration(vec![Candidate::new(network(2, 1, 99), 0.5)]);
    assert_eq!(outcome.evicted.len(), 1);
    assert_eq!(Some(outcome.evicted[0].sequence), first);
    assert_eq!(population.len(), 5);
}

#[test]
fn test_fitness_population_rejects_below_minimum() {
    let config = PopulationConfig {
        capacity: 5,
        policy: PolicyKind::Fitness,
        ..PopulationConfig::default()
    };
    let mut population = Population::new(&config, formulas());
    for i in 0..5u64 {
        population.accept_ants_of_this_iteration(vec![Candidate::new(
            network(2, 1, i),
            1.0 + i as f64,
        )]);
    }
    let before: Vec<u64> = population
        .get_current_solutions()
        .iter()
        .map(|m| m.sequence)
        .collect();

    let outcome =
        population.accept_ants_of_this_iteration(vec![Candidate::new(network(2, 1, 50), 0.5)]);
    assert!(outcome.admitted.is_empty());
    assert!(outcome.evicted.is_empty());
    let after: Vec<u64> = population
        .get_current_solutions()
        .iter()
        .map(|m| m.sequence)
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_stagnation_then_recovery() {
    let mut tracker = StagnationTracker::new(5, 0.2);
    let mut stagnant = false;
    for _ in 0..5 {
        stagnant = tracker.push(1.0);
    }
    assert!(stagnant);

    assert!(!tracker.push(1.5));
    assert!(!tracker.is_stagnant());
    assert_eq!(tracker.len(), 1);
}

#[test]
fn test_colony_best_never_regresses() {
    let mut colony = Colony::new(ColonyId(0), &AcoConfig::minimal(2, 1)).unwrap();
    let mut best = f64::NEG_INFINITY;
    let mut grew = false;
    for _ in 0..40 {
        let summary = colony.step(&xor_fitness).unwrap();
        grew |= summary.grew;
        let current = colony.best_fitness().unwrap();
        assert!(current >= best - 1e-9, "best regressed: {best} -> {current}");
        best = current;
        colony.pheromone().verify_shape(colony.network()).unwrap();
    }
    assert!(grew, "forty iterations should stagnate at least once");
    assert!(colony.network().depth() > 2);
}

#[test]
fn test_colony_manual_lifecycle_and_value_rejection() {
    let mut colony = Colony::new(ColonyId(3), &AcoConfig::minimal(2, 1)).unwrap();
    assert!(colony.update_solutions().is_err());

    let ids: Vec<AntId> = colony.next_iteration().unwrap().iter().map(|a| a.id).collect();
    assert_eq!(colony.state(), ColonyState::Evaluating);
    assert!(matches!(
        colony.next_iteration(),
        Err(AcoError::InvalidState { .. })
    ));

    let stale = AntId {
        iteration: 0,
        index: 0,
    };
    assert!(!colony.set_fitness(stale, 1.0));
    assert!(!colony.set_fitness(ids[0], f64::NAN));
    let unknown = AntId {
        iteration: ids[0].iteration,
        index: 1000,
    };
    assert!(!colony.set_fitness(unknown, 1.0));

    for (i, id) in ids.iter().enumerate() {
        assert!(colony.set_fitness(*id, i as f64));
    }
    let summary = colony.update_solutions().unwrap();
    assert_eq!(summary.evaluated, ids.len());
    assert_eq!(colony.best_fitness(), Some((ids.len() - 1) as f64));
    assert_eq!(colony.state(), ColonyState::Idle);
}

#[test]
fn test_unevaluated_iteration_is_an_error() {
    let mut colony = Colony::new(ColonyId(0), &AcoConfig::minimal(2, 1)).unwrap();
    colony.next_iteration().unwrap();
    assert!(matches!(
        colony.update_solutions(),
        Err(AcoError::NoEvaluatedSolutions { .. })
    ));
}

#[test]
fn test_failing_fitness_does_not_abort() {
    let mut colony = Colony::new(ColonyId(0), &AcoConfig::minimal(2, 1)).unwrap();
    let flaky = |network: &NetworkGraph| -> Result<f64, FitnessError> {
        let out = network.process(&[1.0, 1.0])?[0];
        if out > 0.5 {
            Err(FitnessError::Failed("rejected".into()))
        } else {
            Ok(out)
        }
    };
    for _ in 0..5 {
        let summary = colony.step(&flaky).unwrap();
        assert_eq!(summary.evaluated, 8);
        assert!(summary.failed <= summary.evaluated);
    }
}

#[test]
fn test_multi_colony_run_publishes_events() {
    let mut config = AcoConfig::minimal(2, 1);
    config.colony.transfer_interval = 5;
    let (sink, events) = ChannelSink::bounded(4096);
    let mut multi = MultiColony::new(&config, 3)
        .unwrap()
        .with_sink(Arc::new(sink));

    for _ in 0..15 {
        let summaries = multi.step(&xor_fitness).unwrap();
        assert_eq!(summaries.len(), 3);
    }
    assert_eq!(multi.steps(), 15);
    for colony in multi.colonies() {
        colony.pheromone().verify_shape(colony.network()).unwrap();
    }
    assert!(multi.best().and_then(Colony::best_fitness).is_some());

    let received: Vec<_> = events.try_iter().collect();
    assert!(received
        .iter()
        .any(|e| matches!(e.payload, StatePayload::Iteration(_))));
    assert!(received
        .iter()
        .any(|e| matches!(e.payload, StatePayload::Growth(_))));
}

#[test]
fn test_population_search_end_to_end() {
    let mut config = AcoConfig::minimal(2, 1);
    config.population.policy = PolicyKind::Fitness;
    config.population.stagnation_window = 4;
    let mut search = PopulationSearch::new(&config).unwrap();

    let mut best = f64::NEG_INFINITY;
    for _ in 0..30 {
        search.step(&xor_fitness).unwrap();
        assert!(search.population().len() <= search.population().capacity());
        let current = search.best().unwrap().fitness;
        assert!(current >= best);
        best = current;
    }
    assert_eq!(search.iteration(), 30);
    assert!(search.template().depth() >= 2);
}

#[test]
fn test_solution_application_is_transactional() {
    let mut small = network(2, 1, 1);
    let mut grown = small.clone();
    let id = grown.connections.keys().next().unwrap();
    grown.split_connection(id).unwrap();

    let solution = Solution::capture(&grown);
    let before = small.process(&[0.3, 0.7]).unwrap();
    assert!(matches!(
        solution.apply_to(&mut small),
        Err(AcoError::ShapeMismatch(_))
    ));
    assert_eq!(small.process(&[0.3, 0.7]).unwrap(), before);
}

#[test]
fn test_hidden_neurons_only_appear_between_io_layers() {
    let mut graph = network(2, 1, 4);
    let id = graph.connections.keys().next().unwrap();
    graph.split_connection(id).unwrap();
    let last = graph.depth() - 1;
    for neuron in graph.neurons.values() {
        match neuron.kind {
            NeuronKind::Input => assert_eq!(neuron.position.layer, 0),
            NeuronKind::Output => assert_eq!(neuron.position.layer, last),
            NeuronKind::Hidden => assert!(neuron.position.layer > 0 && neuron.position.layer < last),
        }
    }
}
