//! Topology growth.
//!
//! The operator functions apply one structural mutation to a graph and replay
//! it on the graph's pheromone mirror in the same call, so the two can never be
//! observed out of step. [`TopologyGrowth::grow`] is the heuristic a colony runs
//! when it stagnates.

use std::sync::Arc;

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::GrowthConfig;
use crate::error::AcoError;
use crate::expression::{Bindings, FormulaId, Formulas, Variable};
use crate::network::{ConnectionId, NetworkGraph, NeuronId, NeuronKind, NeuronPosition, StructuralChange};
use crate::pheromone::PheromoneMirror;

/// Split probability used when the formula yields a non-finite value.
const FALLBACK_SPLIT_PROBABILITY: f64 = 0.5;

/// One applied growth step, described by positions at the time it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GrowthOp {
    Split {
        from: NeuronPosition,
        to: NeuronPosition,
    },
    AddNeuron {
        layer: usize,
    },
    AddConnection {
        from: NeuronPosition,
        to: NeuronPosition,
    },
    RemoveConnection {
        from: NeuronPosition,
        to: NeuronPosition,
    },
    RemoveNeuron {
        position: NeuronPosition,
    },
}

/// What one growth pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GrowthReport {
    pub operations: Vec<GrowthOp>,
    /// Network shape after the pass.
    pub depth: usize,
    pub neurons: usize,
    pub connections: usize,
    /// Net keys added and removed by the pass.
    #[serde(skip)]
    pub change: StructuralChange,
}

fn mirrored<M, F>(graph: &mut NetworkGraph, mirror: &mut M, op: F) -> Result<StructuralChange, AcoError>
where
    M: PheromoneMirror + ?Sized,
    F: FnOnce(&mut NetworkGraph) -> Result<StructuralChange, AcoError>,
{
    let change = op(graph)?;
    mirror.mirror(&change, graph)?;
    Ok(change)
}

/// Split `connection` on `graph` and `mirror`.
///
/// # Errors
///
/// Propagates [`AcoError::InvalidMutation`] from the graph and
/// [`AcoError::ShapeMismatch`] from the mirror.
pub fn split_connection<M: PheromoneMirror + ?Sized>(
    graph: &mut NetworkGraph,
    mirror: &mut M,
    connection: ConnectionId,
) -> Result<StructuralChange, AcoError> {
    mirrored(graph, mirror, |g| g.split_connection(connection))
}

/// Add `from -> to` on `graph` and `mirror`.
///
/// # Errors
///
/// See [`split_connection`].
pub fn add_connection<M: PheromoneMirror + ?Sized>(
    graph: &mut NetworkGraph,
    mirror: &mut M,
    from: NeuronId,
    to: NeuronId,
    weight: f64,
) -> Result<StructuralChange, AcoError> {
    mirrored(graph, mirror, |g| g.add_connection(from, to, weight))
}

/// Remove `connection` from `graph` and `mirror`.
///
/// # Errors
///
/// See [`split_connection`].
pub fn remove_connection<M: PheromoneMirror + ?Sized>(
    graph: &mut NetworkGraph,
    mirror: &mut M,
    connection: ConnectionId,
) -> Result<StructuralChange, AcoError> {
    mirrored(graph, mirror, |g| g.remove_connection(connection))
}

/// Add a hidden neuron to `layer` on `graph` and `mirror`.
///
/// # Errors
///
/// See [`split_connection`].
pub fn add_neuron<M: PheromoneMirror + ?Sized>(
    graph: &mut NetworkGraph,
    mirror: &mut M,
    layer: usize,
    from: NeuronId,
    to: NeuronId,
) -> Result<StructuralChange, AcoError> {
    mirrored(graph, mirror, |g| g.add_neuron(layer, from, to))
}

/// Remove a hidden neuron from `graph` and `mirror`.
///
/// # Errors
///
/// See [`split_connection`].
pub fn remove_neuron<M: PheromoneMirror + ?Sized>(
    graph: &mut NetworkGraph,
    mirror: &mut M,
    neuron: NeuronId,
) -> Result<StructuralChange, AcoError> {
    mirrored(graph, mirror, |g| g.remove_neuron(neuron))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Split,
    AddNeuron,
    AddConnection,
}

/// Pick an index with probability proportional to `weights`, uniformly if they
/// are all zero.
pub(crate) fn pick_weighted<R: Rng>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    Some(match WeightedIndex::new(weights) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.random_range(0..weights.len()),
    })
}

/// The growth heuristic run on stagnation.
#[derive(Debug, Clone)]
pub struct TopologyGrowth {
    formulas: Arc<Formulas>,
    prune_probability: f64,
}

impl TopologyGrowth {
    #[must_use]
    pub fn new(formulas: Arc<Formulas>, config: &GrowthConfig) -> Self {
        Self {
            formulas,
            prune_probability: config.prune_probability.clamp(0.0, 1.0),
        }
    }

    /// Grow `graph` (and `mirror`) by one structural step.
    ///
    /// With the configured split probability a connection is split, otherwise a
    /// neuron is added to a hidden layer or a missing forward connection is
    /// added; if the chosen operator cannot apply the others are tried. Then,
    /// with `prune_probability`, the weakest pre-existing connection that is not
    /// the last input or output of either endpoint is removed, and at most one
    /// hidden neuron without inputs or outputs is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::GrowthExhausted`] if no operator applies, or any error
    /// of the underlying operators.
    #[allow(clippy::cast_precision_loss)]
    pub fn grow<M, R>(
        &self,
        graph: &mut NetworkGraph,
        mirror: &mut M,
        iteration: u64,
        rng: &mut R,
    ) -> Result<GrowthReport, AcoError>
    where
        M: PheromoneMirror + ?Sized,
        R: Rng,
    {
        let bindings = Bindings::new()
            .with(Variable::Depth, graph.depth() as f64)
            .with(Variable::Iteration, iteration as f64);
        let split_probability = self
            .formulas
            .evaluate_with(FormulaId::SplitProbability, bindings, rng)
            .unwrap_or(FALLBACK_SPLIT_PROBABILITY)
            .clamp(0.0, 1.0);

        let order = if rng.random_bool(split_probability) {
            [Operator::Split, Operator::AddNeuron, Operator::AddConnection]
        } else {
            [Operator::AddNeuron, Operator::AddConnection, Operator::Split]
        };

        let mut report = GrowthReport::default();
        let mut grown = false;
        for operator in order {
            let applied = match operator {
                Operator::Split => self.try_split(graph, mirror, rng)?,
                Operator::AddNeuron => self.try_add_neuron(graph, mirror, rng)?,
                Operator::AddConnection => try_add_connection(graph, mirror, rng)?,
            };
            if let Some((op, change)) = applied {
                report.operations.push(op);
                report.change.extend(change);
                grown = true;
                break;
            }
        }
        if !grown {
            return Err(AcoError::GrowthExhausted);
        }

        if self.prune_probability > 0.0 && rng.random_bool(self.prune_probability) {
            prune(graph, mirror, &mut report)?;
        }

        report.depth = graph.depth();
        report.neurons = graph.neurons.len();
        report.connections = graph.connections.len();
        info!(
            operations = ?report.operations,
            depth = report.depth,
            connections = report.connections,
            "topology grown"
        );
        Ok(report)
    }

    #[allow(clippy::cast_precision_loss)]
    fn layer_weight<R: Rng>(&self, layer: usize, depth: usize, rng: &mut R) -> f64 {
        let bindings = Bindings::new()
            .with(Variable::Layer, layer as f64)
            .with(Variable::Depth, depth as f64);
        self.formulas
            .evaluate_with(FormulaId::LayerSelection, bindings, rng)
            .map_or(0.0, |w| w.max(0.0))
    }

    fn try_split<M, R>(
        &self,
        graph: &mut NetworkGraph,
        mirror: &mut M,
        rng: &mut R,
    ) -> Result<Option<(GrowthOp, StructuralChange)>, AcoError>
    where
        M: PheromoneMirror + ?Sized,
        R: Rng,
    {
        let depth = graph.depth();
        let candidates: Vec<(ConnectionId, NeuronPosition, NeuronPosition)> = graph
            .connections
            .iter()
            .map(|(id, c)| (id, graph.neurons[c.from].position, graph.neurons[c.to].position))
            .collect();
        let weights: Vec<f64> = candidates
            .iter()
            .map(|(_, from, _)| self.layer_weight(from.layer, depth, rng))
            .collect();
        let Some(choice) = pick_weighted(&weights, rng) else {
            return Ok(None);
        };

        let (connection, from, to) = candidates[choice];
        let change = split_connection(graph, mirror, connection)?;
        Ok(Some((GrowthOp::Split { from, to }, change)))
    }

    fn try_add_neuron<M, R>(
        &self,
        graph: &mut NetworkGraph,
        mirror: &mut M,
        rng: &mut R,
    ) -> Result<Option<(GrowthOp, StructuralChange)>, AcoError>
    where
        M: PheromoneMirror + ?Sized,
        R: Rng,
    {
        let depth = graph.depth();
        if depth < 3 {
            return Ok(None);
        }
        let hidden: Vec<usize> = (1..depth - 1).collect();
        let weights: Vec<f64> = hidden
            .iter()
            .map(|&layer| self.layer_weight(layer, depth, rng))
            .collect();
        let Some(choice) = pick_weighted(&weights, rng) else {
            return Ok(None);
        };
        let layer = hidden[choice];

        let below: Vec<NeuronId> = graph.layers()[..layer].iter().flatten().copied().collect();
        let above: Vec<NeuronId> = graph.layers()[layer + 1..].iter().flatten().copied().collect();
        if below.is_empty() || above.is_empty() {
            return Ok(None);
        }
        let from = below[rng.random_range(0..below.len())];
        let to = above[rng.random_range(0..above.len())];

        let change = add_neuron(graph, mirror, layer, from, to)?;
        Ok(Some((GrowthOp::AddNeuron { layer }, change)))
    }
}

fn try_add_connection<M, R>(
    graph: &mut NetworkGraph,
    mirror: &mut M,
    rng: &mut R,
) -> Result<Option<(GrowthOp, StructuralChange)>, AcoError>
where
    M: PheromoneMirror + ?Sized,
    R: Rng,
{
    let order: Vec<NeuronId> = graph.neurons_in_order().collect();
    let mut missing: Vec<(NeuronId, NeuronId)> = Vec::new();
    for &from in &order {
        let from_layer = graph.neurons[from].position.layer;
        for &to in &order {
            if graph.neurons[to].position.layer > from_layer
                && graph.connection_between(from, to).is_none()
            {
                missing.push((from, to));
            }
        }
    }
    if missing.is_empty() {
        return Ok(None);
    }

    let (from, to) = missing[rng.random_range(0..missing.len())];
    let op = GrowthOp::AddConnection {
        from: graph.neurons[from].position,
        to: graph.neurons[to].position,
    };
    // Zero weight leaves the network function unchanged until the next walk.
    let change = add_connection(graph, mirror, from, to, 0.0)?;
    Ok(Some((op, change)))
}

fn prune<M>(graph: &mut NetworkGraph, mirror: &mut M, report: &mut GrowthReport) -> Result<(), AcoError>
where
    M: PheromoneMirror + ?Sized,
{
    // Only edges whose endpoints keep another edge in the same direction, so a
    // prune never orphans a neuron.
    let weakest = graph
        .connections
        .iter()
        .filter(|(id, c)| {
            !report.change.added_connections.contains(id)
                && graph.neurons[c.from].outgoing().len() > 1
                && graph.neurons[c.to].incoming().len() > 1
        })
        .min_by(|(_, a), (_, b)| a.weight.abs().total_cmp(&b.weight.abs()))
        .map(|(id, c)| (id, graph.neurons[c.from].position, graph.neurons[c.to].position));
    if let Some((connection, from, to)) = weakest {
        report.change.extend(remove_connection(graph, mirror, connection)?);
        report.operations.push(GrowthOp::RemoveConnection { from, to });
        debug!(%from, %to, "pruned weakest connection");
    }

    // Orphans left by direct mutations are cleared one per pass.
    let orphan = graph
        .neurons
        .iter()
        .find(|(_, n)| {
            n.kind == NeuronKind::Hidden && (n.incoming().is_empty() || n.outgoing().is_empty())
        })
        .map(|(id, n)| (id, n.position));
    if let Some((orphan, position)) = orphan {
        report.change.extend(remove_neuron(graph, mirror, orphan)?);
        report.operations.push(GrowthOp::RemoveNeuron { position });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FormulaConfig, NetworkConfig};
    use crate::pheromone::PheromoneModel;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn formulas(config: &FormulaConfig) -> Arc<Formulas> {
        Arc::new(Formulas::compile(config).unwrap())
    }

    fn setup() -> (NetworkGraph, PheromoneModel) {
        let graph = NetworkGraph::build_random(
            NetworkConfig {
                num_inputs: 3,
                num_outputs: 2,
                ..NetworkConfig::default()
            },
            &mut test_rng(),
        );
        let model = PheromoneModel::from_network(&graph, formulas(&FormulaConfig::default()), 0.0);
        (graph, model)
    }

    #[test]
    fn test_growth_keeps_mirror_in_shape() {
        let (mut graph, mut model) = setup();
        let growth = TopologyGrowth::new(
            formulas(&FormulaConfig::default()),
            &GrowthConfig {
                prune_probability: 0.5,
            },
        );
        let mut rng = test_rng();
        for iteration in 0..40 {
            growth.grow(&mut graph, &mut model, iteration, &mut rng).unwrap();
            model.verify_shape(&graph).unwrap();
        }
        assert!(graph.num_hidden() > 0);
    }

    #[test]
    fn test_split_only_growth_preserves_function() {
        let (mut graph, mut model) = setup();
        let config = FormulaConfig {
            split_probability: "1".to_string(),
            ..FormulaConfig::default()
        };
        let growth = TopologyGrowth::new(formulas(&config), &GrowthConfig::default());
        let before = graph.process(&[0.2, -0.4, 0.9]).unwrap();
        let mut rng = test_rng();
        for iteration in 0..10 {
            let report = growth.grow(&mut graph, &mut model, iteration, &mut rng).unwrap();
            assert!(matches!(report.operations[0], GrowthOp::Split { .. }));
        }
        let after = graph.process(&[0.2, -0.4, 0.9]).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_add_operators_fall_back_when_no_hidden_layer() {
        let (mut graph, mut model) = setup();
        let config = FormulaConfig {
            split_probability: "0".to_string(),
            ..FormulaConfig::default()
        };
        let growth = TopologyGrowth::new(formulas(&config), &GrowthConfig::default());
        // Fully connected two-layer network: no hidden layer and no missing
        // connection, so only a split applies.
        let report = growth.grow(&mut graph, &mut model, 0, &mut test_rng()).unwrap();
        assert!(matches!(report.operations[0], GrowthOp::Split { .. }));
        assert_eq!(graph.depth(), 3);
    }

    #[test]
    fn test_unconnected_network_grows_a_connection() {
        let mut graph = NetworkGraph::minimal(NetworkConfig {
            num_inputs: 1,
            num_outputs: 1,
            ..NetworkConfig::default()
        });
        let growth =
            TopologyGrowth::new(formulas(&FormulaConfig::default()), &GrowthConfig::default());
        let report = growth.grow(&mut graph, &mut (), 0, &mut test_rng()).unwrap();
        assert!(matches!(report.operations[0], GrowthOp::AddConnection { .. }));
        assert_eq!(report.connections, 1);
        assert_eq!(report.change.added_connections.len(), 1);
    }

    #[test]
    fn test_mirrored_operators_report_changes() {
        let (mut graph, mut model) = setup();
        let conn = graph.connections.keys().next().unwrap();
        let change = split_connection(&mut graph, &mut model, conn).unwrap();
        let hidden = change.last_neuron.unwrap();
        let input = graph.input_ids()[1];
        let output = graph.output_ids()[1];
        add_neuron(&mut graph, &mut model, 1, input, output).unwrap();
        remove_neuron(&mut graph, &mut model, hidden).unwrap();
        model.verify_shape(&graph).unwrap();
        assert!(split_connection(&mut graph, &mut model, conn).is_err());
    }

    #[test]
    fn test_pruning_keeps_grown_depth() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut graph = NetworkGraph::build_random(NetworkConfig::default(), &mut rng);
        let mut model =
            PheromoneModel::from_network(&graph, formulas(&FormulaConfig::default()), 0.0);
        let growth = TopologyGrowth::new(
            formulas(&FormulaConfig::default()),
            &GrowthConfig {
                prune_probability: 1.0,
            },
        );
        let mut depth = graph.depth();
        for iteration in 0..40 {
            let report = growth.grow(&mut graph, &mut model, iteration, &mut rng).unwrap();
            assert!(!report
                .operations
                .iter()
                .any(|op| matches!(op, GrowthOp::RemoveNeuron { .. })));
            assert!(graph.depth() >= depth, "pruning collapsed layers");
            depth = graph.depth();
            for neuron in graph.neurons.values().filter(|n| n.kind == NeuronKind::Hidden) {
                assert!(!neuron.incoming().is_empty() && !neuron.outgoing().is_empty());
            }
        }
        assert!(graph.depth() > 2);
    }

    #[test]
    fn test_added_neuron_survives_next_prune() {
        let (mut graph, mut model) = setup();
        let conn = graph.connections.keys().next().unwrap();
        split_connection(&mut graph, &mut model, conn).unwrap();
        let input = graph.input_ids()[1];
        let output = graph.output_ids()[1];
        let added = add_neuron(&mut graph, &mut model, 1, input, output)
            .unwrap()
            .last_neuron
            .unwrap();

        let mut report = GrowthReport::default();
        prune(&mut graph, &mut model, &mut report).unwrap();
        let neuron = &graph.neurons[added];
        assert_eq!(neuron.outgoing().len(), 1);
        assert_eq!(neuron.incoming().len(), 1);
        model.verify_shape(&graph).unwrap();
    }

    #[test]
    fn test_prune_clears_one_orphan_per_pass() {
        let (mut graph, mut model) = setup();
        for _ in 0..2 {
            let conn = graph.connections.keys().next().unwrap();
            split_connection(&mut graph, &mut model, conn).unwrap();
        }
        // Cut a chain's first edge directly: its hidden neurons become orphans.
        let chain = graph
            .connections
            .iter()
            .find(|(_, c)| {
                graph.neurons[c.from].kind == NeuronKind::Input
                    && graph.neurons[c.to].kind == NeuronKind::Hidden
            })
            .map(|(id, _)| id)
            .unwrap();
        remove_connection(&mut graph, &mut model, chain).unwrap();
        let hidden = graph.num_hidden();

        let mut report = GrowthReport::default();
        prune(&mut graph, &mut model, &mut report).unwrap();
        assert_eq!(graph.num_hidden(), hidden - 1);
        model.verify_shape(&graph).unwrap();
    }

    #[test]
    fn test_pick_weighted_handles_zero_weights() {
        let mut rng = test_rng();
        assert_eq!(pick_weighted(&[], &mut rng), None);
        assert!(pick_weighted(&[0.0, 0.0], &mut rng).is_some());
        assert_eq!(pick_weighted(&[0.0, 3.0, 0.0], &mut rng), Some(1));
    }
}
