//! The solution walk: sampling one complete weight/bias assignment.
//!
//! A [`Solution`] holds one [`Decision`] per non-input neuron in layer-major
//! order. Each decision carries the neuron's bias and the weight of every
//! connection arriving at it, so a solution covers every connection and every
//! bias of the network exactly once.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AcoError;
use crate::network::{ConnectionId, NetworkGraph, NeuronId, NeuronPosition};
use crate::pheromone::PheromoneSource;

/// Sampled weight of one incoming connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightDecision {
    /// Source neuron of the connection.
    pub from: NeuronPosition,
    pub weight: f64,
}

/// Values chosen for one neuron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub position: NeuronPosition,
    pub bias: f64,
    /// Incoming weights, ordered by source position.
    pub weights: Vec<WeightDecision>,
}

/// A complete assignment of biases and weights, in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub decisions: Vec<Decision>,
}

impl Solution {
    /// Walk `template` once in layer-major order, sampling every value from `source`.
    ///
    /// The input layer is skipped; it has no bias and no incoming connections.
    pub fn generate<S, R>(source: &S, template: &NetworkGraph, rng: &mut R) -> Self
    where
        S: PheromoneSource,
        R: Rng,
    {
        let mut decisions = Vec::with_capacity(template.num_biases());
        for neuron in template.neurons_in_order().skip(template.input_ids().len()) {
            let position = template.neurons[neuron].position;
            let bias = source.sample_bias(template, neuron, rng);
            let weights = incoming_in_order(template, neuron)
                .into_iter()
                .map(|(id, from)| WeightDecision {
                    from,
                    weight: source.sample_weight(template, id, rng),
                })
                .collect();
            decisions.push(Decision {
                position,
                bias,
                weights,
            });
        }
        Self { decisions }
    }

    /// Record the current values of `graph`.
    #[must_use]
    pub fn capture(graph: &NetworkGraph) -> Self {
        let decisions = graph
            .neurons_in_order()
            .skip(graph.input_ids().len())
            .map(|neuron| Decision {
                position: graph.neurons[neuron].position,
                bias: graph.neurons[neuron].bias,
                weights: incoming_in_order(graph, neuron)
                    .into_iter()
                    .map(|(id, from)| WeightDecision {
                        from,
                        weight: graph.connections[id].weight,
                    })
                    .collect(),
            })
            .collect();
        Self { decisions }
    }

    /// Write every value onto `graph`.
    ///
    /// Every address is resolved before anything is written, so a failed
    /// application leaves `graph` untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::ShapeMismatch`] if a decision names a position or an
    /// incoming connection that `graph` does not have.
    pub fn apply_to(&self, graph: &mut NetworkGraph) -> Result<(), AcoError> {
        let mut biases: Vec<(NeuronId, f64)> = Vec::with_capacity(self.decisions.len());
        let mut weights: Vec<(ConnectionId, f64)> = Vec::new();

        for decision in &self.decisions {
            let neuron = graph
                .neuron_at(decision.position)
                .filter(|_| decision.position.layer > 0)
                .ok_or_else(|| {
                    AcoError::ShapeMismatch(format!(
                        "solution addresses missing neuron {}",
                        decision.position
                    ))
                })?;
            biases.push((neuron, decision.bias));
            for w in &decision.weights {
                let connection = graph
                    .neuron_at(w.from)
                    .and_then(|from| graph.connection_between(from, neuron))
                    .ok_or_else(|| {
                        AcoError::ShapeMismatch(format!(
                            "solution addresses missing connection {} -> {}",
                            w.from, decision.position
                        ))
                    })?;
                weights.push((connection, w.weight));
            }
        }

        for (neuron, bias) in biases {
            graph.set_bias(neuron, bias);
        }
        for (connection, weight) in weights {
            graph.connections[connection].weight = weight;
        }
        Ok(())
    }

    /// Number of decisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    /// Whether the solution has no decisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Total number of sampled weights.
    #[must_use]
    pub fn num_weights(&self) -> usize {
        self.decisions.iter().map(|d| d.weights.len()).sum()
    }
}

fn incoming_in_order(graph: &NetworkGraph, neuron: NeuronId) -> Vec<(ConnectionId, NeuronPosition)> {
    let mut incoming: Vec<(ConnectionId, NeuronPosition)> = graph
        .incoming_connections(neuron)
        .map(|(id, c)| (id, graph.neurons[c.from].position))
        .collect();
    incoming.sort_by_key(|(_, from)| *from);
    incoming
}

/// Identity of an ant: the iteration that created it and its slot in that iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AntId {
    pub iteration: u64,
    pub index: usize,
}

impl fmt::Display for AntId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ant {}.{}", self.iteration, self.index)
    }
}

/// One candidate: a solution and the network it produces.
#[derive(Debug, Clone)]
pub struct Ant {
    pub id: AntId,
    pub solution: Solution,
    /// `template` with `solution` applied.
    pub network: NetworkGraph,
    /// Set by the external evaluator.
    pub fitness: Option<f64>,
}

impl Ant {
    /// Build the candidate network by applying `solution` to a copy of `template`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::ShapeMismatch`] if `solution` does not fit `template`.
    pub fn new(id: AntId, solution: Solution, template: &NetworkGraph) -> Result<Self, AcoError> {
        let mut network = template.clone();
        solution.apply_to(&mut network)?;
        Ok(Self {
            id,
            solution,
            network,
            fitness: None,
        })
    }

    /// Whether a fitness value has been set.
    #[must_use]
    pub const fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }
}
