//! Dissipative pheromone model for single-colony ACO.
//!
//! One [`PheromoneEntry`] per connection and one per non-input neuron bias, keyed
//! by the same arena keys as the [`NetworkGraph`] it mirrors. Sampling draws a
//! Gaussian around the entry's value with a deviation computed from its strength;
//! reinforcement pulls the value to the reinforced solution and saturates the
//! strength toward 1; decay shrinks every strength geometrically.

use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

use crate::error::AcoError;
use crate::expression::{Bindings, FormulaId, Formulas, Variable};
use crate::network::{ConnectionId, NetworkGraph, NeuronId, NeuronKind, StructuralChange};
use crate::observe::PheromoneSnapshot;
use crate::walk::Solution;

/// Deviation used where no pheromone information exists.
pub const NEUTRAL_DEVIATION: f64 = 1.0;

/// Dissipation rate used when the configured formula yields a non-finite value.
const FALLBACK_DISSIPATION: f64 = 0.05;

/// Anything the solution walk can sample values from.
pub trait PheromoneSource {
    /// Sample a bias for `neuron` of `graph`.
    fn sample_bias<R: Rng>(&self, graph: &NetworkGraph, neuron: NeuronId, rng: &mut R) -> f64;

    /// Sample a weight for `connection` of `graph`.
    fn sample_weight<R: Rng>(
        &self,
        graph: &NetworkGraph,
        connection: ConnectionId,
        rng: &mut R,
    ) -> f64;
}

/// A structure that must follow every structural change of a network.
pub trait PheromoneMirror {
    /// Replay `change`, which has already been applied to `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::ShapeMismatch`] if the mirror does not match `graph`
    /// afterwards.
    fn mirror(&mut self, change: &StructuralChange, graph: &NetworkGraph) -> Result<(), AcoError>;
}

/// No mirror, for graphs whose statistics are derived on demand.
impl PheromoneMirror for () {
    fn mirror(&mut self, _change: &StructuralChange, _graph: &NetworkGraph) -> Result<(), AcoError> {
        Ok(())
    }
}

/// Draw from `N(mean, deviation)`; a degenerate deviation yields `mean`.
pub(crate) fn gaussian<R: Rng>(mean: f64, deviation: f64, rng: &mut R) -> f64 {
    match Normal::new(mean, deviation) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}

/// Desirability record of one weight or bias.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PheromoneEntry {
    /// Signed center of the sampling distribution.
    pub value: f64,
    /// Confidence in `value`, in `[0, 1]`.
    pub strength: f64,
}

impl PheromoneEntry {
    #[must_use]
    pub const fn new(value: f64, strength: f64) -> Self {
        Self { value, strength }
    }

    /// The fixed saturating rule: `s + (1 - s) / (s + 2)`.
    #[inline]
    #[must_use]
    pub fn saturate(strength: f64) -> f64 {
        strength + (1.0 - strength) / (strength + 2.0)
    }

    /// Move the entry to `value` with the given new strength, clamped to `[0, 1]`.
    pub fn reinforce(&mut self, value: f64, strength: f64) {
        self.value = value;
        self.strength = strength.clamp(0.0, 1.0);
    }

    /// Multiply strength by `1 - rate`.
    ///
    /// A positive rate always strictly lowers a positive strength; once the
    /// product stops changing (subnormal range) the strength drops to zero.
    pub fn decay(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        if rate == 0.0 {
            return;
        }
        let decayed = (self.strength * (1.0 - rate)).max(0.0);
        self.strength = if decayed < self.strength { decayed } else { 0.0 };
    }
}

/// Pheromone mirror of one network, used by a single colony.
#[derive(Debug, Clone)]
pub struct PheromoneModel {
    biases: SecondaryMap<NeuronId, PheromoneEntry>,
    weights: SecondaryMap<ConnectionId, PheromoneEntry>,
    formulas: Arc<Formulas>,
    initial_strength: f64,
    value_limit: f64,
    iteration: u64,
}

impl PheromoneModel {
    /// Build a model shaped like `graph`, centered on its current values.
    #[must_use]
    pub fn from_network(graph: &NetworkGraph, formulas: Arc<Formulas>, initial_strength: f64) -> Self {
        let mut model = Self {
            biases: SecondaryMap::new(),
            weights: SecondaryMap::new(),
            formulas,
            initial_strength: initial_strength.clamp(0.0, 1.0),
            value_limit: graph.config.value_limit,
            iteration: 0,
        };
        for (id, neuron) in &graph.neurons {
            if neuron.kind != NeuronKind::Input {
                model.biases.insert(id, model.fresh(neuron.bias));
            }
        }
        for (id, conn) in &graph.connections {
            model.weights.insert(id, model.fresh(conn.weight));
        }
        model
    }

    fn fresh(&self, value: f64) -> PheromoneEntry {
        PheromoneEntry::new(value, self.initial_strength)
    }

    /// Entry of `neuron`'s bias.
    #[must_use]
    pub fn bias_entry(&self, neuron: NeuronId) -> Option<&PheromoneEntry> {
        self.biases.get(neuron)
    }

    /// Entry of `connection`'s weight.
    #[must_use]
    pub fn weight_entry(&self, connection: ConnectionId) -> Option<&PheromoneEntry> {
        self.weights.get(connection)
    }

    /// Number of bias entries.
    #[must_use]
    pub fn num_biases(&self) -> usize {
        self.biases.len()
    }

    /// Number of weight entries.
    #[must_use]
    pub fn num_weights(&self) -> usize {
        self.weights.len()
    }

    /// Number of decay steps applied so far.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_entry<R: Rng>(
        &self,
        entry: Option<&PheromoneEntry>,
        decisions: usize,
        layer: usize,
        depth: usize,
        rng: &mut R,
    ) -> f64 {
        let Some(entry) = entry else {
            return gaussian(0.0, NEUTRAL_DEVIATION, rng).clamp(-self.value_limit, self.value_limit);
        };
        let bindings = Bindings::new()
            .with(Variable::Strength, entry.strength)
            .with(Variable::Decisions, decisions as f64)
            .with(Variable::Layer, layer as f64)
            .with(Variable::Depth, depth as f64)
            .with(Variable::Iteration, self.iteration as f64);
        let deviation = self
            .formulas
            .evaluate_with(FormulaId::Deviation, bindings, rng)
            .map_or(NEUTRAL_DEVIATION, |d| d.max(0.0));
        gaussian(entry.value, deviation, rng).clamp(-self.value_limit, self.value_limit)
    }

    /// Reinforce every value of `solution` as it sits on `graph`.
    ///
    /// Only a positive, finite `quality` reinforces; returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::ShapeMismatch`] if a decision does not address a
    /// neuron or connection of `graph`.
    pub fn reinforce<R: Rng>(
        &mut self,
        graph: &NetworkGraph,
        solution: &Solution,
        quality: f64,
        rng: &mut R,
    ) -> Result<bool, AcoError> {
        if !(quality > 0.0 && quality.is_finite()) {
            return Ok(false);
        }

        let limit = self.value_limit;
        for decision in &solution.decisions {
            let neuron = graph.neuron_at(decision.position).ok_or_else(|| {
                AcoError::ShapeMismatch(format!("no neuron at {}", decision.position))
            })?;
            let entry = self.biases.get_mut(neuron).ok_or_else(|| {
                AcoError::ShapeMismatch(format!("no bias entry at {}", decision.position))
            })?;
            let strength = saturate_with(&self.formulas, entry.strength, rng);
            entry.reinforce(decision.bias.clamp(-limit, limit), strength);

            for w in &decision.weights {
                let connection = graph
                    .neuron_at(w.from)
                    .and_then(|from| graph.connection_between(from, neuron))
                    .ok_or_else(|| {
                        AcoError::ShapeMismatch(format!(
                            "no connection {} -> {}",
                            w.from, decision.position
                        ))
                    })?;
                let entry = self.weights.get_mut(connection).ok_or_else(|| {
                    AcoError::ShapeMismatch(format!(
                        "no weight entry {} -> {}",
                        w.from, decision.position
                    ))
                })?;
                let strength = saturate_with(&self.formulas, entry.strength, rng);
                entry.reinforce(w.weight.clamp(-limit, limit), strength);
            }
        }
        Ok(true)
    }

    /// Dissipate every entry once.
    #[allow(clippy::cast_precision_loss)]
    pub fn decay<R: Rng>(&mut self, depth: usize, rng: &mut R) {
        let bindings = Bindings::new()
            .with(Variable::Depth, depth as f64)
            .with(Variable::Iteration, self.iteration as f64);
        let rate = self
            .formulas
            .evaluate_with(FormulaId::Dissipation, bindings, rng)
            .unwrap_or(FALLBACK_DISSIPATION);
        for entry in self.biases.values_mut().chain(self.weights.values_mut()) {
            entry.decay(rate);
        }
        self.iteration += 1;
    }

    /// Check that there is exactly one entry per connection and one per
    /// non-input neuron of `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::ShapeMismatch`] describing the first difference.
    pub fn verify_shape(&self, graph: &NetworkGraph) -> Result<(), AcoError> {
        if self.weights.len() != graph.connections.len() {
            return Err(AcoError::ShapeMismatch(format!(
                "{} weight entries for {} connections",
                self.weights.len(),
                graph.connections.len()
            )));
        }
        if self.biases.len() != graph.num_biases() {
            return Err(AcoError::ShapeMismatch(format!(
                "{} bias entries for {} non-input neurons",
                self.biases.len(),
                graph.num_biases()
            )));
        }
        if let Some(id) = graph.connections.keys().find(|id| !self.weights.contains_key(*id)) {
            return Err(AcoError::ShapeMismatch(format!(
                "connection {id:?} has no entry"
            )));
        }
        if let Some((_, n)) = graph
            .neurons
            .iter()
            .find(|(id, n)| n.kind != NeuronKind::Input && !self.biases.contains_key(*id))
        {
            return Err(AcoError::ShapeMismatch(format!(
                "neuron {} has no bias entry",
                n.position
            )));
        }
        Ok(())
    }

    /// Summary of the current entry distribution.
    #[must_use]
    pub fn snapshot(&self) -> PheromoneSnapshot {
        PheromoneSnapshot::from_entries(self.biases.values().chain(self.weights.values()))
    }
}

fn saturate_with<R: Rng>(formulas: &Formulas, strength: f64, rng: &mut R) -> f64 {
    let bindings = Bindings::new().with(Variable::Strength, strength);
    formulas
        .evaluate_with(FormulaId::Update, bindings, rng)
        .unwrap_or_else(|| PheromoneEntry::saturate(strength))
}

impl PheromoneSource for PheromoneModel {
    fn sample_bias<R: Rng>(&self, graph: &NetworkGraph, neuron: NeuronId, rng: &mut R) -> f64 {
        let layer = graph.position_of(neuron).map_or(0, |p| p.layer);
        let decisions = graph.neurons_of_layer(layer).len();
        self.sample_entry(self.biases.get(neuron), decisions, layer, graph.depth(), rng)
    }

    fn sample_weight<R: Rng>(
        &self,
        graph: &NetworkGraph,
        connection: ConnectionId,
        rng: &mut R,
    ) -> f64 {
        let (layer, decisions) = graph.connections.get(connection).map_or((0, 1), |c| {
            (
                graph.position_of(c.from).map_or(0, |p| p.layer),
                graph.outgoing_connections(c.from).count(),
            )
        });
        self.sample_entry(self.weights.get(connection), decisions, layer, graph.depth(), rng)
    }
}

impl PheromoneMirror for PheromoneModel {
    fn mirror(&mut self, change: &StructuralChange, graph: &NetworkGraph) -> Result<(), AcoError> {
        for &id in &change.removed_connections {
            self.weights.remove(id);
        }
        for &id in &change.removed_neurons {
            self.biases.remove(id);
        }
        for &id in &change.added_neurons {
            let neuron = graph.neurons.get(id).ok_or_else(|| {
                AcoError::ShapeMismatch("added neuron missing from graph".into())
            })?;
            if neuron.kind != NeuronKind::Input {
                self.biases.insert(id, self.fresh(neuron.bias));
            }
        }
        for &id in &change.added_connections {
            let conn = graph.connections.get(id).ok_or_else(|| {
                AcoError::ShapeMismatch("added connection missing from graph".into())
            })?;
            self.weights.insert(id, self.fresh(conn.weight));
        }
        self.verify_shape(graph)
    }
}
