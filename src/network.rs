//! Layered feed-forward network graph with arena storage.
//!
//! Neurons and connections live in `SlotMap` arenas; `layers` orders neuron keys
//! layer-major. Keys are stable across every mutation and across `clone()`, so a
//! pheromone model built for one graph keeps addressing the same sites on a copy.
//! [`NeuronPosition`]s are derived from `layers` and shift when a layer is
//! inserted or removed; they are refreshed after every structural change.
//!
//! Every structural mutator is a single operation that returns a
//! [`StructuralChange`] listing exactly which keys it added and removed, which is
//! what the pheromone mirror replays.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::activation::Activation;
use crate::config::NetworkConfig;
use crate::error::AcoError;
use crate::evaluator::NetworkEvaluator;
use crate::innovation;

new_key_type! {
    /// Stable key of a neuron.
    pub struct NeuronId;

    /// Stable key of a connection.
    pub struct ConnectionId;
}

/// A neuron's place in the layered graph: `(layer, index within layer)`.
///
/// Ordered layer-major, which is also the order the solution walk visits neurons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NeuronPosition {
    pub layer: usize,
    pub index: usize,
}

impl NeuronPosition {
    #[must_use]
    pub const fn new(layer: usize, index: usize) -> Self {
        Self { layer, index }
    }
}

impl fmt::Display for NeuronPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.layer, self.index)
    }
}

/// Role of a neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeuronKind {
    /// Receives an external value; has no bias and no incoming connections.
    Input,
    /// Created by topology growth.
    Hidden,
    /// Produces one network output.
    Output,
}

/// A neuron and its adjacency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neuron {
    /// Structural identity, see [`crate::innovation`].
    pub innovation: u64,
    pub kind: NeuronKind,
    pub activation: Activation,
    pub bias: f64,
    /// Cached position, refreshed after every structural change.
    pub position: NeuronPosition,
    incoming: Vec<ConnectionId>,
    outgoing: Vec<ConnectionId>,
}

impl Neuron {
    fn new(innovation: u64, kind: NeuronKind, activation: Activation, bias: f64) -> Self {
        Self {
            innovation,
            kind,
            activation,
            bias,
            position: NeuronPosition::new(0, 0),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Keys of connections ending at this neuron.
    #[must_use]
    pub fn incoming(&self) -> &[ConnectionId] {
        &self.incoming
    }

    /// Keys of connections starting at this neuron.
    #[must_use]
    pub fn outgoing(&self) -> &[ConnectionId] {
        &self.outgoing
    }
}

/// A weighted directed edge between neurons in strictly increasing layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// `innovation::connection(from.innovation, to.innovation)`.
    pub innovation: u64,
    pub from: NeuronId,
    pub to: NeuronId,
    pub weight: f64,
}

/// Keys added and removed by one structural mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuralChange {
    pub added_neurons: Vec<NeuronId>,
    pub removed_neurons: Vec<NeuronId>,
    pub added_connections: Vec<ConnectionId>,
    pub removed_connections: Vec<ConnectionId>,
    /// The last neuron created or removed, if any.
    pub last_neuron: Option<NeuronId>,
    /// Whether layers were inserted or removed (positions shifted).
    pub layers_changed: bool,
}

impl StructuralChange {
    /// Whether the change touched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_neurons.is_empty()
            && self.removed_neurons.is_empty()
            && self.added_connections.is_empty()
            && self.removed_connections.is_empty()
    }

    /// Append `other`, which happened after `self`.
    ///
    /// A key added by `self` and removed by `other` cancels out.
    pub fn extend(&mut self, other: Self) {
        for id in other.removed_connections {
            if let Some(pos) = self.added_connections.iter().position(|c| *c == id) {
                self.added_connections.remove(pos);
            } else {
                self.removed_connections.push(id);
            }
        }
        for id in other.removed_neurons {
            if let Some(pos) = self.added_neurons.iter().position(|n| *n == id) {
                self.added_neurons.remove(pos);
            } else {
                self.removed_neurons.push(id);
            }
        }
        self.added_connections.extend(other.added_connections);
        self.added_neurons.extend(other.added_neurons);
        self.layers_changed |= other.layers_changed;
        if other.last_neuron.is_some() {
            self.last_neuron = other.last_neuron;
        }
    }
}

/// A layered, acyclic feed-forward network.
///
/// Layer 0 holds the inputs and the last layer holds the outputs; connections
/// always go from a lower layer to a higher one, so the graph cannot contain
/// cycles and layer-major order is a topological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGraph {
    /// Arena storage for neurons.
    pub neurons: SlotMap<NeuronId, Neuron>,
    /// Arena storage for connections.
    pub connections: SlotMap<ConnectionId, Connection>,
    layers: Vec<Vec<NeuronId>>,
    /// Configuration used for this network.
    #[serde(default)]
    pub config: NetworkConfig,
    /// Number of neurons ever created by `add_neuron`, salts their innovations.
    additions: u64,
}

impl NetworkGraph {
    /// Input and output layers with zero biases and no connections.
    #[must_use]
    pub fn minimal(config: NetworkConfig) -> Self {
        let mut neurons: SlotMap<NeuronId, Neuron> = SlotMap::with_key();
        let inputs = (0..config.num_inputs)
            .map(|i| {
                neurons.insert(Neuron::new(
                    innovation::input_neuron(i),
                    NeuronKind::Input,
                    Activation::Identity,
                    0.0,
                ))
            })
            .collect();
        let outputs = (0..config.num_outputs)
            .map(|i| {
                neurons.insert(Neuron::new(
                    innovation::output_neuron(i),
                    NeuronKind::Output,
                    config.output_activation,
                    0.0,
                ))
            })
            .collect();

        let mut graph = Self {
            neurons,
            connections: SlotMap::with_key(),
            layers: vec![inputs, outputs],
            config,
            additions: 0,
        };
        graph.reindex();
        graph
    }

    /// Inputs fully connected to outputs; weights and output biases uniform in
    /// `[-weight_range, weight_range]`.
    #[must_use]
    pub fn build_random<R: Rng>(config: NetworkConfig, rng: &mut R) -> Self {
        let range = config.weight_range;
        let mut graph = Self::minimal(config);
        let inputs = graph.layers[0].clone();
        let outputs = graph.layers[1].clone();

        for &output in &outputs {
            graph.neurons[output].bias = rng.random_range(-range..=range);
            for &input in &inputs {
                let weight = rng.random_range(-range..=range);
                graph.insert_connection(input, output, weight);
            }
        }
        graph
    }

    /// Number of layers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// All layers, layer-major.
    #[must_use]
    pub fn layers(&self) -> &[Vec<NeuronId>] {
        &self.layers
    }

    /// Neuron keys of layer `layer` (empty if out of range).
    #[must_use]
    pub fn neurons_of_layer(&self, layer: usize) -> &[NeuronId] {
        self.layers.get(layer).map_or(&[], Vec::as_slice)
    }

    /// Input neuron keys, in input order.
    #[must_use]
    pub fn input_ids(&self) -> &[NeuronId] {
        self.neurons_of_layer(0)
    }

    /// Output neuron keys, in output order.
    #[must_use]
    pub fn output_ids(&self) -> &[NeuronId] {
        self.layers.last().map_or(&[], Vec::as_slice)
    }

    /// Every neuron key in layer-major order.
    pub fn neurons_in_order(&self) -> impl Iterator<Item = NeuronId> + '_ {
        self.layers.iter().flatten().copied()
    }

    /// Number of neurons that carry a bias (everything but the inputs).
    #[must_use]
    pub fn num_biases(&self) -> usize {
        self.neurons.len() - self.input_ids().len()
    }

    /// Number of hidden neurons.
    #[must_use]
    pub fn num_hidden(&self) -> usize {
        self.neurons
            .values()
            .filter(|n| n.kind == NeuronKind::Hidden)
            .count()
    }

    /// Neuron at `position`.
    #[must_use]
    pub fn neuron_at(&self, position: NeuronPosition) -> Option<NeuronId> {
        self.layers
            .get(position.layer)
            .and_then(|layer| layer.get(position.index))
            .copied()
    }

    /// Current position of `neuron`.
    #[must_use]
    pub fn position_of(&self, neuron: NeuronId) -> Option<NeuronPosition> {
        self.neurons.get(neuron).map(|n| n.position)
    }

    /// Connections ending at `neuron`.
    pub fn incoming_connections(
        &self,
        neuron: NeuronId,
    ) -> impl Iterator<Item = (ConnectionId, &Connection)> + '_ {
        self.neurons
            .get(neuron)
            .map_or(&[][..], |n| n.incoming.as_slice())
            .iter()
            .filter_map(|&id| self.connections.get(id).map(|c| (id, c)))
    }

    /// Connections starting at `neuron`.
    pub fn outgoing_connections(
        &self,
        neuron: NeuronId,
    ) -> impl Iterator<Item = (ConnectionId, &Connection)> + '_ {
        self.neurons
            .get(neuron)
            .map_or(&[][..], |n| n.outgoing.as_slice())
            .iter()
            .filter_map(|&id| self.connections.get(id).map(|c| (id, c)))
    }

    /// The connection `from -> to`, if present.
    #[must_use]
    pub fn connection_between(&self, from: NeuronId, to: NeuronId) -> Option<ConnectionId> {
        self.outgoing_connections(from)
            .find(|(_, c)| c.to == to)
            .map(|(id, _)| id)
    }

    /// Set the weight of `from -> to`. Returns `false` if there is no such connection.
    pub fn set_weight(&mut self, from: NeuronId, to: NeuronId, weight: f64) -> bool {
        match self.connection_between(from, to) {
            Some(id) => {
                self.connections[id].weight = weight;
                true
            }
            None => false,
        }
    }

    /// Set the bias of a non-input neuron. Returns `false` for inputs and unknown keys.
    pub fn set_bias(&mut self, neuron: NeuronId, bias: f64) -> bool {
        match self.neurons.get_mut(neuron) {
            Some(n) if n.kind != NeuronKind::Input => {
                n.bias = bias;
                true
            }
            _ => false,
        }
    }

    /// Run the network on `inputs`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InputSize`] if `inputs` does not match the input layer.
    pub fn process(&self, inputs: &[f64]) -> Result<Vec<f64>, AcoError> {
        NetworkEvaluator::new(self).evaluate(inputs)
    }

    /// Insert a neuron on `connection`: `from -> new -> to`.
    ///
    /// The new neuron uses the configured split activation, incoming weight 1,
    /// bias 0 and outgoing weight equal to the old weight. With the default
    /// `Identity` activation the network computes exactly the same function
    /// afterwards. If the endpoints sit in adjacent layers a new hidden layer is
    /// inserted between them.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidMutation`] if `connection` does not exist.
    pub fn split_connection(
        &mut self,
        connection: ConnectionId,
    ) -> Result<StructuralChange, AcoError> {
        let old = self
            .connections
            .get(connection)
            .cloned()
            .ok_or_else(|| AcoError::InvalidMutation("split of unknown connection".into()))?;
        let from_layer = self.neurons[old.from].position.layer;
        let to_layer = self.neurons[old.to].position.layer;

        let mut change = StructuralChange::default();
        let layer = from_layer + 1;
        if to_layer == layer {
            self.layers.insert(layer, Vec::new());
            change.layers_changed = true;
        }

        self.detach_connection(connection);
        change.removed_connections.push(connection);

        let innovation = self.unique_innovation(innovation::split_neuron(old.innovation));
        let neuron = self.neurons.insert(Neuron::new(
            innovation,
            NeuronKind::Hidden,
            self.config.split_activation,
            0.0,
        ));
        self.layers[layer].push(neuron);
        self.reindex();

        change
            .added_connections
            .push(self.insert_connection(old.from, neuron, 1.0));
        change
            .added_connections
            .push(self.insert_connection(neuron, old.to, old.weight));
        change.added_neurons.push(neuron);
        change.last_neuron = Some(neuron);
        Ok(change)
    }

    /// Add the connection `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidMutation`] if either neuron is unknown, if
    /// `from` is not in a strictly lower layer than `to`, or if the connection
    /// already exists.
    pub fn add_connection(
        &mut self,
        from: NeuronId,
        to: NeuronId,
        weight: f64,
    ) -> Result<StructuralChange, AcoError> {
        let (Some(source), Some(target)) = (self.neurons.get(from), self.neurons.get(to)) else {
            return Err(AcoError::InvalidMutation(
                "connection endpoint does not exist".into(),
            ));
        };
        if source.position.layer >= target.position.layer {
            return Err(AcoError::InvalidMutation(format!(
                "connection {} -> {} does not point forward",
                source.position, target.position
            )));
        }
        if self.connection_between(from, to).is_some() {
            return Err(AcoError::InvalidMutation(format!(
                "connection {} -> {} already exists",
                source.position, target.position
            )));
        }

        let id = self.insert_connection(from, to, weight);
        Ok(StructuralChange {
            added_connections: vec![id],
            ..StructuralChange::default()
        })
    }

    /// Remove a connection.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidMutation`] if `connection` does not exist.
    pub fn remove_connection(
        &mut self,
        connection: ConnectionId,
    ) -> Result<StructuralChange, AcoError> {
        self.detach_connection(connection)
            .ok_or_else(|| AcoError::InvalidMutation("removal of unknown connection".into()))?;
        Ok(StructuralChange {
            removed_connections: vec![connection],
            ..StructuralChange::default()
        })
    }

    /// Add a hidden neuron to `layer`, wired `from -> new -> to`.
    ///
    /// The incoming weight is 1 and the outgoing weight 0, so the network output
    /// is unchanged until the new weights are resampled.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidMutation`] if `layer` is not a hidden layer or
    /// `from`/`to` do not lie strictly below/above it.
    pub fn add_neuron(
        &mut self,
        layer: usize,
        from: NeuronId,
        to: NeuronId,
    ) -> Result<StructuralChange, AcoError> {
        if layer == 0 || layer + 1 >= self.depth() {
            return Err(AcoError::InvalidMutation(format!(
                "layer {layer} is not a hidden layer"
            )));
        }
        let (Some(source), Some(target)) = (self.neurons.get(from), self.neurons.get(to)) else {
            return Err(AcoError::InvalidMutation(
                "neuron endpoint does not exist".into(),
            ));
        };
        if source.position.layer >= layer || target.position.layer <= layer {
            return Err(AcoError::InvalidMutation(format!(
                "{} -> layer {layer} -> {} is not feed-forward",
                source.position, target.position
            )));
        }

        let innovation = self.unique_innovation(innovation::added_neuron(
            source.innovation,
            target.innovation,
            self.additions,
        ));
        self.additions += 1;
        let neuron = self.neurons.insert(Neuron::new(
            innovation,
            NeuronKind::Hidden,
            self.config.hidden_activation,
            0.0,
        ));
        self.layers[layer].push(neuron);
        self.reindex();

        let incoming = self.insert_connection(from, neuron, 1.0);
        let outgoing = self.insert_connection(neuron, to, 0.0);
        Ok(StructuralChange {
            added_neurons: vec![neuron],
            added_connections: vec![incoming, outgoing],
            last_neuron: Some(neuron),
            ..StructuralChange::default()
        })
    }

    /// Remove a hidden neuron and every connection touching it.
    ///
    /// A hidden layer left empty is removed.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidMutation`] if `neuron` is unknown or not hidden.
    pub fn remove_neuron(&mut self, neuron: NeuronId) -> Result<StructuralChange, AcoError> {
        let Some(node) = self.neurons.get(neuron) else {
            return Err(AcoError::InvalidMutation("removal of unknown neuron".into()));
        };
        if node.kind != NeuronKind::Hidden {
            return Err(AcoError::InvalidMutation(format!(
                "neuron {} is not hidden",
                node.position
            )));
        }

        let layer = node.position.layer;
        let touching: Vec<ConnectionId> = node
            .incoming
            .iter()
            .chain(node.outgoing.iter())
            .copied()
            .collect();
        for &id in &touching {
            self.detach_connection(id);
        }
        self.neurons.remove(neuron);
        self.layers[layer].retain(|&n| n != neuron);

        let mut change = StructuralChange {
            removed_connections: touching,
            removed_neurons: vec![neuron],
            last_neuron: Some(neuron),
            ..StructuralChange::default()
        };
        if self.layers[layer].is_empty() {
            self.layers.remove(layer);
            change.layers_changed = true;
        }
        self.reindex();
        Ok(change)
    }

    /// NEAT-style distance between two networks.
    ///
    /// Connections are matched by innovation. The distance is the fraction of
    /// unmatched connections plus 0.4 times the mean absolute weight difference
    /// of matched ones.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compatibility_distance(&self, other: &Self) -> f64 {
        const DISJOINT_COEFF: f64 = 1.0;
        const WEIGHT_COEFF: f64 = 0.4;

        let theirs: HashMap<u64, f64> = other
            .connections
            .values()
            .map(|c| (c.innovation, c.weight))
            .collect();

        let mut matching = 0usize;
        let mut weight_diff_sum = 0.0;
        for conn in self.connections.values() {
            if let Some(w) = theirs.get(&conn.innovation) {
                matching += 1;
                weight_diff_sum += (conn.weight - w).abs();
            }
        }
        let unmatched = (self.connections.len() - matching) + (other.connections.len() - matching);

        let n = self.connections.len().max(other.connections.len()).max(1) as f64;
        let avg_weight_diff = if matching > 0 {
            weight_diff_sum / matching as f64
        } else {
            0.0
        };
        DISJOINT_COEFF * unmatched as f64 / n + WEIGHT_COEFF * avg_weight_diff
    }

    /// Bias values keyed by neuron innovation (non-input neurons only).
    #[must_use]
    pub fn biases_by_innovation(&self) -> HashMap<u64, f64> {
        self.neurons
            .values()
            .filter(|n| n.kind != NeuronKind::Input)
            .map(|n| (n.innovation, n.bias))
            .collect()
    }

    /// Weights keyed by `(from innovation, to innovation)`.
    #[must_use]
    pub fn weights_by_innovation(&self) -> HashMap<(u64, u64), f64> {
        self.connections
            .values()
            .map(|c| {
                (
                    (self.neurons[c.from].innovation, self.neurons[c.to].innovation),
                    c.weight,
                )
            })
            .collect()
    }

    fn insert_connection(&mut self, from: NeuronId, to: NeuronId, weight: f64) -> ConnectionId {
        let innovation =
            innovation::connection(self.neurons[from].innovation, self.neurons[to].innovation);
        let id = self.connections.insert(Connection {
            innovation,
            from,
            to,
            weight,
        });
        self.neurons[from].outgoing.push(id);
        self.neurons[to].incoming.push(id);
        id
    }

    fn detach_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(id)?;
        if let Some(n) = self.neurons.get_mut(conn.from) {
            n.outgoing.retain(|&c| c != id);
        }
        if let Some(n) = self.neurons.get_mut(conn.to) {
            n.incoming.retain(|&c| c != id);
        }
        Some(conn)
    }

    /// Re-salt `candidate` until no existing neuron uses it.
    fn unique_innovation(&self, candidate: u64) -> u64 {
        let mut innovation = candidate;
        let mut salt = 0;
        while self.neurons.values().any(|n| n.innovation == innovation) {
            salt += 1;
            innovation = innovation::added_neuron(candidate, candidate, salt);
        }
        innovation
    }

    fn reindex(&mut self) {
        for (l, layer) in self.layers.iter().enumerate() {
            for (i, &id) in layer.iter().enumerate() {
                self.neurons[id].position = NeuronPosition::new(l, i);
            }
        }
    }

    /// Dense layer-major index of every neuron.
    pub(crate) fn dense_indices(&self) -> SecondaryMap<NeuronId, usize> {
        self.neurons_in_order()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn config(inputs: usize, outputs: usize) -> NetworkConfig {
        NetworkConfig {
            num_inputs: inputs,
            num_outputs: outputs,
            ..NetworkConfig::default()
        }
    }

    fn first_connection(graph: &NetworkGraph) -> ConnectionId {
        graph.connections.keys().next().unwrap()
    }

    #[test]
    fn test_build_random_is_fully_connected() {
        let graph = NetworkGraph::build_random(config(3, 2), &mut test_rng());
        assert_eq!(graph.depth(), 2);
        assert_eq!(graph.connections.len(), 6);
        assert_eq!(graph.num_biases(), 2);
        for &input in graph.input_ids() {
            assert_eq!(graph.outgoing_connections(input).count(), 2);
        }
    }

    #[test]
    fn test_positions_are_layer_major() {
        let graph = NetworkGraph::build_random(config(2, 2), &mut test_rng());
        let positions: Vec<_> = graph
            .neurons_in_order()
            .map(|id| graph.position_of(id).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert_eq!(
            graph.neuron_at(NeuronPosition::new(1, 1)),
            Some(graph.output_ids()[1])
        );
    }

    #[test]
    fn test_split_adjacent_layers_inserts_layer() {
        let mut graph = NetworkGraph::build_random(config(2, 1), &mut test_rng());
        let output = graph.output_ids()[0];
        let conn = first_connection(&graph);

        let change = graph.split_connection(conn).unwrap();
        assert_eq!(graph.depth(), 3);
        assert!(change.layers_changed);
        assert_eq!(change.removed_connections, vec![conn]);
        assert_eq!(change.added_connections.len(), 2);
        let hidden = change.last_neuron.unwrap();
        assert_eq!(graph.neurons[hidden].kind, NeuronKind::Hidden);
        assert_eq!(graph.position_of(hidden), Some(NeuronPosition::new(1, 0)));
        assert_eq!(graph.position_of(output), Some(NeuronPosition::new(2, 0)));
    }

    #[test]
    fn test_split_across_layers_reuses_layer() {
        let mut graph = NetworkGraph::build_random(config(2, 1), &mut test_rng());
        let conn = first_connection(&graph);
        graph.split_connection(conn).unwrap();
        // Remaining input -> output connection now spans two layers.
        let spanning = graph
            .connections
            .iter()
            .find(|(_, c)| {
                graph.neurons[c.to].position.layer - graph.neurons[c.from].position.layer == 2
            })
            .map(|(id, _)| id)
            .unwrap();
        let change = graph.split_connection(spanning).unwrap();
        assert!(!change.layers_changed);
        assert_eq!(graph.depth(), 3);
        assert_eq!(graph.neurons_of_layer(1).len(), 2);
    }

    #[test]
    fn test_split_preserves_output() {
        let mut graph = NetworkGraph::build_random(config(3, 2), &mut test_rng());
        let before = graph.process(&[0.3, -0.7, 1.1]).unwrap();
        let conn = first_connection(&graph);
        graph.split_connection(conn).unwrap();
        let after = graph.process(&[0.3, -0.7, 1.1]).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn test_add_connection_rules() {
        let mut graph = NetworkGraph::minimal(config(2, 1));
        let input = graph.input_ids()[0];
        let output = graph.output_ids()[0];

        assert!(graph.add_connection(input, output, 0.5).is_ok());
        assert!(graph.add_connection(input, output, 0.5).is_err());
        assert!(graph.add_connection(output, input, 0.5).is_err());
        assert!(graph
            .add_connection(input, graph.input_ids()[1], 0.5)
            .is_err());
        assert_eq!(graph.connections.len(), 1);
    }

    #[test]
    fn test_add_neuron_requires_hidden_layer() {
        let mut graph = NetworkGraph::build_random(config(2, 1), &mut test_rng());
        let input = graph.input_ids()[0];
        let output = graph.output_ids()[0];
        assert!(graph.add_neuron(1, input, output).is_err());

        graph.split_connection(first_connection(&graph)).unwrap();
        let before = graph.process(&[1.0, 2.0]).unwrap();
        let change = graph.add_neuron(1, input, output).unwrap();
        assert_eq!(change.added_neurons.len(), 1);
        assert_eq!(change.added_connections.len(), 2);
        assert_eq!(graph.neurons_of_layer(1).len(), 2);
        let after = graph.process(&[1.0, 2.0]).unwrap();
        assert!((before[0] - after[0]).abs() < 1e-12);
    }

    #[test]
    fn test_remove_neuron_drops_empty_layer() {
        let mut graph = NetworkGraph::build_random(config(2, 1), &mut test_rng());
        let change = graph.split_connection(first_connection(&graph)).unwrap();
        let hidden = change.last_neuron.unwrap();
        let output = graph.output_ids()[0];

        let removal = graph.remove_neuron(hidden).unwrap();
        assert_eq!(removal.removed_connections.len(), 2);
        assert!(removal.layers_changed);
        assert_eq!(graph.depth(), 2);
        assert_eq!(graph.position_of(output), Some(NeuronPosition::new(1, 0)));
        assert!(graph.remove_neuron(output).is_err());
    }

    #[test]
    fn test_set_weight_and_bias() {
        let mut graph = NetworkGraph::build_random(config(1, 1), &mut test_rng());
        let input = graph.input_ids()[0];
        let output = graph.output_ids()[0];
        assert!(graph.set_weight(input, output, 0.25));
        assert!(graph.set_bias(output, -0.5));
        assert!(!graph.set_bias(input, 1.0));
        assert!(!graph.set_weight(output, input, 1.0));
        let conn = graph.connection_between(input, output).unwrap();
        assert!((graph.connections[conn].weight - 0.25).abs() < 1e-12);
        assert!((graph.neurons[output].bias + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_copies_share_keys() {
        let graph = NetworkGraph::build_random(config(2, 2), &mut test_rng());
        let copy = graph.clone();
        for id in graph.connections.keys() {
            assert!(copy.connections.contains_key(id));
        }
    }

    #[test]
    fn test_compatibility_distance() {
        let mut rng = test_rng();
        let a = NetworkGraph::build_random(config(2, 1), &mut rng);
        let mut b = a.clone();
        assert!(a.compatibility_distance(&b).abs() < 1e-12);

        b.split_connection(first_connection(&b)).unwrap();
        let d_ab = a.compatibility_distance(&b);
        let d_ba = b.compatibility_distance(&a);
        assert!(d_ab > 0.0);
        assert!((d_ab - d_ba).abs() < 1e-12);
    }

    #[test]
    fn test_structural_change_extend_cancels() {
        let mut graph = NetworkGraph::build_random(config(2, 1), &mut test_rng());
        let mut change = graph.split_connection(first_connection(&graph)).unwrap();
        let added = change.added_connections[0];
        change.extend(graph.remove_connection(added).unwrap());
        assert!(!change.added_connections.contains(&added));
        assert!(!change.removed_connections.contains(&added));
    }
}
