//! Forward evaluation of a [`NetworkGraph`].
//!
//! [`NetworkEvaluator`] compiles a graph into flat arrays in layer-major order
//! (a topological order for a layered graph) with incoming connections in
//! Compressed Sparse Row form, so a forward pass is a single O(N+E) sweep over
//! contiguous memory.
//!
//! Incoming edges of each neuron are sorted by innovation number. Floating-point
//! addition is not associative, and this keeps results bit-identical between two
//! graphs with the same structure regardless of the order mutations happened in.

use crate::activation::Activation;
use crate::error::AcoError;
use crate::network::{NetworkGraph, NeuronKind};

/// A compiled, evaluation-ready network.
#[derive(Debug, Clone)]
pub struct NetworkEvaluator {
    /// Neuron outputs in layer-major order.
    activations: Vec<f64>,
    biases: Vec<f64>,
    activation_fns: Vec<Activation>,
    /// For neuron i, incoming edges are at `csr_offsets[i]..csr_offsets[i + 1]`.
    csr_offsets: Vec<usize>,
    csr_sources: Vec<usize>,
    csr_weights: Vec<f64>,
    /// Inputs occupy the first `num_inputs` slots.
    num_inputs: usize,
    /// Outputs occupy the last `num_outputs` slots.
    num_outputs: usize,
}

impl NetworkEvaluator {
    /// Compile `graph`.
    #[must_use]
    pub fn new(graph: &NetworkGraph) -> Self {
        let dense = graph.dense_indices();
        let n = dense.len();

        let mut activations = Vec::with_capacity(n);
        let mut biases = Vec::with_capacity(n);
        let mut activation_fns = Vec::with_capacity(n);
        let mut csr_offsets = Vec::with_capacity(n + 1);
        let mut csr_sources = Vec::with_capacity(graph.connections.len());
        let mut csr_weights = Vec::with_capacity(graph.connections.len());
        let mut edges: Vec<(u64, usize, f64)> = Vec::new();

        csr_offsets.push(0);
        for id in graph.neurons_in_order() {
            let neuron = &graph.neurons[id];
            activations.push(0.0);
            activation_fns.push(neuron.activation);
            biases.push(match neuron.kind {
                NeuronKind::Input => 0.0,
                NeuronKind::Hidden | NeuronKind::Output => neuron.bias,
            });

            edges.clear();
            edges.extend(
                graph
                    .incoming_connections(id)
                    .filter_map(|(_, c)| dense.get(c.from).map(|&src| (c.innovation, src, c.weight))),
            );
            edges.sort_by_key(|(innovation, _, _)| *innovation);
            for &(_, src, weight) in &edges {
                csr_sources.push(src);
                csr_weights.push(weight);
            }
            csr_offsets.push(csr_sources.len());
        }

        Self {
            activations,
            biases,
            activation_fns,
            csr_offsets,
            csr_sources,
            csr_weights,
            num_inputs: graph.input_ids().len(),
            num_outputs: graph.output_ids().len(),
        }
    }

    /// Evaluate into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InputSize`] if `inputs` or `outputs` have the wrong length.
    pub fn evaluate_into(&mut self, inputs: &[f64], outputs: &mut [f64]) -> Result<(), AcoError> {
        if inputs.len() != self.num_inputs {
            return Err(AcoError::InputSize {
                expected: self.num_inputs,
                got: inputs.len(),
            });
        }
        if outputs.len() != self.num_outputs {
            return Err(AcoError::InputSize {
                expected: self.num_outputs,
                got: outputs.len(),
            });
        }

        self.activations[..self.num_inputs].copy_from_slice(inputs);

        for idx in self.num_inputs..self.activations.len() {
            let mut sum = self.biases[idx];
            for e in self.csr_offsets[idx]..self.csr_offsets[idx + 1] {
                sum += self.activations[self.csr_sources[e]] * self.csr_weights[e];
            }
            self.activations[idx] = self.activation_fns[idx].apply(sum);
        }

        let first_output = self.activations.len() - self.num_outputs;
        outputs.copy_from_slice(&self.activations[first_output..]);
        Ok(())
    }

    /// Evaluate and return the outputs.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InputSize`] if `inputs` has the wrong length.
    pub fn evaluate(&mut self, inputs: &[f64]) -> Result<Vec<f64>, AcoError> {
        let mut outputs = vec![0.0; self.num_outputs];
        self.evaluate_into(inputs, &mut outputs)?;
        Ok(outputs)
    }

    /// Number of input neurons.
    #[must_use]
    pub const fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Number of output neurons.
    #[must_use]
    pub const fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}
