//! Error types shared across the engine.
//!
//! Configuration problems are reported once, at construction. Everything else in
//! [`AcoError`] signals a broken invariant and aborts the run; recoverable
//! conditions (rejected fitness updates, failing fitness functions) are logged
//! where they happen and never surface here.

use thiserror::Error;

use crate::expression::ExpressionError;

/// Fatal errors raised by colonies, populations and the network graph.
#[derive(Debug, Error)]
pub enum AcoError {
    /// Invalid configuration detected at construction time.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An iteration produced no candidate solutions.
    #[error("{owner} produced no candidate solutions in iteration {iteration}")]
    EmptyIteration {
        /// Human readable owner, e.g. `colony 3`.
        owner: String,
        /// Iteration counter at the time of failure.
        iteration: u64,
    },

    /// Reinforcement was requested but no candidate carries a fitness value.
    #[error("{owner} has no evaluated solutions in iteration {iteration}")]
    NoEvaluatedSolutions {
        /// Human readable owner, e.g. `colony 3`.
        owner: String,
        /// Iteration counter at the time of failure.
        iteration: u64,
    },

    /// The pheromone mirror and the network graph no longer have the same shape.
    #[error("pheromone model out of sync with network: {0}")]
    ShapeMismatch(String),

    /// A structural mutation was requested that the graph cannot perform.
    #[error("invalid structural mutation: {0}")]
    InvalidMutation(String),

    /// `process` was called with the wrong number of inputs.
    #[error("input length mismatch: expected {expected}, got {got}")]
    InputSize {
        /// Number of input neurons.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },

    /// A lifecycle operation was called out of order.
    #[error("{operation} called while {owner} is {state}")]
    InvalidState {
        /// Human readable owner.
        owner: String,
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the owner was in.
        state: String,
    },

    /// No growth operator could be applied to the network.
    #[error("no topology growth operator applies to this network")]
    GrowthExhausted,
}

/// Configuration errors, reported at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A formula failed to parse or referenced a variable it may not use.
    #[error("formula `{formula}`: {source}")]
    Formula {
        /// Name of the formula slot.
        formula: &'static str,
        /// Underlying parse/validation failure.
        #[source]
        source: ExpressionError,
    },

    /// A numeric setting is outside its allowed range.
    #[error("`{key}` = {value} is out of bounds: {reason}")]
    OutOfBounds {
        /// Configuration key.
        key: &'static str,
        /// Offending value.
        value: f64,
        /// What the bound is.
        reason: &'static str,
    },

    /// The configuration text could not be decoded.
    #[error("malformed configuration: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub(crate) fn out_of_bounds(key: &'static str, value: f64, reason: &'static str) -> Self {
        Self::OutOfBounds { key, value, reason }
    }
}
