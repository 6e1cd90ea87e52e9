//! The external fitness evaluator.
//!
//! A failing or `NaN` evaluation scores negative infinity and is logged; it
//! never aborts an iteration.

use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::error::AcoError;
use crate::network::NetworkGraph;
use crate::walk::Ant;

/// Error returned by a fitness function.
#[derive(Debug, Error)]
pub enum FitnessError {
    #[error("network evaluation failed: {0}")]
    Network(#[from] AcoError),

    #[error("fitness evaluation failed: {0}")]
    Failed(String),
}

/// Scores a candidate network; larger is better.
pub trait Fitness: Sync {
    /// # Errors
    ///
    /// Any error makes the candidate score negative infinity.
    fn evaluate(&self, network: &NetworkGraph) -> Result<f64, FitnessError>;
}

impl<F> Fitness for F
where
    F: Fn(&NetworkGraph) -> Result<f64, FitnessError> + Sync,
{
    fn evaluate(&self, network: &NetworkGraph) -> Result<f64, FitnessError> {
        self(network)
    }
}

/// Evaluate `network`, mapping failures and `NaN` to negative infinity.
pub fn score<F: Fitness + ?Sized>(fitness: &F, network: &NetworkGraph) -> f64 {
    match fitness.evaluate(network) {
        Ok(value) if value.is_nan() => {
            warn!("fitness function returned NaN, scoring as -inf");
            f64::NEG_INFINITY
        }
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "fitness evaluation failed, scoring as -inf");
            f64::NEG_INFINITY
        }
    }
}

/// Score every ant in parallel.
pub fn evaluate_ants<F: Fitness + ?Sized>(fitness: &F, ants: &mut [Ant]) {
    ants.par_iter_mut().for_each(|ant| {
        ant.fitness = Some(score(fitness, &ant.network));
    });
}
