//! Multi-colony ACO.
//!
//! Colonies share no mutable state, so one step runs every colony's iteration
//! in parallel. Every `transfer_interval` steps the weakest colony restarts from
//! the strongest colony's network.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use crate::colony::{Colony, ColonyIds};
use crate::config::AcoConfig;
use crate::error::AcoError;
use crate::fitness::Fitness;
use crate::growth::GrowthReport;
use crate::observe::{IterationSummary, StateSink};

/// A set of independent colonies with periodic redistribution.
#[derive(Debug)]
pub struct MultiColony {
    colonies: Vec<Colony>,
    ids: ColonyIds,
    transfer_interval: u64,
    steps: u64,
}

impl MultiColony {
    /// Build `count` colonies from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::Config`] if `config` does not validate, and
    /// [`AcoError::EmptyIteration`] if `count` is zero.
    pub fn new(config: &AcoConfig, count: usize) -> Result<Self, AcoError> {
        if count == 0 {
            return Err(AcoError::EmptyIteration {
                owner: "multi-colony".to_string(),
                iteration: 0,
            });
        }
        let mut ids = ColonyIds::new();
        let colonies = (0..count)
            .map(|_| Colony::new(ids.next_id(), config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            colonies,
            ids,
            transfer_interval: config.colony.transfer_interval,
            steps: 0,
        })
    }

    /// Publish every colony's state events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        for colony in &mut self.colonies {
            colony.set_sink(Arc::clone(&sink));
        }
        self
    }

    /// Add a colony built from `config` with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::Config`] if `config` does not validate.
    pub fn add_colony(&mut self, config: &AcoConfig) -> Result<&Colony, AcoError> {
        let colony = Colony::new(self.ids.next_id(), config)?;
        self.colonies.push(colony);
        Ok(&self.colonies[self.colonies.len() - 1])
    }

    #[must_use]
    pub fn colonies(&self) -> &[Colony] {
        &self.colonies
    }

    /// Number of completed steps.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// The colony with the highest retained fitness.
    #[must_use]
    pub fn best(&self) -> Option<&Colony> {
        self.ranked().map(|(best, _)| &self.colonies[best])
    }

    /// Indices of the strongest and weakest colonies, if they differ.
    fn ranked(&self) -> Option<(usize, usize)> {
        let fitness = |c: &Colony| c.best_fitness().unwrap_or(f64::NEG_INFINITY);
        let best = (0..self.colonies.len()).max_by(|&a, &b| {
            fitness(&self.colonies[a]).total_cmp(&fitness(&self.colonies[b]))
        })?;
        let worst = (0..self.colonies.len()).min_by(|&a, &b| {
            fitness(&self.colonies[a]).total_cmp(&fitness(&self.colonies[b]))
        })?;
        Some((best, worst))
    }

    /// Run one iteration of every colony in parallel, then redistribute if due.
    ///
    /// Returns the summaries in colony order.
    ///
    /// # Errors
    ///
    /// The first colony error aborts the step.
    pub fn step<F: Fitness + ?Sized>(&mut self, fitness: &F) -> Result<Vec<IterationSummary>, AcoError> {
        let summaries = self
            .colonies
            .par_iter_mut()
            .map(|colony| colony.step(fitness))
            .collect::<Result<Vec<_>, _>>()?;
        self.steps += 1;
        if self.transfer_interval > 0 && self.steps % self.transfer_interval == 0 {
            self.transfer()?;
        }
        Ok(summaries)
    }

    /// Restart the weakest colony from the strongest colony's network.
    ///
    /// Returns `None` when there is no distinct pair to transfer between.
    ///
    /// # Errors
    ///
    /// Any error of [`Colony::take_solution_of`].
    pub fn transfer(&mut self) -> Result<Option<GrowthReport>, AcoError> {
        let Some((best, worst)) = self.ranked() else {
            return Ok(None);
        };
        if best == worst {
            return Ok(None);
        }
        let (donor, taker) = if best < worst {
            let (left, right) = self.colonies.split_at_mut(worst);
            (&left[best], &mut right[0])
        } else {
            let (left, right) = self.colonies.split_at_mut(best);
            (&right[0], &mut left[worst])
        };
        info!(donor = donor.id().0, taker = taker.id().0, step = self.steps, "redistributing colonies");
        taker.take_solution_of(donor).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::FitnessError;
    use crate::network::NetworkGraph;

    fn distance_to_one(network: &NetworkGraph) -> Result<f64, FitnessError> {
        let out = network.process(&[0.5, 0.5])?[0];
        Ok(-(1.0 - out).abs())
    }

    #[test]
    fn test_step_runs_every_colony() {
        let mut multi = MultiColony::new(&AcoConfig::minimal(2, 1), 3).unwrap();
        let summaries = multi.step(&distance_to_one).unwrap();
        assert_eq!(summaries.len(), 3);
        assert!(multi.colonies().iter().all(|c| c.iteration() == 1));
        assert!(multi.best().is_some());
    }

    #[test]
    fn test_colonies_use_distinct_seeds() {
        let multi = MultiColony::new(&AcoConfig::minimal(2, 1), 2).unwrap();
        let [a, b] = multi.colonies() else {
            panic!("expected two colonies");
        };
        assert!(a.network().compatibility_distance(b.network()) > 0.0);
    }

    #[test]
    fn test_transfer_restarts_weakest() {
        let mut config = AcoConfig::minimal(2, 1);
        config.colony.transfer_interval = 2;
        let mut multi = MultiColony::new(&config, 2).unwrap();
        multi.step(&distance_to_one).unwrap();
        multi.step(&distance_to_one).unwrap();
        // The second step transferred: exactly one colony lost its retained best.
        let forgotten = multi
            .colonies()
            .iter()
            .filter(|c| c.best().is_none())
            .count();
        assert_eq!(forgotten, 1);
        for colony in multi.colonies() {
            colony.pheromone().verify_shape(colony.network()).unwrap();
        }
        multi.step(&distance_to_one).unwrap();
    }

    #[test]
    fn test_zero_colonies_rejected() {
        assert!(MultiColony::new(&AcoConfig::minimal(2, 1), 0).is_err());
    }

    #[test]
    fn test_add_colony_gets_fresh_id() {
        let mut multi = MultiColony::new(&AcoConfig::minimal(2, 1), 2).unwrap();
        let id = multi.add_colony(&AcoConfig::minimal(2, 1)).unwrap().id();
        assert_eq!(id.0, 2);
    }
}
