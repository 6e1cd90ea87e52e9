//! Single-colony ACO.
//!
//! A [`Colony`] owns one canonical network, its pheromone mirror and the ants
//! of the current iteration. One iteration is:
//!
//! 1. [`Colony::next_iteration`] re-seeds the retained best as ant 0 and walks
//!    the pheromone model for the rest.
//! 2. The caller sets fitness values ([`Colony::set_fitness`] or
//!    [`Colony::evaluate_with`]).
//! 3. [`Colony::update_solutions`] retains the best ant, writes it onto the
//!    canonical network, reinforces then decays the pheromone model, and grows
//!    the topology when the stagnation tracker fires.

use std::fmt;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AcoConfig, ColonyConfig};
use crate::error::AcoError;
use crate::expression::Formulas;
use crate::fitness::{evaluate_ants, Fitness};
use crate::growth::{GrowthReport, TopologyGrowth};
use crate::network::NetworkGraph;
use crate::observe::{IterationSummary, NullSink, StateEvent, StatePayload, StateSink};
use crate::pheromone::PheromoneModel;
use crate::stagnation::StagnationTracker;
use crate::walk::{Ant, AntId, Solution};

/// Identity of a colony within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColonyId(pub u64);

impl fmt::Display for ColonyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "colony {}", self.0)
    }
}

/// Hands out colony ids. Owned by whoever constructs colonies.
#[derive(Debug, Clone, Default)]
pub struct ColonyIds {
    next: u64,
}

impl ColonyIds {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// The next unused id.
    pub fn next_id(&mut self) -> ColonyId {
        let id = ColonyId(self.next);
        self.next += 1;
        id
    }
}

/// Lifecycle state of a colony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColonyState {
    /// Ready for `next_iteration`.
    Idle,
    /// Sampling ants.
    Generating,
    /// Ants are out for external evaluation.
    Evaluating,
    /// Updating the retained best and the pheromone model.
    Reinforcing,
    /// Growing the topology after stagnation.
    Mutating,
}

impl fmt::Display for ColonyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Evaluating => "evaluating",
            Self::Reinforcing => "reinforcing",
            Self::Mutating => "mutating",
        };
        f.write_str(name)
    }
}

/// The best solution seen in the most recent iteration.
#[derive(Debug, Clone)]
pub struct RetainedBest {
    pub solution: Solution,
    pub fitness: f64,
}

/// One self-contained ACO search unit.
pub struct Colony {
    id: ColonyId,
    config: ColonyConfig,
    formulas: Arc<Formulas>,
    network: NetworkGraph,
    pheromone: PheromoneModel,
    growth: TopologyGrowth,
    ants: Vec<Ant>,
    best: Option<RetainedBest>,
    stagnation: StagnationTracker,
    state: ColonyState,
    iteration: u64,
    rng: ChaCha8Rng,
    sink: Arc<dyn StateSink>,
}

impl fmt::Debug for Colony {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Colony")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("iteration", &self.iteration)
            .field("depth", &self.network.depth())
            .field("best_fitness", &self.best_fitness())
            .finish_non_exhaustive()
    }
}

impl Colony {
    /// Validate `config` and build a colony around a random network.
    ///
    /// The colony's random stream is seeded with `colony.seed + id`.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::Config`] if `config` does not validate.
    pub fn new(id: ColonyId, config: &AcoConfig) -> Result<Self, AcoError> {
        let formulas = Arc::new(config.validate()?);
        let mut rng = ChaCha8Rng::seed_from_u64(config.colony.seed.wrapping_add(id.0));
        let network = NetworkGraph::build_random(config.network.clone(), &mut rng);
        let pheromone =
            PheromoneModel::from_network(&network, Arc::clone(&formulas), config.colony.initial_strength);
        Ok(Self {
            id,
            config: config.colony.clone(),
            growth: TopologyGrowth::new(Arc::clone(&formulas), &config.growth),
            formulas,
            network,
            pheromone,
            ants: Vec::with_capacity(config.colony.ant_count),
            best: None,
            stagnation: StagnationTracker::new(
                config.colony.stagnation_window,
                config.colony.stagnation_threshold,
            ),
            state: ColonyState::Idle,
            iteration: 0,
            rng,
            sink: Arc::new(NullSink),
        })
    }

    /// Publish state events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sink = sink;
        self
    }

    pub(crate) fn set_sink(&mut self, sink: Arc<dyn StateSink>) {
        self.sink = sink;
    }

    #[must_use]
    pub const fn id(&self) -> ColonyId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> ColonyState {
        self.state
    }

    /// Number of iterations started so far.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The canonical network, carrying the retained best solution.
    #[must_use]
    pub const fn network(&self) -> &NetworkGraph {
        &self.network
    }

    #[must_use]
    pub const fn pheromone(&self) -> &PheromoneModel {
        &self.pheromone
    }

    /// Ants of the current iteration.
    #[must_use]
    pub fn ants(&self) -> &[Ant] {
        &self.ants
    }

    #[must_use]
    pub const fn best(&self) -> Option<&RetainedBest> {
        self.best.as_ref()
    }

    #[must_use]
    pub fn best_fitness(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.fitness)
    }

    fn invalid_state(&self, operation: &'static str) -> AcoError {
        AcoError::InvalidState {
            owner: self.id.to_string(),
            operation,
            state: self.state.to_string(),
        }
    }

    fn publish(&self, payload: StatePayload) {
        self.sink.publish(StateEvent {
            owner: self.id.to_string(),
            iteration: self.iteration,
            payload,
        });
    }

    /// Start an iteration and return its candidate ants.
    ///
    /// Ant 0 is the retained best solution when there is one; every other ant
    /// is sampled from the pheromone model.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidState`] unless the colony is idle, and
    /// [`AcoError::EmptyIteration`] if no ant could be generated.
    pub fn next_iteration(&mut self) -> Result<&[Ant], AcoError> {
        if self.state != ColonyState::Idle {
            return Err(self.invalid_state("next_iteration"));
        }
        self.state = ColonyState::Generating;
        self.iteration += 1;
        if let Err(e) = self.generate_ants() {
            self.state = ColonyState::Idle;
            return Err(e);
        }
        self.state = ColonyState::Evaluating;
        Ok(&self.ants)
    }

    fn generate_ants(&mut self) -> Result<(), AcoError> {
        self.ants.clear();
        let iteration = self.iteration;
        let id = |index| AntId { iteration, index };
        if let Some(best) = &self.best {
            if self.config.ant_count > 0 {
                self.ants
                    .push(Ant::new(id(0), best.solution.clone(), &self.network)?);
            }
        }
        while self.ants.len() < self.config.ant_count {
            let solution = Solution::generate(&self.pheromone, &self.network, &mut self.rng);
            let ant = Ant::new(id(self.ants.len()), solution, &self.network)?;
            self.ants.push(ant);
        }

        if self.ants.is_empty() {
            return Err(AcoError::EmptyIteration {
                owner: self.id.to_string(),
                iteration,
            });
        }
        Ok(())
    }

    /// Record the fitness of one ant of the current iteration.
    ///
    /// Updates for another iteration, an unknown slot, or a `NaN` value are
    /// logged and discarded; returns whether the value was stored.
    pub fn set_fitness(&mut self, ant: AntId, fitness: f64) -> bool {
        if self.state != ColonyState::Evaluating || ant.iteration != self.iteration {
            warn!(colony = self.id.0, %ant, current = self.iteration, state = %self.state, "fitness for stale ant discarded");
            return false;
        }
        if fitness.is_nan() {
            warn!(colony = self.id.0, %ant, "NaN fitness discarded");
            return false;
        }
        match self.ants.get_mut(ant.index) {
            Some(slot) => {
                slot.fitness = Some(fitness);
                true
            }
            None => {
                warn!(colony = self.id.0, %ant, ants = self.ants.len(), "fitness for unknown ant discarded");
                false
            }
        }
    }

    /// Evaluate every ant of the current iteration with `fitness`, in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidState`] unless ants are out for evaluation.
    pub fn evaluate_with<F: Fitness + ?Sized>(&mut self, fitness: &F) -> Result<(), AcoError> {
        if self.state != ColonyState::Evaluating {
            return Err(self.invalid_state("evaluate_with"));
        }
        evaluate_ants(fitness, &mut self.ants);
        Ok(())
    }

    /// Finish the iteration: retain the best ant, reinforce and decay the
    /// pheromone model, and grow on stagnation.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidState`] unless ants are out for evaluation,
    /// [`AcoError::NoEvaluatedSolutions`] if no ant carries a fitness, and any
    /// structural error from growth.
    pub fn update_solutions(&mut self) -> Result<IterationSummary, AcoError> {
        if self.state != ColonyState::Evaluating {
            return Err(self.invalid_state("update_solutions"));
        }
        let best_index = self
            .ants
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.fitness.map(|f| (i, f)))
            .fold(None, |best: Option<(usize, f64)>, (i, f)| match best {
                Some((_, b)) if b >= f => best,
                _ => Some((i, f)),
            });
        let Some((best_index, best_fitness)) = best_index else {
            return Err(AcoError::NoEvaluatedSolutions {
                owner: self.id.to_string(),
                iteration: self.iteration,
            });
        };
        self.state = ColonyState::Reinforcing;
        let summary = self.reinforce(best_index, best_fitness);
        // A failed iteration is spent; the colony can start the next one.
        self.state = ColonyState::Idle;
        summary
    }

    fn reinforce(&mut self, best_index: usize, best_fitness: f64) -> Result<IterationSummary, AcoError> {
        let solution = self.ants[best_index].solution.clone();
        solution.apply_to(&mut self.network)?;
        self.pheromone
            .reinforce(&self.network, &solution, best_fitness, &mut self.rng)?;
        self.pheromone.decay(self.network.depth(), &mut self.rng);
        self.best = Some(RetainedBest {
            solution,
            fitness: best_fitness,
        });

        let mut summary = IterationSummary::from_fitness(self.ants.iter().filter_map(|a| a.fitness));
        if self.stagnation.push(best_fitness) {
            self.state = ColonyState::Mutating;
            let report = self.grow()?;
            self.stagnation.reset();
            self.publish(StatePayload::Growth(report));
            summary.grew = true;
        }
        summary.depth = self.network.depth();
        summary.connections = self.network.connections.len();

        debug!(
            colony = self.id.0,
            iteration = self.iteration,
            best = best_fitness,
            mean = summary.mean,
            depth = summary.depth,
            "iteration complete"
        );
        self.publish(StatePayload::Iteration(summary.clone()));
        self.publish(StatePayload::Pheromone(self.pheromone.snapshot()));
        Ok(summary)
    }

    /// One growth pass on the canonical network and its mirror. The retained
    /// best is re-captured so elitism survives the change of shape.
    fn grow(&mut self) -> Result<GrowthReport, AcoError> {
        let report = self
            .growth
            .grow(&mut self.network, &mut self.pheromone, self.iteration, &mut self.rng)?;
        if let Some(best) = &mut self.best {
            best.solution = Solution::capture(&self.network);
        }
        info!(colony = self.id.0, iteration = self.iteration, depth = report.depth, "colony grew after stagnation");
        Ok(report)
    }

    /// Run one full iteration with `fitness`.
    ///
    /// # Errors
    ///
    /// Any error of [`next_iteration`](Self::next_iteration),
    /// [`evaluate_with`](Self::evaluate_with) or
    /// [`update_solutions`](Self::update_solutions).
    pub fn step<F: Fitness + ?Sized>(&mut self, fitness: &F) -> Result<IterationSummary, AcoError> {
        self.next_iteration()?;
        self.evaluate_with(fitness)?;
        self.update_solutions()
    }

    /// Restart from a copy of `donor`'s network.
    ///
    /// Builds a fresh pheromone model for the copy, grows it once so the two
    /// colonies diverge, and forgets the retained best and the current ants.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidState`] unless this colony is idle, and any
    /// structural error from growth.
    pub fn take_solution_of(&mut self, donor: &Self) -> Result<GrowthReport, AcoError> {
        if self.state != ColonyState::Idle {
            return Err(self.invalid_state("take_solution_of"));
        }
        self.network = donor.network.clone();
        self.pheromone = PheromoneModel::from_network(
            &self.network,
            Arc::clone(&self.formulas),
            self.config.initial_strength,
        );
        self.best = None;
        self.ants.clear();
        self.stagnation.reset();

        self.state = ColonyState::Mutating;
        let report = self
            .growth
            .grow(&mut self.network, &mut self.pheromone, self.iteration, &mut self.rng);
        self.state = ColonyState::Idle;
        let report = report?;
        info!(colony = self.id.0, donor = donor.id.0, depth = report.depth, "took solution of donor colony");
        self.publish(StatePayload::Growth(report.clone()));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::FitnessError;
    use crate::observe::ChannelSink;

    fn config() -> AcoConfig {
        AcoConfig::minimal(2, 1)
    }

    /// Rewards outputs close to 1 on a fixed input.
    fn target(network: &NetworkGraph) -> Result<f64, FitnessError> {
        let out = network.process(&[1.0, 0.0])?[0];
        Ok(1.0 - (1.0 - out).abs())
    }

    #[test]
    fn test_iteration_lifecycle() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        assert_eq!(colony.state(), ColonyState::Idle);

        let ants = colony.next_iteration().unwrap();
        assert_eq!(ants.len(), 8);
        assert_eq!(colony.state(), ColonyState::Evaluating);
        assert!(colony.next_iteration().is_err());

        colony.evaluate_with(&target).unwrap();
        let summary = colony.update_solutions().unwrap();
        assert_eq!(summary.evaluated, 8);
        assert_eq!(colony.state(), ColonyState::Idle);
        assert!(colony.best_fitness().is_some());
    }

    #[test]
    fn test_update_before_generation_is_invalid() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        assert!(matches!(
            colony.update_solutions(),
            Err(AcoError::InvalidState {
                operation: "update_solutions",
                ..
            })
        ));
    }

    #[test]
    fn test_no_fitness_is_fatal() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        colony.next_iteration().unwrap();
        assert!(matches!(
            colony.update_solutions(),
            Err(AcoError::NoEvaluatedSolutions { .. })
        ));
    }

    #[test]
    fn test_elitist_ant_reseeded() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        colony.step(&target).unwrap();
        let retained = colony.best().unwrap().solution.clone();
        let ants = colony.next_iteration().unwrap();
        assert_eq!(ants[0].solution, retained);
    }

    #[test]
    fn test_best_written_to_canonical_network() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        colony.next_iteration().unwrap();
        for (index, fitness) in [0.1, 0.9, 0.4].into_iter().enumerate() {
            assert!(colony.set_fitness(AntId { iteration: 1, index }, fitness));
        }
        let chosen = colony.ants()[1].solution.clone();
        colony.update_solutions().unwrap();
        assert_eq!(Solution::capture(colony.network()), chosen);
        assert_eq!(colony.best_fitness(), Some(0.9));
    }

    #[test]
    fn test_stale_fitness_rejected() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        colony.next_iteration().unwrap();
        assert!(!colony.set_fitness(AntId { iteration: 0, index: 0 }, 1.0));
        assert!(!colony.set_fitness(AntId { iteration: 1, index: 99 }, 1.0));
        assert!(!colony.set_fitness(AntId { iteration: 1, index: 0 }, f64::NAN));
        assert!(colony.ants().iter().all(|a| a.fitness.is_none()));
    }

    #[test]
    fn test_stagnation_triggers_growth() {
        let mut cfg = config();
        cfg.colony.stagnation_window = 3;
        cfg.colony.stagnation_threshold = 0.5;
        let (sink, events) = ChannelSink::bounded(64);
        let mut colony = Colony::new(ColonyId(0), &cfg).unwrap().with_sink(Arc::new(sink));
        let constant = |_: &NetworkGraph| -> Result<f64, FitnessError> { Ok(1.0) };

        let connections = colony.network().connections.len();
        let grew: Vec<bool> = (0..3).map(|_| colony.step(&constant).unwrap().grew).collect();
        assert_eq!(grew, vec![false, false, true]);
        assert!(colony.network().connections.len() > connections || colony.network().depth() > 2);
        colony.pheromone().verify_shape(colony.network()).unwrap();
        assert!(events
            .try_iter()
            .any(|e| matches!(e.payload, StatePayload::Growth(_))));

        // Elitism keeps working on the grown network.
        let ants = colony.next_iteration().unwrap().to_vec();
        assert_eq!(ants[0].solution, colony.best().unwrap().solution);
    }

    #[test]
    fn test_take_solution_of_copies_and_diverges() {
        let mut ids = ColonyIds::new();
        let mut donor = Colony::new(ids.next_id(), &config()).unwrap();
        let mut taker = Colony::new(ids.next_id(), &config()).unwrap();
        assert_eq!(taker.id(), ColonyId(1));
        donor.step(&target).unwrap();
        taker.step(&target).unwrap();

        taker.take_solution_of(&donor).unwrap();
        assert!(taker.best().is_none());
        assert!(taker.ants().is_empty());
        taker.pheromone().verify_shape(taker.network()).unwrap();
        assert!(taker.network().compatibility_distance(donor.network()) > 0.0);
        taker.step(&target).unwrap();
    }

    #[test]
    fn test_failed_update_returns_to_idle() {
        let mut colony = Colony::new(ColonyId(0), &config()).unwrap();
        let mut grown = colony.network().clone();
        let conn = grown.connections.keys().next().unwrap();
        grown.split_connection(conn).unwrap();

        colony.next_iteration().unwrap();
        colony.ants[0].solution = Solution::capture(&grown);
        assert!(colony.set_fitness(AntId { iteration: 1, index: 0 }, 1.0));
        assert!(matches!(
            colony.update_solutions(),
            Err(AcoError::ShapeMismatch(_))
        ));
        assert_eq!(colony.state(), ColonyState::Idle);
        assert!(colony.best().is_none());

        colony.step(&target).unwrap();
        assert_eq!(colony.iteration(), 2);
    }

    #[test]
    fn test_zero_ant_count_rejected_at_construction() {
        let mut cfg = config();
        cfg.colony.ant_count = 0;
        assert!(matches!(
            Colony::new(ColonyId(0), &cfg),
            Err(AcoError::Config(_))
        ));
    }
}
