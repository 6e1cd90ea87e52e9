//! Population-based ACO (PACO).
//!
//! Instead of a stored, decaying pheromone model, a [`Population`] keeps a
//! bounded set of evaluated solutions and derives per-site sampling statistics
//! from them. Sites are keyed by innovation numbers, so statistics gathered on
//! members of an older shape still apply after the template network grows.
//! Forgetting happens as members are replaced.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::colony::ColonyState;
use crate::config::{AcoConfig, PolicyKind, PopulationConfig};
use crate::error::AcoError;
use crate::expression::{Bindings, FormulaId, Formulas, Variable};
use crate::fitness::{evaluate_ants, Fitness};
use crate::growth::{pick_weighted, TopologyGrowth};
use crate::network::{ConnectionId, NetworkGraph, NeuronId, NeuronKind};
use crate::observe::{
    IterationSummary, NullSink, PopulationSnapshot, StateEvent, StatePayload, StateSink,
};
use crate::pheromone::{gaussian, PheromoneSource};
use crate::stagnation::StagnationTracker;
use crate::walk::{Ant, AntId, Solution};

/// A structural site: a neuron's bias or the weight between two neurons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteKey {
    Bias(u64),
    Weight(u64, u64),
}

/// Running count, mean and variance of the values observed at one site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SiteStatistics {
    pub count: usize,
    pub mean: f64,
    m2: f64,
}

impl SiteStatistics {
    /// Welford update.
    #[allow(clippy::cast_precision_loss)]
    fn observe(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Population variance of the observations.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

fn site_values(network: &NetworkGraph) -> HashMap<SiteKey, f64> {
    let biases = network
        .biases_by_innovation()
        .into_iter()
        .map(|(n, b)| (SiteKey::Bias(n), b));
    let weights = network
        .weights_by_innovation()
        .into_iter()
        .map(|((from, to), w)| (SiteKey::Weight(from, to), w));
    biases.chain(weights).collect()
}

/// A retained solution.
#[derive(Debug, Clone)]
pub struct Member {
    /// Admission order, unique within a population.
    pub sequence: u64,
    pub network: NetworkGraph,
    pub fitness: f64,
    /// Population iteration at admission.
    pub admitted: u64,
    /// Provenance group, e.g. the producing colony.
    pub group: u64,
    values: HashMap<SiteKey, f64>,
}

impl Member {
    /// Iterations since admission.
    #[must_use]
    pub const fn age(&self, iteration: u64) -> u64 {
        iteration.saturating_sub(self.admitted)
    }

    /// Value this member holds at `site`.
    #[must_use]
    pub fn value(&self, site: SiteKey) -> Option<f64> {
        self.values.get(&site).copied()
    }

    /// Write this member's values onto every matching site of `graph`.
    /// Returns how many sites were written.
    pub fn write_onto(&self, graph: &mut NetworkGraph) -> usize {
        let mut written = 0;
        let neurons: Vec<NeuronId> = graph.neurons.keys().collect();
        for id in neurons {
            if let Some(bias) = self.value(SiteKey::Bias(graph.neurons[id].innovation)) {
                written += usize::from(graph.set_bias(id, bias));
            }
        }
        let connections: Vec<ConnectionId> = graph.connections.keys().collect();
        for id in connections {
            let c = &graph.connections[id];
            let key = SiteKey::Weight(graph.neurons[c.from].innovation, graph.neurons[c.to].innovation);
            if let Some(weight) = self.value(key) {
                graph.connections[id].weight = weight;
                written += 1;
            }
        }
        written
    }
}

/// An evaluated solution offered to the population.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub network: NetworkGraph,
    pub fitness: f64,
    pub group: u64,
}

impl Candidate {
    #[must_use]
    pub fn new(network: NetworkGraph, fitness: f64) -> Self {
        Self {
            network,
            fitness,
            group: 0,
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: u64) -> Self {
        self.group = group;
        self
    }
}

/// Result of one admission round.
#[derive(Debug, Clone, Default)]
pub struct AcceptOutcome {
    /// Sequence numbers of admitted members.
    pub admitted: Vec<u64>,
    pub evicted: Vec<Member>,
}

/// A bounded set of evaluated solutions with a replacement policy.
#[derive(Debug, Clone)]
pub struct Population {
    config: PopulationConfig,
    formulas: Arc<Formulas>,
    members: Vec<Member>,
    global_best: Option<Member>,
    previous_bests: HashSet<u64>,
    statistics: HashMap<SiteKey, SiteStatistics>,
    stale: bool,
    iteration: u64,
    next_sequence: u64,
    rng: ChaCha8Rng,
}

impl Population {
    #[must_use]
    pub fn new(config: &PopulationConfig, formulas: Arc<Formulas>) -> Self {
        Self {
            config: config.clone(),
            formulas,
            members: Vec::with_capacity(config.capacity + config.update_quota),
            global_best: None,
            previous_bests: HashSet::new(),
            statistics: HashMap::new(),
            stale: false,
            iteration: 0,
            next_sequence: 0,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        }
    }

    /// The retained solutions.
    #[must_use]
    pub fn get_current_solutions(&self) -> &[Member] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of admission rounds so far.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Best solution ever admitted, even if since evicted.
    #[must_use]
    pub const fn global_best(&self) -> Option<&Member> {
        self.global_best.as_ref()
    }

    /// Statistics of `site` as of the last [`update_pheromone`](Self::update_pheromone).
    #[must_use]
    pub fn statistics(&self, site: SiteKey) -> Option<&SiteStatistics> {
        self.statistics.get(&site)
    }

    /// Offer this iteration's candidates.
    ///
    /// Below capacity, up to the free room is admitted; at capacity,
    /// `update_quota` candidates are. Candidates are taken best first, and the
    /// active policy evicts until the population fits its capacity again.
    pub fn accept_ants_of_this_iteration(&mut self, mut candidates: Vec<Candidate>) -> AcceptOutcome {
        self.iteration += 1;
        for c in &mut candidates {
            if c.fitness.is_nan() {
                c.fitness = f64::NEG_INFINITY;
            }
        }
        candidates.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        let room = self.config.capacity.saturating_sub(self.members.len());
        let quota = if room > 0 { room } else { self.config.update_quota };
        let mut outcome = AcceptOutcome::default();

        if self.config.policy == PolicyKind::Fitness {
            self.accept_by_fitness(candidates, quota, &mut outcome);
        } else {
            for candidate in candidates.into_iter().take(quota) {
                outcome.admitted.push(self.admit(candidate));
            }
            if self.config.policy == PolicyKind::AgeProbability {
                self.retire_previous_bests(&mut outcome);
            }
            while self.members.len() > self.config.capacity {
                let victim = self.select_victim();
                outcome.evicted.push(self.members.remove(victim));
            }
        }

        let present: HashSet<u64> = self.members.iter().map(|m| m.sequence).collect();
        self.previous_bests.retain(|s| present.contains(s));
        if !outcome.admitted.is_empty() || !outcome.evicted.is_empty() {
            self.stale = true;
        }
        debug!(
            iteration = self.iteration,
            admitted = outcome.admitted.len(),
            evicted = outcome.evicted.len(),
            size = self.members.len(),
            "population updated"
        );
        outcome
    }

    fn admit(&mut self, candidate: Candidate) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let member = Member {
            sequence,
            values: site_values(&candidate.network),
            network: candidate.network,
            fitness: candidate.fitness,
            admitted: self.iteration,
            group: candidate.group,
        };
        if self
            .global_best
            .as_ref()
            .map_or(true, |best| member.fitness > best.fitness)
        {
            if let Some(old) = self.global_best.replace(member.clone()) {
                self.previous_bests.insert(old.sequence);
            }
        }
        self.members.push(member);
        sequence
    }

    fn accept_by_fitness(&mut self, candidates: Vec<Candidate>, quota: usize, outcome: &mut AcceptOutcome) {
        for candidate in candidates.into_iter().take(quota) {
            if self.members.len() >= self.config.capacity {
                let Some(worst) = self.worst_of(0..self.members.len()) else {
                    break;
                };
                if candidate.fitness <= self.members[worst].fitness {
                    // Candidates are sorted, so no later one can do better.
                    break;
                }
                outcome.evicted.push(self.members.remove(worst));
            }
            outcome.admitted.push(self.admit(candidate));
        }
    }

    /// Lowest fitness among `indices`, oldest first on ties.
    fn worst_of(&self, indices: impl IntoIterator<Item = usize>) -> Option<usize> {
        indices.into_iter().min_by(|&a, &b| {
            let (ma, mb) = (&self.members[a], &self.members[b]);
            ma.fitness
                .total_cmp(&mb.fitness)
                .then(ma.sequence.cmp(&mb.sequence))
        })
    }

    fn is_global_best(&self, member: &Member) -> bool {
        self.global_best
            .as_ref()
            .is_some_and(|best| best.sequence == member.sequence)
    }

    /// Evict former global bests that are past `max_age` and strictly beaten.
    fn retire_previous_bests(&mut self, outcome: &mut AcceptOutcome) {
        let Some(best_fitness) = self.global_best.as_ref().map(|b| b.fitness) else {
            return;
        };
        let mut i = 0;
        while i < self.members.len() {
            let member = &self.members[i];
            if self.previous_bests.contains(&member.sequence)
                && member.age(self.iteration) > self.config.max_age
                && best_fitness > member.fitness
            {
                debug!(sequence = member.sequence, "retiring previous global best");
                outcome.evicted.push(self.members.remove(i));
            } else {
                i += 1;
            }
        }
    }

    fn select_victim(&mut self) -> usize {
        let victim = match self.config.policy {
            PolicyKind::Age => self.oldest_unprotected(),
            PolicyKind::Fitness => self.worst_of(0..self.members.len()),
            PolicyKind::Probability | PolicyKind::AgeProbability => self.weighted_victim(),
            PolicyKind::Similarity => self.least_novel(),
            PolicyKind::Group => self.weakest_group_member(),
        };
        victim.unwrap_or(0)
    }

    fn oldest_unprotected(&self) -> Option<usize> {
        let protected = |m: &Member| {
            self.config.protect_global_best
                && self.is_global_best(m)
                && m.age(self.iteration) < self.config.max_age
        };
        let by_age = |&a: &usize, &b: &usize| self.members[a].sequence.cmp(&self.members[b].sequence);
        (0..self.members.len())
            .filter(|&i| !protected(&self.members[i]))
            .min_by(by_age)
            .or_else(|| (0..self.members.len()).min_by(by_age))
    }

    /// Weighted random choice: weight grows with fitness rank from the top and with age.
    #[allow(clippy::cast_precision_loss)]
    fn weighted_victim(&mut self) -> Option<usize> {
        let mut ranked: Vec<usize> = (0..self.members.len()).collect();
        ranked.sort_by(|&a, &b| self.members[b].fitness.total_cmp(&self.members[a].fitness));
        let mut weights = vec![0.0; self.members.len()];
        let max_age = self.config.max_age as f64;
        for (rank, &i) in ranked.iter().enumerate() {
            let age = self.members[i].age(self.iteration) as f64;
            weights[i] = (rank + 1) as f64 * (1.0 + age / max_age);
        }
        pick_weighted(&weights, &mut self.rng)
    }

    /// Within the densest cluster of structurally similar members, the weakest.
    ///
    /// Young members without a close neighbor are novel topologies and are
    /// spared while any other choice exists.
    fn least_novel(&self) -> Option<usize> {
        let n = self.members.len();
        let nearest: Vec<f64> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| j != i)
                    .map(|j| self.members[i].network.compatibility_distance(&self.members[j].network))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let threshold = self.config.similarity_threshold;
        let protected = |i: usize| {
            self.members[i].age(self.iteration) < self.config.innovation_protection
                && nearest[i] >= threshold
        };

        let cluster: Vec<usize> = (0..n)
            .filter(|&i| nearest[i] < threshold && !protected(i))
            .collect();
        if !cluster.is_empty() {
            return self.worst_of(cluster);
        }
        let unprotected: Vec<usize> = (0..n).filter(|&i| !protected(i)).collect();
        if unprotected.is_empty() {
            self.worst_of(0..n)
        } else {
            self.worst_of(unprotected)
        }
    }

    /// Worst member of the group whose best member is weakest.
    fn weakest_group_member(&self) -> Option<usize> {
        let mut strength: BTreeMap<u64, f64> = BTreeMap::new();
        for m in &self.members {
            let entry = strength.entry(m.group).or_insert(f64::NEG_INFINITY);
            *entry = entry.max(m.fitness);
        }
        let weakest = strength
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(&group, _)| group)?;
        self.worst_of((0..self.members.len()).filter(|&i| self.members[i].group == weakest))
    }

    /// Recompute per-site statistics from the current members. Does nothing if
    /// the membership has not changed since the last call.
    pub fn update_pheromone(&mut self) {
        if !self.stale {
            return;
        }
        self.statistics.clear();
        for member in &self.members {
            for (&site, &value) in &member.values {
                self.statistics.entry(site).or_default().observe(value);
            }
        }
        self.stale = false;
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_site<R: Rng>(
        &self,
        site: SiteKey,
        current: f64,
        layer: usize,
        graph: &NetworkGraph,
        rng: &mut R,
    ) -> f64 {
        let limit = graph.config.value_limit;
        let value = match self.statistics.get(&site) {
            Some(stats) if stats.count > 0 => {
                let bindings = Bindings::new()
                    .with(Variable::Deviation, stats.std_dev())
                    .with(Variable::Observed, stats.count as f64)
                    .with(Variable::PopulationSize, self.members.len().max(1) as f64)
                    .with(Variable::Layer, layer as f64)
                    .with(Variable::Depth, graph.depth() as f64);
                let deviation = self
                    .formulas
                    .evaluate_with(FormulaId::PopulationDeviation, bindings, rng)
                    .map_or(stats.std_dev(), |d| d.max(0.0));
                gaussian(stats.mean, deviation, rng)
            }
            _ => gaussian(current, self.config.neutral_deviation, rng),
        };
        value.clamp(-limit, limit)
    }

    /// Summary of the current composition.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> PopulationSnapshot {
        let mut groups: BTreeMap<u64, usize> = BTreeMap::new();
        for m in &self.members {
            *groups.entry(m.group).or_default() += 1;
        }
        let finite: Vec<f64> = self
            .members
            .iter()
            .map(|m| m.fitness)
            .filter(|f| f.is_finite())
            .collect();
        let mean_fitness = if finite.is_empty() {
            f64::NAN
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        PopulationSnapshot {
            size: self.members.len(),
            capacity: self.config.capacity,
            global_best: self.global_best.as_ref().map(|b| b.fitness),
            mean_fitness,
            worst_fitness: self
                .members
                .iter()
                .map(|m| m.fitness)
                .reduce(f64::min)
                .unwrap_or(f64::NAN),
            oldest_age: self
                .members
                .iter()
                .map(|m| m.age(self.iteration))
                .max()
                .unwrap_or(0),
            groups: groups.into_iter().collect(),
            observed_sites: self.statistics.len(),
        }
    }
}

impl PheromoneSource for Population {
    fn sample_bias<R: Rng>(&self, graph: &NetworkGraph, neuron: NeuronId, rng: &mut R) -> f64 {
        match graph.neurons.get(neuron) {
            Some(n) if n.kind != NeuronKind::Input => {
                self.sample_site(SiteKey::Bias(n.innovation), n.bias, n.position.layer, graph, rng)
            }
            _ => gaussian(0.0, self.config.neutral_deviation, rng),
        }
    }

    fn sample_weight<R: Rng>(
        &self,
        graph: &NetworkGraph,
        connection: ConnectionId,
        rng: &mut R,
    ) -> f64 {
        let Some(c) = graph.connections.get(connection) else {
            return gaussian(0.0, self.config.neutral_deviation, rng);
        };
        let (from, to) = (&graph.neurons[c.from], &graph.neurons[c.to]);
        let site = SiteKey::Weight(from.innovation, to.innovation);
        self.sample_site(site, c.weight, from.position.layer, graph, rng)
    }
}

/// The PACO search loop: a template network sampled through a population.
pub struct PopulationSearch {
    config: PopulationConfig,
    template: NetworkGraph,
    population: Population,
    growth: TopologyGrowth,
    stagnation: StagnationTracker,
    ants: Vec<Ant>,
    state: ColonyState,
    iteration: u64,
    group: u64,
    rng: ChaCha8Rng,
    sink: Arc<dyn StateSink>,
}

impl fmt::Debug for PopulationSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulationSearch")
            .field("state", &self.state)
            .field("iteration", &self.iteration)
            .field("size", &self.population.len())
            .field("depth", &self.template.depth())
            .finish_non_exhaustive()
    }
}

const OWNER: &str = "population";

/// The template sampler's stream, kept apart from the population's eviction
/// stream for the same seed.
fn search_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15)
}

impl PopulationSearch {
    /// Validate `config` and start from a random template network.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::Config`] if `config` does not validate.
    pub fn new(config: &AcoConfig) -> Result<Self, AcoError> {
        let formulas = Arc::new(config.validate()?);
        let mut rng = search_rng(config.population.seed);
        let template = NetworkGraph::build_random(config.network.clone(), &mut rng);
        Ok(Self {
            config: config.population.clone(),
            template,
            population: Population::new(&config.population, Arc::clone(&formulas)),
            growth: TopologyGrowth::new(formulas, &config.growth),
            stagnation: StagnationTracker::new(
                config.population.stagnation_window,
                config.population.stagnation_threshold,
            ),
            ants: Vec::with_capacity(config.population.ants_per_iteration),
            state: ColonyState::Idle,
            iteration: 0,
            group: 0,
            rng,
            sink: Arc::new(NullSink),
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sink = sink;
        self
    }

    /// First provenance group; each iteration's ants form the next group.
    #[must_use]
    pub fn with_group(mut self, group: u64) -> Self {
        self.group = group;
        self
    }

    #[must_use]
    pub const fn template(&self) -> &NetworkGraph {
        &self.template
    }

    #[must_use]
    pub const fn population(&self) -> &Population {
        &self.population
    }

    #[must_use]
    pub fn ants(&self) -> &[Ant] {
        &self.ants
    }

    #[must_use]
    pub const fn state(&self) -> ColonyState {
        self.state
    }

    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Best solution ever admitted.
    #[must_use]
    pub const fn best(&self) -> Option<&Member> {
        self.population.global_best()
    }

    fn invalid_state(&self, operation: &'static str) -> AcoError {
        AcoError::InvalidState {
            owner: OWNER.to_string(),
            operation,
            state: self.state.to_string(),
        }
    }

    fn publish(&self, payload: StatePayload) {
        self.sink.publish(StateEvent {
            owner: OWNER.to_string(),
            iteration: self.iteration,
            payload,
        });
    }

    /// Sample this iteration's ants from the population statistics.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidState`] unless idle, and
    /// [`AcoError::EmptyIteration`] if no ant was generated.
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
        self.population.update_pheromone();
        for index in 0..self.config.ants_per_iteration {
            let solution = Solution::generate(&self.population, &self.template, &mut self.rng);
            let id = AntId {
                iteration: self.iteration,
                index,
            };
            self.ants.push(Ant::new(id, solution, &self.template)?);
        }
        if self.ants.is_empty() {
            return Err(AcoError::EmptyIteration {
                owner: OWNER.to_string(),
                iteration: self.iteration,
            });
        }
        Ok(())
    }

    /// Record the fitness of one ant of the current iteration; stale or unknown
    /// ids and `NaN` values are logged and discarded.
    pub fn set_fitness(&mut self, ant: AntId, fitness: f64) -> bool {
        if self.state != ColonyState::Evaluating || ant.iteration != self.iteration || fitness.is_nan() {
            warn!(%ant, current = self.iteration, fitness, "population fitness update discarded");
            return false;
        }
        match self.ants.get_mut(ant.index) {
            Some(slot) => {
                slot.fitness = Some(fitness);
                true
            }
            None => {
                warn!(%ant, ants = self.ants.len(), "fitness for unknown ant discarded");
                false
            }
        }
    }

    /// Evaluate every ant in parallel.
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

    /// Offer the evaluated ants to the population, refresh statistics, and grow
    /// the template on stagnation.
    ///
    /// # Errors
    ///
    /// Returns [`AcoError::InvalidState`] unless ants are out for evaluation,
    /// [`AcoError::NoEvaluatedSolutions`] if none carries a fitness, and any
    /// structural error from growth.
    pub fn update_solutions(&mut self) -> Result<IterationSummary, AcoError> {
        if self.state != ColonyState::Evaluating {
            return Err(self.invalid_state("update_solutions"));
        }
        let group = self.group.wrapping_add(self.iteration);
        let candidates: Vec<Candidate> = self
            .ants
            .iter()
            .filter_map(|a| {
                a.fitness
                    .map(|f| Candidate::new(a.network.clone(), f).with_group(group))
            })
            .collect();
        if candidates.is_empty() {
            return Err(AcoError::NoEvaluatedSolutions {
                owner: OWNER.to_string(),
                iteration: self.iteration,
            });
        }
        self.state = ColonyState::Reinforcing;
        let summary = self.admit(candidates);
        self.state = ColonyState::Idle;
        summary
    }

    fn admit(&mut self, candidates: Vec<Candidate>) -> Result<IterationSummary, AcoError> {
        let mut summary = IterationSummary::from_fitness(candidates.iter().map(|c| c.fitness));
        self.population.accept_ants_of_this_iteration(candidates);
        self.population.update_pheromone();
        if let Some(best) = self.population.global_best() {
            best.write_onto(&mut self.template);
        }

        if self.stagnation.push(summary.best) {
            self.state = ColonyState::Mutating;
            let report = self
                .growth
                .grow(&mut self.template, &mut (), self.iteration, &mut self.rng)?;
            self.stagnation.reset();
            info!(iteration = self.iteration, depth = report.depth, "population template grew after stagnation");
            self.publish(StatePayload::Growth(report));
            summary.grew = true;
        }
        summary.depth = self.template.depth();
        summary.connections = self.template.connections.len();

        debug!(
            iteration = self.iteration,
            best = summary.best,
            global_best = ?self.population.global_best().map(|m| m.fitness),
            "population iteration complete"
        );
        self.publish(StatePayload::Iteration(summary.clone()));
        self.publish(StatePayload::Population(self.population.snapshot()));
        Ok(summary)
    }

    /// Run one full iteration with `fitness`.
    ///
    /// # Errors
    ///
    /// Any error of the three lifecycle steps.
    pub fn step<F: Fitness + ?Sized>(&mut self, fitness: &F) -> Result<IterationSummary, AcoError> {
        self.next_iteration()?;
        self.evaluate_with(fitness)?;
        self.update_solutions()
    }
}
