//! Configuration for networks, colonies, populations and growth.
//!
//! Every section has a `Default`, and missing keys in decoded configuration fall
//! back to it. [`AcoConfig::validate`] checks numeric bounds and compiles the
//! formula set so configuration mistakes are reported before the first iteration.

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::error::ConfigError;
use crate::expression::Formulas;

/// Shape and initialization of the network graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of input neurons.
    pub num_inputs: usize,
    /// Number of output neurons.
    pub num_outputs: usize,
    /// Activation of output neurons.
    pub output_activation: Activation,
    /// Activation of neurons created by `add_neuron`.
    pub hidden_activation: Activation,
    /// Activation of neurons created by `split_connection`.
    ///
    /// Only `Identity` makes a split exactly function preserving.
    pub split_activation: Activation,
    /// Initial weights and biases are uniform in `[-weight_range, weight_range]`.
    pub weight_range: f64,
    /// Sampled and reinforced values are clamped to `[-value_limit, value_limit]`.
    pub value_limit: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            num_inputs: 2,
            num_outputs: 1,
            output_activation: Activation::Sigmoid,
            hidden_activation: Activation::Tanh,
            split_activation: Activation::Identity,
            weight_range: 1.0,
            value_limit: 10.0,
        }
    }
}

/// Single-colony ACO settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    /// Ants generated per iteration, including the elitist re-seed.
    pub ant_count: usize,
    /// Number of trailing best-fitness observations the stagnation check looks at.
    pub stagnation_window: usize,
    /// Minimum relative improvement over the window that counts as progress.
    pub stagnation_threshold: f64,
    /// Strength given to freshly created pheromone entries.
    pub initial_strength: f64,
    /// Multi-colony only: iterations between redistribution steps (0 disables).
    pub transfer_interval: u64,
    /// Base seed; colony `n` uses `seed + n`.
    pub seed: u64,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            ant_count: 20,
            stagnation_window: 10,
            stagnation_threshold: 0.01,
            initial_strength: 0.0,
            transfer_interval: 25,
            seed: 42,
        }
    }
}

/// Replacement policy used by the PACO population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PolicyKind {
    /// FIFO eviction, optionally protecting the global best.
    #[default]
    Age,
    /// Admit only improvements over the worst member; evict the worst.
    Fitness,
    /// Weighted random eviction favoring weak and old members.
    Probability,
    /// Probability eviction plus retirement of stale previous global bests.
    AgeProbability,
    /// Evict the weaker of the most similar pair, protecting novel topologies.
    Similarity,
    /// Evict the worst member of the weakest provenance group.
    Group,
}

/// PACO population settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Maximum number of retained solutions.
    pub capacity: usize,
    /// Ants sampled per iteration.
    pub ants_per_iteration: usize,
    /// Candidates admitted per iteration once the population is full.
    pub update_quota: usize,
    /// Active replacement policy.
    pub policy: PolicyKind,
    /// Age (in iterations) after which the global best loses protection.
    pub max_age: u64,
    /// Whether the age policy protects the global best from eviction.
    pub protect_global_best: bool,
    /// Similarity policy: members closer than this are considered the same niche.
    pub similarity_threshold: f64,
    /// Similarity policy: members younger than this are protected while alternatives exist.
    pub innovation_protection: u64,
    /// Deviation used at positions with no observed values.
    pub neutral_deviation: f64,
    /// Iterations of stagnation tracking before growing the template network.
    pub stagnation_window: usize,
    /// Relative improvement threshold for the stagnation check.
    pub stagnation_threshold: f64,
    /// Seed of the population's random stream.
    pub seed: u64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            ants_per_iteration: 10,
            update_quota: 1,
            policy: PolicyKind::Age,
            max_age: 10,
            protect_global_best: true,
            similarity_threshold: 0.5,
            innovation_protection: 3,
            neutral_deviation: 1.0,
            stagnation_window: 20,
            stagnation_threshold: 0.01,
            seed: 7,
        }
    }
}

/// Topology growth settings that are not formulas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    /// Probability that a growth pass also prunes the weakest connection.
    pub prune_probability: f64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            prune_probability: 0.0,
        }
    }
}

/// Formula texts, one per [`FormulaId`](crate::expression::FormulaId) slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormulaConfig {
    /// Sampling deviation of a dissipative entry.
    pub deviation: String,
    /// Strength after reinforcement.
    pub update: String,
    /// Per-iteration dissipation rate.
    pub dissipation: String,
    /// Sampling deviation from population statistics.
    pub population_deviation: String,
    /// Probability that growth splits a connection.
    pub split_probability: String,
    /// Relative weight of growing at `layer`.
    pub layer_selection: String,
}

impl Default for FormulaConfig {
    fn default() -> Self {
        Self {
            deviation: "0.05 + 0.95 * (1 - strength)".to_string(),
            update: "strength + (1 - strength) / (strength + 2)".to_string(),
            dissipation: "0.05".to_string(),
            population_deviation: "0.05 + deviation + 0.5 * (1 - observed / population_size)"
                .to_string(),
            split_probability: "0.7".to_string(),
            layer_selection: "1".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcoConfig {
    pub network: NetworkConfig,
    pub colony: ColonyConfig,
    pub population: PopulationConfig,
    pub growth: GrowthConfig,
    pub formulas: FormulaConfig,
}

impl AcoConfig {
    /// A small configuration for `num_inputs -> num_outputs` networks.
    #[must_use]
    pub fn minimal(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            network: NetworkConfig {
                num_inputs,
                num_outputs,
                ..NetworkConfig::default()
            },
            colony: ColonyConfig {
                ant_count: 8,
                stagnation_window: 5,
                ..ColonyConfig::default()
            },
            population: PopulationConfig {
                capacity: 5,
                ants_per_iteration: 5,
                ..PopulationConfig::default()
            },
            ..Self::default()
        }
    }

    /// Decode a JSON configuration and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] if the text does not decode, or any
    /// error [`validate`](Self::validate) reports.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check numeric bounds and compile the formulas.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&self) -> Result<Formulas, ConfigError> {
        let n = &self.network;
        if n.num_inputs == 0 {
            return Err(ConfigError::out_of_bounds("network.num_inputs", 0.0, "must be >= 1"));
        }
        if n.num_outputs == 0 {
            return Err(ConfigError::out_of_bounds("network.num_outputs", 0.0, "must be >= 1"));
        }
        if !(n.weight_range > 0.0 && n.weight_range.is_finite()) {
            return Err(ConfigError::out_of_bounds(
                "network.weight_range",
                n.weight_range,
                "must be finite and > 0",
            ));
        }
        if !(n.value_limit > 0.0 && n.value_limit.is_finite()) {
            return Err(ConfigError::out_of_bounds(
                "network.value_limit",
                n.value_limit,
                "must be finite and > 0",
            ));
        }

        let c = &self.colony;
        if c.ant_count == 0 {
            return Err(ConfigError::out_of_bounds("colony.ant_count", 0.0, "must be >= 1"));
        }
        check_stagnation(
            ("colony.stagnation_window", "colony.stagnation_threshold"),
            c.stagnation_window,
            c.stagnation_threshold,
        )?;
        if !(0.0..=1.0).contains(&c.initial_strength) {
            return Err(ConfigError::out_of_bounds(
                "colony.initial_strength",
                c.initial_strength,
                "must be in [0, 1]",
            ));
        }

        let p = &self.population;
        if p.capacity == 0 {
            return Err(ConfigError::out_of_bounds("population.capacity", 0.0, "must be >= 1"));
        }
        if p.ants_per_iteration == 0 {
            return Err(ConfigError::out_of_bounds(
                "population.ants_per_iteration",
                0.0,
                "must be >= 1",
            ));
        }
        if p.update_quota == 0 || p.update_quota > p.capacity {
            return Err(ConfigError::out_of_bounds(
                "population.update_quota",
                p.update_quota as f64,
                "must be in [1, capacity]",
            ));
        }
        if p.max_age == 0 {
            return Err(ConfigError::out_of_bounds("population.max_age", 0.0, "must be >= 1"));
        }
        if !(p.neutral_deviation > 0.0 && p.neutral_deviation.is_finite()) {
            return Err(ConfigError::out_of_bounds(
                "population.neutral_deviation",
                p.neutral_deviation,
                "must be finite and > 0",
            ));
        }
        check_stagnation(
            ("population.stagnation_window", "population.stagnation_threshold"),
            p.stagnation_window,
            p.stagnation_threshold,
        )?;

        if !(0.0..=1.0).contains(&self.growth.prune_probability) {
            return Err(ConfigError::out_of_bounds(
                "growth.prune_probability",
                self.growth.prune_probability,
                "must be in [0, 1]",
            ));
        }

        Formulas::compile(&self.formulas)
    }
}

#[allow(clippy::cast_precision_loss)]
fn check_stagnation(
    keys: (&'static str, &'static str),
    window: usize,
    threshold: f64,
) -> Result<(), ConfigError> {
    if window == 0 {
        return Err(ConfigError::out_of_bounds(keys.0, 0.0, "must be >= 1"));
    }
    if !(threshold >= 0.0 && threshold.is_finite()) {
        return Err(ConfigError::out_of_bounds(
            keys.1,
            threshold,
            "must be finite and >= 0",
        ));
    }
    Ok(())
}
