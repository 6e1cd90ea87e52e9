//! # Symbios ACO
//!
//! Ant-colony search over neural-network weights and topology, without
//! gradients. Candidate networks ("ants") are sampled from a pheromone model,
//! scored by an external fitness function, and used to reinforce the model and,
//! when progress stalls, to grow the network.
//!
//! ## Features
//!
//! - **Single-colony ACO**: a dissipative pheromone model (signed value plus
//!   saturating strength) per weight and bias, with elitism and stagnation-driven
//!   growth
//! - **Multi-colony ACO**: independent colonies stepped in parallel with `rayon`,
//!   periodically restarting the weakest from the strongest
//! - **PACO**: a bounded population of solutions with six replacement policies;
//!   sampling statistics are derived from the population on demand
//! - **Mirrored growth**: every structural mutation of the network is replayed on
//!   its pheromone mirror in the same call
//! - **Formula hyperparameters**: deviation, update, dissipation, split and layer
//!   selection are configurable arithmetic formulas, checked at startup
//!
//! ## Quick Start
//!
//! ```rust
//! use symbios_aco::{AcoConfig, Colony, ColonyId, FitnessError, NetworkGraph};
//!
//! let config = AcoConfig::minimal(2, 1);
//! let mut colony = Colony::new(ColonyId(0), &config)?;
//!
//! let fitness = |network: &NetworkGraph| -> Result<f64, FitnessError> {
//!     let out = network.process(&[1.0, 0.0])?[0];
//!     Ok(1.0 - (0.9 - out).abs())
//! };
//!
//! for _ in 0..20 {
//!     let summary = colony.step(&fitness)?;
//!     assert!(summary.evaluated > 0);
//! }
//! assert!(colony.best_fitness().is_some());
//! # Ok::<(), symbios_aco::AcoError>(())
//! ```
//!
//! ## Architecture
//!
//! ### Arena graph and pheromone mirror
//!
//! Neurons and connections live in `SlotMap` arenas. The pheromone model stores
//! its entries in `SecondaryMap`s keyed by the same keys, so a structural change
//! is mirrored by replaying the list of keys the graph mutator reports.
//!
//! ### Hash-based innovation
//!
//! Neurons and connections carry deterministic innovation numbers
//! (`Hash(from, to)` for connections, `Hash(connection)` for split neurons).
//! PACO statistics are keyed by them, so they stay attached to the same
//! structural site when layers shift.
//!
//! ### Lifecycle
//!
//! Colonies and population searches run `next_iteration` → (external
//! evaluation) → `update_solutions`. Calling these out of order is an
//! [`AcoError::InvalidState`]; fitness updates for stale ants are logged and
//! discarded.

pub mod activation;
pub mod colony;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod fitness;
pub mod growth;
pub mod innovation;
pub mod multi;
pub mod network;
pub mod observe;
pub mod pheromone;
pub mod population;
pub mod stagnation;
pub mod walk;

// Re-exports for convenience
pub use activation::Activation;
pub use colony::{Colony, ColonyId, ColonyIds, ColonyState, RetainedBest};
pub use config::{
    AcoConfig, ColonyConfig, FormulaConfig, GrowthConfig, NetworkConfig, PolicyKind,
    PopulationConfig,
};
pub use error::{AcoError, ConfigError};
pub use evaluator::NetworkEvaluator;
pub use expression::{Bindings, ExpressionError, FormulaId, Formulas, Variable};
pub use fitness::{evaluate_ants, score, Fitness, FitnessError};
pub use growth::{GrowthOp, GrowthReport, TopologyGrowth};
pub use multi::MultiColony;
pub use network::{
    ConnectionId, NetworkGraph, NeuronId, NeuronKind, NeuronPosition, StructuralChange,
};
pub use observe::{
    ChannelSink, IterationSummary, NullSink, PheromoneSnapshot, PopulationSnapshot, StateEvent,
    StatePayload, StateSink, TracingSink,
};
pub use pheromone::{PheromoneEntry, PheromoneMirror, PheromoneModel, PheromoneSource};
pub use population::{
    AcceptOutcome, Candidate, Member, Population, PopulationSearch, SiteKey, SiteStatistics,
};
pub use stagnation::StagnationTracker;
pub use walk::{Ant, AntId, Decision, Solution, WeightDecision};
