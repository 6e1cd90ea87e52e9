//! Neuron activation functions.
//!
//! Hidden and output neurons apply one of these to `bias + Σ weight · input`.
//! Input neurons always pass their value through unchanged.

use serde::{Deserialize, Serialize};

/// Activation function applied by a neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Activation {
    /// f(x) = x. Neurons inserted by a split use this so the split is exact.
    #[default]
    Identity,
    /// f(x) = 1 / (1 + e^(-x))
    Sigmoid,
    /// f(x) = tanh(x)
    Tanh,
    /// f(x) = max(0, x)
    ReLU,
    /// `f(x) = x` if `x > 0` else `0.01x`
    LeakyReLU,
}

impl Activation {
    /// All available activation functions.
    pub const ALL: [Self; 5] = [
        Self::Identity,
        Self::Sigmoid,
        Self::Tanh,
        Self::ReLU,
        Self::LeakyReLU,
    ];

    /// Apply this activation function to an input value.
    ///
    /// NaN propagates; infinities map to the function's limit where one exists.
    #[inline]
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }

        match self {
            Self::Identity => x,
            Self::Sigmoid => {
                // exp overflows past ~709; the result is already saturated long before.
                let clamped = x.clamp(-500.0, 500.0);
                1.0 / (1.0 + (-clamped).exp())
            }
            Self::Tanh => x.tanh(),
            Self::ReLU => x.max(0.0),
            Self::LeakyReLU => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
        }
    }
}
