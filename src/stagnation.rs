//! Trailing-window stagnation detection.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Relative gain of `value` over `reference`.
///
/// Non-positive when `value` is not larger. A finite value after a
/// non-finite reference counts as unbounded gain.
fn relative_gain(reference: f64, value: f64) -> f64 {
    if value <= reference {
        return 0.0;
    }
    if !reference.is_finite() {
        return f64::INFINITY;
    }
    (value - reference) / reference.abs().max(f64::EPSILON)
}

/// Tracks the last `k` best-fitness observations.
///
/// A value that beats the window maximum by at least `threshold` (relative)
/// restarts the window. The tracker reports stagnation once the window is full
/// and its maximum improves on its oldest entry by less than `threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagnationTracker {
    window: VecDeque<f64>,
    capacity: usize,
    threshold: f64,
}

impl StagnationTracker {
    /// A tracker over `window` observations; `window` is raised to at least 1.
    #[must_use]
    pub fn new(window: usize, threshold: f64) -> Self {
        let capacity = window.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
        }
    }

    /// Record a best-fitness observation and report whether the search stagnates.
    ///
    /// `NaN` is recorded as negative infinity.
    pub fn push(&mut self, value: f64) -> bool {
        let value = if value.is_nan() { f64::NEG_INFINITY } else { value };
        if let Some(max) = self.max() {
            if relative_gain(max, value) >= self.threshold && value > max {
                self.window.clear();
                self.window.push_back(value);
                return false;
            }
        }
        self.window.push_back(value);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
        self.is_stagnant()
    }

    /// Whether the full window shows less than `threshold` relative improvement.
    #[must_use]
    pub fn is_stagnant(&self) -> bool {
        if self.window.len() < self.capacity {
            return false;
        }
        match (self.window.front(), self.max()) {
            (Some(&oldest), Some(max)) => relative_gain(oldest, max) < self.threshold,
            _ => false,
        }
    }

    /// Forget every observation.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn max(&self) -> Option<f64> {
        self.window.iter().copied().reduce(f64::max)
    }

    /// Number of observations currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Window length `k`.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
