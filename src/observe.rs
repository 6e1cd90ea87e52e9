//! Fire-and-forget state reporting.
//!
//! Colonies and population searches publish a [`StateEvent`] after every
//! iteration and every structural growth step. Sinks must never block the
//! optimization loop: [`ChannelSink`] drops events when its buffer is full.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, trace};

use crate::growth::GrowthReport;
use crate::pheromone::PheromoneEntry;

/// Number of buckets in [`PheromoneSnapshot::strength_histogram`].
pub const HISTOGRAM_BUCKETS: usize = 10;

/// Fitness statistics of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationSummary {
    /// Number of ants with a fitness value.
    pub evaluated: usize,
    /// Number of ants whose fitness was not finite.
    pub failed: usize,
    /// Statistics over the finite fitness values; `NaN` if there are none.
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    /// Best fitness of this iteration, including non-finite values.
    pub best: f64,
    /// Network depth after the iteration.
    pub depth: usize,
    /// Number of connections after the iteration.
    pub connections: usize,
    /// Whether topology growth ran.
    pub grew: bool,
}

impl IterationSummary {
    /// Summarize `fitness`, the values of the evaluated ants.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_fitness(fitness: impl IntoIterator<Item = f64>) -> Self {
        let mut evaluated = 0;
        let mut failed = 0;
        let mut best = f64::NEG_INFINITY;
        let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for value in fitness {
            evaluated += 1;
            best = best.max(value);
            if value.is_finite() {
                min = min.min(value);
                max = max.max(value);
                sum += value;
            } else {
                failed += 1;
            }
        }
        let finite = evaluated - failed;
        let (min, mean, max) = if finite == 0 {
            (f64::NAN, f64::NAN, f64::NAN)
        } else {
            (min, sum / finite as f64, max)
        };
        Self {
            evaluated,
            failed,
            min,
            mean,
            max,
            best,
            depth: 0,
            connections: 0,
            grew: false,
        }
    }
}

/// Distribution of pheromone entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PheromoneSnapshot {
    pub entries: usize,
    pub mean_strength: f64,
    pub max_strength: f64,
    pub min_value: f64,
    pub max_value: f64,
    /// Entry counts for strength buckets `[0, 0.1), [0.1, 0.2), ... [0.9, 1]`.
    pub strength_histogram: [usize; HISTOGRAM_BUCKETS],
}

impl PheromoneSnapshot {
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a PheromoneEntry>) -> Self {
        let mut snapshot = Self {
            entries: 0,
            mean_strength: 0.0,
            max_strength: 0.0,
            min_value: 0.0,
            max_value: 0.0,
            strength_histogram: [0; HISTOGRAM_BUCKETS],
        };
        let mut strength_sum = 0.0;
        let (mut min_value, mut max_value) = (f64::INFINITY, f64::NEG_INFINITY);
        for entry in entries {
            snapshot.entries += 1;
            strength_sum += entry.strength;
            snapshot.max_strength = snapshot.max_strength.max(entry.strength);
            min_value = min_value.min(entry.value);
            max_value = max_value.max(entry.value);
            let bucket = ((entry.strength * HISTOGRAM_BUCKETS as f64) as usize)
                .min(HISTOGRAM_BUCKETS - 1);
            snapshot.strength_histogram[bucket] += 1;
        }
        if snapshot.entries > 0 {
            snapshot.mean_strength = strength_sum / snapshot.entries as f64;
            snapshot.min_value = min_value;
            snapshot.max_value = max_value;
        }
        snapshot
    }
}

/// Composition of a PACO population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationSnapshot {
    pub size: usize,
    pub capacity: usize,
    pub global_best: Option<f64>,
    pub mean_fitness: f64,
    pub worst_fitness: f64,
    /// Age of the oldest member, in iterations.
    pub oldest_age: u64,
    /// Member count per provenance group, sorted by group.
    pub groups: Vec<(u64, usize)>,
    /// Number of structural sites with at least one observation.
    pub observed_sites: usize,
}

/// What happened.
#[derive(Debug, Clone, Serialize)]
pub enum StatePayload {
    Iteration(IterationSummary),
    Pheromone(PheromoneSnapshot),
    Population(PopulationSnapshot),
    Growth(GrowthReport),
}

/// One published event.
#[derive(Debug, Clone, Serialize)]
pub struct StateEvent {
    /// Publisher, e.g. `colony 2` or `population`.
    pub owner: String,
    pub iteration: u64,
    pub payload: StatePayload,
}

/// Receiver of state events. Implementations must return promptly.
pub trait StateSink: Send + Sync {
    fn publish(&self, event: StateEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StateSink for NullSink {
    fn publish(&self, _event: StateEvent) {}
}

/// Logs events as JSON at `debug` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StateSink for TracingSink {
    fn publish(&self, event: StateEvent) {
        match serde_json::to_string(&event.payload) {
            Ok(json) => debug!(owner = %event.owner, iteration = event.iteration, state = %json),
            Err(e) => debug!(owner = %event.owner, iteration = event.iteration, error = %e, "unserializable state"),
        }
    }
}

/// Forwards events into a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<StateEvent>,
}

impl ChannelSink {
    /// A sink buffering at most `capacity` events, and its receiving end.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<StateEvent>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl StateSink for ChannelSink {
    fn publish(&self, event: StateEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!(owner = %event.owner, iteration = event.iteration, "state channel full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn event(iteration: u64) -> StateEvent {
        StateEvent {
            owner: "colony 0".to_string(),
            iteration,
            payload: StatePayload::Iteration(IterationSummary::from_fitness([1.0])),
        }
    }

    #[test]
    fn test_summary_ignores_non_finite_in_statistics() {
        let summary = IterationSummary::from_fitness([1.0, 3.0, f64::NEG_INFINITY, 2.0]);
        assert_eq!(summary.evaluated, 4);
        assert_eq!(summary.failed, 1);
        assert!((summary.min - 1.0).abs() < 1e-12);
        assert!((summary.mean - 2.0).abs() < 1e-12);
        assert!((summary.max - 3.0).abs() < 1e-12);
        assert!((summary.best - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_of_failed_iteration() {
        let summary = IterationSummary::from_fitness([f64::NEG_INFINITY]);
        assert!(summary.mean.is_nan());
        assert_eq!(summary.best, f64::NEG_INFINITY);
    }

    #[test]
    fn test_pheromone_histogram() {
        let entries = [
            PheromoneEntry::new(-1.0, 0.0),
            PheromoneEntry::new(2.0, 0.55),
            PheromoneEntry::new(0.5, 1.0),
        ];
        let snapshot = PheromoneSnapshot::from_entries(&entries);
        assert_eq!(snapshot.entries, 3);
        assert_eq!(snapshot.strength_histogram[0], 1);
        assert_eq!(snapshot.strength_histogram[5], 1);
        assert_eq!(snapshot.strength_histogram[HISTOGRAM_BUCKETS - 1], 1);
        assert!((snapshot.min_value + 1.0).abs() < 1e-12);
        assert!((snapshot.max_value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, receiver) = ChannelSink::bounded(2);
        for i in 0..5 {
            sink.publish(event(i));
        }
        let received: Vec<u64> = receiver.try_iter().map(|e| e.iteration).collect();
        assert_eq!(received, vec![0, 1]);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_sink_logs_json_payload() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || TracingSink.publish(event(7)));

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("DEBUG"), "{output}");
        assert!(output.contains("owner=colony 0"), "{output}");
        assert!(output.contains("iteration=7"), "{output}");
        assert!(output.contains("\"evaluated\":1"), "{output}");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = ChannelSink::bounded(1);
        drop(receiver);
        sink.publish(event(0));
        NullSink.publish(event(1));
        TracingSink.publish(event(2));
    }
}
