//! # Anomaly Classifier
//!
//! A pure-logic crate: given a metric's prior observations and its latest value,
//! decide whether the value is unusually high, unusually low, or unremarkable.
//!
//! The baseline is the trailing median of the history. The median is used rather
//! than the mean so that earlier spikes do not drag the baseline towards them,
//! and no baseline exists until enough observations have accumulated.

use configuration::AnomalyConfig;
use core_types::{Flag, MetricValue};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Observations required before a baseline exists.
pub const DEFAULT_MIN_OBSERVATIONS: usize = 14;
/// Relative deviation beyond which a value is flagged.
pub const DEFAULT_TOLERANCE: Decimal = dec!(0.35);

/// The outcome of classifying one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub flag: Flag,
    /// The median the value was compared against, when one exists.
    pub baseline: Option<Decimal>,
}

impl Classification {
    fn none(baseline: Option<Decimal>) -> Self {
        Self { flag: Flag::None, baseline }
    }
}

/// The trailing-median classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    min_observations: usize,
    tolerance: Decimal,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_OBSERVATIONS, DEFAULT_TOLERANCE)
    }
}

impl Classifier {
    pub fn new(min_observations: usize, tolerance: Decimal) -> Self {
        Self {
            min_observations: min_observations.max(1),
            tolerance: tolerance.abs(),
        }
    }

    pub fn from_config(config: &AnomalyConfig) -> Self {
        Self::new(config.min_observations, config.tolerance)
    }

    /// The median of the numeric entries of `history`, or `None` when fewer than
    /// `min_observations` remain after dropping `Unavailable` entries.
    pub fn baseline(&self, history: &[MetricValue]) -> Option<Decimal> {
        let values: Vec<Decimal> = history.iter().filter_map(MetricValue::as_number).collect();
        if values.len() < self.min_observations {
            return None;
        }
        median(values)
    }

    pub fn classify(&self, current: &MetricValue, history: &[MetricValue]) -> Classification {
        let Some(value) = current.as_number() else {
            return Classification::none(None);
        };
        let baseline = self.baseline(history);
        let Some(norm) = baseline.filter(|b| !b.is_zero()) else {
            return Classification::none(baseline);
        };
        let Some(delta) = value.checked_sub(norm).and_then(|d| d.checked_div(norm)) else {
            return Classification::none(baseline);
        };

        let flag = if delta > self.tolerance {
            Flag::Green
        } else if delta < -self.tolerance {
            Flag::Red
        } else {
            Flag::None
        };
        Classification { flag, baseline }
    }
}

/// `compute_baseline` with the default observation floor.
pub fn compute_baseline(history: &[MetricValue]) -> Option<Decimal> {
    Classifier::default().baseline(history)
}

/// `classify` with the default floor and tolerance.
pub fn classify(current: &MetricValue, history: &[MetricValue]) -> Classification {
    Classifier::default().classify(current, history)
}

fn median(mut values: Vec<Decimal>) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        let (low, high) = (values[mid - 1], values[mid]);
        // The sum only overflows when both share a sign, so the gap cannot.
        low.checked_add(high)
            .map(|sum| sum / dec!(2))
            .or_else(|| high.checked_sub(low).and_then(|gap| low.checked_add(gap / dec!(2))))
    } else {
        Some(values[mid])
    }
}
