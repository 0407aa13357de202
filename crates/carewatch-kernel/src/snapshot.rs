//! [`SensorSnapshot`] – current value of every tracked metric.
//!
//! Updates are partial: [`SensorSnapshot::apply_update`] merges only the
//! metrics present in the incoming [`SensorUpdate`] and leaves the rest
//! untouched.  No history is kept.

use std::collections::BTreeMap;

use carewatch_types::{
    INITIAL_READINGS, Metric, MetricReading, MetricStatus, SensorUpdate, VitalsReport,
};
use tracing::debug;

use crate::threshold::classify_metric;

/// Current readings for one monitoring session.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    values: BTreeMap<Metric, f64>,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            values: INITIAL_READINGS.into_iter().collect(),
        }
    }
}

impl SensorSnapshot {
    /// Snapshot seeded with [`INITIAL_READINGS`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `metric`.
    pub fn value(&self, metric: Metric) -> f64 {
        // Every metric is seeded at construction and never removed.
        self.values.get(&metric).copied().unwrap_or_default()
    }

    /// Merge `update` into the current readings.
    ///
    /// Non-finite values are dropped so the threshold policy never sees NaN.
    pub fn apply_update(&mut self, update: &SensorUpdate) {
        for (metric, value) in update.iter() {
            if !value.is_finite() {
                debug!(?metric, value, "dropping non-finite reading");
                continue;
            }
            self.values.insert(metric, value);
        }
    }

    /// Classify every metric against its band.
    pub fn evaluate(&self) -> VitalsReport {
        let readings: Vec<MetricReading> = Metric::ALL
            .into_iter()
            .map(|metric| {
                let value = self.value(metric);
                MetricReading {
                    metric,
                    value,
                    status: classify_metric(metric, value),
                }
            })
            .collect();
        let any_danger = readings.iter().any(|r| r.status == MetricStatus::Danger);
        VitalsReport {
            readings,
            any_danger,
        }
    }
}
