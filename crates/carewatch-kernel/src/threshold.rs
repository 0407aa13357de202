//! Threshold policy – maps a reading onto [`MetricStatus`].
//!
//! Bands are inclusive on both ends: a value equal to `min` or `max` is
//! still [`MetricStatus::Normal`].
//!
//! # Example
//!
//! ```
//! use carewatch_kernel::threshold::classify;
//! use carewatch_types::MetricStatus;
//!
//! assert_eq!(classify(100.0, 60.0, 100.0), MetricStatus::Normal);
//! assert_eq!(classify(100.5, 60.0, 100.0), MetricStatus::Danger);
//! ```

use carewatch_types::{Band, Metric, MetricStatus};

/// Classify `value` against the inclusive band `[min, max]`.
///
/// Returns [`MetricStatus::Danger`] iff `value < min` or `value > max`.
/// Callers must not pass NaN.
pub fn classify(value: f64, min: f64, max: f64) -> MetricStatus {
    if value < min || value > max {
        MetricStatus::Danger
    } else {
        MetricStatus::Normal
    }
}

/// Classify `value` against `band`.
pub fn classify_in(band: Band, value: f64) -> MetricStatus {
    classify(value, band.min, band.max)
}

/// Classify `value` against the fixed band of `metric`.
pub fn classify_metric(metric: Metric, value: f64) -> MetricStatus {
    classify_in(metric.band(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_inside_band_are_normal() {
        for metric in Metric::ALL {
            let band = metric.band();
            let mid = (band.min + band.max) / 2.0;
            assert_eq!(classify_metric(metric, mid), MetricStatus::Normal, "{metric}");
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        for metric in Metric::ALL {
            let band = metric.band();
            assert_eq!(classify_metric(metric, band.min), MetricStatus::Normal, "{metric} min");
            assert_eq!(classify_metric(metric, band.max), MetricStatus::Normal, "{metric} max");
        }
    }

    #[test]
    fn values_outside_either_bound_are_danger() {
        for metric in Metric::ALL {
            let band = metric.band();
            assert_eq!(classify_metric(metric, band.min - 0.1), MetricStatus::Danger, "{metric} low");
            assert_eq!(classify_metric(metric, band.max + 0.1), MetricStatus::Danger, "{metric} high");
        }
    }

    #[test]
    fn temperature_fractional_edges() {
        assert_eq!(classify_metric(Metric::Temperature, 37.8), MetricStatus::Normal);
        assert_eq!(classify_metric(Metric::Temperature, 37.81), MetricStatus::Danger);
        assert_eq!(classify_metric(Metric::Temperature, 35.99), MetricStatus::Danger);
    }

    #[test]
    fn classify_is_independent_of_metric_tables() {
        assert_eq!(classify(-5.0, -10.0, 0.0), MetricStatus::Normal);
        assert_eq!(classify(0.0, 1.0, 2.0), MetricStatus::Danger);
    }
}
