use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detect::recency::RecencyFilter;
use crate::model::{BandSource, Observation, SensorSeries, ThresholdBand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    AboveMaximum,
    BelowMinimum,
    /// Symmetric band, positive value.
    ExceedsMaximumAbove,
    /// Symmetric band, negative value.
    ExceedsMaximumBelow,
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationType::AboveMaximum => write!(f, "above_maximum"),
            ViolationType::BelowMinimum => write!(f, "below_minimum"),
            ViolationType::ExceedsMaximumAbove => write!(f, "exceeds_maximum_above"),
            ViolationType::ExceedsMaximumBelow => write!(f, "exceeds_maximum_below"),
        }
    }
}

/// Outcome of checking a single value against a band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub violation_type: ViolationType,
    /// `|value|`, set for symmetric bands only.
    pub magnitude: Option<f64>,
}

/// Check one value against one band. `None` values never violate.
pub fn check_value(value: Option<f64>, band: &ThresholdBand) -> Option<Breach> {
    let value = value?;
    if band.symmetric {
        let magnitude = value.abs();
        if magnitude > band.max_value {
            let violation_type = if value > 0.0 {
                ViolationType::ExceedsMaximumAbove
            } else {
                ViolationType::ExceedsMaximumBelow
            };
            return Some(Breach {
                violation_type,
                magnitude: Some(magnitude),
            });
        }
        return None;
    }

    if value > band.max_value {
        Some(Breach {
            violation_type: ViolationType::AboveMaximum,
            magnitude: None,
        })
    } else if value < band.min_value {
        Some(Breach {
            violation_type: ViolationType::BelowMinimum,
            magnitude: None,
        })
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub sensor_id: Option<String>,
    pub sensor_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub formatted_value: String,
    pub threshold: ThresholdBand,
    pub violation_type: ViolationType,
    pub description: String,
}

fn describe(band: &ThresholdBand, breach: Breach, formatted: &str) -> String {
    match (band.source, breach.violation_type) {
        (_, ViolationType::ExceedsMaximumAbove | ViolationType::ExceedsMaximumBelow) => format!(
            "Value {formatted} exceeds {} threshold (max: ±{}, current: {:.4})",
            band.name,
            band.max_value,
            breach.magnitude.unwrap_or_default()
        ),
        (BandSource::YLimit, ViolationType::AboveMaximum) => {
            format!("Value {formatted} exceeds Y-axis limit (max: {})", band.max_value)
        }
        (BandSource::YLimit, ViolationType::BelowMinimum) => {
            format!("Value {formatted} below Y-axis limit (min: {})", band.min_value)
        }
        (BandSource::PlotBand, ViolationType::AboveMaximum) => format!(
            "Value {formatted} exceeds {} threshold (max: {})",
            band.name, band.max_value
        ),
        (BandSource::PlotBand, ViolationType::BelowMinimum) => format!(
            "Value {formatted} below {} threshold (min: {})",
            band.name, band.min_value
        ),
    }
}

/// Result of evaluating one sensor series.
#[derive(Debug, Default)]
pub struct SeriesViolations {
    pub records: Vec<ViolationRecord>,
    /// Observations dropped because their value was not a finite number.
    pub skipped_observations: usize,
}

/// Check every recent observation of `series` against every band.
///
/// Each violating observation produces its own record, so a sensor can
/// contribute several per run. Observations outside the recency window, or
/// whose timestamp cannot be normalized, are dropped.
pub fn evaluate(
    series: &SensorSeries,
    bands: &[ThresholdBand],
    window: &RecencyFilter,
) -> SeriesViolations {
    let mut out = SeriesViolations::default();
    if bands.is_empty() {
        return out;
    }

    let mut recent: Vec<(&Observation, DateTime<Utc>, f64)> = Vec::new();
    for obs in &series.observations {
        let Ok(at) = obs.instant() else {
            continue;
        };
        if !window.is_recent(at) {
            continue;
        }
        let Some(value) = obs.value else {
            continue;
        };
        if !value.is_finite() {
            warn!(sensor = %series.sensor_name, "skipping non-finite observation value");
            out.skipped_observations += 1;
            continue;
        }
        recent.push((obs, at, value));
    }

    for band in bands {
        for &(obs, at, value) in &recent {
            let Some(breach) = check_value(Some(value), band) else {
                continue;
            };
            let formatted_value = obs.display_value();
            out.records.push(ViolationRecord {
                sensor_id: series.sensor_id.clone(),
                sensor_name: series.sensor_name.clone(),
                timestamp: at,
                value,
                description: describe(band, breach, &formatted_value),
                formatted_value,
                threshold: band.clone(),
                violation_type: breach.violation_type,
            });
        }
    }

    out
}
