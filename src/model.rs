//! Validated input model: one analysis (device) worth of sensor series and bands.
//!
//! These are built once at the payload boundary and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::timestamp::{self, TimestampError};

/// A single sample reported by a sensor.
///
/// The timestamp is kept as the raw portal string so that a missing value and an
/// unparsable one can be told apart by the liveness classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sensor_id: Option<String>,
    pub timestamp: Option<String>,
    pub value: Option<f64>,
    pub formatted_value: Option<String>,
}

impl Observation {
    /// The normalized instant of this observation.
    pub fn instant(&self) -> Result<DateTime<Utc>, TimestampError> {
        timestamp::normalize(self.timestamp.as_deref())
    }

    /// Display string for the value, falling back to the numeric value.
    pub fn display_value(&self) -> String {
        match (&self.formatted_value, self.value) {
            (Some(f), _) if !f.trim().is_empty() => f.clone(),
            (_, Some(v)) => v.to_string(),
            _ => "n/a".to_string(),
        }
    }
}

/// Ordered observations for one sensor. The last element is the most recent by
/// construction; timestamps are not guaranteed to be monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSeries {
    pub sensor_id: Option<String>,
    pub sensor_name: String,
    pub observations: Vec<Observation>,
}

impl SensorSeries {
    /// Identifier used in alarm text, `?` when the portal omitted it.
    pub fn id_label(&self) -> &str {
        self.sensor_id.as_deref().unwrap_or("?")
    }
}

/// Where a band definition came from. Only affects alarm wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandSource {
    PlotBand,
    YLimit,
}

/// An acceptable value range.
///
/// Symmetric bands bound `|value|` by `max_value` and ignore `min_value`.
/// Asymmetric bands bound `value` by `[min_value, max_value]`; an unbounded side
/// is represented by an infinite bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub name: String,
    #[serde(with = "lower_bound")]
    pub min_value: f64,
    #[serde(with = "upper_bound")]
    pub max_value: f64,
    pub symmetric: bool,
    pub source: BandSource,
}

impl ThresholdBand {
    pub fn plot_band(name: impl Into<String>, min_value: f64, max_value: f64, symmetric: bool) -> Self {
        Self {
            name: name.into(),
            min_value,
            max_value,
            symmetric,
            source: BandSource::PlotBand,
        }
    }

    /// The synthetic band substituted when an analysis has no plot bands.
    pub fn y_limit(min_value: Option<f64>, max_value: Option<f64>) -> Self {
        Self {
            name: "Y-Limit".to_string(),
            min_value: min_value.unwrap_or(f64::NEG_INFINITY),
            max_value: max_value.unwrap_or(f64::INFINITY),
            symmetric: false,
            source: BandSource::YLimit,
        }
    }
}

// Infinite bounds travel as `null`, which JSON cannot otherwise represent.

fn serialize_bound<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    value.is_finite().then_some(*value).serialize(serializer)
}

mod lower_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize_bound(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

mod upper_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize_bound(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Everything the engine needs to evaluate one analysis/device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub device_id: String,
    pub device_name: Option<String>,
    pub project: Option<String>,
    pub series: Vec<SensorSeries>,
    pub bands: Vec<ThresholdBand>,
    pub fallback_band: Option<ThresholdBand>,
}

impl AnalysisPayload {
    /// Plot bands when any exist, otherwise the fallback pair, otherwise nothing.
    pub fn effective_bands(&self) -> Vec<ThresholdBand> {
        if !self.bands.is_empty() {
            return self.bands.clone();
        }
        self.fallback_band.iter().cloned().collect()
    }
}

/// Counters for input that was skipped instead of failing the evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub skipped_series: usize,
    pub skipped_bands: usize,
    pub skipped_observations: usize,
    pub skipped_records: usize,
}

impl Diagnostics {
    pub fn merge(&mut self, other: Diagnostics) {
        self.skipped_series += other.skipped_series;
        self.skipped_bands += other.skipped_bands;
        self.skipped_observations += other.skipped_observations;
        self.skipped_records += other.skipped_records;
    }

    pub fn total(&self) -> usize {
        self.skipped_series + self.skipped_bands + self.skipped_observations + self.skipped_records
    }
}
