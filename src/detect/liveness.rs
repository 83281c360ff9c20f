use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Observation, SensorSeries};
use crate::timestamp::{hours_between, TimestampError};

/// Whether a sensor is still reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStatus {
    Running,
    Down,
    /// The last observation carries no timestamp.
    Unknown,
    /// The last observation carries a timestamp that could not be parsed.
    Error,
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessStatus::Running => write!(f, "running"),
            LivenessStatus::Down => write!(f, "down"),
            LivenessStatus::Unknown => write!(f, "unknown"),
            LivenessStatus::Error => write!(f, "error"),
        }
    }
}

/// Which comparison produced the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessBasis {
    /// Compared against the gap between the last two observations.
    AdaptiveInterval,
    /// Fixed threshold: only one observation exists.
    FallbackSingleObservation,
    /// Fixed threshold: the second-to-last timestamp is unusable.
    FallbackNoInterval,
    /// No comparison was possible.
    NotEvaluated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub sensor_id: Option<String>,
    pub sensor_name: String,
    pub status: LivenessStatus,
    pub basis: LivenessBasis,
    pub reason: String,
    /// Raw timestamp string of the last observation, as reported.
    pub last_observation: Option<String>,
    pub last_observation_time: Option<DateTime<Utc>>,
    pub hours_since_last: Option<f64>,
    pub interval_hours_between_last_two: Option<f64>,
}

impl LivenessResult {
    fn unevaluated(series: &SensorSeries, status: LivenessStatus, reason: String) -> Self {
        Self {
            sensor_id: series.sensor_id.clone(),
            sensor_name: series.sensor_name.clone(),
            status,
            basis: LivenessBasis::NotEvaluated,
            reason,
            last_observation: None,
            last_observation_time: None,
            hours_since_last: None,
            interval_hours_between_last_two: None,
        }
    }

    pub fn is_down(&self) -> bool {
        self.status == LivenessStatus::Down
    }
}

/// Classify one sensor.
///
/// With two or more observations the threshold is the sensor's own last reporting
/// interval, so a six-hourly sensor goes down after one missed cycle while a daily
/// one is not flagged by an hourly poll. With a single observation, or an unusable
/// second-to-last timestamp, `fallback_hours` is used instead.
///
/// A last observation in the future yields negative `hours_since_last` and is
/// classified `running`.
pub fn classify(series: &SensorSeries, now: DateTime<Utc>, fallback_hours: f64) -> LivenessResult {
    let observations = &series.observations;
    let Some(last) = observations.last() else {
        return LivenessResult::unevaluated(
            series,
            LivenessStatus::Down,
            "No observations found".to_string(),
        );
    };

    let last_at = match last.instant() {
        Ok(at) => at,
        Err(TimestampError::Missing) => {
            return LivenessResult::unevaluated(
                series,
                LivenessStatus::Unknown,
                "No timestamp in last observation".to_string(),
            );
        }
        Err(e) => {
            let mut result = LivenessResult::unevaluated(
                series,
                LivenessStatus::Error,
                format!("Error parsing timestamp: {e}"),
            );
            result.last_observation = last.timestamp.clone();
            return result;
        }
    };

    let hours_since_last = hours_between(last_at, now);
    let previous = observations
        .len()
        .checked_sub(2)
        .map(|i| &observations[i])
        .map(Observation::instant);

    let (status, basis, reason, interval) = match previous {
        Some(Ok(prev_at)) => {
            let interval = hours_between(prev_at, last_at);
            if hours_since_last > interval {
                (
                    LivenessStatus::Down,
                    LivenessBasis::AdaptiveInterval,
                    format!(
                        "Time since last observation ({hours_since_last:.2} hours) exceeds the interval between last 2 observations ({interval:.2} hours)"
                    ),
                    Some(interval),
                )
            } else {
                (
                    LivenessStatus::Running,
                    LivenessBasis::AdaptiveInterval,
                    format!(
                        "Time since last observation ({hours_since_last:.2} hours) is within the interval between last 2 observations ({interval:.2} hours)"
                    ),
                    Some(interval),
                )
            }
        }
        Some(Err(_)) => fallback(
            hours_since_last,
            fallback_hours,
            LivenessBasis::FallbackNoInterval,
            "could not calculate interval",
        ),
        None => fallback(
            hours_since_last,
            fallback_hours,
            LivenessBasis::FallbackSingleObservation,
            "only 1 observation available",
        ),
    };

    debug!(
        sensor = %series.sensor_name,
        sensor_id = series.id_label(),
        %status,
        hours_since_last,
        interval_hours = ?interval,
        "sensor classified"
    );

    LivenessResult {
        sensor_id: series.sensor_id.clone(),
        sensor_name: series.sensor_name.clone(),
        status,
        basis,
        reason,
        last_observation: last.timestamp.clone(),
        last_observation_time: Some(last_at),
        hours_since_last: Some(hours_since_last),
        interval_hours_between_last_two: interval,
    }
}

fn fallback(
    hours_since_last: f64,
    fallback_hours: f64,
    basis: LivenessBasis,
    note: &str,
) -> (LivenessStatus, LivenessBasis, String, Option<f64>) {
    let status = if hours_since_last > fallback_hours {
        LivenessStatus::Down
    } else {
        LivenessStatus::Running
    };
    let reason = format!(
        "Last observation was {hours_since_last:.2} hours ago (using fallback threshold: {fallback_hours} hours - {note})"
    );
    (status, basis, reason, None)
}

/// Per-device summary of one classification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusReport {
    pub device_id: String,
    pub device_name: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub fallback_hours: f64,
    pub sensors: Vec<LivenessResult>,
    pub running_count: usize,
    pub down_count: usize,
    /// Sensors classified `unknown` or `error`.
    pub unknown_count: usize,
}

impl DeviceStatusReport {
    pub fn new(
        device_id: &str,
        device_name: Option<&str>,
        checked_at: DateTime<Utc>,
        fallback_hours: f64,
        sensors: Vec<LivenessResult>,
    ) -> Self {
        let count = |wanted: &[LivenessStatus]| {
            sensors
                .iter()
                .filter(|s| wanted.contains(&s.status))
                .count()
        };
        let running_count = count(&[LivenessStatus::Running]);
        let down_count = count(&[LivenessStatus::Down]);
        let unknown_count = count(&[LivenessStatus::Unknown, LivenessStatus::Error]);
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.map(str::to_string),
            checked_at,
            fallback_hours,
            sensors,
            running_count,
            down_count,
            unknown_count,
        }
    }
}
