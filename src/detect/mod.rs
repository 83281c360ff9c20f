//! Liveness classification, threshold evaluation and alarm grouping.

pub mod aggregate;
pub mod engine;
pub mod liveness;
pub mod recency;
pub mod threshold;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{Engine, EngineConfig, Evaluation};
pub use liveness::{DeviceStatusReport, LivenessResult, LivenessStatus};
pub use recency::{RecencyFilter, RecencyWindow};
pub use threshold::{ViolationRecord, ViolationType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("analysis payload has no device identifier")]
    MissingDeviceId,
}

/// Kind of alarm raised for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    DeviceDown,
    SensorDown,
    ValueExceededThreshold,
}

impl std::fmt::Display for AlarmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmType::DeviceDown => write!(f, "device_down"),
            AlarmType::SensorDown => write!(f, "sensor_down"),
            AlarmType::ValueExceededThreshold => write!(f, "value_exceeded_threshold"),
        }
    }
}

/// Identity of an alarm within one evaluation run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmKey {
    pub device_id: String,
    pub alarm_type: AlarmType,
}

impl AlarmKey {
    pub fn new(device_id: &str, alarm_type: AlarmType) -> Self {
        Self {
            device_id: device_id.to_string(),
            alarm_type,
        }
    }
}

/// A consolidated alarm, ready for upsert keyed by `(device_id, alarm_type)`.
///
/// `device_id` is the analysis identifier, except for `sensor_down` alarms which
/// are keyed by the sensor identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub device_id: String,
    pub alarm_type: AlarmType,
    pub description: String,
    pub issue_start_time: DateTime<Utc>,
    pub last_alarm_sent_time: DateTime<Utc>,
}

impl AlarmRecord {
    pub fn key(&self) -> AlarmKey {
        AlarmKey::new(&self.device_id, self.alarm_type)
    }
}
