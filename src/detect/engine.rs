use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::detect::aggregate::aggregate;
use crate::detect::liveness::{classify, DeviceStatusReport};
use crate::detect::recency::{RecencyFilter, RecencyWindow};
use crate::detect::threshold::{self, ViolationRecord};
use crate::detect::{AlarmRecord, EngineError};
use crate::model::{AnalysisPayload, Diagnostics};

/// Settings fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub recency: RecencyWindow,
    pub fallback_hours: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recency: RecencyWindow::default(),
            fallback_hours: 24.0,
        }
    }
}

/// Everything one device evaluation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub device_id: String,
    pub device_name: Option<String>,
    pub status: DeviceStatusReport,
    pub violations: Vec<ViolationRecord>,
    pub alarms: Vec<AlarmRecord>,
    pub diagnostics: Diagnostics,
}

/// Pure evaluation of analysis payloads. Holds no mutable state, so one
/// instance can be shared across worker tasks.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Evaluate one device at `now`.
    ///
    /// Callers capture `now` once per run. The same payload and `now` always
    /// produce the same alarms.
    pub fn evaluate(
        &self,
        payload: &AnalysisPayload,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EngineError> {
        if payload.device_id.trim().is_empty() {
            return Err(EngineError::MissingDeviceId);
        }
        let device_id = payload.device_id.as_str();
        let _span = info_span!("evaluate", device_id).entered();

        let filter = RecencyFilter::new(self.config.recency, now);
        let mut diagnostics = Diagnostics::default();

        let liveness: Vec<_> = payload
            .series
            .iter()
            .map(|series| classify(series, now, self.config.fallback_hours))
            .collect();

        let bands = payload.effective_bands();
        if bands.is_empty() {
            warn!("no plot bands or axis limits configured, skipping threshold checks");
        }
        let mut violations = Vec::new();
        for series in &payload.series {
            let found = threshold::evaluate(series, &bands, &filter);
            diagnostics.skipped_observations += found.skipped_observations;
            violations.extend(found.records);
        }

        let aggregation = aggregate(device_id, &violations, &liveness, &filter);
        diagnostics.skipped_records += aggregation.skipped_records;

        let status = DeviceStatusReport::new(
            device_id,
            payload.device_name.as_deref(),
            now,
            self.config.fallback_hours,
            liveness,
        );
        info!(
            running = status.running_count,
            down = status.down_count,
            unknown = status.unknown_count,
            violations = violations.len(),
            alarms = aggregation.alarms.len(),
            window = %self.config.recency,
            "device evaluated"
        );

        Ok(Evaluation {
            device_id: device_id.to_string(),
            device_name: payload.device_name.clone(),
            status,
            violations,
            alarms: aggregation.alarms,
            diagnostics,
        })
    }
}
