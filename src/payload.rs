//! Decoding of the portal's `Analysis/LoadData` response into the validated model.
//!
//! The portal returns loosely-typed JSON: identifiers are sometimes numbers and
//! sometimes strings, bounds may be null, and the axis limits arrive as a JSON
//! document embedded in a string. All of that is resolved here, once. Bad
//! entries are skipped and counted; only a missing `data` object or device
//! identifier rejects the whole payload.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{AnalysisPayload, Diagnostics, Observation, SensorSeries, ThresholdBand};

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload has no analysis data")]
    MissingData,
    #[error("payload has no analysis identifier")]
    MissingDeviceId,
    #[error("invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LoadDataResponse {
    #[serde(default)]
    pub data: Option<AnalysisData>,
}

impl LoadDataResponse {
    pub fn from_json(json: &str) -> Result<Self, PayloadError> {
        let response: Option<Self> = serde_json::from_str(json)?;
        response.ok_or(PayloadError::MissingData)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnalysisData {
    #[serde(rename = "ID", default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub series: Option<Vec<RawSeries>>,
    #[serde(default)]
    pub plot_bands: Option<Vec<RawPlotBand>>,
    #[serde(rename = "YLimitsJSON", default)]
    pub y_limits_json: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawSeries {
    #[serde(default)]
    pub sensor_value_observations: Option<RawSensorObservations>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawSensorObservations {
    #[serde(rename = "SensorID", default)]
    pub sensor_id: Option<Value>,
    #[serde(default)]
    pub sensor_name: Option<String>,
    #[serde(default)]
    pub value_observations: Option<Vec<RawObservation>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawObservation {
    #[serde(rename = "EndDateUTC", default)]
    pub end_date_utc: Option<String>,
    #[serde(default)]
    pub converted_value: Option<Value>,
    #[serde(default)]
    pub formatted_value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPlotBand {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symmetrical: Option<bool>,
    #[serde(default)]
    pub converted_from_value: Option<Value>,
    #[serde(default)]
    pub from_value: Option<Value>,
    #[serde(default)]
    pub converted_to_value: Option<Value>,
    #[serde(default)]
    pub to_value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawYLimit {
    #[serde(default)]
    min: Option<Value>,
    #[serde(default)]
    max: Option<Value>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A validated payload and what was dropped on the way.
#[derive(Debug, Clone)]
pub struct ParsedPayload {
    pub payload: AnalysisPayload,
    pub diagnostics: Diagnostics,
}

impl ParsedPayload {
    /// Decode a raw `LoadData` response body.
    pub fn from_json(json: &str, device_id: Option<&str>) -> Result<Self, PayloadError> {
        Self::from_response(LoadDataResponse::from_json(json)?, device_id, None)
    }

    /// Validate a decoded response. `device_id` and `device_name` override the
    /// values carried in the response.
    pub fn from_response(
        response: LoadDataResponse,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> Result<Self, PayloadError> {
        let data = response.data.ok_or(PayloadError::MissingData)?;
        let device_id = device_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| data.id.as_ref().and_then(id_string))
            .ok_or(PayloadError::MissingDeviceId)?;
        let device_name = device_name
            .map(str::to_string)
            .or(data.name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let mut diagnostics = Diagnostics::default();

        let mut series = Vec::new();
        for raw in data.series.unwrap_or_default() {
            let Some(sensor) = raw.sensor_value_observations else {
                debug!(%device_id, "series without sensor observations, skipping");
                diagnostics.skipped_series += 1;
                continue;
            };
            series.push(convert_series(sensor, &mut diagnostics));
        }

        let raw_bands = data.plot_bands.unwrap_or_default();
        let has_plot_bands = !raw_bands.is_empty();
        let mut bands = Vec::new();
        for raw in raw_bands {
            match convert_band(&raw) {
                Some(band) => bands.push(band),
                None => {
                    warn!(%device_id, band = ?raw.name, "skipping plot band with unusable bounds");
                    diagnostics.skipped_bands += 1;
                }
            }
        }

        // Axis limits only stand in when the analysis defines no plot bands at all.
        let fallback_band = if !has_plot_bands {
            data.y_limits_json
                .as_deref()
                .and_then(|json| parse_y_limits(&device_id, json))
        } else {
            None
        };

        Ok(Self {
            payload: AnalysisPayload {
                device_id,
                device_name,
                project: None,
                series,
                bands,
                fallback_band,
            },
            diagnostics,
        })
    }
}

fn convert_series(raw: RawSensorObservations, diagnostics: &mut Diagnostics) -> SensorSeries {
    let sensor_id = raw.sensor_id.as_ref().and_then(id_string);
    let sensor_name = raw
        .sensor_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Sensor-{}", sensor_id.as_deref().unwrap_or("?")));

    let observations = raw
        .value_observations
        .unwrap_or_default()
        .into_iter()
        .map(|obs| {
            let value = match obs.converted_value.as_ref() {
                None | Some(Value::Null) => None,
                Some(v) => {
                    let number = number(v);
                    if number.is_none() {
                        warn!(sensor = %sensor_name, value = %v, "non-numeric observation value treated as absent");
                        diagnostics.skipped_observations += 1;
                    }
                    number
                }
            };
            Observation {
                sensor_id: sensor_id.clone(),
                timestamp: obs.end_date_utc,
                value,
                formatted_value: obs.formatted_value.as_ref().and_then(text),
            }
        })
        .collect();

    SensorSeries {
        sensor_id,
        sensor_name,
        observations,
    }
}

fn convert_band(raw: &RawPlotBand) -> Option<ThresholdBand> {
    let min = coalesce(&raw.converted_from_value, &raw.from_value)?;
    let max = coalesce(&raw.converted_to_value, &raw.to_value)?;
    let symmetric = raw.symmetrical.unwrap_or(false);
    if !symmetric && min > max {
        return None;
    }
    let name = raw
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Threshold");
    Some(ThresholdBand::plot_band(name, min, max, symmetric))
}

fn parse_y_limits(device_id: &str, json: &str) -> Option<ThresholdBand> {
    let limits: Vec<RawYLimit> = match serde_json::from_str(json) {
        Ok(limits) => limits,
        Err(e) => {
            warn!(device_id, error = %e, "could not decode YLimitsJSON");
            return None;
        }
    };
    let first = limits.first()?;
    let min = first.min.as_ref().and_then(number);
    let max = first.max.as_ref().and_then(number);
    if min.is_none() && max.is_none() {
        return None;
    }
    Some(ThresholdBand::y_limit(min, max))
}

/// Converted value when present, raw value otherwise.
fn coalesce(converted: &Option<Value>, raw: &Option<Value>) -> Option<f64> {
    converted
        .as_ref()
        .and_then(number)
        .or_else(|| raw.as_ref().and_then(number))
}

fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Export file
// ---------------------------------------------------------------------------

/// A saved multi-project export: `{ "<project id>": { project_name, analyses: [...] } }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ExportFile {
    pub projects: BTreeMap<String, ExportProject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportProject {
    #[serde(default)]
    pub project_id: Option<Value>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub analyses: Vec<ExportAnalysis>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportAnalysis {
    #[serde(default)]
    pub analysis_id: Option<Value>,
    #[serde(default)]
    pub analysis_name: Option<String>,
    #[serde(default)]
    pub load_data_response: Option<LoadDataResponse>,
}

impl ExportFile {
    pub fn from_json(json: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// One entry per analysis, labelled for error reporting.
    pub fn into_payloads(self) -> Vec<(String, Result<ParsedPayload, PayloadError>)> {
        let mut out = Vec::new();
        for (key, project) in self.projects {
            let project_label = project
                .project_id
                .as_ref()
                .and_then(id_string)
                .unwrap_or(key);
            for (index, analysis) in project.analyses.into_iter().enumerate() {
                let analysis_id = analysis.analysis_id.as_ref().and_then(id_string);
                let label = analysis
                    .analysis_id
                    .as_ref()
                    .and_then(id_string)
                    .unwrap_or_else(|| format!("{project_label}#{index}"));
                let parsed = analysis
                    .load_data_response
                    .ok_or(PayloadError::MissingData)
                    .and_then(|response| {
                        ParsedPayload::from_response(
                            response,
                            analysis_id.as_deref(),
                            analysis.analysis_name.as_deref(),
                        )
                    })
                    .map(|mut parsed| {
                        parsed.payload.project = project.project_name.clone();
                        parsed
                    });
                out.push((label, parsed));
            }
        }
        out
    }
}
