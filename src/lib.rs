//! sensorwatch -- liveness and threshold-violation alarms for remote instrumentation.
//!
//! This crate turns analysis payloads exported from a sensor analytics portal
//! into deduplicated alarm records: sensors that stopped reporting, devices
//! whose every sensor went silent, and values outside configured bands.
//! Fetching, persistence and notification delivery live outside the crate.

pub mod config;
pub mod detect;
pub mod model;
pub mod payload;
pub mod runner;
pub mod timestamp;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::detect::{Engine, Evaluation};
use crate::payload::{ExportFile, ParsedPayload};
use crate::runner::BatchReport;

/// Evaluate a single saved `LoadData` response.
pub fn evaluate_file(
    engine: &Engine,
    path: &Path,
    device_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Evaluation> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read payload: {}", path.display()))?;
    let parsed = ParsedPayload::from_json(&json, device_id)
        .with_context(|| format!("failed to decode payload: {}", path.display()))?;
    let mut evaluation = engine.evaluate(&parsed.payload, now)?;
    evaluation.diagnostics.merge(parsed.diagnostics);
    Ok(evaluation)
}

/// Evaluate every analysis in a multi-project export file.
pub async fn evaluate_export(
    engine: Arc<Engine>,
    path: &Path,
    workers: usize,
    now: DateTime<Utc>,
) -> Result<BatchReport> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read export: {}", path.display()))?;
    let export = ExportFile::from_json(&json)
        .with_context(|| format!("failed to decode export: {}", path.display()))?;
    tracing::info!(path = %path.display(), projects = export.projects.len(), "export loaded");
    Ok(runner::evaluate_entries(engine, export.into_payloads(), workers, now).await)
}
