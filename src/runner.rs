//! Batch evaluation of many devices with a bounded worker pool.
//!
//! Each device is evaluated independently on the blocking pool; one `now` is
//! shared by the whole batch so findings are ordered consistently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::detect::{AlarmKey, AlarmRecord, Engine, Evaluation};
use crate::model::{AnalysisPayload, Diagnostics};
use crate::payload::{ParsedPayload, PayloadError};

/// A device that produced no evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub label: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub checked_at: DateTime<Utc>,
    /// Sorted by device id.
    pub evaluations: Vec<Evaluation>,
    /// One record per alarm key across the whole batch, sorted by key.
    pub alarms: Vec<AlarmRecord>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn diagnostics(&self) -> Diagnostics {
        let mut total = Diagnostics::default();
        for evaluation in &self.evaluations {
            total.merge(evaluation.diagnostics);
        }
        total
    }
}

/// Evaluate decoded export entries. Entries that failed to decode are carried
/// straight into the failure list.
pub async fn evaluate_entries(
    engine: Arc<Engine>,
    entries: Vec<(String, Result<ParsedPayload, PayloadError>)>,
    workers: usize,
    now: DateTime<Utc>,
) -> BatchReport {
    let mut failures = Vec::new();
    let mut payloads = Vec::new();
    for (label, entry) in entries {
        match entry {
            // Decode-time skips are reported with the evaluation.
            Ok(parsed) => payloads.push((parsed.payload, parsed.diagnostics)),
            Err(e) => {
                warn!(analysis = %label, error = %e, "analysis payload rejected");
                failures.push(BatchFailure {
                    label,
                    error: e.to_string(),
                });
            }
        }
    }

    let mut report = evaluate_batch(engine, payloads, workers, now).await;
    report.failures.extend(failures);
    report.failures.sort_by(|a, b| a.label.cmp(&b.label));
    report
}

/// Evaluate payloads concurrently, at most `workers` at a time.
///
/// A device id seen twice in one batch is evaluated once; the later copy is
/// reported as a failure so alarm keys stay unique across the batch.
pub async fn evaluate_batch(
    engine: Arc<Engine>,
    payloads: Vec<(AnalysisPayload, Diagnostics)>,
    workers: usize,
    now: DateTime<Utc>,
) -> BatchReport {
    let run_id = Uuid::new_v4();
    let span = info_span!("batch", %run_id);

    async move {
        info!(devices = payloads.len(), workers, "batch evaluation started");

        let mut failures = Vec::new();
        let mut seen = BTreeSet::new();
        let mut unique = Vec::new();
        for (payload, diagnostics) in payloads {
            if !seen.insert(payload.device_id.clone()) {
                warn!(device_id = %payload.device_id, "duplicate device in batch, skipping");
                failures.push(BatchFailure {
                    label: payload.device_id,
                    error: "duplicate device id in batch".to_string(),
                });
                continue;
            }
            unique.push((payload, diagnostics));
        }

        let results: Vec<_> = stream::iter(unique)
            .map(|(payload, diagnostics)| {
                let engine = engine.clone();
                let label = payload.device_id.clone();
                let parent = tracing::Span::current();
                let task = tokio::task::spawn_blocking(move || {
                    parent.in_scope(|| {
                        engine.evaluate(&payload, now).map(|mut evaluation| {
                            evaluation.diagnostics.merge(diagnostics);
                            evaluation
                        })
                    })
                });
                async move { (label, task.await) }
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

        let mut evaluations = Vec::new();
        for (label, joined) in results {
            match joined {
                Ok(Ok(evaluation)) => evaluations.push(evaluation),
                Ok(Err(e)) => {
                    warn!(device_id = %label, error = %e, "device evaluation rejected");
                    failures.push(BatchFailure {
                        label,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(device_id = %label, error = %e, "device evaluation task failed");
                    failures.push(BatchFailure {
                        label,
                        error: e.to_string(),
                    });
                }
            }
        }
        evaluations.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        failures.sort_by(|a, b| a.label.cmp(&b.label));

        let alarms = merge_alarms(&evaluations);
        info!(
            evaluated = evaluations.len(),
            failed = failures.len(),
            alarms = alarms.len(),
            "batch evaluation finished"
        );

        BatchReport {
            run_id,
            checked_at: now,
            evaluations,
            alarms,
            failures,
        }
    }
    .instrument(span)
    .await
}

/// Flatten per-device alarms into one record per key.
///
/// `sensor_down` alarms are keyed by sensor id, so a sensor shared by two
/// analyses yields the same key twice. Such records are merged: earliest issue
/// start, latest send time, one description line per analysis.
fn merge_alarms(evaluations: &[Evaluation]) -> Vec<AlarmRecord> {
    let mut groups: BTreeMap<AlarmKey, Vec<(&str, &AlarmRecord)>> = BTreeMap::new();
    for evaluation in evaluations {
        for alarm in &evaluation.alarms {
            groups
                .entry(alarm.key())
                .or_default()
                .push((evaluation.device_id.as_str(), alarm));
        }
    }

    groups
        .into_iter()
        .filter_map(|(key, group)| {
            let (_, first) = group.first()?;
            if group.len() == 1 {
                return Some((*first).clone());
            }
            let devices: Vec<&str> = group.iter().map(|(device, _)| *device).collect();
            warn!(
                device_id = %key.device_id,
                alarm_type = %key.alarm_type,
                analyses = ?devices,
                "alarm key raised by several analyses, merging"
            );
            let description = group
                .iter()
                .map(|(device, alarm)| format!("Analysis {device}: {}", alarm.description))
                .collect::<Vec<_>>()
                .join("\n");
            Some(AlarmRecord {
                device_id: key.device_id,
                alarm_type: key.alarm_type,
                description,
                issue_start_time: group.iter().map(|(_, a)| a.issue_start_time).min()?,
                last_alarm_sent_time: group.iter().map(|(_, a)| a.last_alarm_sent_time).max()?,
            })
        })
        .collect()
}
