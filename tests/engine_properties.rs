use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use sensorwatch::detect::{
    AlarmType, Engine, EngineConfig, LivenessStatus, RecencyWindow, ViolationType,
};
use sensorwatch::payload::ParsedPayload;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap()
}

fn ts(hours_ago: i64) -> String {
    (now() - Duration::hours(hours_ago))
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// One sensor: `(id, name, [(hours_ago, value)])`.
fn sensor(id: u32, name: &str, points: &[(i64, f64)]) -> serde_json::Value {
    let observations: Vec<_> = points
        .iter()
        .map(|(h, v)| json!({ "EndDateUTC": ts(*h), "ConvertedValue": v, "FormattedValue": format!("{v:.3}") }))
        .collect();
    json!({
        "SensorValueObservations": {
            "SensorID": id,
            "SensorName": name,
            "ValueObservations": observations
        }
    })
}

fn response(series: Vec<serde_json::Value>, plot_bands: serde_json::Value) -> String {
    json!({
        "data": {
            "ID": 1046,
            "Name": "Upstream slope -Auto",
            "Series": series,
            "PlotBands": plot_bands
        }
    })
    .to_string()
}

fn engine(recency: RecencyWindow) -> Engine {
    Engine::new(EngineConfig {
        recency,
        fallback_hours: 24.0,
    })
}

fn parse(json: &str) -> sensorwatch::model::AnalysisPayload {
    ParsedPayload::from_json(json, None).unwrap().payload
}

#[test]
fn test_repeat_runs_are_identical() {
    let json = response(
        vec![
            sensor(1, "IPI-1", &[(20, 0.2), (14, 1.4), (8, -1.6)]),
            sensor(2, "IPI-2", &[(3, 0.1), (2, 0.1), (1, 0.1)]),
        ],
        json!([{ "Name": "Alert", "Symmetrical": true, "ConvertedFromValue": 0, "ConvertedToValue": 1.0 }]),
    );
    let payload = parse(&json);
    let engine = engine(RecencyWindow::Days(5));
    let first = engine.evaluate(&payload, now()).unwrap();
    let second = engine.evaluate(&payload, now()).unwrap();
    assert_eq!(first.alarms, second.alarms);
    assert_eq!(
        serde_json::to_string(&first.alarms).unwrap(),
        serde_json::to_string(&second.alarms).unwrap()
    );
    assert!(!first.alarms.is_empty());
}

#[test]
fn test_alarm_keys_are_unique() {
    let json = response(
        vec![
            sensor(1, "A", &[(40, 20.0), (30, 20.0)]),
            sensor(2, "B", &[(3, 20.0), (2, -5.0), (1, 20.0)]),
            sensor(3, "C", &[(50, 1.0)]),
        ],
        json!([
            { "Name": "Alert", "ConvertedFromValue": 0, "ConvertedToValue": 10 },
            { "Name": "Action", "ConvertedFromValue": -1, "ConvertedToValue": 15 }
        ]),
    );
    let evaluation = engine(RecencyWindow::Days(5))
        .evaluate(&parse(&json), now())
        .unwrap();
    let keys: HashSet<_> = evaluation.alarms.iter().map(|a| a.key()).collect();
    assert_eq!(keys.len(), evaluation.alarms.len());
    let thresholds = evaluation
        .alarms
        .iter()
        .filter(|a| a.alarm_type == AlarmType::ValueExceededThreshold)
        .count();
    assert_eq!(thresholds, 1);
}

#[test]
fn test_adaptive_liveness_threshold() {
    let engine = engine(RecencyWindow::Days(5));

    let json = response(vec![sensor(1, "PZ-1", &[(19, 1.0), (13, 1.0), (7, 1.0)])], json!([]));
    let evaluation = engine.evaluate(&parse(&json), now()).unwrap();
    assert_eq!(evaluation.status.sensors[0].status, LivenessStatus::Down);

    let json = response(vec![sensor(1, "PZ-1", &[(17, 1.0), (11, 1.0), (5, 1.0)])], json!([]));
    let evaluation = engine.evaluate(&parse(&json), now()).unwrap();
    assert_eq!(evaluation.status.sensors[0].status, LivenessStatus::Running);
}

#[test]
fn test_fallback_liveness_threshold() {
    let engine = engine(RecencyWindow::Days(5));

    let json = response(vec![sensor(1, "PZ-1", &[(30, 1.0)])], json!([]));
    let evaluation = engine.evaluate(&parse(&json), now()).unwrap();
    assert_eq!(evaluation.status.sensors[0].status, LivenessStatus::Down);

    let json = response(vec![sensor(1, "PZ-1", &[(10, 1.0)])], json!([]));
    let evaluation = engine.evaluate(&parse(&json), now()).unwrap();
    assert_eq!(evaluation.status.sensors[0].status, LivenessStatus::Running);
}

#[test]
fn test_symmetric_band_violation() {
    let json = response(
        vec![sensor(1, "TILT", &[(2, -1.2), (1, 0.9)])],
        json!([{ "Name": "Tilt", "Symmetrical": true, "ConvertedFromValue": 0, "ConvertedToValue": 1.0 }]),
    );
    let evaluation = engine(RecencyWindow::Days(5))
        .evaluate(&parse(&json), now())
        .unwrap();
    assert_eq!(evaluation.violations.len(), 1);
    let violation = &evaluation.violations[0];
    assert_eq!(violation.violation_type, ViolationType::ExceedsMaximumBelow);
    assert_eq!(violation.value, -1.2);
    assert!(violation.description.contains("current: 1.2000"));
}

#[test]
fn test_asymmetric_band_violation() {
    let json = response(
        vec![sensor(1, "LOAD", &[(3, 12.0), (2, -1.0), (1, 5.0)])],
        json!([{ "Name": "Range", "ConvertedFromValue": 0, "ConvertedToValue": 10 }]),
    );
    let evaluation = engine(RecencyWindow::Days(5))
        .evaluate(&parse(&json), now())
        .unwrap();
    let kinds: Vec<_> = evaluation.violations.iter().map(|v| v.violation_type).collect();
    assert_eq!(kinds, vec![ViolationType::AboveMaximum, ViolationType::BelowMinimum]);
}

#[test]
fn test_old_violation_is_dropped() {
    let json = response(
        vec![sensor(1, "LOAD", &[(24 * 10, 50.0), (2, 1.0), (1, 1.0)])],
        json!([{ "Name": "Range", "ConvertedFromValue": 0, "ConvertedToValue": 10 }]),
    );
    let evaluation = engine(RecencyWindow::Hours(12))
        .evaluate(&parse(&json), now())
        .unwrap();
    assert!(evaluation.violations.is_empty());
    assert!(evaluation.alarms.is_empty());
}

#[test]
fn test_all_down_versus_partial_down() {
    let engine = engine(RecencyWindow::Days(5));

    let json = response(
        vec![
            sensor(1, "A", &[(20, 1.0), (14, 1.0), (8, 1.0)]),
            sensor(2, "B", &[(30, 1.0)]),
            sensor(3, "C", &[(12, 1.0), (10, 1.0), (8, 1.0)]),
        ],
        json!([]),
    );
    let evaluation = engine.evaluate(&parse(&json), now()).unwrap();
    assert_eq!(evaluation.alarms.len(), 1);
    let alarm = &evaluation.alarms[0];
    assert_eq!(alarm.alarm_type, AlarmType::DeviceDown);
    assert_eq!(alarm.device_id, "1046");
    for name in ["(A)", "(B)", "(C)"] {
        assert!(alarm.description.contains(name), "{name} missing");
    }
    assert_eq!(alarm.issue_start_time, now() - Duration::hours(30));

    let json = response(
        vec![
            sensor(1, "A", &[(20, 1.0), (14, 1.0), (8, 1.0)]),
            sensor(2, "B", &[(30, 1.0)]),
            sensor(3, "C", &[(3, 1.0), (2, 1.0), (1, 1.0)]),
        ],
        json!([]),
    );
    let evaluation = engine.evaluate(&parse(&json), now()).unwrap();
    assert_eq!(evaluation.alarms.len(), 2);
    assert!(evaluation.alarms.iter().all(|a| a.alarm_type == AlarmType::SensorDown));
    let ids: Vec<&str> = evaluation.alarms.iter().map(|a| a.device_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[test]
fn test_empty_input_yields_no_alarms() {
    let json = response(Vec::new(), json!([]));
    let evaluation = engine(RecencyWindow::Days(5))
        .evaluate(&parse(&json), now())
        .unwrap();
    assert!(evaluation.alarms.is_empty());
    assert_eq!(evaluation.status.sensors.len(), 0);
}

#[test]
fn test_malformed_input_does_not_abort() {
    let json = json!({
        "data": {
            "ID": "2001",
            "Series": [
                { "SensorValueObservations": { "SensorID": 1, "ValueObservations": [
                    { "EndDateUTC": "garbage", "ConvertedValue": 99.0 }
                ] } },
                { "SensorValueObservations": { "SensorID": 2, "ValueObservations": [
                    { "EndDateUTC": ts(40), "ConvertedValue": 1.0 }
                ] } }
            ],
            "PlotBands": [{ "Name": "Half" }],
            "YLimitsJSON": "[{\"min\": 0, \"max\": 10}]"
        }
    })
    .to_string();
    let parsed = ParsedPayload::from_json(&json, None).unwrap();
    assert_eq!(parsed.diagnostics.skipped_bands, 1);

    let evaluation = engine(RecencyWindow::Days(5))
        .evaluate(&parsed.payload, now())
        .unwrap();
    assert_eq!(evaluation.status.sensors[0].status, LivenessStatus::Error);
    assert_eq!(evaluation.status.sensors[1].status, LivenessStatus::Down);
    // The unparsable sample cannot be placed in the window, so it never violates.
    assert!(evaluation.violations.is_empty());
    let alarm = &evaluation.alarms[0];
    assert_eq!(alarm.alarm_type, AlarmType::SensorDown);
    assert_eq!(alarm.device_id, "2");
}
