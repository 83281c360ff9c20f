//! Grouping of raw findings into one alarm per `(device_id, alarm_type)`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::detect::liveness::LivenessResult;
use crate::detect::recency::RecencyFilter;
use crate::detect::threshold::{ViolationRecord, ViolationType};
use crate::detect::{AlarmKey, AlarmRecord, AlarmType};

/// How many down sensors a `device_down` description lists before summarizing.
const MAX_LISTED_SENSORS: usize = 5;

/// Alarms for one device plus the number of findings that could not be keyed.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub alarms: Vec<AlarmRecord>,
    pub skipped_records: usize,
}

enum Accumulator<'a> {
    DeviceDown(Vec<&'a LivenessResult>),
    SensorDown(&'a LivenessResult),
    Violations(Vec<&'a ViolationRecord>),
}

impl Accumulator<'_> {
    fn issue_start_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Accumulator::DeviceDown(sensors) => {
                sensors.iter().filter_map(|s| s.last_observation_time).min()
            }
            Accumulator::SensorDown(sensor) => sensor.last_observation_time,
            Accumulator::Violations(records) => records.iter().map(|v| v.timestamp).min(),
        }
    }

    fn description(&self) -> String {
        match self {
            Accumulator::DeviceDown(sensors) => describe_device_down(sensors),
            Accumulator::SensorDown(sensor) => sensor.reason.clone(),
            Accumulator::Violations(records) => describe_violations(records),
        }
    }
}

/// Collapse one device's findings into alarm records.
///
/// `violations` are expected to be recency-filtered already; `liveness` is
/// filtered here on each sensor's last observation time. When every sensor of
/// the device is down and recent, a single `device_down` alarm replaces the
/// per-sensor ones.
pub fn aggregate(
    device_id: &str,
    violations: &[ViolationRecord],
    liveness: &[LivenessResult],
    filter: &RecencyFilter,
) -> Aggregation {
    let mut skipped_records = 0;
    let mut groups: BTreeMap<AlarmKey, Accumulator<'_>> = BTreeMap::new();

    let down: Vec<&LivenessResult> = liveness
        .iter()
        .filter(|r| r.is_down() && filter.is_recent_opt(r.last_observation_time))
        .collect();

    if !down.is_empty() && down.len() == liveness.len() {
        groups.insert(
            AlarmKey::new(device_id, AlarmType::DeviceDown),
            Accumulator::DeviceDown(down),
        );
    } else {
        for sensor in down {
            let Some(sensor_id) = sensor.sensor_id.as_deref().filter(|id| !id.is_empty()) else {
                warn!(
                    device_id,
                    sensor = %sensor.sensor_name,
                    "down sensor has no identifier, skipping"
                );
                skipped_records += 1;
                continue;
            };
            let key = AlarmKey::new(sensor_id, AlarmType::SensorDown);
            if groups.contains_key(&key) {
                warn!(device_id, sensor_id, "duplicate sensor identifier, keeping first");
                skipped_records += 1;
                continue;
            }
            groups.insert(key, Accumulator::SensorDown(sensor));
        }
    }

    if !violations.is_empty() {
        groups.insert(
            AlarmKey::new(device_id, AlarmType::ValueExceededThreshold),
            Accumulator::Violations(violations.iter().collect()),
        );
    }

    let now = filter.now();
    let alarms: Vec<AlarmRecord> = groups
        .into_iter()
        .map(|(key, acc)| AlarmRecord {
            device_id: key.device_id,
            alarm_type: key.alarm_type,
            description: acc.description(),
            issue_start_time: acc.issue_start_time().unwrap_or(now),
            last_alarm_sent_time: now,
        })
        .collect();

    debug!(device_id, alarms = alarms.len(), skipped_records, "findings aggregated");
    Aggregation {
        alarms,
        skipped_records,
    }
}

fn describe_device_down(sensors: &[&LivenessResult]) -> String {
    let mut lines = vec![format!("DEVICE DOWN: all {} sensors down", sensors.len())];
    for sensor in sensors.iter().take(MAX_LISTED_SENSORS) {
        lines.push(format!(
            "  Sensor ID {} ({}): {}",
            sensor.sensor_id.as_deref().unwrap_or("?"),
            sensor.sensor_name,
            sensor.reason
        ));
    }
    if sensors.len() > MAX_LISTED_SENSORS {
        lines.push(format!("  +{} more", sensors.len() - MAX_LISTED_SENSORS));
    }
    lines.join("\n")
}

fn describe_violations(records: &[&ViolationRecord]) -> String {
    #[derive(Default)]
    struct PerBand<'a> {
        count: usize,
        types: BTreeSet<ViolationType>,
        sensors: BTreeSet<&'a str>,
    }

    let mut by_band: BTreeMap<&str, PerBand<'_>> = BTreeMap::new();
    for record in records {
        let entry = by_band.entry(record.threshold.name.as_str()).or_default();
        entry.count += 1;
        entry.types.insert(record.violation_type);
        entry.sensors.insert(record.sensor_name.as_str());
    }

    let sensor_count = records
        .iter()
        .map(|r| r.sensor_name.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let mut lines = vec![format!(
        "THRESHOLD VIOLATIONS: {} across {} sensor(s)",
        records.len(),
        sensor_count
    )];
    for (name, band) in by_band {
        let types: Vec<String> = band.types.iter().map(ToString::to_string).collect();
        let sensors: Vec<&str> = band.sensors.into_iter().collect();
        lines.push(format!(
            "  {name}: {} violation(s) [{}] on {}",
            band.count,
            types.join(", "),
            sensors.join(", ")
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::liveness::{LivenessBasis, LivenessStatus};
    use crate::detect::recency::RecencyWindow;
    use crate::model::ThresholdBand;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap()
    }

    fn filter() -> RecencyFilter {
        RecencyFilter::new(RecencyWindow::Days(5), now())
    }

    fn sensor(id: &str, status: LivenessStatus, hours_ago: i64) -> LivenessResult {
        LivenessResult {
            sensor_id: Some(id.to_string()),
            sensor_name: format!("S-{id}"),
            status,
            basis: LivenessBasis::AdaptiveInterval,
            reason: format!("reason {id}"),
            last_observation: None,
            last_observation_time: Some(now() - Duration::hours(hours_ago)),
            hours_since_last: Some(hours_ago as f64),
            interval_hours_between_last_two: Some(1.0),
        }
    }

    fn violation(sensor: &str, band: &str, kind: ViolationType, hours_ago: i64) -> ViolationRecord {
        ViolationRecord {
            sensor_id: Some(sensor.to_string()),
            sensor_name: format!("S-{sensor}"),
            timestamp: now() - Duration::hours(hours_ago),
            value: 11.0,
            formatted_value: "11".to_string(),
            threshold: ThresholdBand::plot_band(band, 0.0, 10.0, false),
            violation_type: kind,
            description: String::new(),
        }
    }

    #[test]
    fn test_all_down_is_one_device_alarm() {
        let liveness = vec![
            sensor("1", LivenessStatus::Down, 10),
            sensor("2", LivenessStatus::Down, 30),
            sensor("3", LivenessStatus::Down, 20),
        ];
        let out = aggregate("1046", &[], &liveness, &filter());
        assert_eq!(out.alarms.len(), 1);
        let alarm = &out.alarms[0];
        assert_eq!(alarm.device_id, "1046");
        assert_eq!(alarm.alarm_type, AlarmType::DeviceDown);
        assert_eq!(alarm.issue_start_time, now() - Duration::hours(30));
        assert_eq!(alarm.last_alarm_sent_time, now());
        for id in ["1", "2", "3"] {
            assert!(alarm.description.contains(&format!("Sensor ID {id} (S-{id}): reason {id}")));
        }
    }

    #[test]
    fn test_partial_down_is_per_sensor() {
        let liveness = vec![
            sensor("1", LivenessStatus::Down, 10),
            sensor("2", LivenessStatus::Running, 1),
            sensor("3", LivenessStatus::Down, 20),
        ];
        let out = aggregate("1046", &[], &liveness, &filter());
        assert_eq!(out.alarms.len(), 2);
        assert!(out.alarms.iter().all(|a| a.alarm_type == AlarmType::SensorDown));
        let ids: Vec<&str> = out.alarms.iter().map(|a| a.device_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(out.alarms[0].description, "reason 1");
    }

    #[test]
    fn test_stale_down_sensor_breaks_device_down() {
        // Sensor 3 went silent long before the window, so it is not a finding.
        let liveness = vec![
            sensor("1", LivenessStatus::Down, 10),
            sensor("2", LivenessStatus::Down, 10),
            sensor("3", LivenessStatus::Down, 24 * 30),
        ];
        let out = aggregate("1046", &[], &liveness, &filter());
        assert_eq!(out.alarms.len(), 2);
        assert!(out.alarms.iter().all(|a| a.alarm_type == AlarmType::SensorDown));
    }

    #[test]
    fn test_device_down_truncates_listing() {
        let liveness: Vec<LivenessResult> = (1..=8)
            .map(|i| sensor(&i.to_string(), LivenessStatus::Down, 5))
            .collect();
        let out = aggregate("9", &[], &liveness, &filter());
        assert_eq!(out.alarms.len(), 1);
        let description = &out.alarms[0].description;
        assert!(description.starts_with("DEVICE DOWN: all 8 sensors down"));
        assert!(description.contains("Sensor ID 5 "));
        assert!(!description.contains("Sensor ID 6 "));
        assert!(description.ends_with("  +3 more"));
    }

    #[test]
    fn test_violations_grouped_per_device() {
        let violations = vec![
            violation("1", "Alert", ViolationType::AboveMaximum, 3),
            violation("2", "Alert", ViolationType::BelowMinimum, 9),
            violation("1", "Action", ViolationType::AboveMaximum, 1),
        ];
        let out = aggregate("1046", &violations, &[], &filter());
        assert_eq!(out.alarms.len(), 1);
        let alarm = &out.alarms[0];
        assert_eq!(alarm.alarm_type, AlarmType::ValueExceededThreshold);
        assert_eq!(alarm.issue_start_time, now() - Duration::hours(9));
        assert_eq!(
            alarm.description,
            "THRESHOLD VIOLATIONS: 3 across 2 sensor(s)\n  \
             Action: 1 violation(s) [above_maximum] on S-1\n  \
             Alert: 2 violation(s) [above_maximum, below_minimum] on S-1, S-2"
        );
    }

    #[test]
    fn test_missing_sensor_id_is_skipped() {
        let mut anonymous = sensor("x", LivenessStatus::Down, 2);
        anonymous.sensor_id = None;
        let liveness = vec![anonymous, sensor("2", LivenessStatus::Running, 1)];
        let out = aggregate("1046", &[], &liveness, &filter());
        assert!(out.alarms.is_empty());
        assert_eq!(out.skipped_records, 1);
    }

    #[test]
    fn test_empty_input() {
        let out = aggregate("1046", &[], &[], &filter());
        assert!(out.alarms.is_empty());
        assert_eq!(out.skipped_records, 0);
    }
}
