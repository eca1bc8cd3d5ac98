//! Aggregate executor output into `stats.json`.
//!
//! Reads `results.json` and `events.json` from a working directory, pairs each
//! `CommandStartedEvent` with its completion event by `requestId`, and tracks
//! open connections per server address.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::stats::{EVENTS_FILE, RESULTS_FILE};

/// Output file written next to the inputs.
pub const STATS_FILE: &str = "stats.json";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct EventLog {
    #[serde(default)]
    events: Vec<Map<String, Value>>,
}

/// Raw results plus derived latency and connection figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStatistics {
    #[serde(flatten)]
    pub results: Map<String, Value>,
    /// Mean command duration, `None` when no command completed.
    pub avg_command_time: Option<f64>,
    pub p95_command_time: Option<f64>,
    pub p99_command_time: Option<f64>,
    /// Peak simultaneously open connections per server address.
    pub max_connection_counts: BTreeMap<String, i64>,
}

impl AggregatedStatistics {
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, AggregateError> {
        let path = dir.join(STATS_FILE);
        let body = serde_json::to_string_pretty(self).map_err(|source| AggregateError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, body).map_err(|source| AggregateError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Aggregate `results.json` and `events.json` found in `dir`.
pub fn aggregate_statistics(dir: &Path) -> Result<AggregatedStatistics, AggregateError> {
    let results: Map<String, Value> = read_json(&dir.join(RESULTS_FILE))?;
    let log: EventLog = read_json(&dir.join(EVENTS_FILE))?;

    let durations = command_durations(&log.events);
    debug!("Correlated {} command event pair(s)", durations.len());

    Ok(AggregatedStatistics {
        results,
        avg_command_time: mean(&durations),
        p95_command_time: percentile(&durations, 95.0),
        p99_command_time: percentile(&durations, 99.0),
        max_connection_counts: max_connection_counts(&log.events),
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AggregateError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AggregateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| AggregateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn event_name(event: &Map<String, Value>) -> &str {
    event.get("name").and_then(Value::as_str).unwrap_or_default()
}

fn command_durations(events: &[Map<String, Value>]) -> Vec<f64> {
    let mut pending: HashMap<String, &Map<String, Value>> = HashMap::new();
    let mut durations = Vec::new();

    for event in events {
        let name = event_name(event);
        if !name.starts_with("Command") {
            continue;
        }
        let Some(request_id) = event.get("requestId").map(Value::to_string) else {
            continue;
        };
        if name == "CommandStartedEvent" {
            pending.insert(request_id, event);
            continue;
        }
        if pending.remove(&request_id).is_none() {
            warn!("{} for request {} has no matching start event", name, request_id);
            continue;
        }
        if let Some(duration) = event.get("duration").and_then(Value::as_f64) {
            durations.push(duration);
        }
    }
    durations
}

fn max_connection_counts(events: &[Map<String, Value>]) -> BTreeMap<String, i64> {
    let mut open: HashMap<&str, i64> = HashMap::new();
    let mut peaks: BTreeMap<String, i64> = BTreeMap::new();

    for event in events {
        let name = event_name(event);
        if !(name.starts_with("Connection") || name.starts_with("Pool")) {
            continue;
        }
        let Some(address) = event.get("address").and_then(Value::as_str) else {
            continue;
        };
        let count = open.entry(address).or_insert(0);
        match name {
            "ConnectionCreatedEvent" => *count += 1,
            "ConnectionClosedEvent" => *count -= 1,
            _ => {}
        }
        let peak = peaks.entry(address.to_string()).or_insert(0);
        if *count > *peak {
            *peak = *count;
        }
    }
    peaks
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: Value) {
        std::fs::write(dir.join(name), value.to_string()).unwrap();
    }

    #[test]
    fn percentile_interpolates() {
        let values: Vec<f64> = (1..=5).map(f64::from).collect();
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        let p95 = percentile(&values, 95.0).unwrap();
        assert!((p95 - 4.8).abs() < 1e-9, "{p95}");
        assert_eq!(percentile(&[], 95.0), None);
        assert_eq!(mean(&values), Some(3.0));
    }

    #[test]
    fn correlates_commands_and_counts_connections() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            RESULTS_FILE,
            json!({"numErrors": 0, "numFailures": 0, "numSuccesses": 2}),
        );
        write(
            dir.path(),
            EVENTS_FILE,
            json!({"events": [
                {"name": "PoolCreatedEvent", "address": "a:27017"},
                {"name": "ConnectionCreatedEvent", "address": "a:27017"},
                {"name": "ConnectionCreatedEvent", "address": "a:27017"},
                {"name": "CommandStartedEvent", "requestId": 1},
                {"name": "CommandStartedEvent", "requestId": 2},
                {"name": "CommandSucceededEvent", "requestId": 2, "duration": 0.4},
                {"name": "ConnectionClosedEvent", "address": "a:27017"},
                {"name": "CommandFailedEvent", "requestId": 1, "duration": 0.2},
                {"name": "CommandSucceededEvent", "requestId": 3, "duration": 9.0},
                {"name": "ConnectionCreatedEvent", "address": "b:27017"}
            ]}),
        );

        let stats = aggregate_statistics(dir.path()).unwrap();
        let avg = stats.avg_command_time.unwrap();
        assert!((avg - 0.3).abs() < 1e-9);
        assert_eq!(stats.max_connection_counts["a:27017"], 2);
        assert_eq!(stats.max_connection_counts["b:27017"], 1);

        let path = stats.write_to(dir.path()).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["numSuccesses"], json!(2));
        assert!(written["p99CommandTime"].is_number());
        assert_eq!(written["maxConnectionCounts"]["a:27017"], json!(2));
    }

    #[test]
    fn missing_events_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), RESULTS_FILE, json!({}));
        let err = aggregate_statistics(dir.path()).unwrap_err();
        assert!(matches!(err, AggregateError::Read { .. }));
    }
}
