//! Driver event capture for `events.json`.
//!
//! Command and connection-pool events are recorded in the shape the
//! `stats aggregate` command consumes: a `name`, a `requestId` and
//! `duration` (seconds) for commands, and an `address` for pool events.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use mdrill_common::EVENTS_FILE;
use mongodb::event::EventHandler;
use mongodb::event::cmap::CmapEvent;
use mongodb::event::command::CommandEvent;
use serde_json::{Value, json};
use tracing::warn;

fn observed_at() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Shared, append-only event buffer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Value>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Value) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(_) => warn!("Event buffer poisoned, dropping event"),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn command_handler(&self) -> EventHandler<CommandEvent> {
        let log = self.clone();
        EventHandler::callback(move |event: CommandEvent| {
            if let Some(value) = command_event(&event) {
                log.push(value);
            }
        })
    }

    pub fn cmap_handler(&self) -> EventHandler<CmapEvent> {
        let log = self.clone();
        EventHandler::callback(move |event: CmapEvent| {
            if let Some(value) = cmap_event(&event) {
                log.push(value);
            }
        })
    }

    /// Write `{"events": [...]}` into `dir`.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let events = self
            .events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default();
        let path = dir.join(EVENTS_FILE);
        std::fs::write(&path, json!({ "events": events }).to_string())?;
        Ok(path)
    }
}

fn command_event(event: &CommandEvent) -> Option<Value> {
    let value = match event {
        CommandEvent::Started(started) => json!({
            "name": "CommandStartedEvent",
            "commandName": started.command_name,
            "requestId": started.request_id,
            "address": started.connection.address.to_string(),
            "observedAt": observed_at(),
        }),
        CommandEvent::Succeeded(succeeded) => json!({
            "name": "CommandSucceededEvent",
            "commandName": succeeded.command_name,
            "requestId": succeeded.request_id,
            "address": succeeded.connection.address.to_string(),
            "duration": succeeded.duration.as_secs_f64(),
            "observedAt": observed_at(),
        }),
        CommandEvent::Failed(failed) => json!({
            "name": "CommandFailedEvent",
            "commandName": failed.command_name,
            "requestId": failed.request_id,
            "address": failed.connection.address.to_string(),
            "duration": failed.duration.as_secs_f64(),
            "failure": failed.failure.to_string(),
            "observedAt": observed_at(),
        }),
        _ => return None,
    };
    Some(value)
}

fn cmap_event(event: &CmapEvent) -> Option<Value> {
    let value = match event {
        CmapEvent::ConnectionCreated(created) => json!({
            "name": "ConnectionCreatedEvent",
            "address": created.address.to_string(),
            "connectionId": created.connection_id,
            "observedAt": observed_at(),
        }),
        CmapEvent::ConnectionClosed(closed) => json!({
            "name": "ConnectionClosedEvent",
            "address": closed.address.to_string(),
            "connectionId": closed.connection_id,
            "observedAt": observed_at(),
        }),
        CmapEvent::PoolCleared(cleared) => json!({
            "name": "PoolClearedEvent",
            "address": cleared.address.to_string(),
            "observedAt": observed_at(),
        }),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_events_wrapper() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new();
        log.push(json!({"name": "CommandStartedEvent", "requestId": 1}));
        log.push(json!({"name": "CommandSucceededEvent", "requestId": 1, "duration": 0.5}));

        let path = log.write_to(dir.path()).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["events"].as_array().unwrap().len(), 2);
        assert_eq!(written["events"][1]["duration"], 0.5);
    }

    #[test]
    fn empty_log_still_writes_file() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new();
        assert!(log.is_empty());
        log.write_to(dir.path()).unwrap();
        let written = std::fs::read_to_string(dir.path().join(EVENTS_FILE)).unwrap();
        assert_eq!(written, r#"{"events":[]}"#);
    }

    #[test]
    fn written_events_aggregate() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new();
        log.push(json!({"name": "CommandStartedEvent", "requestId": 7}));
        log.push(json!({"name": "CommandSucceededEvent", "requestId": 7, "duration": 2.0}));
        log.write_to(dir.path()).unwrap();
        std::fs::write(
            dir.path().join(mdrill_common::RESULTS_FILE),
            r#"{"numErrors":0,"numFailures":0,"numSuccesses":1}"#,
        )
        .unwrap();

        let stats = mdrill_common::aggregate_statistics(dir.path()).unwrap();
        assert_eq!(stats.avg_command_time, Some(2.0));
    }
}
