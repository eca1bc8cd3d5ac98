//! Workload loop.
//!
//! Runs every operation of the workload in order, over and over, until the
//! stop flag is raised. Each operation lands in exactly one bucket: an error
//! (the driver raised), a failure (the result did not match the expected
//! one) or a success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mdrill_common::{ExecutionStatistics, is_subset};
use mongodb::Collection;
use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::workload::{OperationName, Workload, WorkloadOperation};

/// Pause between checks of the stop flag when there is nothing to run.
const IDLE_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Driver(#[from] mongodb::error::Error),

    #[error("invalid arguments: {0}")]
    Arguments(#[from] mongodb::bson::ser::Error),

    #[error("invalid `limit` argument: {0}")]
    Limit(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub errors: i64,
    pub failures: i64,
    pub successes: i64,
    pub iterations: i64,
}

impl Counters {
    pub fn record(&mut self, name: OperationName, outcome: &Result<bool, OperationError>) {
        match outcome {
            Ok(true) => self.successes += 1,
            Ok(false) => {
                debug!("{} returned an unexpected result", name.as_str());
                self.failures += 1;
            }
            Err(e) => {
                warn!("{} failed: {}", name.as_str(), e);
                self.errors += 1;
            }
        }
    }

    pub fn statistics(&self) -> ExecutionStatistics {
        ExecutionStatistics {
            num_errors: self.errors,
            num_failures: self.failures,
            num_successes: self.successes,
            num_iterations: self.iterations,
        }
    }
}

/// Run the workload until `stop` is set.
pub async fn run(
    collection: &Collection<Document>,
    workload: &Workload,
    stop: &AtomicBool,
) -> ExecutionStatistics {
    info!(
        "Running {} operation(s) against {}.{}",
        workload.operations.len(),
        workload.database,
        workload.collection
    );
    let mut counters = Counters::default();

    'outer: while !stop.load(Ordering::SeqCst) {
        if workload.operations.is_empty() {
            tokio::time::sleep(IDLE_TICK).await;
            continue;
        }
        for operation in &workload.operations {
            if stop.load(Ordering::SeqCst) {
                break 'outer;
            }
            let outcome = execute(collection, operation)
                .await
                .map(|actual| result_matches(&actual, operation.result.as_ref()));
            counters.record(operation.name, &outcome);
        }
        counters.iterations += 1;
    }

    info!("Stop requested after {} iteration(s)", counters.iterations);
    counters.statistics()
}

/// An operation without an expected result always matches.
pub fn result_matches(actual: &Value, expected: Option<&Value>) -> bool {
    match expected {
        Some(expected) => is_subset(actual, expected),
        None => true,
    }
}

fn document(map: Map<String, Value>) -> Result<Document, OperationError> {
    Ok(mongodb::bson::to_document(&map)?)
}

fn to_json(value: Bson) -> Value {
    value.into_relaxed_extjson()
}

async fn execute(
    collection: &Collection<Document>,
    operation: &WorkloadOperation,
) -> Result<Value, OperationError> {
    let filter = document(operation.map_argument("filter"))?;
    match operation.name {
        OperationName::InsertOne => {
            let doc = document(operation.map_argument("document"))?;
            let result = collection.insert_one(doc).await?;
            Ok(serde_json::json!({ "insertedId": to_json(result.inserted_id) }))
        }
        OperationName::Find => {
            let mut find = collection.find(filter);
            if let Some(Value::Object(sort)) = operation.arguments.get("sort") {
                find = find.sort(document(sort.clone())?);
            }
            if let Some(limit) = operation.arguments.get("limit") {
                let limit = limit
                    .as_i64()
                    .ok_or_else(|| OperationError::Limit(limit.clone()))?;
                find = find.limit(limit);
            }
            let mut cursor = find.await?;
            let mut documents = Vec::new();
            while cursor.advance().await? {
                let current: Document = cursor.deserialize_current()?;
                documents.push(to_json(Bson::Document(current)));
            }
            Ok(Value::Array(documents))
        }
        OperationName::UpdateOne => {
            let update = document(operation.map_argument("update"))?;
            let result = collection.update_one(filter, update).await?;
            Ok(serde_json::json!({
                "matchedCount": result.matched_count,
                "modifiedCount": result.modified_count,
                "upsertedId": result.upserted_id.map(to_json),
            }))
        }
        OperationName::CountDocuments => {
            let count = collection.count_documents(filter).await?;
            Ok(Value::from(count))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_expectation_matches_anything() {
        assert!(result_matches(&json!({"insertedId": 3}), None));
    }

    #[test]
    fn expectation_is_a_subset_check() {
        let actual = json!({"matchedCount": 1, "modifiedCount": 1, "upsertedId": null});
        assert!(result_matches(&actual, Some(&json!({"modifiedCount": 1}))));
        assert!(!result_matches(&actual, Some(&json!({"modifiedCount": 0}))));
    }

    #[test]
    fn count_compares_numerically() {
        assert!(result_matches(&json!(5), Some(&json!(5.0))));
    }

    #[test]
    fn counters_bucket_each_outcome() {
        let mut counters = Counters::default();
        counters.record(OperationName::Find, &Ok(true));
        counters.record(OperationName::Find, &Ok(true));
        counters.record(OperationName::UpdateOne, &Ok(false));
        counters.record(OperationName::InsertOne, &Err(OperationError::Limit(json!("x"))));
        counters.iterations = 1;

        let stats = counters.statistics();
        assert_eq!(stats.num_successes, 2);
        assert_eq!(stats.num_failures, 1);
        assert_eq!(stats.num_errors, 1);
        assert_eq!(stats.num_iterations, 1);
        assert!(stats.verdict().is_failed());
    }

    #[test]
    fn fresh_counters_fail_the_verdict() {
        // Zero successes is never a pass.
        assert!(Counters::default().statistics().verdict().is_failed());
    }
}
