//! Sanity check for a workload executor implementation.
//!
//! Runs the executor against a live deployment with a simple counting
//! workload and checks that it follows the executor protocol: it survives
//! startup, stops on request, and reports usable statistics.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use mdrill_common::ExecutionStatistics;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::supervisor::{WorkloadError, WorkloadSupervisor};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error("workload executor did not report statistics")]
    Unreported,

    #[error("workload executor reported negative statistics: {0}")]
    Negative(ExecutionStatistics),

    #[error("workload executor reported errors or failures: {0}")]
    Failures(ExecutionStatistics),

    #[error("workload executor reported no successful operations: {0}")]
    NoSuccesses(ExecutionStatistics),
}

#[derive(Debug, Clone)]
pub struct ExecutorValidator {
    executor: PathBuf,
    workdir: PathBuf,
    run_for: Duration,
    startup_grace: Duration,
    stop_timeout: Duration,
}

impl ExecutorValidator {
    pub fn new(executor: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            executor: executor.into(),
            workdir: workdir.into(),
            run_for: Duration::from_secs(5),
            startup_grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_run_for(mut self, run_for: Duration) -> Self {
        self.run_for = run_for;
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Workload used for validation: an endless `$inc` on one document.
    pub fn workload() -> Value {
        json!({
            "database": "validation_db",
            "collection": "validation_coll",
            "testData": [{"_id": "validation_sentinel", "count": 0}],
            "operations": [{
                "object": "collection",
                "name": "updateOne",
                "arguments": {
                    "filter": {"_id": "validation_sentinel"},
                    "update": {"$inc": {"count": 1}}
                }
            }]
        })
    }

    pub fn validate(&self, connection_string: &str) -> Result<ExecutionStatistics, ValidationError> {
        let mut supervisor = WorkloadSupervisor::new(&self.workdir, self.stop_timeout);
        supervisor.spawn(
            &self.executor,
            connection_string,
            &Self::workload().to_string(),
            self.startup_grace,
        )?;
        info!("Letting the workload run for {:?}", self.run_for);
        thread::sleep(self.run_for);

        let stats = match supervisor.stop() {
            Ok(stats) => stats,
            Err(err) => {
                supervisor.terminate();
                return Err(err.into());
            }
        };
        info!("Workload statistics: {}", stats);
        check_statistics(stats)?;
        Ok(stats)
    }
}

/// Statistics a correct executor must produce for the validation workload.
pub fn check_statistics(stats: ExecutionStatistics) -> Result<(), ValidationError> {
    if stats.is_unreported() {
        return Err(ValidationError::Unreported);
    }
    if stats.has_negative() {
        return Err(ValidationError::Negative(stats));
    }
    if stats.num_errors > 0 || stats.num_failures > 0 {
        return Err(ValidationError::Failures(stats));
    }
    if stats.num_successes == 0 {
        return Err(ValidationError::NoSuccesses(stats));
    }
    Ok(())
}
