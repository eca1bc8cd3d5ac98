//! Server log retrieval through log collection jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mdrill_common::{PollTimeout, Poller};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info};

use crate::client::AtlasClient;
use crate::error::AtlasError;

/// Requested size per log file in the archive.
const SIZE_PER_FILE_BYTES: u64 = 100_000_000;

#[derive(Debug, Error)]
pub enum LogCollectionError {
    #[error(transparent)]
    Atlas(#[from] AtlasError),

    #[error(transparent)]
    Timeout(#[from] PollTimeout),

    #[error("unexpected log collection job status {status}: {job}")]
    UnexpectedStatus { status: String, job: Value },

    #[error("log collection job did not produce a download url: {0}")]
    MissingDownloadUrl(Value),

    #[error("cluster document is missing `{0}`")]
    MissingField(&'static str),
}

/// Downloads server logs for finished test cases.
#[derive(Debug, Clone)]
pub struct LogCollector {
    admin: Arc<AtlasClient>,
    project_id: String,
    logs_dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl LogCollector {
    pub fn new(
        admin: Arc<AtlasClient>,
        project_id: impl Into<String>,
        logs_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            admin,
            project_id: project_id.into(),
            logs_dir: logs_dir.into(),
            timeout,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Archive path for a test.
    pub fn archive_path(&self, test_name: &str) -> PathBuf {
        self.logs_dir.join(format!("{test_name}-logs.tar.gz"))
    }

    /// Collect and download the logs of `cluster_name`.
    ///
    /// Each failed attempt (job creation, unexpected job status, download) is
    /// logged and the whole attempt is retried until the budget runs out.
    pub fn collect(&self, cluster_name: &str, test_name: &str) -> Result<PathBuf, LogCollectionError> {
        info!("Retrieving logs for {}", cluster_name);
        let params = self.job_parameters(cluster_name)?;
        let dest = self.archive_path(test_name);
        let poller = Poller::new(self.poll_interval, self.timeout);

        poller.poll::<LogCollectionError, _>(&format!("log collection for cluster {cluster_name:?}"), || {
            match self.attempt(&params, cluster_name, &dest) {
                Ok(()) => Ok(true),
                Err(err) => {
                    error!("Error retrieving logs for {:?}: {}", cluster_name, err);
                    Ok(false)
                }
            }
        })?;
        info!("Logs for {} written to {}", cluster_name, dest.display());
        Ok(dest)
    }

    fn job_parameters(&self, cluster_name: &str) -> Result<Value, LogCollectionError> {
        let cluster = self.admin.get(&format!(
            "/api/private/nds/groups/{}/clusters/{}",
            self.project_id, cluster_name
        ))?;
        let resource_name = cluster
            .get("deploymentItemName")
            .and_then(Value::as_str)
            .ok_or(LogCollectionError::MissingField("deploymentItemName"))?;
        let resource_type = match cluster.get("clusterType").and_then(Value::as_str) {
            Some("SHARDED") => "CLUSTER",
            _ => "REPLICASET",
        };
        Ok(json!({
            "resourceName": resource_name,
            "resourceType": resource_type,
            "redacted": false,
            "logTypes": ["FTDC", "MONGODB"],
            "sizeRequestedPerFileBytes": SIZE_PER_FILE_BYTES,
        }))
    }

    fn attempt(&self, params: &Value, cluster_name: &str, dest: &Path) -> Result<(), LogCollectionError> {
        let jobs_path = format!("groups/{}/logCollectionJobs", self.project_id);
        let job = self.admin.post(&jobs_path, params)?;
        let job_id = job
            .get("id")
            .and_then(Value::as_str)
            .ok_or(LogCollectionError::MissingField("id"))?
            .to_string();

        let mut finished = Value::Null;
        let poller = Poller::new(self.poll_interval, self.timeout);
        poller.poll::<LogCollectionError, _>(
            &format!("log collection job {job_id:?} for cluster {cluster_name:?}"),
            || {
                let job = self.admin.get(&format!("{jobs_path}/{job_id}"))?;
                let status = job
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>")
                    .to_string();
                match status.as_str() {
                    "SUCCESS" => {
                        finished = job;
                        Ok(true)
                    }
                    "IN_PROGRESS" => Ok(false),
                    _ => Err(LogCollectionError::UnexpectedStatus { status, job }),
                }
            },
        )?;

        let url = finished
            .get("downloadUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| LogCollectionError::MissingDownloadUrl(finished.clone()))?;
        info!("Log download URL: {}", url);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AtlasError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.admin.download(url, dest)?;
        Ok(())
    }
}
