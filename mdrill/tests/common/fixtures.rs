use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mdrill::{DeploymentProbe, MaintenanceTestCase, RunOptions, XunitWriter};
use mdrill_common::{Poller, RunTimings, TestCaseConfiguration, TestSpecification};
use tempfile::TempDir;

use super::mock::{MockCluster, MockProbe};

/// Executor that reports `{errors, failures, successes}` when interrupted.
pub fn reporting_executor(errors: i64, failures: i64, successes: i64) -> String {
    format!(
        r#"trap 'echo "{{\"numErrors\":{errors},\"numFailures\":{failures},\"numSuccesses\":{successes}}}" > results.json; exit 0' INT
while true; do sleep 0.05; done"#
    )
}

pub fn write_executor(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("executor.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write executor");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("Failed to make executor executable");
    path
}

/// Temporary working directory plus a fast configuration pointing at it.
pub struct Workspace {
    pub dir: TempDir,
    pub timings: RunTimings,
    pub executor: PathBuf,
}

impl Workspace {
    pub fn new(executor_body: &str) -> Self {
        crate::test_log!("FIXTURE: Creating workspace");
        let dir = TempDir::new().expect("Failed to create temp dir");
        let executor = write_executor(dir.path(), executor_body);

        let mut timings = RunTimings::zero();
        timings.startup_grace = Duration::from_millis(100);
        timings.stop_timeout = Duration::from_secs(5);
        timings.failover_retry_interval = Duration::from_millis(20);
        timings.failover_timeout = Duration::from_secs(2);
        timings.region_assert_interval = Duration::from_millis(10);
        timings.region_assert_timeout = Duration::from_secs(1);

        Self {
            dir,
            timings,
            executor,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Arc<TestCaseConfiguration> {
        Arc::new(TestCaseConfiguration {
            organization_name: "MongoDB".into(),
            project_name: "mdrill-tests".into(),
            name_salt: "salt".into(),
            polling_frequency: 100.0,
            polling_timeout: Duration::from_secs(2),
            database_username: "atlasuser".into(),
            database_password: "mypassword123".into(),
            workload_executor: self.executor.clone(),
            workdir: self.path().to_path_buf(),
            timings: self.timings,
        })
    }

    pub fn poller(&self) -> Poller {
        self.config().poller()
    }

    pub fn xunit(&self) -> XunitWriter {
        XunitWriter::new(self.path().join("xunit"))
    }

    pub fn case(&self, test_name: &str, spec_yaml: &str, cluster: &MockCluster) -> MaintenanceTestCase {
        self.case_with_probe(test_name, spec_yaml, cluster, Arc::new(MockProbe::default()))
    }

    pub fn case_with_probe(
        &self,
        test_name: &str,
        spec_yaml: &str,
        cluster: &MockCluster,
        probe: Arc<dyn DeploymentProbe>,
    ) -> MaintenanceTestCase {
        let spec = TestSpecification::from_yaml_str(spec_yaml).expect("Failed to parse spec");
        MaintenanceTestCase::new(
            test_name,
            spec,
            Box::new(cluster.clone()),
            probe,
            self.config(),
        )
    }

    pub fn options(&self) -> RunOptions {
        RunOptions::default()
    }
}

pub const SCALE_UP: &str = r#"
initialConfiguration:
  clusterConfiguration:
    clusterType: REPLICASET
    providerSettings:
      providerName: AWS
      regionName: US_WEST_1
      instanceSizeName: M10
  processArgs: {}
operations:
  - setClusterConfiguration:
      clusterConfiguration:
        providerSettings:
          providerName: AWS
          regionName: US_WEST_1
          instanceSizeName: M20
driverWorkload:
  database: test_db
  collection: test_coll
  operations:
    - object: collection
      name: find
      arguments:
        filter: {}
"#;

/// Initial configuration followed by a custom operation list.
pub fn spec_with_operations(operations: &str) -> String {
    format!(
        r#"
initialConfiguration:
  clusterConfiguration:
    providerSettings:
      providerName: AWS
      instanceSizeName: M10
operations:
{operations}
driverWorkload:
  database: test_db
  collection: test_coll
  operations: []
"#
    )
}
