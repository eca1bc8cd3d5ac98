//! One maintenance test case: a cluster, a workload and a plan.
//!
//! Lifecycle:
//! `Uninitialized -> Initializing -> Ready -> Executing -> AwaitingIdle ->
//! Verifying -> Completed -> TornDown`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use mdrill_atlas::{AtlasError, ClusterResource, codes};
use mdrill_common::{
    ClusterConfiguration, ExecutionStatistics, Operation, PollTimeout, Poller, SubsetMismatch,
    TestCaseConfiguration, TestSpecification, Timer, Verdict, assert_subset,
    test_name_from_spec_file,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionStringError, build_connection_string};
use crate::deployment::{DeploymentError, DeploymentProbe};
use crate::interrupt::Interrupt;
use crate::report::{OperationRecord, Outcome, Stage, TestCaseReport};
use crate::supervisor::{SupervisorState, WorkloadError, WorkloadSupervisor};

#[derive(Debug, Error)]
pub enum TestCaseError {
    #[error(transparent)]
    Atlas(#[from] AtlasError),

    #[error(transparent)]
    Timeout(#[from] PollTimeout),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    ConnectionString(#[from] ConnectionStringError),

    #[error("cluster configuration does not match: {0}")]
    ConfigurationMismatch(#[from] SubsetMismatch),

    #[error("Primary in cluster not in expected region '{expected}' (actual region '{actual}')")]
    RegionMismatch { expected: String, actual: String },

    #[error("invalid maintenance plan: operation {index} sets neither clusterConfiguration nor processArgs")]
    InvalidPlan { index: usize },

    #[error("cluster document is missing `{0}`")]
    MissingField(&'static str),

    #[error("interrupted")]
    Interrupted,
}

impl TestCaseError {
    /// Outcome recorded when this error ends a case at `stage`.
    pub fn into_outcome(self, stage: Stage) -> Outcome {
        match self {
            Self::ConfigurationMismatch(_) | Self::RegionMismatch { .. } => {
                Outcome::ConfigurationMismatch {
                    stage,
                    message: self.to_string(),
                }
            }
            Self::Interrupted => Outcome::Interrupted { stage },
            other => Outcome::Infrastructure {
                stage,
                message: other.to_string(),
            },
        }
    }
}

/// Error tagged with the lifecycle stage it happened in.
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: TestCaseError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T, E: Into<TestCaseError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure {
            stage,
            error: error.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Uninitialized,
    Initializing,
    Ready,
    Executing,
    AwaitingIdle,
    Verifying,
    Completed(Verdict),
    TornDown,
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Executing => write!(f, "executing"),
            Self::AwaitingIdle => write!(f, "awaiting_idle"),
            Self::Verifying => write!(f, "verifying"),
            Self::Completed(verdict) => write!(f, "completed({verdict})"),
            Self::TornDown => write!(f, "torn_down"),
        }
    }
}

/// Hook for collecting diagnostics once a case has a verdict.
pub trait ArtifactCollector: Send + Sync {
    fn collect(&self, cluster_name: &str, test_name: &str) -> Result<PathBuf, String>;
}

impl ArtifactCollector for mdrill_atlas::LogCollector {
    fn collect(&self, cluster_name: &str, test_name: &str) -> Result<PathBuf, String> {
        mdrill_atlas::LogCollector::collect(self, cluster_name, test_name).map_err(|e| e.to_string())
    }
}

/// Per-run knobs that are not part of the shared configuration.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Keep the cluster after the case finishes.
    pub persist_cluster: bool,
    pub interrupt: Interrupt,
    pub artifacts: Option<Arc<dyn ArtifactCollector>>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("persist_cluster", &self.persist_cluster)
            .field("interrupt", &self.interrupt)
            .field("artifacts", &self.artifacts.is_some())
            .finish()
    }
}

pub struct MaintenanceTestCase {
    test_name: String,
    spec: TestSpecification,
    cluster: Box<dyn ClusterResource>,
    probe: Arc<dyn DeploymentProbe>,
    config: Arc<TestCaseConfiguration>,
    connection_string: Option<String>,
    state: CaseState,
}

impl MaintenanceTestCase {
    pub fn new(
        test_name: impl Into<String>,
        spec: TestSpecification,
        cluster: Box<dyn ClusterResource>,
        probe: Arc<dyn DeploymentProbe>,
        config: Arc<TestCaseConfiguration>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            spec,
            cluster,
            probe,
            config,
            connection_string: None,
            state: CaseState::Uninitialized,
        }
    }

    /// Load a case from a spec file; the test name comes from the file stem.
    pub fn from_spec_file(
        path: &Path,
        cluster: Box<dyn ClusterResource>,
        probe: Arc<dyn DeploymentProbe>,
        config: Arc<TestCaseConfiguration>,
    ) -> Result<Self, mdrill_common::SpecError> {
        let spec = TestSpecification::from_file(path)?;
        Ok(Self::new(test_name_from_spec_file(path), spec, cluster, probe, config))
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn cluster_name(&self) -> &str {
        self.cluster.name()
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    pub fn spec(&self) -> &TestSpecification {
        &self.spec
    }

    /// Create or reconfigure the cluster to the initial configuration.
    ///
    /// Does not wait for the cluster to become idle.
    pub fn initialize(&mut self, skip_if_present: bool) -> Result<(), TestCaseError> {
        self.state = CaseState::Initializing;
        let initial = self.spec.initial_configuration.clone();

        if skip_if_present && self.matches_existing(&initial)? {
            info!(
                "Cluster {} already matches the initial configuration",
                self.cluster_name()
            );
            self.state = CaseState::Ready;
            return Ok(());
        }

        info!("Initializing cluster {:?}", self.cluster_name());
        let mut config = initial.cluster_configuration.clone();
        config.insert(
            "name".to_string(),
            Value::String(self.cluster_name().to_string()),
        );
        match self.cluster.create(&config) {
            Ok(()) => debug!("Cluster {} created", self.cluster_name()),
            Err(err) if err.is_code(codes::DUPLICATE_CLUSTER_NAME) => {
                info!(
                    "Cluster {} exists, reconfiguring it instead",
                    self.cluster_name()
                );
                config.remove("name");
                self.cluster.patch(&config)?;
            }
            Err(err) => return Err(err.into()),
        }

        if !initial.process_args.is_empty() {
            self.cluster.patch_process_args(&initial.process_args)?;
        }
        self.state = CaseState::Ready;
        Ok(())
    }

    /// Readiness check used by the scheduler. Read errors count as not ready.
    pub fn is_cluster_ready(&self) -> bool {
        match self.cluster.get() {
            Ok(descriptor) => descriptor.is_idle(),
            Err(err) => {
                warn!(
                    "Failed to read cluster {} while checking readiness: {}",
                    self.cluster_name(),
                    err
                );
                false
            }
        }
    }

    /// Execute the case end to end and produce its report.
    ///
    /// Never returns an error: every failure is folded into the report, the
    /// workload is always torn down, and the cluster is deleted unless
    /// `persist_cluster` is set.
    pub fn run(&mut self, options: &RunOptions) -> TestCaseReport {
        info!("Running test {:?} on cluster {:?}", self.test_name, self.cluster_name());
        let started_at = Utc::now();
        let mut timer = Timer::new();
        let mut supervisor = WorkloadSupervisor::new(&self.config.workdir, self.config.timings.stop_timeout);
        let mut timeline = Vec::new();

        let (outcome, statistics) =
            match self.execute(options, &mut supervisor, &mut timer, &mut timeline) {
                Ok(stats) => {
                    let verdict = stats.verdict();
                    info!("Workload statistics: {}", stats);
                    self.state = CaseState::Completed(verdict);
                    let outcome = match verdict {
                        Verdict::Passed => Outcome::Passed,
                        Verdict::Failed => Outcome::Failed,
                    };
                    (outcome, Some(stats))
                }
                Err(failure) => {
                    error!(
                        "Test {} failed at {}: {}",
                        self.test_name, failure.stage, failure.error
                    );
                    let stats = supervisor.terminate();
                    let statistics = match (&failure.error, supervisor.state()) {
                        (TestCaseError::Workload(WorkloadError::PrematureExit { statistics, .. }), _) => {
                            Some(*statistics)
                        }
                        (_, SupervisorState::NotStarted) => None,
                        _ => Some(stats),
                    };
                    self.state = CaseState::Completed(Verdict::Failed);
                    (failure.error.into_outcome(failure.stage), statistics)
                }
            };

        let mut report = TestCaseReport::new(&self.test_name, self.cluster_name(), outcome);
        report.started_at = started_at;
        report.elapsed = timer.elapsed();
        report.statistics = statistics;
        report.timeline = timeline;

        if let Some(collector) = &options.artifacts {
            match collector.collect(self.cluster_name(), &self.test_name) {
                Ok(path) => report.artifacts.push(path),
                Err(e) => error!("Failed to collect logs for {}: {}", self.test_name, e),
            }
        }

        self.teardown(options.persist_cluster);
        report
    }

    /// Delete the cluster unless it should persist. Errors are only logged.
    pub fn teardown(&mut self, persist_cluster: bool) {
        if persist_cluster {
            info!("Keeping cluster {:?}", self.cluster_name());
        } else if let Err(err) = self.cluster.delete() {
            warn!("Failed to delete cluster {:?}: {}", self.cluster_name(), err);
        }
        self.state = CaseState::TornDown;
    }

    /// Report for a case that never reached `run`.
    pub fn failure_report(&self, stage: Stage, error: TestCaseError) -> TestCaseReport {
        TestCaseReport::new(&self.test_name, self.cluster_name(), error.into_outcome(stage))
    }

    fn execute(
        &mut self,
        options: &RunOptions,
        supervisor: &mut WorkloadSupervisor,
        timer: &mut Timer,
        timeline: &mut Vec<OperationRecord>,
    ) -> Result<ExecutionStatistics, StageFailure> {
        self.state = CaseState::Verifying;
        let initial = self.spec.initial_configuration.clone();
        self.verify_configuration(&initial)
            .at(Stage::VerifyInitialConfiguration)?;

        let seeded = !self.spec.seed_collections().is_empty();
        let uri = self
            .connection_string()
            .at(if seeded { Stage::LoadInitialData } else { Stage::SpawnWorkload })?;
        if seeded {
            self.probe
                .load_initial_data(&uri, self.spec.seed_collections())
                .at(Stage::LoadInitialData)?;
        }

        timer.start();
        supervisor
            .spawn(
                &self.config.workload_executor,
                &uri,
                &self.spec.workload_json(),
                self.config.timings.startup_grace,
            )
            .at(Stage::SpawnWorkload)?;

        let operations = self.spec.operations.clone();
        for (index, operation) in operations.iter().enumerate() {
            let stage = Stage::Operation {
                index,
                kind: operation.kind(),
            };
            if options.interrupt.is_set() {
                return Err(StageFailure {
                    stage,
                    error: TestCaseError::Interrupted,
                });
            }
            let started = timer.elapsed();
            info!("Executing operation {}: {}", index, operation.kind());
            self.apply(index, operation).at(stage)?;
            timeline.push(OperationRecord {
                index,
                kind: operation.kind(),
                started,
                finished: timer.elapsed(),
            });
        }

        debug!("Settling for {:?}", self.config.timings.settle_delay);
        thread::sleep(self.config.timings.settle_delay);

        let stats = supervisor.stop().at(Stage::StopWorkload)?;
        if stats.is_unreported() {
            return Err(StageFailure {
                stage: Stage::StopWorkload,
                error: WorkloadError::MissingStatistics.into(),
            });
        }
        Ok(stats)
    }

    fn apply(&mut self, index: usize, operation: &Operation) -> Result<(), TestCaseError> {
        self.state = CaseState::Executing;
        match operation {
            Operation::SetClusterConfiguration(config) => self.set_cluster_configuration(index, config),
            Operation::TestFailover => {
                self.restart_primaries()?;
                self.wait_for_idle()
            }
            Operation::Sleep(duration) => {
                info!("Sleeping for {:?}", duration);
                thread::sleep(*duration);
                Ok(())
            }
            Operation::WaitForIdle => self.wait_for_idle(),
            Operation::RestartVms => {
                self.cluster.reboot_vms()?;
                thread::sleep(self.config.timings.restart_vms_delay);
                self.wait_for_idle()
            }
            Operation::AssertPrimaryRegion(region) => self.assert_primary_region(region),
        }
    }

    fn set_cluster_configuration(
        &mut self,
        index: usize,
        config: &ClusterConfiguration,
    ) -> Result<(), TestCaseError> {
        if config.is_empty() {
            return Err(TestCaseError::InvalidPlan { index });
        }
        if !config.cluster_configuration.is_empty() {
            info!("Patching cluster {:?}", self.cluster_name());
            self.cluster.patch(&config.cluster_configuration)?;
        }
        if !config.process_args.is_empty() {
            info!("Patching process args of cluster {:?}", self.cluster_name());
            self.cluster.patch_process_args(&config.process_args)?;
        }
        self.wait_for_idle()?;
        self.verify_configuration(config)
    }

    /// Ask for a primary restart, retrying while the control plane says the
    /// cluster cannot restart yet.
    fn restart_primaries(&self) -> Result<(), TestCaseError> {
        let timings = &self.config.timings;
        let poller = Poller::new(timings.failover_retry_interval, timings.failover_timeout);
        let subject = format!("primary restart of cluster {:?} to be accepted", self.cluster_name());
        poller.poll::<TestCaseError, _>(&subject, || match self.cluster.restart_primaries() {
            Ok(()) => Ok(true),
            Err(err) if err.is_code(codes::CLUSTER_RESTART_INVALID) => {
                warn!("Primary restart rejected, retrying: {}", err);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        })
    }

    /// Pause, then poll until the cluster reports IDLE.
    pub fn wait_for_idle(&mut self) -> Result<(), TestCaseError> {
        self.state = CaseState::AwaitingIdle;
        thread::sleep(self.config.timings.pre_idle_delay);
        let subject = format!("cluster {:?} to become IDLE", self.cluster_name());
        self.config
            .poller()
            .poll::<TestCaseError, _>(&subject, || Ok(self.cluster.get()?.is_idle()))
    }

    fn verify_configuration(&mut self, expected: &ClusterConfiguration) -> Result<(), TestCaseError> {
        self.state = CaseState::Verifying;
        if !expected.cluster_configuration.is_empty() {
            let actual = self.cluster.get()?;
            assert_subset(actual.raw(), &expected.cluster_configuration_value())?;
        }
        if !expected.process_args.is_empty() {
            let actual = self.cluster.process_args()?;
            assert_subset(&actual, &expected.process_args_value())?;
        }
        debug!("Cluster {} matches the expected configuration", self.cluster_name());
        Ok(())
    }

    fn matches_existing(&self, initial: &ClusterConfiguration) -> Result<bool, TestCaseError> {
        let descriptor = match self.cluster.get() {
            Ok(descriptor) => descriptor,
            Err(err) if err.status() == Some(404) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        if !mdrill_common::is_subset(descriptor.raw(), &initial.cluster_configuration_value()) {
            return Ok(false);
        }
        if initial.process_args.is_empty() {
            return Ok(true);
        }
        let args = self.cluster.process_args()?;
        Ok(mdrill_common::is_subset(&args, &initial.process_args_value()))
    }

    fn assert_primary_region(&mut self, expected: &str) -> Result<(), TestCaseError> {
        let descriptor = self.cluster.get()?;
        let uri = descriptor
            .standard_connection_string()
            .ok_or(TestCaseError::MissingField("connectionStrings.standard"))?
            .to_string();
        let timings = &self.config.timings;
        let timer = Timer::started();

        loop {
            let actual = self.probe.primary_region(
                &uri,
                &self.config.database_username,
                &self.config.database_password,
            )?;
            if actual == expected {
                info!("Primary is in expected region {}", expected);
                return Ok(());
            }
            if timer.elapsed() >= timings.region_assert_timeout {
                return Err(TestCaseError::RegionMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
            debug!(
                "Primary in region {}, expected {}; checking again",
                actual, expected
            );
            thread::sleep(timings.region_assert_interval);
        }
    }

    /// Connection string for the workload, resolved once per case.
    fn connection_string(&mut self) -> Result<String, TestCaseError> {
        if let Some(uri) = &self.connection_string {
            return Ok(uri.clone());
        }
        let descriptor = self.cluster.get()?;
        let srv = descriptor
            .srv_address()
            .ok_or(TestCaseError::MissingField("srvAddress"))?;
        let uri = build_connection_string(
            srv,
            &self.config.database_username,
            &self.config.database_password,
            &self.spec.uri_options,
        )?;
        self.connection_string = Some(uri.clone());
        Ok(uri)
    }
}

impl fmt::Debug for MaintenanceTestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceTestCase")
            .field("test_name", &self.test_name)
            .field("cluster_name", &self.cluster_name())
            .field("state", &self.state)
            .finish()
    }
}
