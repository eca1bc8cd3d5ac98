//! Runs a batch of test cases, one at a time, in readiness order.
//!
//! All clusters are initialized up front so their provisioning overlaps.
//! After that the scheduler repeatedly picks the first case whose cluster is
//! idle and runs it to completion before looking for the next one.

use mdrill_common::{PollTimeout, Poller};
use tracing::{error, info, warn};

use crate::report::{Stage, TestCaseReport};
use crate::test_case::{MaintenanceTestCase, RunOptions, TestCaseError};
use crate::xunit::XunitWriter;

/// Result of a scheduler run.
#[derive(Debug)]
pub struct SchedulerSummary {
    pub reports: Vec<TestCaseReport>,
}

impl SchedulerSummary {
    pub fn any_failed(&self) -> bool {
        self.reports.iter().any(TestCaseReport::is_failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestCaseReport> {
        self.reports.iter().filter(|report| report.is_failed())
    }
}

pub struct TestCaseScheduler {
    cases: Vec<MaintenanceTestCase>,
    poller: Poller,
    options: RunOptions,
    skip_if_present: bool,
    xunit: Option<XunitWriter>,
}

impl TestCaseScheduler {
    pub fn new(cases: Vec<MaintenanceTestCase>, poller: Poller, options: RunOptions) -> Self {
        Self {
            cases,
            poller,
            options,
            skip_if_present: false,
            xunit: None,
        }
    }

    /// Leave matching existing clusters alone during initialization.
    pub fn with_skip_if_present(mut self, skip: bool) -> Self {
        self.skip_if_present = skip;
        self
    }

    pub fn with_xunit(mut self, writer: Option<XunitWriter>) -> Self {
        self.xunit = writer;
        self
    }

    pub fn run(self) -> SchedulerSummary {
        let Self {
            cases,
            poller,
            options,
            skip_if_present,
            xunit,
        } = self;
        let mut reports = Vec::with_capacity(cases.len());
        let mut record = |report: TestCaseReport| {
            if let Some(writer) = &xunit
                && let Err(e) = writer.write(&report)
            {
                error!("Failed to write xunit report: {}", e);
            }
            reports.push(report);
        };

        info!("Initializing {} test case(s)", cases.len());
        let mut pending = Vec::with_capacity(cases.len());
        for mut case in cases {
            if options.interrupt.is_set() {
                record(case.failure_report(Stage::Initialize, TestCaseError::Interrupted));
                continue;
            }
            match case.initialize(skip_if_present) {
                Ok(()) => pending.push(case),
                Err(err) => {
                    error!("Failed to initialize {}: {}", case.test_name(), err);
                    let report = case.failure_report(Stage::Initialize, err);
                    case.teardown(options.persist_cluster);
                    record(report);
                }
            }
        }

        while !pending.is_empty() {
            if options.interrupt.is_set() {
                warn!("Interrupted; skipping {} remaining test case(s)", pending.len());
                for mut case in pending.drain(..) {
                    let report = case.failure_report(Stage::Readiness, TestCaseError::Interrupted);
                    case.teardown(options.persist_cluster);
                    record(report);
                }
                break;
            }

            let ready = poller.poll_any::<_, PollTimeout, _>(
                "a test cluster to become ready",
                &pending,
                |case| Ok(case.is_cluster_ready()),
            );
            match ready {
                Ok(index) => {
                    let mut case = pending.remove(index);
                    info!("Cluster for {} is ready", case.test_name());
                    record(case.run(&options));
                }
                Err(timeout) => {
                    error!("{}", timeout);
                    for mut case in pending.drain(..) {
                        let report =
                            case.failure_report(Stage::Readiness, TestCaseError::Timeout(timeout.clone()));
                        case.teardown(options.persist_cluster);
                        record(report);
                    }
                }
            }
        }

        let summary = SchedulerSummary { reports };
        info!(
            "Finished {} test case(s), {} failed",
            summary.reports.len(),
            summary.failed().count()
        );
        summary
    }
}
