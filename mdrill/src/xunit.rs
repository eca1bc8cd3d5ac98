//! JUnit XML output, one file per test case.

use std::path::{Path, PathBuf};

use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use thiserror::Error;
use tracing::info;

use crate::report::{FailureCategory, TestCaseReport};

#[derive(Debug, Error)]
pub enum XunitError {
    #[error("failed to serialize report for {test}: {source}")]
    Serialize {
        test: String,
        source: quick_junit::SerializeError,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes `<output_dir>/<test_name>.xml` for each finished case.
#[derive(Debug, Clone)]
pub struct XunitWriter {
    output_dir: PathBuf,
}

impl XunitWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, test_name: &str) -> PathBuf {
        self.output_dir.join(format!("{test_name}.xml"))
    }

    pub fn write(&self, report: &TestCaseReport) -> Result<PathBuf, XunitError> {
        let xml = render(report).map_err(|source| XunitError::Serialize {
            test: report.test_name.clone(),
            source,
        })?;
        std::fs::create_dir_all(&self.output_dir).map_err(|source| XunitError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        let path = self.path_for(&report.test_name);
        std::fs::write(&path, xml).map_err(|source| XunitError::Io {
            path: path.clone(),
            source,
        })?;
        info!("Wrote xunit report to {}", path.display());
        Ok(path)
    }
}

/// One suite wrapping one test case.
///
/// Driver failures and configuration mismatches become `failure` nodes,
/// infrastructure faults and interruptions become `error` nodes.
pub fn render(report: &TestCaseReport) -> Result<String, quick_junit::SerializeError> {
    let status = match report.outcome.category() {
        None => TestCaseStatus::success(),
        Some(category) => {
            let kind = match category {
                FailureCategory::Driver | FailureCategory::Configuration => NonSuccessKind::Failure,
                FailureCategory::Infrastructure | FailureCategory::Interrupted => NonSuccessKind::Error,
            };
            let mut status = TestCaseStatus::non_success(kind);
            status.set_message(report.summary());
            status.set_type(category.to_string());
            status.set_description(report.statistics_text());
            status
        }
    };

    let mut case = TestCase::new(report.test_name.as_str(), status);
    case.set_classname(report.cluster_name.as_str());
    case.set_time(report.elapsed);
    case.set_timestamp(report.started_at);
    let mut system_out = report.timeline_text();
    if report.statistics.is_some() {
        if !system_out.is_empty() {
            system_out.push('\n');
        }
        system_out.push_str(&report.statistics_text());
    }
    if !system_out.is_empty() {
        case.set_system_out(system_out);
    }

    let mut suite = TestSuite::new(report.test_name.as_str());
    suite.set_time(report.elapsed);
    suite.set_timestamp(report.started_at);
    suite.add_test_case(case);

    let mut junit = Report::new(report.test_name.as_str());
    junit.add_test_suite(suite);
    junit.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Outcome, Stage};
    use mdrill_common::ExecutionStatistics;
    use std::time::Duration;

    fn failed_report() -> TestCaseReport {
        let mut report = TestCaseReport::new("scale_up", "fb8e20fc2e", Outcome::Failed);
        report.elapsed = Duration::from_secs(42);
        report.statistics = Some(ExecutionStatistics::new(0, 2, 10));
        report
    }

    #[test]
    fn driver_failure_is_failure_node() {
        let xml = render(&failed_report()).unwrap();
        assert!(xml.contains("<failure"));
        assert!(!xml.contains("<error"));
        assert!(xml.contains("numErrors=0 numFailures=2 numSuccesses=10"));
        assert!(xml.contains(r#"name="scale_up""#));
    }

    #[test]
    fn infrastructure_fault_is_error_node() {
        let report = TestCaseReport::new(
            "scale_up",
            "c",
            Outcome::Infrastructure {
                stage: Stage::SpawnWorkload,
                message: "executor exited".into(),
            },
        );
        let xml = render(&report).unwrap();
        assert!(xml.contains("<error"));
        assert!(xml.contains("infrastructure failure at spawn_workload"));
    }

    #[test]
    fn passing_case_has_no_failure() {
        let mut report = TestCaseReport::new("ok", "c", Outcome::Passed);
        report.statistics = Some(ExecutionStatistics::new(0, 0, 7));
        let xml = render(&report).unwrap();
        assert!(!xml.contains("<failure"));
        assert!(!xml.contains("<error"));
        assert!(xml.contains("numSuccesses=7"));
    }

    #[test]
    fn writer_uses_test_name_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = XunitWriter::new(dir.path().join("xunit"));
        let path = writer.write(&failed_report()).unwrap();
        assert_eq!(path, dir.path().join("xunit").join("scale_up.xml"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("<?xml"));
    }
}
