//! Per-case outcome records.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mdrill_common::{ExecutionStatistics, OperationKind};
use serde::Serialize;

/// Where in a test case's lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum Stage {
    Initialize,
    Readiness,
    VerifyInitialConfiguration,
    LoadInitialData,
    SpawnWorkload,
    Operation { index: usize, kind: OperationKind },
    Settle,
    StopWorkload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialize => write!(f, "initialize"),
            Self::Readiness => write!(f, "readiness"),
            Self::VerifyInitialConfiguration => write!(f, "verify_initial_configuration"),
            Self::LoadInitialData => write!(f, "load_initial_data"),
            Self::SpawnWorkload => write!(f, "spawn_workload"),
            Self::Operation { index, kind } => write!(f, "operation[{index}] {kind}"),
            Self::Settle => write!(f, "settle"),
            Self::StopWorkload => write!(f, "stop_workload"),
        }
    }
}

/// Origin of a failed case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The workload executor reported errors, failures or no successes.
    Driver,
    /// The cluster did not end up in the declared configuration.
    Configuration,
    /// Control plane, polling, executor process or data-plane fault.
    Infrastructure,
    Interrupted,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver => write!(f, "driver"),
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Passed,
    Failed,
    ConfigurationMismatch { stage: Stage, message: String },
    Infrastructure { stage: Stage, message: String },
    Interrupted { stage: Stage },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Passed)
    }

    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::Passed => None,
            Self::Failed => Some(FailureCategory::Driver),
            Self::ConfigurationMismatch { .. } => Some(FailureCategory::Configuration),
            Self::Infrastructure { .. } => Some(FailureCategory::Infrastructure),
            Self::Interrupted { .. } => Some(FailureCategory::Interrupted),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Passed | Self::Failed => None,
            Self::ConfigurationMismatch { stage, .. }
            | Self::Infrastructure { stage, .. }
            | Self::Interrupted { stage } => Some(*stage),
        }
    }
}

/// One executed maintenance operation, with offsets from the case start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub index: usize,
    pub kind: OperationKind,
    pub started: Duration,
    pub finished: Duration,
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>8.1}s .. {:>8.1}s] #{} {}",
            self.started.as_secs_f64(),
            self.finished.as_secs_f64(),
            self.index,
            self.kind
        )
    }
}

/// Everything known about one finished test case.
#[derive(Debug, Clone, Serialize)]
pub struct TestCaseReport {
    pub test_name: String,
    pub cluster_name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: Outcome,
    /// Raw executor statistics, if the executor was started.
    pub statistics: Option<ExecutionStatistics>,
    pub timeline: Vec<OperationRecord>,
    pub artifacts: Vec<PathBuf>,
}

impl TestCaseReport {
    pub fn new(test_name: impl Into<String>, cluster_name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            test_name: test_name.into(),
            cluster_name: cluster_name.into(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            outcome,
            statistics: None,
            timeline: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome.is_failure()
    }

    /// One-line description used as the failure message.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Passed => "passed".to_string(),
            Outcome::Failed => "workload executor reported failures".to_string(),
            Outcome::ConfigurationMismatch { stage, message } => {
                format!("configuration mismatch at {stage}: {message}")
            }
            Outcome::Infrastructure { stage, message } => {
                format!("infrastructure failure at {stage}: {message}")
            }
            Outcome::Interrupted { stage } => format!("interrupted at {stage}"),
        }
    }

    /// Statistics line, or a placeholder when the executor never ran.
    pub fn statistics_text(&self) -> String {
        match &self.statistics {
            Some(stats) => stats.to_string(),
            None => "no statistics (workload executor did not run)".to_string(),
        }
    }

    pub fn timeline_text(&self) -> String {
        self.timeline
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_outcome() {
        assert_eq!(Outcome::Passed.category(), None);
        assert_eq!(Outcome::Failed.category(), Some(FailureCategory::Driver));
        let infra = Outcome::Infrastructure {
            stage: Stage::SpawnWorkload,
            message: "boom".into(),
        };
        assert_eq!(infra.category(), Some(FailureCategory::Infrastructure));
        assert_eq!(infra.stage(), Some(Stage::SpawnWorkload));
        assert!(infra.is_failure());
    }

    #[test]
    fn summary_names_stage() {
        let report = TestCaseReport::new(
            "t",
            "c",
            Outcome::ConfigurationMismatch {
                stage: Stage::Operation {
                    index: 2,
                    kind: OperationKind::SetClusterConfiguration,
                },
                message: "$.providerSettings: value differs".into(),
            },
        );
        assert_eq!(
            report.summary(),
            "configuration mismatch at operation[2] setClusterConfiguration: $.providerSettings: value differs"
        );
    }

    #[test]
    fn timeline_renders_one_line_per_operation() {
        let mut report = TestCaseReport::new("t", "c", Outcome::Passed);
        report.timeline = vec![
            OperationRecord {
                index: 0,
                kind: OperationKind::Sleep,
                started: Duration::from_secs(1),
                finished: Duration::from_secs(3),
            },
            OperationRecord {
                index: 1,
                kind: OperationKind::WaitForIdle,
                started: Duration::from_secs(3),
                finished: Duration::from_secs(4),
            },
        ];
        let text = report.timeline_text();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().ends_with("#0 sleep"));
        assert!(report.statistics_text().starts_with("no statistics"));
    }
}
