//! Workload execution statistics and the pass/fail verdict.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Statistics file written by the workload executor on shutdown.
pub const RESULTS_FILE: &str = "results.json";
/// Optional CMAP/command event log written alongside the statistics.
pub const EVENTS_FILE: &str = "events.json";

/// Value of a statistic the executor did not report.
pub const UNREPORTED: i64 = -1;

fn unreported() -> i64 {
    UNREPORTED
}

/// Counters self-reported by the workload executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    #[serde(default = "unreported")]
    pub num_errors: i64,
    #[serde(default = "unreported")]
    pub num_failures: i64,
    #[serde(default = "unreported")]
    pub num_successes: i64,
    #[serde(default = "unreported")]
    pub num_iterations: i64,
}

impl ExecutionStatistics {
    pub fn new(num_errors: i64, num_failures: i64, num_successes: i64) -> Self {
        Self {
            num_errors,
            num_failures,
            num_successes,
            num_iterations: UNREPORTED,
        }
    }

    /// Sentinel produced when the executor wrote nothing usable.
    pub fn unreported() -> Self {
        Self::new(UNREPORTED, UNREPORTED, UNREPORTED)
    }

    /// True when none of the three verdict counters was reported.
    pub fn is_unreported(&self) -> bool {
        self.num_errors == UNREPORTED
            && self.num_failures == UNREPORTED
            && self.num_successes == UNREPORTED
    }

    /// True when any verdict counter is negative (including the sentinel).
    pub fn has_negative(&self) -> bool {
        self.num_errors < 0 || self.num_failures < 0 || self.num_successes < 0
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_stats(self)
    }
}

impl Default for ExecutionStatistics {
    fn default() -> Self {
        Self::unreported()
    }
}

impl fmt::Display for ExecutionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "numErrors={} numFailures={} numSuccesses={} numIterations={}",
            self.num_errors, self.num_failures, self.num_successes, self.num_iterations
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    /// Failed iff the driver saw errors or failures, or never succeeded.
    ///
    /// An unreported sentinel (-1) is non-zero and therefore fails.
    pub fn from_stats(stats: &ExecutionStatistics) -> Self {
        if stats.num_errors != 0 || stats.num_failures != 0 || stats.num_successes == 0 {
            Self::Failed
        } else {
            Self::Passed
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Read `results.json` from `dir`.
///
/// A missing or malformed file yields [`ExecutionStatistics::unreported`];
/// the caller decides what an unreported run means.
pub fn read_statistics(dir: &Path) -> ExecutionStatistics {
    let path = dir.join(RESULTS_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("No statistics at {}: {}", path.display(), e);
            return ExecutionStatistics::unreported();
        }
    };
    match serde_json::from_str::<ExecutionStatistics>(&contents) {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Malformed statistics in {}: {}", path.display(), e);
            ExecutionStatistics::unreported()
        }
    }
}
