//! Planned-maintenance test orchestration for Atlas clusters.
//!
//! A test case provisions a cluster, starts a driver workload against it,
//! applies a plan of maintenance operations (scaling, failovers, VM
//! restarts), stops the workload and turns its self-reported statistics into
//! a verdict. [`TestCaseScheduler`] runs a batch of cases one at a time.

pub mod connection;
pub mod deployment;
pub mod discovery;
pub mod interrupt;
pub mod report;
pub mod scheduler;
pub mod supervisor;
pub mod test_case;
pub mod validate;
pub mod xunit;

pub use connection::{ConnectionStringError, build_connection_string};
pub use deployment::{DeploymentError, DeploymentProbe, MongoProbe};
pub use discovery::{DiscoveryError, discover_spec_files, render_plan};
pub use interrupt::Interrupt;
pub use report::{FailureCategory, OperationRecord, Outcome, Stage, TestCaseReport};
pub use scheduler::{SchedulerSummary, TestCaseScheduler};
pub use supervisor::{SupervisorState, WorkloadError, WorkloadSupervisor};
pub use test_case::{
    ArtifactCollector, CaseState, MaintenanceTestCase, RunOptions, TestCaseError,
};
pub use validate::{ExecutorValidator, ValidationError, check_statistics};
pub use xunit::{XunitError, XunitWriter};
