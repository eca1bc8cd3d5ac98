//! Shared types and utilities for mdrill.
//!
//! This crate holds everything the orchestrator, the control-plane client and
//! the reference workload executor agree on:
//! - the declarative test specification and its operation enum
//! - workload execution statistics and the pass/fail verdict
//! - deterministic test and cluster naming
//! - the monotonic [`Timer`] and the bounded [`Poller`]
//! - one-directional structural comparison ([`assert_subset`])
//! - configuration loading and logging setup

pub mod aggregate;
pub mod config;
pub mod logging;
pub mod naming;
pub mod poller;
pub mod spec;
pub mod stats;
pub mod subset;
pub mod timer;

pub use aggregate::{AggregateError, AggregatedStatistics, aggregate_statistics};
pub use config::{
    ConfigError, ConfigSource, EnvError, EnvParser, RunTimings, Sourced, TestCaseConfiguration,
};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use naming::{cluster_name, test_name_from_spec_file};
pub use poller::{PollTimeout, Poller};
pub use spec::{
    ClusterConfiguration, Operation, OperationKind, SeedCollection, SpecError, TestSpecification,
};
pub use stats::{
    EVENTS_FILE, ExecutionStatistics, RESULTS_FILE, UNREPORTED, Verdict, read_statistics,
};
pub use subset::{MismatchReason, SubsetMismatch, assert_subset, is_subset};
pub use timer::Timer;
