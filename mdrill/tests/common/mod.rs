#![allow(dead_code)]

pub mod fixtures;
pub mod logging;
pub mod mock;

pub use fixtures::{SCALE_UP, Workspace, reporting_executor, spec_with_operations, write_executor};
pub use logging::init_test_logging;
pub use mock::{MockCluster, MockProbe};
