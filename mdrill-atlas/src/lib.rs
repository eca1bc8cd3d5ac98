//! Atlas control-plane client for mdrill.
//!
//! Covers the subset of the Atlas API the maintenance tests need: cluster
//! lifecycle, process arguments, primary restarts, VM reboots, project and
//! user provisioning, and log collection jobs.

pub mod client;
pub mod cluster;
pub mod error;
pub mod logs;
pub mod provision;

pub use client::{AtlasClient, AtlasClientConfig, DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_HTTP_TIMEOUT};
pub use cluster::{AtlasCluster, ClusterDescriptor, ClusterResource};
pub use error::{AtlasError, Method, codes};
pub use logs::{LogCollectionError, LogCollector};
pub use provision::{
    ensure_access_from_anywhere, ensure_admin_user, ensure_project, get_organization_by_name,
    get_project,
};
