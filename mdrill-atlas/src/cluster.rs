//! One cluster, as seen through the control plane.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::client::AtlasClient;
use crate::error::AtlasError;

/// Cluster document returned by the control plane.
///
/// Only the handful of fields the orchestrator reads are exposed as
/// accessors; the full document stays available for subset checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDescriptor {
    raw: Value,
}

impl ClusterDescriptor {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn name(&self) -> Option<&str> {
        self.raw.get("name").and_then(Value::as_str)
    }

    pub fn state_name(&self) -> Option<&str> {
        self.raw.get("stateName").and_then(Value::as_str)
    }

    /// Case-insensitive state comparison.
    pub fn is_state(&self, goal: &str) -> bool {
        self.state_name()
            .is_some_and(|state| state.eq_ignore_ascii_case(goal))
    }

    pub fn is_idle(&self) -> bool {
        self.is_state("IDLE")
    }

    pub fn srv_address(&self) -> Option<&str> {
        self.raw.get("srvAddress").and_then(Value::as_str)
    }

    pub fn standard_connection_string(&self) -> Option<&str> {
        self.raw
            .get("connectionStrings")
            .and_then(|cs| cs.get("standard"))
            .and_then(Value::as_str)
    }

    pub fn cluster_type(&self) -> Option<&str> {
        self.raw.get("clusterType").and_then(Value::as_str)
    }
}

/// Operations the orchestrator performs on a single cluster.
pub trait ClusterResource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self) -> Result<ClusterDescriptor, AtlasError>;

    /// Create the cluster; `config` must carry `name`.
    fn create(&self, config: &Map<String, Value>) -> Result<(), AtlasError>;

    /// Patch the cluster; `config` must not carry `name`.
    fn patch(&self, config: &Map<String, Value>) -> Result<(), AtlasError>;

    fn process_args(&self) -> Result<Value, AtlasError>;

    fn patch_process_args(&self, args: &Map<String, Value>) -> Result<(), AtlasError>;

    /// May fail with `CLUSTER_RESTART_INVALID` while the cluster is busy.
    fn restart_primaries(&self) -> Result<(), AtlasError>;

    /// Reboot every VM through the private admin API.
    fn reboot_vms(&self) -> Result<(), AtlasError>;

    fn delete(&self) -> Result<(), AtlasError>;
}

/// [`ClusterResource`] backed by the Atlas API.
#[derive(Debug, Clone)]
pub struct AtlasCluster {
    client: Arc<AtlasClient>,
    admin: Option<Arc<AtlasClient>>,
    project_id: String,
    name: String,
}

impl AtlasCluster {
    pub fn new(client: Arc<AtlasClient>, project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            admin: None,
            project_id: project_id.into(),
            name: name.into(),
        }
    }

    /// Attach the privileged client used for VM reboots.
    pub fn with_admin(mut self, admin: Option<Arc<AtlasClient>>) -> Self {
        self.admin = admin;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn collection_path(&self) -> String {
        format!("groups/{}/clusters", self.project_id)
    }

    fn path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }
}

impl ClusterResource for AtlasCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self) -> Result<ClusterDescriptor, AtlasError> {
        self.client.get(&self.path()).map(ClusterDescriptor::new)
    }

    fn create(&self, config: &Map<String, Value>) -> Result<(), AtlasError> {
        info!("Creating cluster {:?}", self.name);
        self.client
            .post(&self.collection_path(), &Value::Object(config.clone()))
            .map(|_| ())
    }

    fn patch(&self, config: &Map<String, Value>) -> Result<(), AtlasError> {
        if config.contains_key("name") {
            return Err(AtlasError::NameInPatch(self.name.clone()));
        }
        debug!("Patching cluster {:?}", self.name);
        self.client
            .patch(&self.path(), &Value::Object(config.clone()))
            .map(|_| ())
    }

    fn process_args(&self) -> Result<Value, AtlasError> {
        self.client.get(&format!("{}/processArgs", self.path()))
    }

    fn patch_process_args(&self, args: &Map<String, Value>) -> Result<(), AtlasError> {
        debug!("Patching process args of cluster {:?}", self.name);
        self.client
            .patch(&format!("{}/processArgs", self.path()), &Value::Object(args.clone()))
            .map(|_| ())
    }

    fn restart_primaries(&self) -> Result<(), AtlasError> {
        self.client
            .post(&format!("{}/restartPrimaries", self.path()), &Value::Object(Map::new()))
            .map(|_| ())
    }

    fn reboot_vms(&self) -> Result<(), AtlasError> {
        let admin = self
            .admin
            .as_ref()
            .ok_or(AtlasError::AdminCredentialsRequired("reboot cluster VMs"))?;
        let path = format!(
            "/api/private/nds/groups/{}/clusters/{}/reboot",
            self.project_id, self.name
        );
        admin.post(&path, &Value::Object(Map::new())).map(|_| ())
    }

    fn delete(&self) -> Result<(), AtlasError> {
        info!("Deleting cluster {:?}", self.name);
        self.client.delete(&self.path()).map(|_| ())
    }
}
