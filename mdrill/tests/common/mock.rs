//! In-memory stand-ins for the control plane and the data plane.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use mdrill::{DeploymentError, DeploymentProbe};
use mdrill_atlas::{AtlasError, ClusterDescriptor, ClusterResource, Method, codes};
use mdrill_common::SeedCollection;
use serde_json::{Map, Value, json};

#[derive(Debug, Default)]
pub struct MockState {
    pub exists: bool,
    pub document: Map<String, Value>,
    pub process_args: Map<String, Value>,
    /// Every call, in order (`get` excluded).
    pub calls: Vec<String>,
    /// Remaining `CLUSTER_RESTART_INVALID` answers.
    pub restart_rejections: usize,
    pub restart_attempts: Vec<Instant>,
    /// `get` answers `UPDATING` this many times after each mutation.
    pub busy_after_mutation: usize,
    busy_remaining: usize,
    /// State reported when not busy; `None` means `IDLE`.
    pub stuck_state: Option<String>,
    /// Accept patches without applying them.
    pub ignore_patches: bool,
    pub get_count: usize,
}

#[derive(Debug, Clone)]
pub struct MockCluster {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockCluster {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn document(&self) -> Value {
        Value::Object(self.state().document.clone())
    }

    fn api_error(&self, status: u16, code: &str, method: Method) -> AtlasError {
        AtlasError::Api {
            status,
            error_code: Some(code.to_string()),
            detail: None,
            method,
            url: format!("mock://clusters/{}", self.name),
        }
    }

    fn mutated(state: &mut MockState) {
        state.busy_remaining = state.busy_after_mutation;
    }
}

/// Recursively merge `patch` into `target`.
pub fn deep_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => deep_merge(existing, update),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

impl ClusterResource for MockCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self) -> Result<ClusterDescriptor, AtlasError> {
        let mut state = self.state();
        state.get_count += 1;
        if !state.exists {
            return Err(self.api_error(404, "CLUSTER_NOT_FOUND", Method::Get));
        }
        let state_name = if state.busy_remaining > 0 {
            state.busy_remaining -= 1;
            "UPDATING".to_string()
        } else {
            state.stuck_state.clone().unwrap_or_else(|| "IDLE".to_string())
        };
        let mut document = state.document.clone();
        document.insert("name".into(), json!(self.name));
        document.insert("stateName".into(), json!(state_name));
        document.insert(
            "srvAddress".into(),
            json!(format!("mongodb+srv://{}.mock.net", self.name)),
        );
        document.insert(
            "connectionStrings".into(),
            json!({"standard": format!("mongodb://{}-shard-00.mock.net:27017/?ssl=true", self.name)}),
        );
        Ok(ClusterDescriptor::new(Value::Object(document)))
    }

    fn create(&self, config: &Map<String, Value>) -> Result<(), AtlasError> {
        let mut state = self.state();
        state.calls.push("create".into());
        if state.exists {
            return Err(self.api_error(409, codes::DUPLICATE_CLUSTER_NAME, Method::Post));
        }
        assert_eq!(config.get("name"), Some(&json!(self.name)));
        let mut document = config.clone();
        document.remove("name");
        state.document = document;
        state.exists = true;
        Self::mutated(&mut state);
        Ok(())
    }

    fn patch(&self, config: &Map<String, Value>) -> Result<(), AtlasError> {
        let mut state = self.state();
        state.calls.push("patch".into());
        assert!(!config.contains_key("name"), "patch must not carry name");
        if !state.ignore_patches {
            deep_merge(&mut state.document, config);
        }
        Self::mutated(&mut state);
        Ok(())
    }

    fn process_args(&self) -> Result<Value, AtlasError> {
        Ok(Value::Object(self.state().process_args.clone()))
    }

    fn patch_process_args(&self, args: &Map<String, Value>) -> Result<(), AtlasError> {
        let mut state = self.state();
        state.calls.push("patch_process_args".into());
        if !state.ignore_patches {
            deep_merge(&mut state.process_args, args);
        }
        Self::mutated(&mut state);
        Ok(())
    }

    fn restart_primaries(&self) -> Result<(), AtlasError> {
        let mut state = self.state();
        state.calls.push("restart_primaries".into());
        state.restart_attempts.push(Instant::now());
        if state.restart_rejections > 0 {
            state.restart_rejections -= 1;
            return Err(self.api_error(400, codes::CLUSTER_RESTART_INVALID, Method::Post));
        }
        Self::mutated(&mut state);
        Ok(())
    }

    fn reboot_vms(&self) -> Result<(), AtlasError> {
        let mut state = self.state();
        state.calls.push("reboot_vms".into());
        Self::mutated(&mut state);
        Ok(())
    }

    fn delete(&self) -> Result<(), AtlasError> {
        let mut state = self.state();
        state.calls.push("delete".into());
        state.exists = false;
        Ok(())
    }
}

/// Scripted [`DeploymentProbe`].
#[derive(Debug, Default)]
pub struct MockProbe {
    pub seeded: Mutex<Vec<SeedCollection>>,
    /// Regions returned by successive `primary_region` calls; the last one repeats.
    pub regions: Mutex<VecDeque<String>>,
    pub region_calls: Mutex<usize>,
    /// How long `load_initial_data` takes.
    pub seed_delay: Duration,
}

impl MockProbe {
    pub fn with_regions(regions: &[&str]) -> Self {
        Self {
            regions: Mutex::new(regions.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        }
    }
}

impl DeploymentProbe for MockProbe {
    fn load_initial_data(
        &self,
        _connection_string: &str,
        collections: &[SeedCollection],
    ) -> Result<(), DeploymentError> {
        std::thread::sleep(self.seed_delay);
        self.seeded.lock().unwrap().extend_from_slice(collections);
        Ok(())
    }

    fn primary_region(
        &self,
        _connection_string: &str,
        _username: &str,
        _password: &str,
    ) -> Result<String, DeploymentError> {
        *self.region_calls.lock().unwrap() += 1;
        let mut regions = self.regions.lock().unwrap();
        let region = if regions.len() > 1 {
            regions.pop_front()
        } else {
            regions.front().cloned()
        };
        region.ok_or(DeploymentError::MissingField("tags.region"))
    }
}
