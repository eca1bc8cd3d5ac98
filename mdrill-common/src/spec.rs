//! Declarative maintenance test specification.
//!
//! A spec is a YAML document:
//!
//! ```yaml
//! initialConfiguration:
//!   clusterConfiguration:
//!     providerSettings: { providerName: AWS, regionName: US_WEST_1, instanceSizeName: M10 }
//!   processArgs: {}
//! operations:
//!   - setClusterConfiguration:
//!       clusterConfiguration:
//!         providerSettings: { providerName: AWS, regionName: US_WEST_1, instanceSizeName: M20 }
//!   - waitForIdle: true
//! uriOptions: { retryReads: true }
//! driverWorkload:
//!   database: test
//!   collection: coll
//!   operations: [...]
//! ```
//!
//! Parsing is strict about operations: each entry must carry exactly one
//! recognized key, and any violation fails the load before anything remote is
//! touched.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read spec {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse spec: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("operation #{index} has no keys")]
    EmptyOperation { index: usize },

    #[error("operation #{index} has {} keys ({}), expected exactly one", keys.len(), keys.join(", "))]
    MultipleKeys { index: usize, keys: Vec<String> },

    #[error("operation #{index} is not recognized: `{name}`")]
    UnknownOperation { index: usize, name: String },

    #[error("operation #{index} is not a map")]
    MalformedOperation { index: usize },

    #[error("operation #{index} ({kind}) has an invalid argument: {reason}")]
    InvalidArgument {
        index: usize,
        kind: OperationKind,
        reason: String,
    },

    #[error("invalid driverWorkload: {0}")]
    InvalidWorkload(String),
}

/// Cluster settings plus mongod process arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ClusterConfiguration {
    pub cluster_configuration: Map<String, Value>,
    pub process_args: Map<String, Value>,
}

impl ClusterConfiguration {
    pub fn is_empty(&self) -> bool {
        self.cluster_configuration.is_empty() && self.process_args.is_empty()
    }

    pub fn cluster_configuration_value(&self) -> Value {
        Value::Object(self.cluster_configuration.clone())
    }

    pub fn process_args_value(&self) -> Value {
        Value::Object(self.process_args.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    SetClusterConfiguration,
    TestFailover,
    Sleep,
    WaitForIdle,
    RestartVms,
    AssertPrimaryRegion,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        Self::SetClusterConfiguration,
        Self::TestFailover,
        Self::Sleep,
        Self::WaitForIdle,
        Self::RestartVms,
        Self::AssertPrimaryRegion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetClusterConfiguration => "setClusterConfiguration",
            Self::TestFailover => "testFailover",
            Self::Sleep => "sleep",
            Self::WaitForIdle => "waitForIdle",
            Self::RestartVms => "restartVms",
            Self::AssertPrimaryRegion => "assertPrimaryRegion",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the maintenance plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Patch cluster configuration and/or process args, wait for idle, re-verify.
    SetClusterConfiguration(ClusterConfiguration),
    /// Restart the primaries, then wait for idle.
    TestFailover,
    Sleep(Duration),
    WaitForIdle,
    /// Reboot every VM through the admin API, then wait for idle.
    RestartVms,
    /// Assert that the primary lives in the given region.
    AssertPrimaryRegion(String),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::SetClusterConfiguration(_) => OperationKind::SetClusterConfiguration,
            Self::TestFailover => OperationKind::TestFailover,
            Self::Sleep(_) => OperationKind::Sleep,
            Self::WaitForIdle => OperationKind::WaitForIdle,
            Self::RestartVms => OperationKind::RestartVms,
            Self::AssertPrimaryRegion(_) => OperationKind::AssertPrimaryRegion,
        }
    }

    fn parse(index: usize, raw: &Value) -> Result<Self, SpecError> {
        let Value::Object(map) = raw else {
            return Err(SpecError::MalformedOperation { index });
        };
        let mut entries = map.iter();
        let (key, argument) = match (entries.next(), map.len()) {
            (None, _) => return Err(SpecError::EmptyOperation { index }),
            (Some(entry), 1) => entry,
            (Some(_), _) => {
                return Err(SpecError::MultipleKeys {
                    index,
                    keys: map.keys().cloned().collect(),
                });
            }
        };
        let kind = OperationKind::from_key(key).ok_or_else(|| SpecError::UnknownOperation {
            index,
            name: key.clone(),
        })?;
        let invalid = |reason: String| SpecError::InvalidArgument {
            index,
            kind,
            reason,
        };

        let operation = match kind {
            OperationKind::SetClusterConfiguration => {
                let config: ClusterConfiguration = match argument {
                    Value::Null => ClusterConfiguration::default(),
                    other => serde_json::from_value(other.clone())
                        .map_err(|err| invalid(err.to_string()))?,
                };
                if config.cluster_configuration.contains_key("name") {
                    return Err(invalid("the cluster name cannot be changed".to_string()));
                }
                Self::SetClusterConfiguration(config)
            }
            OperationKind::TestFailover => Self::TestFailover,
            OperationKind::Sleep => {
                let seconds = argument
                    .as_f64()
                    .ok_or_else(|| invalid(format!("expected seconds, got {argument}")))?;
                let duration = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| invalid(format!("{seconds} is not a valid duration")))?;
                Self::Sleep(duration)
            }
            OperationKind::WaitForIdle => Self::WaitForIdle,
            OperationKind::RestartVms => Self::RestartVms,
            OperationKind::AssertPrimaryRegion => {
                let region = argument
                    .as_str()
                    .filter(|region| !region.is_empty())
                    .ok_or_else(|| invalid(format!("expected a region name, got {argument}")))?;
                Self::AssertPrimaryRegion(region.to_string())
            }
        };
        Ok(operation)
    }
}

/// Documents to seed into one collection before the workload starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedCollection {
    pub database: String,
    pub collection: String,
    pub documents: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpecification {
    #[serde(default)]
    initial_configuration: ClusterConfiguration,
    driver_workload: Value,
    #[serde(default)]
    operations: Vec<Value>,
    #[serde(default)]
    uri_options: Map<String, Value>,
}

/// A fully validated test specification.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpecification {
    pub initial_configuration: ClusterConfiguration,
    /// Passed verbatim (as JSON) to the workload executor.
    pub driver_workload: Value,
    pub operations: Vec<Operation>,
    pub uri_options: Map<String, Value>,
    seed: Vec<SeedCollection>,
}

impl TestSpecification {
    pub fn from_file(path: &Path) -> Result<Self, SpecError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, SpecError> {
        let raw: RawSpecification = serde_yaml_ng::from_str(contents)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSpecification) -> Result<Self, SpecError> {
        if !raw.driver_workload.is_object() {
            return Err(SpecError::InvalidWorkload(
                "expected a map of workload settings".to_string(),
            ));
        }
        let operations = raw
            .operations
            .iter()
            .enumerate()
            .map(|(index, op)| Operation::parse(index, op))
            .collect::<Result<Vec<_>, _>>()?;
        let seed = parse_seed_data(&raw.driver_workload)?;

        Ok(Self {
            initial_configuration: raw.initial_configuration,
            driver_workload: raw.driver_workload,
            operations,
            uri_options: raw.uri_options,
            seed,
        })
    }

    /// Collections to drop and re-seed before the workload starts.
    pub fn seed_collections(&self) -> &[SeedCollection] {
        &self.seed
    }

    /// Workload serialized exactly as handed to the executor.
    pub fn workload_json(&self) -> String {
        self.driver_workload.to_string()
    }
}

/// Extract seed data from `initialData` or the legacy `testData` layout.
fn parse_seed_data(workload: &Value) -> Result<Vec<SeedCollection>, SpecError> {
    if let Some(initial) = workload.get("initialData") {
        let entries = initial
            .as_array()
            .ok_or_else(|| SpecError::InvalidWorkload("initialData must be a list".to_string()))?;
        return entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let field = |name: &str| {
                    entry.get(name).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
                        SpecError::InvalidWorkload(format!("initialData[{index}] is missing `{name}`"))
                    })
                };
                Ok(SeedCollection {
                    database: field("databaseName")?,
                    collection: field("collectionName")?,
                    documents: documents(entry.get("documents"), &format!("initialData[{index}].documents"))?,
                })
            })
            .collect();
    }

    if let Some(test_data) = workload.get("testData") {
        let field = |name: &str| {
            workload.get(name).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
                SpecError::InvalidWorkload(format!("testData requires a top-level `{name}`"))
            })
        };
        return Ok(vec![SeedCollection {
            database: field("database")?,
            collection: field("collection")?,
            documents: documents(Some(test_data), "testData")?,
        }]);
    }

    Ok(Vec::new())
}

fn documents(value: Option<&Value>, location: &str) -> Result<Vec<Map<String, Value>>, SpecError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| SpecError::InvalidWorkload(format!("{location} must be a list")))?;
    items
        .iter()
        .map(|item| match item {
            Value::Object(doc) => Ok(doc.clone()),
            _ => Err(SpecError::InvalidWorkload(format!(
                "{location} must contain only documents"
            ))),
        })
        .collect()
}
