//! Workload definitions accepted by the executor.
//!
//! The orchestrator hands over the `driverWorkload` section as inline JSON.
//! For manual runs the argument may instead be a path to a spec file (YAML)
//! or to a bare workload (JSON).

use std::path::{Path, PathBuf};

use mdrill_common::TestSpecification;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to read workload file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workload JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Spec(#[from] mdrill_common::SpecError),

    #[error("operation {index} targets unsupported object '{object}'")]
    UnsupportedObject { index: usize, object: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationName {
    InsertOne,
    Find,
    UpdateOne,
    CountDocuments,
}

impl OperationName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertOne => "insertOne",
            Self::Find => "find",
            Self::UpdateOne => "updateOne",
            Self::CountDocuments => "countDocuments",
        }
    }
}

fn collection_object() -> String {
    "collection".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkloadOperation {
    #[serde(default = "collection_object")]
    pub object: String,
    pub name: OperationName,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Expected result; a mismatch counts as a failure.
    #[serde(default)]
    pub result: Option<Value>,
}

impl WorkloadOperation {
    /// Argument as a map, empty when absent.
    pub fn map_argument(&self, key: &str) -> Map<String, Value> {
        match self.arguments.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Operations run in a loop against one collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Workload {
    pub database: String,
    pub collection: String,
    #[serde(default)]
    pub operations: Vec<WorkloadOperation>,
}

impl Workload {
    pub fn from_value(value: Value) -> Result<Self, WorkloadError> {
        let workload: Self = serde_json::from_value(value)?;
        for (index, operation) in workload.operations.iter().enumerate() {
            if operation.object != "collection" {
                return Err(WorkloadError::UnsupportedObject {
                    index,
                    object: operation.object.clone(),
                });
            }
        }
        Ok(workload)
    }

    /// Parse the workload argument: inline JSON, a JSON file or a YAML spec.
    pub fn load(argument: &str) -> Result<Self, WorkloadError> {
        let trimmed = argument.trim_start();
        if trimmed.starts_with('{') {
            return Self::from_value(serde_json::from_str(trimmed)?);
        }

        let path = Path::new(argument);
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml" | "yaml")
        );
        if is_yaml {
            let spec = TestSpecification::from_file(path)?;
            return Self::from_value(spec.driver_workload);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| WorkloadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(serde_json::from_str(&contents)?)
    }
}
