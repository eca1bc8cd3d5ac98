//! Locating spec files and describing their plans.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use mdrill_common::{Operation, TestSpecification};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no spec files (*.yml, *.yaml) found in {0}")]
    Empty(PathBuf),
}

fn is_spec_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml" | "yaml")
        )
}

/// Spec files under `path`, sorted by file name.
///
/// A file path is returned as-is; a directory is scanned one level deep.
pub fn discover_spec_files(path: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let candidate = entry.path();
        if is_spec_file(&candidate) {
            files.push(candidate);
        }
    }
    if files.is_empty() {
        return Err(DiscoveryError::Empty(path.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

/// Human-readable outline of a spec's maintenance plan.
pub fn render_plan(test_name: &str, spec: &TestSpecification) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{test_name}");
    let _ = writeln!(
        out,
        "  initial configuration: {}",
        spec.initial_configuration.cluster_configuration_value()
    );
    if !spec.initial_configuration.process_args.is_empty() {
        let _ = writeln!(
            out,
            "  initial process args: {}",
            spec.initial_configuration.process_args_value()
        );
    }
    for seed in spec.seed_collections() {
        let _ = writeln!(
            out,
            "  seed: {} document(s) into {}.{}",
            seed.documents.len(),
            seed.database,
            seed.collection
        );
    }
    for (index, operation) in spec.operations.iter().enumerate() {
        let detail = match operation {
            Operation::SetClusterConfiguration(config) => {
                let mut parts = Vec::new();
                if !config.cluster_configuration.is_empty() {
                    parts.push(config.cluster_configuration_value().to_string());
                }
                if !config.process_args.is_empty() {
                    parts.push(format!("processArgs {}", config.process_args_value()));
                }
                parts.join(" ")
            }
            Operation::Sleep(duration) => format!("{}s", duration.as_secs_f64()),
            Operation::AssertPrimaryRegion(region) => region.clone(),
            Operation::TestFailover | Operation::WaitForIdle | Operation::RestartVms => String::new(),
        };
        let _ = writeln!(out, "  {index:>2}. {} {detail}", operation.kind());
    }
    out
}
