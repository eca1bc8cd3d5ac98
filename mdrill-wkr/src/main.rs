//! mdrill - Reference Workload Executor
//!
//! Runs a driver workload against a deployment until interrupted, then
//! writes `results.json` and `events.json` into the working directory.

#![forbid(unsafe_code)]

mod events;
mod runner;
mod workload;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use mdrill_common::{ExecutionStatistics, LogConfig, RESULTS_FILE, init_logging};
use mongodb::Client;
use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use tracing::{info, warn};

use crate::events::EventLog;
use crate::workload::Workload;

#[derive(Parser)]
#[command(name = "mdrill-wkr")]
#[command(author, version, about = "mdrill reference workload executor")]
struct Cli {
    /// Connection string of the deployment under test
    connection_string: String,

    /// Workload as inline JSON, or a path to a JSON workload or YAML spec file
    workload: String,

    /// Directory receiving results.json and events.json
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Flip `stop` on the first interrupt. Nothing else happens in the listener.
async fn listen_for_stop(stop: Arc<AtomicBool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            stop.store(true, Ordering::SeqCst);
        }
        Err(e) => warn!("Failed to listen for interrupts: {}", e),
    }
}

fn write_results(dir: &Path, stats: &ExecutionStatistics) -> Result<PathBuf> {
    let path = dir.join(RESULTS_FILE);
    std::fs::write(&path, serde_json::to_string(stats)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let workload = Workload::load(&cli.workload).context("failed to load workload")?;

    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn(listen_for_stop(stop.clone()));

    let events = EventLog::new();
    let mut options = ClientOptions::parse(&cli.connection_string)
        .await
        .context("invalid connection string")?;
    options.command_event_handler = Some(events.command_handler());
    options.cmap_event_handler = Some(events.cmap_handler());
    let client = Client::with_options(options)?;
    let collection = client
        .database(&workload.database)
        .collection::<Document>(&workload.collection);

    let stats = runner::run(&collection, &workload, &stop).await;

    let results = write_results(&cli.workdir, &stats)?;
    info!("Wrote {} ({})", results.display(), stats);
    match events.write_to(&cli.workdir) {
        Ok(path) => info!("Wrote {} event(s) to {}", events.len(), path.display()),
        Err(e) => warn!("Failed to write events: {}", e),
    }

    if stats.num_errors != 0 || stats.num_failures != 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn results_file_uses_protocol_keys() {
        let dir = TempDir::new().unwrap();
        let stats = ExecutionStatistics {
            num_errors: 0,
            num_failures: 1,
            num_successes: 9,
            num_iterations: 10,
        };
        write_results(dir.path(), &stats).unwrap();

        assert_eq!(mdrill_common::read_statistics(dir.path()), stats);
        let raw = std::fs::read_to_string(dir.path().join(RESULTS_FILE)).unwrap();
        assert!(raw.contains("\"numIterations\":10"));
    }

    #[test]
    fn cli_takes_uri_then_workload() {
        let cli = Cli::try_parse_from(["mdrill-wkr", "mongodb://localhost", "{}"]).unwrap();
        assert_eq!(cli.connection_string, "mongodb://localhost");
        assert_eq!(cli.workload, "{}");
        assert_eq!(cli.workdir, PathBuf::from("."));
    }
}
