//! mdrill - Atlas planned-maintenance test orchestrator
//!
//! Provisions Atlas clusters, runs a driver workload executor against them
//! while applying maintenance plans, and reports the outcome as JUnit XML.

#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mdrill_common::config::{
    DEFAULT_DB_PASSWORD, DEFAULT_DB_USERNAME, DEFAULT_ORGANIZATION_NAME, DEFAULT_POLLING_FREQUENCY,
    DEFAULT_POLLING_TIMEOUT_SECS,
};
use mdrill_common::{LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "mdrill")]
#[command(author, version, about = "Atlas planned-maintenance test orchestrator")]
struct Cli {
    #[command(flatten)]
    atlas: AtlasArgs,

    /// Log level or filter directive (e.g. "debug", "mdrill=trace,ureq=warn")
    #[arg(short = 'v', long, global = true, env = "MDRILL_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Control-plane connection settings.
#[derive(Args, Debug, Clone)]
pub struct AtlasArgs {
    /// Base URL of the Atlas API
    #[arg(
        long,
        global = true,
        env = "ATLAS_API_BASE_URL",
        default_value = mdrill_atlas::DEFAULT_BASE_URL
    )]
    pub atlas_base_url: String,

    /// Atlas API username (public key)
    #[arg(short = 'u', long, global = true, env = "ATLAS_API_USERNAME")]
    pub atlas_api_username: Option<String>,

    /// Atlas API password (private key)
    #[arg(short = 'p', long, global = true, env = "ATLAS_API_PASSWORD", hide_env_values = true)]
    pub atlas_api_password: Option<String>,

    /// Username for the private admin API (VM reboots, log collection)
    #[arg(long, global = true, env = "ATLAS_ADMIN_API_USERNAME")]
    pub atlas_admin_api_username: Option<String>,

    /// Password for the private admin API
    #[arg(long, global = true, env = "ATLAS_ADMIN_API_PASSWORD", hide_env_values = true)]
    pub atlas_admin_api_password: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, env = "ATLAS_HTTP_TIMEOUT", default_value = "10")]
    pub http_timeout: f64,
}

/// Organization and project selection.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Atlas organization name
    #[arg(long, env = "MDRILL_ORG_NAME", default_value = DEFAULT_ORGANIZATION_NAME)]
    pub org_name: String,

    /// Atlas project name
    #[arg(long, env = "MDRILL_PROJECT_NAME")]
    pub project_name: String,
}

/// Database user credentials.
#[derive(Args, Debug, Clone)]
pub struct DbUserArgs {
    /// Database username the workload connects as
    #[arg(long, env = "MDRILL_DB_USERNAME", default_value = DEFAULT_DB_USERNAME)]
    pub db_username: String,

    /// Database password the workload connects with
    #[arg(long, env = "MDRILL_DB_PASSWORD", default_value = DEFAULT_DB_PASSWORD, hide_env_values = true)]
    pub db_password: String,
}

/// Options shared by the spec-test commands that talk to clusters.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[command(flatten)]
    pub db_user: DbUserArgs,

    /// Salt mixed into cluster names (defaults to the current UTC timestamp)
    #[arg(long, env = "MDRILL_CLUSTER_NAME_SALT")]
    pub cluster_name_salt: Option<String>,

    /// Maximum time to wait for a cluster state change, in seconds
    #[arg(long, default_value_t = DEFAULT_POLLING_TIMEOUT_SECS)]
    pub polling_timeout: f64,

    /// Cluster state polling frequency, in Hz
    #[arg(long, default_value_t = DEFAULT_POLLING_FREQUENCY)]
    pub polling_frequency: f64,

    /// Optional TOML file overriding run timings
    #[arg(long, env = "MDRILL_TIMINGS")]
    pub timings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the API credentials by fetching the API root
    CheckConnection,

    /// Organization lookups
    #[command(subcommand)]
    Organizations(OrganizationCommands),

    /// Project provisioning
    #[command(subcommand)]
    Projects(ProjectCommands),

    /// Database user provisioning
    #[command(subcommand)]
    Users(UserCommands),

    /// Inspect or remove a single cluster
    #[command(subcommand)]
    Clusters(ClusterCommands),

    /// Run and manage maintenance spec tests
    #[command(subcommand)]
    SpecTests(SpecTestCommands),

    /// Workload statistics
    #[command(subcommand)]
    Stats(StatsCommands),

    /// Check that a workload executor follows the executor protocol
    ValidateExecutor {
        /// Workload executor to validate
        #[arg(short = 'e', long, env = "MDRILL_WORKLOAD_EXECUTOR")]
        workload_executor: PathBuf,

        /// Connection string of a running deployment
        #[arg(long, env = "MDRILL_CONNECTION_STRING")]
        connection_string: String,

        /// How long to let the workload run, in seconds
        #[arg(long, default_value = "5")]
        run_for: f64,

        /// Directory where the executor writes results.json
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Seconds the executor must stay alive after being spawned
        #[arg(long, default_value = "1")]
        startup_time: f64,
    },
}

#[derive(Subcommand)]
enum OrganizationCommands {
    /// Print one organization by name
    GetOne {
        #[arg(long, env = "MDRILL_ORG_NAME", default_value = DEFAULT_ORGANIZATION_NAME)]
        org_name: String,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create the project if it does not exist
    Ensure(ProjectArgs),
    /// Allow connections to the project from any address
    EnableAnywhereAccess(ProjectArgs),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create (or update) an admin database user
    CreateAdminUser {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(flatten)]
        db_user: DbUserArgs,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Print a cluster document
    GetOne(ClusterTarget),
    /// Report whether a cluster is IDLE (exit code 1 if not)
    Isready(ClusterTarget),
    /// Delete a cluster
    Delete(ClusterTarget),
}

#[derive(Args, Debug, Clone)]
pub struct ClusterTarget {
    /// Cluster name
    pub cluster_name: String,

    #[command(flatten)]
    pub project: ProjectArgs,
}

#[derive(Subcommand)]
enum SpecTestCommands {
    /// Run a single spec file
    RunOne {
        /// Spec file (YAML)
        spec_file: PathBuf,
        #[command(flatten)]
        exec: ExecArgs,
    },
    /// Run every spec file in a directory
    Run {
        /// Directory containing spec files
        spec_dir: PathBuf,
        #[command(flatten)]
        exec: ExecArgs,
    },
    /// Delete the cluster a spec file would use
    DeleteCluster {
        spec_file: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the maintenance plan of a spec file or directory
    Plan { path: PathBuf },
}

#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Workload executor binary
    #[arg(short = 'e', long, env = "MDRILL_WORKLOAD_EXECUTOR")]
    pub workload_executor: PathBuf,

    /// Directory for JUnit XML reports
    #[arg(long, default_value = "xunit-output")]
    pub xunit_output: PathBuf,

    /// Directory the executor runs in (holds results.json and events.json)
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Keep clusters after the tests finish
    #[arg(long)]
    pub no_delete: bool,

    /// Reuse existing clusters that already match the initial configuration
    #[arg(long)]
    pub no_create: bool,

    /// Seconds the executor must stay alive after being spawned
    #[arg(long)]
    pub startup_time: Option<f64>,

    /// Download server logs for every test case (needs admin credentials)
    #[arg(long)]
    pub retrieve_logs: bool,

    /// Directory for downloaded server logs
    #[arg(long, default_value = "logs")]
    pub logs_dir: PathBuf,
}

#[derive(Subcommand)]
enum StatsCommands {
    /// Summarize results.json and events.json into stats.json
    Aggregate {
        /// Directory holding the executor output
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(level.as_str());
    }
    let _logging_guards = init_logging(&log_config)?;

    let atlas = &cli.atlas;
    let code = match cli.command {
        Commands::CheckConnection => commands::check_connection(atlas)?,
        Commands::Organizations(OrganizationCommands::GetOne { org_name }) => {
            commands::organization_get_one(atlas, &org_name)?
        }
        Commands::Projects(ProjectCommands::Ensure(project)) => {
            commands::project_ensure(atlas, &project)?
        }
        Commands::Projects(ProjectCommands::EnableAnywhereAccess(project)) => {
            commands::project_enable_anywhere_access(atlas, &project)?
        }
        Commands::Users(UserCommands::CreateAdminUser { project, db_user }) => {
            commands::create_admin_user(atlas, &project, &db_user)?
        }
        Commands::Clusters(ClusterCommands::GetOne(target)) => commands::cluster_get_one(atlas, &target)?,
        Commands::Clusters(ClusterCommands::Isready(target)) => commands::cluster_isready(atlas, &target)?,
        Commands::Clusters(ClusterCommands::Delete(target)) => commands::cluster_delete(atlas, &target)?,
        Commands::SpecTests(SpecTestCommands::RunOne { spec_file, exec }) => {
            commands::run_spec_tests(atlas, &spec_file, &exec, true)?
        }
        Commands::SpecTests(SpecTestCommands::Run { spec_dir, exec }) => {
            commands::run_spec_tests(atlas, &spec_dir, &exec, false)?
        }
        Commands::SpecTests(SpecTestCommands::DeleteCluster { spec_file, run }) => {
            commands::delete_spec_cluster(atlas, &spec_file, &run)?
        }
        Commands::SpecTests(SpecTestCommands::Plan { path }) => commands::plan(&path)?,
        Commands::Stats(StatsCommands::Aggregate { dir }) => commands::aggregate(&dir)?,
        Commands::ValidateExecutor {
            workload_executor,
            connection_string,
            run_for,
            workdir,
            startup_time,
        } => commands::validate_executor(
            &workload_executor,
            &connection_string,
            run_for,
            &workdir,
            startup_time,
        )?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
