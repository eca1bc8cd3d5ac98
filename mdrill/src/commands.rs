//! Command implementations for the mdrill CLI.
//!
//! Every handler returns the process exit code; errors bubble up as
//! `anyhow::Error` with context attached.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use mdrill::{
    ArtifactCollector, DeploymentProbe, ExecutorValidator, Interrupt, MaintenanceTestCase,
    MongoProbe, RunOptions, TestCaseScheduler, XunitWriter, discover_spec_files, render_plan,
};
use mdrill_atlas::{
    AtlasClient, AtlasClientConfig, AtlasCluster, ClusterResource, LogCollector,
    ensure_access_from_anywhere, ensure_admin_user, ensure_project, get_organization_by_name,
    get_project,
};
use mdrill_common::{
    RunTimings, TestCaseConfiguration, TestSpecification, aggregate_statistics,
    cluster_name, test_name_from_spec_file,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::{AtlasArgs, ClusterTarget, DbUserArgs, ExecArgs, ProjectArgs, RunArgs};

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {what}: {value}"))
}

// ── Clients ──────────────────────────────────────────────────────────────

fn api_client(atlas: &AtlasArgs) -> Result<AtlasClient> {
    let (Some(username), Some(password)) = (&atlas.atlas_api_username, &atlas.atlas_api_password)
    else {
        bail!("Atlas API credentials are required (--atlas-api-username/--atlas-api-password)");
    };
    let config = AtlasClientConfig::new(username, password)
        .with_base_url(&atlas.atlas_base_url)
        .with_timeout(seconds(atlas.http_timeout, "--http-timeout")?);
    Ok(AtlasClient::new(config))
}

fn admin_client(atlas: &AtlasArgs) -> Result<Option<AtlasClient>> {
    match (&atlas.atlas_admin_api_username, &atlas.atlas_admin_api_password) {
        (Some(username), Some(password)) => {
            let config = AtlasClientConfig::new(username, password)
                .with_base_url(&atlas.atlas_base_url)
                .with_timeout(seconds(atlas.http_timeout, "--http-timeout")?);
            Ok(Some(AtlasClient::new(config)))
        }
        (None, None) => Ok(None),
        _ => bail!("both --atlas-admin-api-username and --atlas-admin-api-password are required"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn id_of(document: &Value, what: &str) -> Result<String> {
    document
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("{what} document has no id: {document}"))
}

fn project_id(client: &AtlasClient, project: &ProjectArgs) -> Result<String> {
    let org = get_organization_by_name(client, &project.org_name)
        .with_context(|| format!("looking up organization {:?}", project.org_name))?;
    let org_id = id_of(&org, "organization")?;
    let project_doc = get_project(client, &project.project_name, &org_id)
        .with_context(|| format!("looking up project {:?}", project.project_name))?;
    id_of(&project_doc, "project")
}

// ── Provisioning commands ────────────────────────────────────────────────

pub fn check_connection(atlas: &AtlasArgs) -> Result<i32> {
    let client = api_client(atlas)?;
    let root = client.get("").context("fetching API root")?;
    print_json(&root)?;
    Ok(0)
}

pub fn organization_get_one(atlas: &AtlasArgs, org_name: &str) -> Result<i32> {
    let client = api_client(atlas)?;
    print_json(&get_organization_by_name(&client, org_name)?)?;
    Ok(0)
}

pub fn project_ensure(atlas: &AtlasArgs, project: &ProjectArgs) -> Result<i32> {
    let client = api_client(atlas)?;
    let org = get_organization_by_name(&client, &project.org_name)?;
    let org_id = id_of(&org, "organization")?;
    print_json(&ensure_project(&client, &project.project_name, &org_id)?)?;
    Ok(0)
}

pub fn project_enable_anywhere_access(atlas: &AtlasArgs, project: &ProjectArgs) -> Result<i32> {
    let client = api_client(atlas)?;
    let project_id = project_id(&client, project)?;
    print_json(&ensure_access_from_anywhere(&client, &project_id)?)?;
    Ok(0)
}

pub fn create_admin_user(atlas: &AtlasArgs, project: &ProjectArgs, db_user: &DbUserArgs) -> Result<i32> {
    let client = api_client(atlas)?;
    let project_id = project_id(&client, project)?;
    ensure_admin_user(&client, &project_id, &db_user.db_username, &db_user.db_password)?;
    println!("User {:?} is ready", db_user.db_username);
    Ok(0)
}

// ── Cluster commands ─────────────────────────────────────────────────────

fn target_cluster(atlas: &AtlasArgs, target: &ClusterTarget) -> Result<AtlasCluster> {
    let client = api_client(atlas)?;
    let project_id = project_id(&client, &target.project)?;
    Ok(AtlasCluster::new(Arc::new(client), project_id, &target.cluster_name))
}

pub fn cluster_get_one(atlas: &AtlasArgs, target: &ClusterTarget) -> Result<i32> {
    let cluster = target_cluster(atlas, target)?;
    print_json(cluster.get()?.raw())?;
    Ok(0)
}

pub fn cluster_isready(atlas: &AtlasArgs, target: &ClusterTarget) -> Result<i32> {
    let cluster = target_cluster(atlas, target)?;
    let descriptor = cluster.get()?;
    let state = descriptor.state_name().unwrap_or("<unknown>");
    if descriptor.is_idle() {
        println!("Cluster {} is ready ({})", target.cluster_name, state);
        Ok(0)
    } else {
        println!("Cluster {} is not ready ({})", target.cluster_name, state);
        Ok(1)
    }
}

pub fn cluster_delete(atlas: &AtlasArgs, target: &ClusterTarget) -> Result<i32> {
    let cluster = target_cluster(atlas, target)?;
    cluster.delete()?;
    println!("Deletion of cluster {} requested", target.cluster_name);
    Ok(0)
}

// ── Spec test commands ───────────────────────────────────────────────────

fn name_salt(run: &RunArgs) -> String {
    run.cluster_name_salt
        .clone()
        .unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S").to_string())
}

/// Provision the organization, project, database user and access list.
fn prepare_project(client: &AtlasClient, run: &RunArgs) -> Result<String> {
    let org = get_organization_by_name(client, &run.project.org_name)
        .with_context(|| format!("looking up organization {:?}", run.project.org_name))?;
    let org_id = id_of(&org, "organization")?;
    let project = ensure_project(client, &run.project.project_name, &org_id)
        .with_context(|| format!("ensuring project {:?}", run.project.project_name))?;
    let project_id = id_of(&project, "project")?;
    ensure_admin_user(
        client,
        &project_id,
        &run.db_user.db_username,
        &run.db_user.db_password,
    )
    .context("ensuring database user")?;
    ensure_access_from_anywhere(client, &project_id).context("opening project access list")?;
    Ok(project_id)
}

pub fn run_spec_tests(atlas: &AtlasArgs, path: &Path, exec: &ExecArgs, single: bool) -> Result<i32> {
    let files = if single {
        if !path.is_file() {
            bail!("spec file {} does not exist", path.display());
        }
        vec![path.to_path_buf()]
    } else {
        discover_spec_files(path)?
    };

    // Parse everything before touching the control plane.
    let mut specs = Vec::with_capacity(files.len());
    for file in &files {
        let spec = TestSpecification::from_file(file)
            .with_context(|| format!("loading spec {}", file.display()))?;
        specs.push((test_name_from_spec_file(file), spec));
    }

    let mut timings = RunTimings::load(exec.run.timings.as_deref()).context("loading run timings")?;
    if let Some(startup) = exec.startup_time {
        timings.startup_grace = seconds(startup, "--startup-time")?;
    }

    let client = Arc::new(api_client(atlas)?);
    let admin = admin_client(atlas)?.map(Arc::new);
    if exec.retrieve_logs && admin.is_none() {
        bail!("--retrieve-logs requires admin API credentials");
    }
    let project_id = prepare_project(&client, &exec.run)?;

    std::fs::create_dir_all(&exec.workdir)
        .with_context(|| format!("creating working directory {}", exec.workdir.display()))?;
    let salt = name_salt(&exec.run);
    let config = Arc::new(TestCaseConfiguration {
        organization_name: exec.run.project.org_name.clone(),
        project_name: exec.run.project.project_name.clone(),
        name_salt: salt.clone(),
        polling_frequency: exec.run.polling_frequency,
        polling_timeout: seconds(exec.run.polling_timeout, "--polling-timeout")?,
        database_username: exec.run.db_user.db_username.clone(),
        database_password: exec.run.db_user.db_password.clone(),
        workload_executor: exec.workload_executor.clone(),
        workdir: exec.workdir.clone(),
        timings,
    });
    let probe: Arc<dyn DeploymentProbe> = Arc::new(MongoProbe::new()?);

    let cases = specs
        .into_iter()
        .map(|(test_name, spec)| {
            let cluster = AtlasCluster::new(Arc::clone(&client), &project_id, cluster_name(&test_name, &salt))
                .with_admin(admin.clone());
            info!("Test {} uses cluster {}", test_name, cluster.name());
            MaintenanceTestCase::new(test_name, spec, Box::new(cluster), Arc::clone(&probe), Arc::clone(&config))
        })
        .collect::<Vec<_>>();

    let artifacts = admin.filter(|_| exec.retrieve_logs).map(|admin| {
        Arc::new(LogCollector::new(
            admin,
            &project_id,
            &exec.logs_dir,
            config.timings.log_collection_timeout,
        )) as Arc<dyn ArtifactCollector>
    });
    let options = RunOptions {
        persist_cluster: exec.no_delete,
        interrupt: Interrupt::install().context("installing signal listener")?,
        artifacts,
    };

    let summary = TestCaseScheduler::new(cases, config.poller(), options)
        .with_skip_if_present(exec.no_create)
        .with_xunit(Some(XunitWriter::new(&exec.xunit_output)))
        .run();

    for report in &summary.reports {
        let category = report
            .outcome
            .category()
            .map(|c| format!(" [{c}]"))
            .unwrap_or_default();
        println!("{}: {}{}", report.test_name, report.summary(), category);
    }
    Ok(if summary.any_failed() { 1 } else { 0 })
}

pub fn delete_spec_cluster(atlas: &AtlasArgs, spec_file: &Path, run: &RunArgs) -> Result<i32> {
    let Some(salt) = &run.cluster_name_salt else {
        bail!("--cluster-name-salt is required to locate the cluster of a previous run");
    };
    let test_name = test_name_from_spec_file(spec_file);
    let name = cluster_name(&test_name, salt);
    let client = api_client(atlas)?;
    let project_id = project_id(&client, &run.project)?;
    let cluster = AtlasCluster::new(Arc::new(client), project_id, &name);
    match cluster.delete() {
        Ok(()) => println!("Deletion of cluster {name} ({test_name}) requested"),
        Err(err) if err.status() == Some(404) => warn!("Cluster {} does not exist", name),
        Err(err) => return Err(err.into()),
    }
    Ok(0)
}

pub fn plan(path: &Path) -> Result<i32> {
    for file in discover_spec_files(path)? {
        let spec = TestSpecification::from_file(&file)
            .with_context(|| format!("loading spec {}", file.display()))?;
        print!("{}", render_plan(&test_name_from_spec_file(&file), &spec));
    }
    Ok(0)
}

// ── Local commands ───────────────────────────────────────────────────────

pub fn aggregate(dir: &Path) -> Result<i32> {
    let stats = aggregate_statistics(dir).context("aggregating workload statistics")?;
    let path: PathBuf = stats.write_to(dir)?;
    println!("Wrote {}", path.display());
    Ok(0)
}

pub fn validate_executor(
    executor: &Path,
    connection_string: &str,
    run_for: f64,
    workdir: &Path,
    startup_time: f64,
) -> Result<i32> {
    let validator = ExecutorValidator::new(executor, workdir)
        .with_run_for(seconds(run_for, "--run-for")?)
        .with_startup_grace(seconds(startup_time, "--startup-time")?);
    match validator.validate(connection_string) {
        Ok(stats) => {
            println!("Workload executor is valid: {stats}");
            Ok(0)
        }
        Err(err) => {
            println!("Workload executor is invalid: {err}");
            Ok(1)
        }
    }
}
