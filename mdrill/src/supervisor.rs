//! Workload executor process supervision.
//!
//! The executor runs in its own process group so that an interrupt reaches
//! it (and anything it spawned) without also reaching the orchestrator.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use mdrill_common::{EVENTS_FILE, ExecutionStatistics, RESULTS_FILE, read_statistics};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Polling granularity while waiting for the executor to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to start workload executor {path}: {source}")]
    Spawn { path: PathBuf, source: io::Error },

    #[error("workload executor exited during its startup window ({status})")]
    Startup { status: ExitStatus },

    #[error("workload executor did not exit within {0:?} of the stop request")]
    Hung(Duration),

    #[error("workload executor exited before it was asked to stop ({status})")]
    PrematureExit {
        status: ExitStatus,
        statistics: ExecutionStatistics,
    },

    #[error("workload executor is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("workload executor stopped without reporting statistics")]
    MissingStatistics,

    #[error("workload executor was never started")]
    NotStarted,

    #[error("failed to prepare working directory {path}: {source}")]
    Workdir { path: PathBuf, source: io::Error },

    #[error("failed to wait for workload executor: {0}")]
    Wait(#[source] io::Error),
}

// ── Supervisor State ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
    Crashed,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Stopped => write!(f, "stopped"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────

/// Owns one workload executor subprocess at a time.
#[derive(Debug)]
pub struct WorkloadSupervisor {
    workdir: PathBuf,
    stop_timeout: Duration,
    child: Option<Child>,
    state: SupervisorState,
}

impl WorkloadSupervisor {
    pub fn new(workdir: impl Into<PathBuf>, stop_timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            stop_timeout,
            child: None,
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Launch `executor <connection_string> <workload_json>`.
    ///
    /// Returns once the executor has survived `startup_grace`; an exit inside
    /// that window is a startup fault.
    pub fn spawn(
        &mut self,
        executor: &Path,
        connection_string: &str,
        workload_json: &str,
        startup_grace: Duration,
    ) -> Result<(), WorkloadError> {
        if let Some(pid) = self.running_pid() {
            return Err(WorkloadError::AlreadyRunning(pid));
        }
        self.remove_stale_outputs()?;

        let mut cmd = Command::new(executor);
        cmd.arg(connection_string)
            .arg(workload_json)
            .current_dir(&self.workdir)
            .stdin(Stdio::null());
        isolate_process_group(&mut cmd);

        info!("Starting workload executor {}", executor.display());
        let mut child = cmd.spawn().map_err(|source| WorkloadError::Spawn {
            path: executor.to_path_buf(),
            source,
        })?;
        debug!("Workload executor started with pid {}", child.id());

        match wait_for_exit(&mut child, startup_grace).map_err(WorkloadError::Wait)? {
            Some(status) => {
                warn!("Workload executor exited during startup: {}", status);
                self.state = SupervisorState::Crashed;
                Err(WorkloadError::Startup { status })
            }
            None => {
                self.child = Some(child);
                self.state = SupervisorState::Running;
                Ok(())
            }
        }
    }

    /// Ask the executor to stop and return the statistics it wrote.
    pub fn stop(&mut self) -> Result<ExecutionStatistics, WorkloadError> {
        let Some(child) = self.child.as_mut() else {
            return Err(WorkloadError::NotStarted);
        };

        if let Some(status) = child.try_wait().map_err(WorkloadError::Wait)? {
            warn!("Workload executor already exited: {}", status);
            self.child = None;
            self.state = SupervisorState::Crashed;
            return Err(WorkloadError::PrematureExit {
                status,
                statistics: read_statistics(&self.workdir),
            });
        }

        let pid = child.id();
        info!("Stopping workload executor (pid {})", pid);
        signal_group(pid, GroupSignal::Interrupt);
        self.state = SupervisorState::StopRequested;

        match wait_for_exit(child, self.stop_timeout).map_err(WorkloadError::Wait)? {
            Some(status) => {
                info!("Workload executor exited: {}", status);
                self.child = None;
                self.state = SupervisorState::Stopped;
                Ok(read_statistics(&self.workdir))
            }
            None => Err(WorkloadError::Hung(self.stop_timeout)),
        }
    }

    /// Best-effort cleanup that never fails.
    ///
    /// A running executor is interrupted, given the stop ceiling, then
    /// killed. Returns whatever statistics ended up on disk.
    pub fn terminate(&mut self) -> ExecutionStatistics {
        let Some(mut child) = self.child.take() else {
            return match self.state {
                SupervisorState::NotStarted => ExecutionStatistics::unreported(),
                _ => read_statistics(&self.workdir),
            };
        };

        let pid = child.id();
        if matches!(child.try_wait(), Ok(None)) {
            if self.state != SupervisorState::StopRequested {
                signal_group(pid, GroupSignal::Interrupt);
                self.state = SupervisorState::StopRequested;
            }
            if !matches!(wait_for_exit(&mut child, self.stop_timeout), Ok(Some(_))) {
                warn!("Killing workload executor (pid {})", pid);
                signal_group(pid, GroupSignal::Kill);
                let _ = child.kill();
                let _ = child.wait();
            }
        }

        self.state = SupervisorState::Stopped;
        read_statistics(&self.workdir)
    }

    fn running_pid(&mut self) -> Option<u32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => Some(child.id()),
            _ => None,
        }
    }

    fn remove_stale_outputs(&self) -> Result<(), WorkloadError> {
        for name in [RESULTS_FILE, EVENTS_FILE] {
            let path = self.workdir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed stale {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(WorkloadError::Workdir { path, source }),
            }
        }
        Ok(())
    }
}

impl Drop for WorkloadSupervisor {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.terminate();
        }
    }
}

/// Wait up to `timeout` for the child to exit.
fn wait_for_exit(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

// ── Process group helpers ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Signal the process group led by `pid`. Returns false if delivery failed,
/// which includes the group already being gone.
#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) -> bool {
    let name = match signal {
        GroupSignal::Interrupt => "INT",
        GroupSignal::Kill => "KILL",
    };
    let result = Command::new("kill")
        .arg(format!("-{name}"))
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("kill -{} -{} failed: {}", name, pid, e);
            false
        }
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn signal_group(pid: u32, signal: GroupSignal) -> bool {
    use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

    match signal {
        GroupSignal::Interrupt => {
            // SAFETY: plain FFI call with integer arguments; the group id is the
            // pid of a child spawned with CREATE_NEW_PROCESS_GROUP.
            let delivered = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } != 0;
            if !delivered {
                debug!(
                    "CTRL_BREAK to group {} failed: {}",
                    pid,
                    io::Error::last_os_error()
                );
            }
            delivered
        }
        GroupSignal::Kill => Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .arg("/T")
            .arg("/F")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false),
    }
}
