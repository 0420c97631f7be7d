use crate::config::ProjectPaths;
use crate::error::{SupervisorError, SupervisorResult};
use crate::liveness;
use crate::platform;
use crate::process_record::{ProcessRecord, ProcessStatus, ProcessTable};
use crate::storage::RecordStore;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

const SHELL: &str = "/bin/sh";
const BANNER_RULE: &str = "=========================================";

/// Everything needed to launch one daemon.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Unique key in the process table and stem of the log file.
    pub name: String,
    /// Shell command line, run through `/bin/sh -c`.
    pub command: String,
    pub workdir: PathBuf,
    /// The complete child environment. Nothing else is inherited.
    pub env: Vec<(String, String)>,
}

/// A freshly launched daemon and the task watching it.
#[derive(Debug)]
pub struct LaunchedDaemon {
    pub record: ProcessRecord,
    pub watcher: WatcherHandle,
}

/// What the watcher observed when the child exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOutcome {
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub status: ProcessStatus,
    /// Whether the table was updated. False when the name was relaunched in
    /// the meantime, the record was removed, or the update failed.
    pub recorded: bool,
}

/// Handle to the task that waits on a daemon and settles its record.
///
/// Dropping it (or calling [`detach`](Self::detach)) leaves the task
/// running for as long as the runtime lives.
#[derive(Debug)]
pub struct WatcherHandle {
    pid: u32,
    handle: JoinHandle<WatcherOutcome>,
}

impl WatcherHandle {
    /// PID of the watched daemon.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True once the daemon exited and its record was settled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the child to exit and its record to be settled.
    pub async fn wait(self) -> SupervisorResult<WatcherOutcome> {
        self.handle
            .await
            .map_err(|err| SupervisorError::Io(io::Error::other(format!("watcher task failed: {err}"))))
    }

    /// Stop watching. The daemon keeps running and later reconciliation
    /// settles its record.
    pub fn detach(self) {
        drop(self.handle);
    }
}

/// Starts commands as detached daemons and tracks them in a [`RecordStore`].
#[derive(Debug, Clone)]
pub struct DaemonLauncher<S> {
    store: S,
    paths: ProjectPaths,
}

impl<S> DaemonLauncher<S>
where
    S: RecordStore + Clone + 'static,
{
    /// Launcher writing records to `store` and logs under `paths.log_dir`.
    pub fn new(store: S, paths: ProjectPaths) -> Self {
        Self { store, paths }
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Launch `request` unless a live daemon already owns the name.
    ///
    /// The liveness check, log setup, spawn and record insert run under the
    /// store's writer lock, so two concurrent starts of one name cannot both
    /// spawn. Must be called from within a tokio runtime.
    pub async fn start(&self, request: LaunchRequest) -> SupervisorResult<LaunchedDaemon> {
        let mut spawned: Option<(Child, File, u32)> = None;

        let result = self.store.update(|table| {
            liveness::reconcile_with(table, liveness::is_tracked);
            if let Some(existing) = table.get(&request.name).filter(|rec| rec.is_running()) {
                return Err(SupervisorError::DaemonAlreadyRunning {
                    name: request.name.clone(),
                    pid: existing.pid,
                });
            }

            let log_path = self.paths.log_file(&request.name);
            let log_file = open_log(&self.paths.log_dir, &log_path)?;
            write_banner(&log_file, Utc::now(), &request.command, &request.workdir)?;

            let child = spawn_daemon(&request, &log_file)?;
            let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
                command: request.command.clone(),
                source: io::Error::other("child exited before its PID could be read"),
            })?;
            spawned = Some((child, log_file, pid));

            let record = ProcessRecord::new(
                pid,
                request.name.clone(),
                request.command.clone(),
                Utc::now(),
                log_path.to_string_lossy().into_owned(),
                self.paths.project_name.clone(),
            );
            table.upsert(record.clone());
            Ok(record)
        });

        match (result, spawned) {
            (Ok(record), Some((child, log_file, pid))) => {
                tracing::info!(
                    name = %record.name,
                    pid,
                    log = %record.log_file,
                    "daemon started"
                );
                let watcher = self.spawn_watcher(record.name.clone(), pid, child, log_file);
                Ok(LaunchedDaemon { record, watcher })
            }
            (Err(err), Some((child, log_file, pid))) => {
                tracing::error!(name = %request.name, pid, error = %err, "daemon running but untracked");
                // Still reap the child so it does not linger as a zombie.
                self.spawn_watcher(request.name.clone(), pid, child, log_file)
                    .detach();
                Err(SupervisorError::OrphanedProcess {
                    name: request.name,
                    pid,
                    source: Box::new(err),
                })
            }
            (Err(err), None) => Err(err),
            (Ok(_), None) => Err(SupervisorError::Io(io::Error::other(
                "record written without a spawned child",
            ))),
        }
    }

    fn spawn_watcher(&self, name: String, pid: u32, mut child: Child, log_file: File) -> WatcherHandle {
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(name = %name, pid, error = %err, "failed to wait for daemon");
                    None
                }
            };
            drop(log_file);

            let status = ProcessStatus::from_exit_code(exit_code);
            let recorded = match store.update(|table| Ok(settle_exit(table, &name, pid, exit_code))) {
                Ok(recorded) => recorded,
                Err(err) => {
                    tracing::warn!(name = %name, pid, error = %err, "failed to record daemon exit");
                    false
                }
            };
            tracing::debug!(name = %name, pid, ?exit_code, %status, recorded, "daemon exited");

            WatcherOutcome {
                pid,
                exit_code,
                status,
                recorded,
            }
        });
        WatcherHandle { pid, handle }
    }
}

/// Apply an observed exit to the record of `name`, but only while it still
/// describes the same PID. A record already settled by `stop` keeps its
/// status and only gains the exit code.
fn settle_exit(
    table: &mut ProcessTable,
    name: &str,
    pid: u32,
    exit_code: Option<i32>,
) -> bool {
    match table.get_mut(name) {
        Some(record) if record.pid == pid => {
            if record.is_running() {
                record.mark_exited(exit_code);
            } else if record.exit_code.is_none() {
                record.exit_code = exit_code;
            }
            true
        }
        _ => false,
    }
}

fn open_log(log_dir: &Path, log_path: &Path) -> SupervisorResult<File> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    Ok(file)
}

/// Self-describing header appended before every launch.
pub fn write_banner(
    mut log: &File,
    started_at: DateTime<Utc>,
    command: &str,
    workdir: &Path,
) -> io::Result<()> {
    let banner = format!(
        "\n=== sbox daemon started at {} ===\nCommand: {}\nWorkdir: {}\n{}\n\n",
        started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        command,
        workdir.display(),
        BANNER_RULE,
    );
    log.write_all(banner.as_bytes())?;
    log.flush()
}

fn spawn_daemon(request: &LaunchRequest, log_file: &File) -> SupervisorResult<Child> {
    let spawn_failed = |source: io::Error| SupervisorError::SpawnFailed {
        command: request.command.clone(),
        source,
    };

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(&request.command)
        .current_dir(&request.workdir)
        .env_clear()
        .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file.try_clone()?));
    platform::detach_command(&mut cmd);

    cmd.spawn().map_err(spawn_failed)
}
