//! Supervisor facade: the operations exposed to the CLI and to embedders.
//!
//! Every read reconciles the table against the OS first, so callers never
//! see a `running` record whose process is gone.

use crate::config::{ProjectPaths, SupervisorConfig, STOP_POLL_INTERVAL};
use crate::context::{HostContext, LaunchContext};
use crate::error::{SupervisorError, SupervisorResult};
use crate::launcher::{DaemonLauncher, LaunchRequest, LaunchedDaemon};
use crate::liveness;
use crate::log_reader::{LogReader, LogStream};
use crate::platform::{self, SignalDelivery};
use crate::process_record::{ProcessRecord, ProcessTable};
use crate::storage::{FileStore, RecordStore};
use std::time::Duration;
use tokio::time::Instant;

/// Result of stopping every running daemon.
#[derive(Debug, Default)]
pub struct StopReport {
    pub stopped: Vec<(String, u32)>,
    pub failed: Vec<(String, SupervisorError)>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Supervisor<S, C> {
    store: S,
    context: C,
    launcher: DaemonLauncher<S>,
    logs: LogReader,
    config: SupervisorConfig,
}

impl Supervisor<FileStore, HostContext> {
    /// Supervisor for the project rooted at `paths`, backed by its
    /// `processes.json` and configured from `supervisor.json` plus env.
    pub fn open(paths: ProjectPaths, context: HostContext) -> Self {
        let store = FileStore::new(&paths.process_file, &paths.lock_file);
        let config = SupervisorConfig::load(&paths);
        Self::new(store, context, paths, config)
    }
}

impl<S, C> Supervisor<S, C>
where
    S: RecordStore + Clone + 'static,
    C: LaunchContext,
{
    pub fn new(store: S, context: C, paths: ProjectPaths, config: SupervisorConfig) -> Self {
        let logs = LogReader::new(&paths.log_dir, config.poll_interval);
        let launcher = DaemonLauncher::new(store.clone(), paths);
        Self {
            store,
            context,
            launcher,
            logs,
            config,
        }
    }

    pub fn paths(&self) -> &ProjectPaths {
        self.launcher.paths()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    fn reconciled(&self) -> SupervisorResult<ProcessTable> {
        self.store.update(|table| {
            liveness::reconcile_with(table, liveness::is_tracked);
            Ok(table.clone())
        })
    }

    fn lookup(&self, name: &str) -> SupervisorResult<ProcessRecord> {
        self.reconciled()?
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// Launch `command` as daemon `name` with the current launch context.
    pub async fn start(&self, name: &str, command: &str) -> SupervisorResult<LaunchedDaemon> {
        let request = LaunchRequest {
            name: name.to_string(),
            command: command.to_string(),
            workdir: self.context.workdir(),
            env: self.context.env(),
        };
        self.launcher.start(request).await
    }

    /// Records in the table, optionally hiding the ones not running.
    pub fn list(&self, include_stopped: bool) -> SupervisorResult<Vec<ProcessRecord>> {
        Ok(self
            .reconciled()?
            .into_records()
            .into_iter()
            .filter(|record| include_stopped || record.is_running())
            .collect())
    }

    pub fn status(&self, name: &str) -> SupervisorResult<ProcessRecord> {
        self.lookup(name)
    }

    pub fn running_count(&self) -> SupervisorResult<usize> {
        Ok(self.reconciled()?.running().count())
    }

    /// Stop daemon `name`: SIGTERM, wait up to the grace period, then
    /// SIGKILL. The record ends `stopped` even if the process resisted.
    pub async fn stop(&self, name: &str) -> SupervisorResult<ProcessRecord> {
        let record = self.lookup(name)?;
        if !record.is_running() {
            return Err(SupervisorError::NotRunning {
                name: name.to_string(),
                status: record.status,
            });
        }

        let pid = record.pid;
        tracing::info!(name, pid, "stopping daemon");
        terminate(pid, self.config.stop_grace).await?;

        let settled = self.store.update(|table| {
            Ok(match table.get_mut(name) {
                Some(current) if current.pid == pid => {
                    current.mark_stopped();
                    Some(current.clone())
                }
                _ => None,
            })
        })?;

        Ok(settled.unwrap_or_else(|| {
            let mut record = record;
            record.mark_stopped();
            record
        }))
    }

    /// Stop every running daemon, collecting failures instead of aborting.
    pub async fn stop_all(&self) -> SupervisorResult<StopReport> {
        let running: Vec<String> = self
            .reconciled()?
            .running()
            .map(|record| record.name.clone())
            .collect();

        let mut report = StopReport::default();
        for name in running {
            match self.stop(&name).await {
                Ok(record) => report.stopped.push((name, record.pid)),
                Err(SupervisorError::NotRunning { .. }) | Err(SupervisorError::NotFound(_)) => {
                    tracing::debug!(name = %name, "daemon exited before it was stopped");
                }
                Err(err) => {
                    tracing::warn!(name = %name, error = %err, "failed to stop daemon");
                    report.failed.push((name, err));
                }
            }
        }
        Ok(report)
    }

    /// Stop `name` if running and start its recorded command again with a
    /// freshly resolved context.
    pub async fn restart(&self, name: &str) -> SupervisorResult<LaunchedDaemon> {
        let record = self.lookup(name)?;
        if record.is_running() {
            match self.stop(name).await {
                Ok(_) | Err(SupervisorError::NotRunning { .. }) => {}
                Err(err) => tracing::warn!(name, error = %err, "stop before restart failed"),
            }
            tokio::time::sleep(self.config.restart_settle).await;
        }
        self.start(name, &record.command).await
    }

    /// Forget a daemon that is no longer running. Its log file stays.
    pub fn remove(&self, name: &str) -> SupervisorResult<ProcessRecord> {
        self.store.update(|table| {
            liveness::reconcile_with(table, liveness::is_tracked);
            match table.get(name) {
                None => return Err(SupervisorError::NotFound(name.to_string())),
                Some(record) if record.is_running() => {
                    return Err(SupervisorError::DaemonAlreadyRunning {
                        name: name.to_string(),
                        pid: record.pid,
                    })
                }
                Some(_) => {}
            }
            table
                .remove(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
        })
    }

    pub fn tail(&self, name: &str, lines: usize) -> SupervisorResult<Vec<String>> {
        self.logs.tail(name, lines)
    }

    pub async fn follow(&self, name: &str) -> SupervisorResult<LogStream> {
        self.logs.follow(name).await
    }

    pub fn list_logs(&self) -> SupervisorResult<Vec<String>> {
        self.logs.list_logs()
    }

    pub fn log_size(&self, name: &str) -> SupervisorResult<u64> {
        self.logs.log_size(name)
    }

    pub fn prune_logs(&self, max_age: Duration) -> SupervisorResult<usize> {
        self.logs.prune(max_age)
    }
}

/// Graceful-then-forceful termination of `pid` and its process group.
async fn terminate(pid: u32, grace: Duration) -> SupervisorResult<()> {
    let term = platform::request_termination(pid);
    match &term {
        Ok(SignalDelivery::Gone) => return Ok(()),
        Ok(SignalDelivery::Delivered) => {
            if wait_for_exit(pid, grace).await {
                return Ok(());
            }
            tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "daemon ignored SIGTERM, killing");
        }
        Err(message) => tracing::warn!(pid, error = %message, "SIGTERM failed"),
    }

    match (term, platform::force_kill(pid)) {
        (Err(term_err), Err(kill_err)) => Err(SupervisorError::SignalFailed {
            pid,
            message: format!("{term_err}; {kill_err}"),
        }),
        _ => Ok(()),
    }
}

/// Wait until the leader and every other member of its group are gone.
async fn wait_for_exit(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if !liveness::is_alive(pid) && !platform::group_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}
