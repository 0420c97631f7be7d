//! Error handling for the process supervisor
//!
//! Store, prober, launcher and log reader all return [`SupervisorError`].
//! Only the command layer turns these into user-facing text via
//! [`SupervisorError::user_message`] and process exit codes via
//! [`SupervisorError::exit_code`].

use crate::process_record::ProcessStatus;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Start requested for a name whose daemon is still alive
    #[error("process '{name}' is already running (PID: {pid})")]
    DaemonAlreadyRunning { name: String, pid: u32 },

    /// Stop requested for a name with no live record
    #[error("process '{name}' is not running (status: {status})")]
    NotRunning { name: String, status: ProcessStatus },

    #[error("process '{0}' not found")]
    NotFound(String),

    #[error("no logs found for '{0}'")]
    LogNotFound(String),

    /// The child was spawned but its record could not be persisted
    #[error("process '{name}' (PID {pid}) is running but could not be recorded: {source}")]
    OrphanedProcess {
        name: String,
        pid: u32,
        #[source]
        source: Box<SupervisorError>,
    },

    #[error("failed to start '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal PID {pid}: {message}")]
    SignalFailed { pid: u32, message: String },

    #[error("process table {path} is corrupt: {source}")]
    CorruptTable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for convenience
pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Conflicts with a live daemon
    Conflict,
    /// Operation does not fit the record's current status
    State,
    /// Unknown name or missing log
    Lookup,
    /// Table or log file read/write failure
    Io,
    /// Spawning or signalling a process failed
    Process,
}

impl ErrorCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorCategory::Conflict => "Conflict",
            ErrorCategory::State => "State",
            ErrorCategory::Lookup => "Lookup",
            ErrorCategory::Io => "IO",
            ErrorCategory::Process => "Process",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl SupervisorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SupervisorError::DaemonAlreadyRunning { .. } => ErrorCategory::Conflict,
            SupervisorError::NotRunning { .. } => ErrorCategory::State,
            SupervisorError::NotFound(_) | SupervisorError::LogNotFound(_) => {
                ErrorCategory::Lookup
            }
            SupervisorError::OrphanedProcess { .. }
            | SupervisorError::SpawnFailed { .. }
            | SupervisorError::SignalFailed { .. } => ErrorCategory::Process,
            SupervisorError::CorruptTable { .. }
            | SupervisorError::Serialize(_)
            | SupervisorError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Process exit code used by the CLI for supervisor-level failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorError::DaemonAlreadyRunning { .. } => 3,
            SupervisorError::NotRunning { .. } => 4,
            SupervisorError::NotFound(_) => 5,
            SupervisorError::LogNotFound(_) => 6,
            SupervisorError::OrphanedProcess { .. } => 7,
            _ => 1,
        }
    }

    /// Whether the OS-level state may differ from the recorded state.
    ///
    /// The OS is authoritative; a table rebuild by re-probing known PIDs
    /// recovers from these.
    pub fn table_out_of_sync(&self) -> bool {
        matches!(self, SupervisorError::OrphanedProcess { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            SupervisorError::DaemonAlreadyRunning { name, pid } => format!(
                "Process '{name}' is already running (PID: {pid}). Use 'sbox stop {name}' first."
            ),
            SupervisorError::NotRunning { name, status } => {
                format!("Process '{name}' is not running (status: {status})")
            }
            SupervisorError::NotFound(name) => format!("Process '{name}' not found"),
            SupervisorError::LogNotFound(name) => format!("No logs found for '{name}'"),
            SupervisorError::OrphanedProcess { name, pid, source } => format!(
                "Process '{name}' started with PID {pid} but could not be tracked ({source}). \
                 It is still running; find it with 'ps -p {pid}' and stop it manually."
            ),
            SupervisorError::SpawnFailed { command, source } => {
                format!("Failed to start '{command}': {source}")
            }
            SupervisorError::SignalFailed { pid, message } => {
                format!("Could not stop PID {pid}: {message}")
            }
            SupervisorError::CorruptTable { path, .. } => format!(
                "Process table {} is unreadable. Remove it to rebuild tracking.",
                path.display()
            ),
            SupervisorError::Serialize(err) => format!("Failed to encode process table: {err}"),
            SupervisorError::Io(err) => format!("File system problem: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_for_supervisor_failures() {
        let errors = [
            SupervisorError::DaemonAlreadyRunning {
                name: "api".into(),
                pid: 10,
            },
            SupervisorError::NotRunning {
                name: "api".into(),
                status: ProcessStatus::Stopped,
            },
            SupervisorError::NotFound("api".into()),
            SupervisorError::LogNotFound("api".into()),
        ];
        let codes: std::collections::HashSet<u8> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn orphaned_process_keeps_pid_and_category() {
        let err = SupervisorError::OrphanedProcess {
            name: "web".into(),
            pid: 4242,
            source: Box::new(SupervisorError::Io(io::Error::other("disk full"))),
        };
        assert_eq!(err.category(), ErrorCategory::Process);
        assert!(err.table_out_of_sync());
        assert!(err.user_message().contains("4242"));
        assert!(err.to_string().contains("disk full"));
    }
}
