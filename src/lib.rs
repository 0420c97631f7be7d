//! sbox - per-project process supervisor
//!
//! Launches commands as detached daemons, tracks them in
//! `.sbox/processes.json`, reconciles the recorded status against the OS,
//! stops them with graceful-then-forceful escalation and serves their logs.

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod launcher;
pub mod liveness;
pub mod log_reader;
pub mod platform;
pub mod process_record;
pub mod storage;
pub mod supervisor;
pub mod utils;

pub use config::{ProjectPaths, SupervisorConfig};
pub use context::{HostContext, LaunchContext};
pub use error::{ErrorCategory, SupervisorError, SupervisorResult};
pub use launcher::{DaemonLauncher, LaunchRequest, LaunchedDaemon, WatcherHandle, WatcherOutcome};
pub use log_reader::{LogReader, LogStream};
pub use process_record::{ProcessRecord, ProcessStatus, ProcessTable};
pub use storage::{FileStore, MemoryStore, RecordStore};
pub use supervisor::{StopReport, Supervisor};
