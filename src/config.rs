//! Supervisor configuration
//!
//! Fixed on-disk layout of a project's private `.sbox` directory plus the
//! tunable timings of the supervisor. Timings come from defaults, then an
//! optional `.sbox/supervisor.json`, then environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SBOX_DIR: &str = ".sbox";
pub const PROCESS_FILE: &str = "processes.json";
pub const PROCESS_LOCK_FILE: &str = "processes.json.lock";
pub const LOG_DIR: &str = "logs";
pub const LOG_EXTENSION: &str = "log";
pub const SUPERVISOR_CONFIG_FILE: &str = "supervisor.json";

pub const STOP_GRACE_ENV: &str = "SBOX_STOP_GRACE_MS";
pub const RESTART_SETTLE_ENV: &str = "SBOX_RESTART_SETTLE_MS";
pub const FOLLOW_POLL_ENV: &str = "SBOX_FOLLOW_POLL_MS";

pub const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const STOP_GRACE_DEFAULT: Duration = Duration::from_secs(2);
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const RESTART_SETTLE_DEFAULT: Duration = Duration::from_millis(500);
// A live PID whose OS start time is later than the record's start time by
// more than this belongs to a different process.
pub const PID_START_TOLERANCE: Duration = Duration::from_secs(2);

pub const DEFAULT_TAIL_LINES: usize = 50;
pub const DEFAULT_LOG_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Paths inside a project's private directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub project_root: PathBuf,
    pub project_name: String,
    pub sbox_dir: PathBuf,
    pub process_file: PathBuf,
    pub lock_file: PathBuf,
    pub log_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let project_name = project_root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sbox".to_string());
        let sbox_dir = project_root.join(SBOX_DIR);

        Self {
            process_file: sbox_dir.join(PROCESS_FILE),
            lock_file: sbox_dir.join(PROCESS_LOCK_FILE),
            log_dir: sbox_dir.join(LOG_DIR),
            project_root,
            project_name,
            sbox_dir,
        }
    }

    /// Log file dedicated to a daemon name.
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.{LOG_EXTENSION}"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.sbox_dir.join(SUPERVISOR_CONFIG_FILE)
    }
}

/// Timings used by stop/restart/follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_stop_grace", with = "duration_ms")]
    pub stop_grace: Duration,
    #[serde(default = "default_restart_settle", with = "duration_ms")]
    pub restart_settle: Duration,
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

fn default_stop_grace() -> Duration {
    STOP_GRACE_DEFAULT
}

fn default_restart_settle() -> Duration {
    RESTART_SETTLE_DEFAULT
}

fn default_poll_interval() -> Duration {
    FOLLOW_POLL_INTERVAL
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace: STOP_GRACE_DEFAULT,
            restart_settle: RESTART_SETTLE_DEFAULT,
            poll_interval: FOLLOW_POLL_INTERVAL,
        }
    }
}

impl SupervisorConfig {
    /// Load `.sbox/supervisor.json` if present, then apply environment overrides.
    pub fn load(paths: &ProjectPaths) -> Self {
        Self::from_file(&paths.config_file()).with_env_overrides()
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn from_file(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|err| err.to_string()))
        {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring invalid supervisor config");
                Self::default()
            }
        }
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_millis(STOP_GRACE_ENV) {
            self.stop_grace = value;
        }
        if let Some(value) = env_millis(RESTART_SETTLE_ENV) {
            self.restart_settle = value;
        }
        if let Some(value) = env_millis(FOLLOW_POLL_ENV) {
            self.poll_interval = value;
        }
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric duration override");
            None
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Parse a short duration such as `7d`, `24h`, `30m`, `45s` or `1500ms`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;

    let scale: u64 = match unit {
        "" | "s" => 1,
        "ms" => return Ok(Duration::from_millis(value)),
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{other}' in '{input}'")),
    };
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{input}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn project_paths_layout() {
        let paths = ProjectPaths::new("/srv/apps/shop");
        assert_eq!(paths.project_name, "shop");
        assert_eq!(paths.process_file, PathBuf::from("/srv/apps/shop/.sbox/processes.json"));
        assert_eq!(paths.log_file("web"), PathBuf::from("/srv/apps/shop/.sbox/logs/web.log"));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("3y").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn parse_duration_rejects_values_past_u64_seconds() {
        let err = parse_duration("300000000000000d").unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
        assert!(parse_duration("18446744073709551616").is_err());
    }

    #[test]
    fn config_file_partial_fields_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("supervisor.json");
        std::fs::write(&path, r#"{"stop_grace": 250}"#).unwrap();

        let config = SupervisorConfig::from_file(&path);
        assert_eq!(config.stop_grace, Duration::from_millis(250));
        assert_eq!(config.restart_settle, RESTART_SETTLE_DEFAULT);
        assert_eq!(config.poll_interval, FOLLOW_POLL_INTERVAL);
    }

    #[test]
    fn invalid_config_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("supervisor.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(SupervisorConfig::from_file(&path), SupervisorConfig::default());
    }
}
