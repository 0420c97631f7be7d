//! Launch context supplied by the build/run collaborator.
//!
//! The supervisor treats the working directory and environment as opaque:
//! it binds them to the child and never validates their content.

use std::path::{Path, PathBuf};

/// Where and with which environment a daemon runs.
///
/// Resolved again on every start so a restart picks up changes made since
/// the original launch.
pub trait LaunchContext: Send + Sync {
    fn workdir(&self) -> PathBuf;
    fn env(&self) -> Vec<(String, String)>;
}

/// Context built from the invoking process: a fixed working directory, the
/// inherited environment, and explicit overrides applied on top in order.
#[derive(Debug, Clone)]
pub struct HostContext {
    workdir: PathBuf,
    inherit_env: bool,
    overrides: Vec<(String, String)>,
}

impl HostContext {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            inherit_env: true,
            overrides: Vec::new(),
        }
    }

    /// Start from an empty environment instead of the inherited one.
    pub fn isolated(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn with_vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.overrides.extend(vars);
        self
    }

    pub fn workdir_path(&self) -> &Path {
        &self.workdir
    }
}

impl LaunchContext for HostContext {
    fn workdir(&self) -> PathBuf {
        self.workdir.clone()
    }

    fn env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = if self.inherit_env {
            std::env::vars().collect()
        } else {
            Vec::new()
        };
        for (key, value) in &self.overrides {
            match env.iter_mut().find(|(existing, _)| existing == key) {
                Some(slot) => slot.1 = value.clone(),
                None => env.push((key.clone(), value.clone())),
            }
        }
        env
    }
}

/// Parse one `KEY=VALUE` pair. The value may itself contain `=`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() && !key.contains(char::is_whitespace) => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(format!("invalid environment variable '{raw}', expected KEY=VALUE")),
    }
}
