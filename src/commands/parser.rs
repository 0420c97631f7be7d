//! Command-line interface definition.

use crate::config::{parse_duration, DEFAULT_TAIL_LINES};
use crate::context::parse_env_pair;
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// sbox - run project commands as tracked background daemons
#[derive(Parser, Debug, Clone)]
#[command(name = "sbox", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `sbox=trace` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a command, attached or as a background daemon
    Run(RunArgs),

    /// List tracked processes
    Ps {
        /// Include stopped and crashed processes
        #[arg(short, long)]
        all: bool,

        /// Print PIDs only
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show daemon logs
    Logs {
        /// Daemon name (defaults to the project name)
        name: Option<String>,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_TAIL_LINES)]
        lines: usize,

        /// Keep printing lines as they are written
        #[arg(short, long)]
        follow: bool,

        /// List available log files
        #[arg(long, conflicts_with_all = ["follow", "name"])]
        list: bool,
    },

    /// Stop a daemon
    Stop {
        /// Daemon name (defaults to the project name)
        name: Option<String>,

        /// Stop every running daemon
        #[arg(short, long, conflicts_with = "name")]
        all: bool,
    },

    /// Stop a daemon if running and start its command again
    Restart {
        /// Daemon name (defaults to the project name)
        name: Option<String>,
    },

    /// Forget a stopped daemon
    #[command(name = "rm")]
    Remove {
        name: String,
    },

    /// Delete old artifacts
    Clean {
        /// Delete log files
        #[arg(long)]
        logs: bool,

        /// Only delete files untouched for this long (e.g. 7d, 24h, 30m)
        #[arg(long, value_parser = parse_duration, default_value = "7d")]
        older_than: Duration,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Run in the background and track the process
    #[arg(short, long)]
    pub detach: bool,

    /// Daemon name (defaults to the project name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Working directory for the command (defaults to the project directory)
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Extra environment variable, repeatable
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Command line to run through the shell
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

impl Cli {
    /// Parse the process arguments; clap prints usage and exits on error.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse an explicit argv, used by tests.
    pub fn try_parse_args_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LOG_MAX_AGE;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_args_from(std::iter::once("sbox").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_detached_with_env_and_trailing_command() {
        let cli = parse(&[
            "run", "-d", "-n", "web", "-e", "PORT=8000", "-e", "MODE=dev", "python", "-m",
            "http.server",
        ]);
        let Commands::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert!(run.detach);
        assert_eq!(run.name.as_deref(), Some("web"));
        assert_eq!(
            run.env,
            vec![
                ("PORT".to_string(), "8000".to_string()),
                ("MODE".to_string(), "dev".to_string())
            ]
        );
        assert_eq!(run.command_line(), "python -m http.server");
    }

    #[test]
    fn run_rejects_bad_env_pair() {
        let result = Cli::try_parse_args_from(["sbox", "run", "-e", "NOPE", "true"]);
        assert!(result.is_err());
    }

    #[test]
    fn logs_defaults() {
        let cli = parse(&["logs"]);
        match cli.command {
            Commands::Logs { name, lines, follow, list } => {
                assert_eq!(name, None);
                assert_eq!(lines, DEFAULT_TAIL_LINES);
                assert!(!follow);
                assert!(!list);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn clean_parses_age() {
        let cli = parse(&["--project", "/srv/app", "clean", "--logs", "--older-than", "24h"]);
        assert_eq!(cli.project, Some(PathBuf::from("/srv/app")));
        match cli.command {
            Commands::Clean { logs, older_than } => {
                assert!(logs);
                assert_eq!(older_than, Duration::from_secs(24 * 3600));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let Commands::Clean { older_than, .. } = parse(&["clean", "--logs"]).command else {
            panic!("expected clean");
        };
        assert_eq!(older_than, DEFAULT_LOG_MAX_AGE);
    }

    #[test]
    fn stop_all_conflicts_with_name() {
        assert!(Cli::try_parse_args_from(["sbox", "stop", "-a", "web"]).is_err());
        assert!(matches!(parse(&["stop", "-a"]).command, Commands::Stop { all: true, name: None }));
    }

    #[test]
    fn rm_requires_name() {
        assert!(Cli::try_parse_args_from(["sbox", "rm"]).is_err());
        assert!(matches!(parse(&["rm", "api"]).command, Commands::Remove { name } if name == "api"));
    }
}
