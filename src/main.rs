use anyhow::Context;
use colored::Colorize;
use sbox::commands::{dispatch, Cli};
use sbox::utils::logger::init_logger;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(err) = init_logger(cli.log_level.as_deref(), None) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::from(1);
    }

    let project_root = match resolve_project_root(cli.project.clone()) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("{} {err:#}", "✗".red());
            return ExitCode::from(1);
        }
    };

    match dispatch(cli.command, project_root).await {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(error = ?err, category = %err.category(), "command failed");
            eprintln!("{} {}", "✗".red(), err.user_message());
            ExitCode::from(err.exit_code())
        }
    }
}

fn resolve_project_root(project: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let root = match project {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    let canonical = root
        .canonicalize()
        .with_context(|| format!("project directory {} is not accessible", root.display()))?;
    Ok(canonical)
}
