//! Handlers behind the `sbox` subcommands.

use super::parser::{Commands, RunArgs};
use crate::config::ProjectPaths;
use crate::context::{HostContext, LaunchContext};
use crate::error::{SupervisorError, SupervisorResult};
use crate::process_record::{ProcessRecord, ProcessStatus};
use crate::storage::RecordStore;
use crate::supervisor::Supervisor;
use crate::utils::{format_bytes, format_duration, truncate};
use chrono::Utc;
use colored::{ColoredString, Colorize};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};

const COMMAND_WIDTH: usize = 40;

/// Run one parsed subcommand against the project at `project_root`.
pub async fn dispatch(command: Commands, project_root: PathBuf) -> SupervisorResult<ExitCode> {
    let paths = ProjectPaths::new(&project_root);
    let context = HostContext::new(&project_root);

    match command {
        Commands::Run(args) => run(args, paths).await,
        Commands::Ps { all, quiet } => {
            ps(&Supervisor::open(paths, context), all, quiet)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Logs {
            name,
            lines,
            follow,
            list,
        } => {
            let supervisor = Supervisor::open(paths, context);
            if list {
                list_logs(&supervisor)?;
            } else {
                let name = name.unwrap_or_else(|| supervisor.paths().project_name.clone());
                logs(&supervisor, &name, lines, follow).await?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stop { name, all } => {
            let supervisor = Supervisor::open(paths, context);
            if all {
                return stop_all(&supervisor).await;
            }
            let name = name.unwrap_or_else(|| supervisor.paths().project_name.clone());
            println!("{} Stopping process: {}", "→".cyan(), name);
            let record = supervisor.stop(&name).await?;
            println!("{} Process stopped (PID {})", "✓".green(), record.pid);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Restart { name } => {
            let supervisor = Supervisor::open(paths, context);
            let name = name.unwrap_or_else(|| supervisor.paths().project_name.clone());
            println!("{} Restarting process: {}", "→".cyan(), name);
            let launched = supervisor.restart(&name).await?;
            println!("{} Process restarted (PID {})", "✓".green(), launched.record.pid);
            launched.watcher.detach();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { name } => {
            let removed = Supervisor::open(paths, context).remove(&name)?;
            println!("{} Removed '{}' (log kept at {})", "✓".green(), removed.name, removed.log_file);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clean { logs, older_than } => {
            if !logs {
                println!("Nothing to clean. Pass --logs to delete old log files.");
                return Ok(ExitCode::SUCCESS);
            }
            let removed = Supervisor::open(paths, context).prune_logs(older_than)?;
            println!(
                "{} Removed {} log file(s) older than {}",
                "✓".green(),
                removed,
                format_duration(older_than)
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(args: RunArgs, paths: ProjectPaths) -> SupervisorResult<ExitCode> {
    let workdir = args.workdir.clone().unwrap_or_else(|| paths.project_root.clone());
    let command = args.command_line();

    if !args.detach {
        return run_foreground(&command, workdir, &args.env).await;
    }

    let name = args.name.clone().unwrap_or_else(|| paths.project_name.clone());
    let context = HostContext::new(workdir).with_vars(args.env);
    let supervisor = Supervisor::open(paths, context);

    println!("{} Starting daemon: {}", "→".cyan(), name);
    let launched = supervisor.start(&name, &command).await?;
    let record = &launched.record;

    println!("{} Daemon started successfully", "✓".green());
    println!("  PID:     {}", record.pid);
    println!("  Name:    {}", record.name);
    println!("  Command: {}", record.command);
    println!("  Log:     {}", record.log_file);
    println!();
    println!("  Use 'sbox logs {name}' to view output");
    println!("  Use 'sbox stop {name}' to stop the daemon");

    launched.watcher.detach();
    Ok(ExitCode::SUCCESS)
}

/// Run attached to the terminal and hand the command's exit status back.
async fn run_foreground(
    command: &str,
    workdir: PathBuf,
    env: &[(String, String)],
) -> SupervisorResult<ExitCode> {
    tracing::debug!(command, workdir = %workdir.display(), "running in foreground");
    let status = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(&workdir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| SupervisorError::SpawnFailed {
            command: command.to_string(),
            source,
        })?;

    Ok(ExitCode::from(foreground_exit_code(status)))
}

fn foreground_exit_code(status: std::process::ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(1);
        }
    }
    1
}

fn ps<S, C>(supervisor: &Supervisor<S, C>, all: bool, quiet: bool) -> SupervisorResult<()>
where
    S: RecordStore + Clone + 'static,
    C: LaunchContext,
{
    let records = supervisor.list(all)?;

    if records.is_empty() {
        if !quiet {
            let scope = if all { "" } else { "running " };
            println!("No {scope}processes");
        }
        return Ok(());
    }

    if quiet {
        for record in &records {
            println!("{}", record.pid);
        }
        return Ok(());
    }

    println!();
    println!("  {:<8} {:<15} {:<10} {:<12} COMMAND", "PID", "NAME", "STATUS", "UPTIME");
    println!("  {:<8} {:<15} {:<10} {:<12} -------", "---", "----", "------", "------");
    let now = Utc::now();
    for record in &records {
        println!(
            "  {:<8} {:<15} {} {:<12} {}",
            record.pid,
            record.name,
            status_label(record.status),
            uptime_label(record, now),
            truncate(&record.command, COMMAND_WIDTH)
        );
    }
    println!();
    Ok(())
}

fn status_label(status: ProcessStatus) -> ColoredString {
    // Pad before colouring so escape codes do not break column widths.
    let padded = format!("{:<10}", status.as_str());
    match status {
        ProcessStatus::Running => padded.green(),
        ProcessStatus::Stopped => padded.yellow(),
        ProcessStatus::Crashed => padded.red(),
    }
}

fn uptime_label(record: &ProcessRecord, now: chrono::DateTime<Utc>) -> String {
    if !record.is_running() {
        return "-".to_string();
    }
    record
        .uptime(now)
        .to_std()
        .map(format_duration)
        .unwrap_or_else(|_| "0s".to_string())
}

fn list_logs<S, C>(supervisor: &Supervisor<S, C>) -> SupervisorResult<()>
where
    S: RecordStore + Clone + 'static,
    C: LaunchContext,
{
    let names = supervisor.list_logs()?;
    if names.is_empty() {
        println!("No log files found");
        return Ok(());
    }
    println!("{} Available logs:", "→".cyan());
    for name in names {
        let size = supervisor.log_size(&name).unwrap_or(0);
        println!("  • {} ({})", name, format_bytes(size));
    }
    Ok(())
}

async fn logs<S, C>(
    supervisor: &Supervisor<S, C>,
    name: &str,
    lines: usize,
    follow: bool,
) -> SupervisorResult<()>
where
    S: RecordStore + Clone + 'static,
    C: LaunchContext,
{
    if !follow {
        for line in supervisor.tail(name, lines)? {
            println!("{line}");
        }
        return Ok(());
    }

    let mut stream = supervisor.follow(name).await?;
    eprintln!("Following logs for '{name}' (Ctrl+C to exit)...");
    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(line)) => println!("{line}"),
                Some(Err(err)) => return Err(err),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn stop_all<S, C>(supervisor: &Supervisor<S, C>) -> SupervisorResult<ExitCode>
where
    S: RecordStore + Clone + 'static,
    C: LaunchContext,
{
    if supervisor.running_count()? == 0 {
        println!("No running processes to stop");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} Stopping all processes...", "→".cyan());
    let report = supervisor.stop_all().await?;
    for (name, pid) in &report.stopped {
        println!("{} Stopped {} (PID {})", "✓".green(), name, pid);
    }
    for (name, err) in &report.failed {
        eprintln!("{} Failed to stop {}: {}", "✗".red(), name, err.user_message());
    }

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_dash_for_stopped() {
        let mut record = ProcessRecord::new(1, "web", "sleep 5", Utc::now(), "web.log", "demo");
        record.mark_stopped();
        assert_eq!(uptime_label(&record, Utc::now()), "-");
    }

    #[test]
    fn uptime_for_running() {
        let started = Utc::now() - chrono::Duration::seconds(125);
        let record = ProcessRecord::new(1, "web", "sleep 5", started, "web.log", "demo");
        assert_eq!(uptime_label(&record, started + chrono::Duration::seconds(125)), "2m5s");
    }

    #[cfg(unix)]
    #[test]
    fn foreground_exit_codes() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(foreground_exit_code(std::process::ExitStatus::from_raw(0)), 0);
        // Raw wait status: exit code lives in the second byte.
        assert_eq!(foreground_exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGTERM (15).
        assert_eq!(foreground_exit_code(std::process::ExitStatus::from_raw(15)), 143);
    }
}
