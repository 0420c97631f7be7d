use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use psutil::process::{Process, Status};
use std::io;
use tokio::process::Command;

/// Outcome of delivering a signal to a PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    Delivered,
    /// The PID no longer exists.
    Gone,
}

/// Run the child in its own session so terminal signals sent to the
/// invoking shell (Ctrl+C, hangup) do not reach the daemon.
pub fn detach_command(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and the closure neither allocates
    // nor takes locks.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    // 0 and negative values address process groups, never a single process.
    i32::try_from(pid).ok().filter(|raw| *raw > 0).map(Pid::from_raw)
}

/// Check if process is alive
///
/// Sends the null signal. `EPERM` means the PID exists but belongs to
/// someone else, which still counts as alive. Zombies (exited, not yet
/// reaped) count as dead.
pub fn process_alive(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };
    let exists = match kill(target, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    };
    exists && !is_zombie(pid)
}

fn is_zombie(pid: u32) -> bool {
    Process::new(pid)
        .and_then(|process| process.status())
        .map(|status| matches!(status, Status::Zombie))
        .unwrap_or(false)
}

/// OS-reported creation time of a PID, if it can be read.
///
/// The kernel reports process start relative to boot, so the host boot time
/// is added to get wall-clock time.
pub fn process_start_time(pid: u32) -> Option<DateTime<Utc>> {
    let process = Process::new(pid).ok()?;
    let boot = psutil::host::boot_time().ok()?;
    let started = boot.checked_add(process.create_time())?;
    Some(DateTime::<Utc>::from(started))
}

/// Whether any member of the process group led by `pid` still exists.
///
/// Zombie members count, so callers combine this with [`process_alive`] on
/// the leader.
pub fn group_alive(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };
    matches!(killpg(target, None), Ok(()) | Err(Errno::EPERM))
}

/// Signal the whole process group led by `pid`, so children forked by the
/// shell wrapper go down with it. PIDs that do not lead a group get the
/// signal directly.
fn send_signal(pid: u32, signal: Signal) -> Result<SignalDelivery, String> {
    let Some(target) = to_pid(pid) else {
        return Err(format!("invalid pid {pid}"));
    };
    match killpg(target, signal) {
        Ok(()) => return Ok(SignalDelivery::Delivered),
        Err(Errno::ESRCH) => {}
        Err(errno) => return Err(format!("{} to group {pid}: {errno}", signal.as_str())),
    }
    match kill(target, signal) {
        Ok(()) => Ok(SignalDelivery::Delivered),
        Err(Errno::ESRCH) => Ok(SignalDelivery::Gone),
        Err(errno) => Err(format!("{}: {errno}", signal.as_str())),
    }
}

/// Ask the process to exit (SIGTERM).
pub fn request_termination(pid: u32) -> Result<SignalDelivery, String> {
    send_signal(pid, Signal::SIGTERM)
}

/// Kill the process outright (SIGKILL).
pub fn force_kill(pid: u32) -> Result<SignalDelivery, String> {
    send_signal(pid, Signal::SIGKILL)
}
