//! OS-specific process primitives: liveness probing, signalling and
//! detaching spawned daemons from the controlling terminal.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{
    detach_command, force_kill, group_alive, process_alive, process_start_time,
    request_termination, SignalDelivery,
};

#[cfg(not(unix))]
mod fallback {
    use chrono::{DateTime, Utc};
    use tokio::process::Command;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignalDelivery {
        Delivered,
        Gone,
    }

    pub fn detach_command(_cmd: &mut Command) {}

    pub fn process_alive(_pid: u32) -> bool {
        false
    }

    pub fn process_start_time(_pid: u32) -> Option<DateTime<Utc>> {
        None
    }

    pub fn group_alive(_pid: u32) -> bool {
        false
    }

    pub fn request_termination(_pid: u32) -> Result<SignalDelivery, String> {
        Err("signals are not supported on this platform".to_string())
    }

    pub fn force_kill(_pid: u32) -> Result<SignalDelivery, String> {
        Err("signals are not supported on this platform".to_string())
    }
}

#[cfg(not(unix))]
pub use fallback::{
    detach_command, force_kill, group_alive, process_alive, process_start_time,
    request_termination, SignalDelivery,
};

/// PID of the running supervisor.
pub fn current_pid() -> u32 {
    std::process::id()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(current_pid()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn current_process_start_time_is_in_the_past() {
        let started = process_start_time(current_pid()).expect("start time");
        assert!(started <= chrono::Utc::now());
    }

    #[test]
    fn child_start_time_is_wall_clock() {
        let before = chrono::Utc::now();
        let mut child = std::process::Command::new("sleep").arg("2").spawn().expect("spawn sleep");
        let started = process_start_time(child.id()).expect("start time");
        child.kill().expect("kill");
        child.wait().expect("wait");

        let drift = (started - before).num_milliseconds().abs();
        assert!(drift < 3_000, "start time {started} is {drift} ms away from {before}");
    }

    #[test]
    fn group_of_detached_child_is_alive_until_reaped() {
        let mut child = std::process::Command::new("sleep");
        child.arg("2");
        // SAFETY: setsid is async-signal-safe.
        unsafe {
            std::os::unix::process::CommandExt::pre_exec(&mut child, || {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let mut child = child.spawn().expect("spawn sleep");
        let pid = child.id();
        assert!(group_alive(pid));

        child.kill().expect("kill");
        child.wait().expect("wait");
        assert!(!group_alive(pid));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!process_alive(pid));
    }
}
