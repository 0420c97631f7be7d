//! Liveness probing and reconciliation of stored status against the OS.
//!
//! Known limitation: every probe is a snapshot. A process can exit, and its
//! PID can be handed to an unrelated process, between the probe and whatever
//! the caller does next. Callers re-probe at every observation point instead
//! of trusting stored status, and [`is_tracked`] compares the OS start time
//! of the PID with the record's start time to catch recycled PIDs.

use crate::config::PID_START_TOLERANCE;
use crate::platform;
use crate::process_record::{ProcessRecord, ProcessStatus, ProcessTable};

/// Whether `pid` currently identifies a live process.
pub fn is_alive(pid: u32) -> bool {
    platform::process_alive(pid)
}

/// Whether the process behind `record` is still the one that was launched.
///
/// A live PID whose OS start time is later than the record's start time
/// (beyond clock-granularity tolerance) was recycled and is not ours. When
/// the start time cannot be read the plain liveness probe decides.
pub fn is_tracked(record: &ProcessRecord) -> bool {
    if !is_alive(record.pid) {
        return false;
    }
    match platform::process_start_time(record.pid) {
        Some(os_start) => {
            let tolerance = chrono::Duration::from_std(PID_START_TOLERANCE)
                .unwrap_or_else(|_| chrono::Duration::zero());
            os_start <= record.start_time + tolerance
        }
        None => true,
    }
}

/// Transition every `running` record whose process is gone to `stopped`.
///
/// Returns the updated table and whether anything changed, so callers can
/// skip persisting an unchanged table.
pub fn reconcile(mut table: ProcessTable) -> (ProcessTable, bool) {
    let changed = reconcile_with(&mut table, is_tracked);
    (table, changed)
}

/// In-place reconciliation with an injectable probe.
pub fn reconcile_with<F>(table: &mut ProcessTable, probe: F) -> bool
where
    F: Fn(&ProcessRecord) -> bool,
{
    let mut changed = false;
    for record in table.iter_mut() {
        if record.status == ProcessStatus::Running && !probe(record) {
            tracing::debug!(name = %record.name, pid = record.pid, "reconciled stale running record");
            record.mark_stopped();
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(name: &str, pid: u32, status: ProcessStatus) -> ProcessRecord {
        let mut record = ProcessRecord::new(pid, name, "sleep 5", Utc::now(), "x.log", "demo");
        record.status = status;
        record
    }

    #[test]
    fn reconcile_with_marks_dead_running_records() {
        let mut table = ProcessTable::from_records(vec![
            record("alive", 1, ProcessStatus::Running),
            record("dead", 2, ProcessStatus::Running),
            record("crashed", 3, ProcessStatus::Crashed),
        ]);

        let changed = reconcile_with(&mut table, |rec| rec.pid == 1);

        assert!(changed);
        assert_eq!(table.get("alive").unwrap().status, ProcessStatus::Running);
        assert_eq!(table.get("dead").unwrap().status, ProcessStatus::Stopped);
        // Terminal statuses are never rewritten.
        assert_eq!(table.get("crashed").unwrap().status, ProcessStatus::Crashed);
    }

    #[test]
    fn reconcile_reports_unchanged() {
        let table = ProcessTable::from_records(vec![record("old", 2, ProcessStatus::Stopped)]);
        let (after, changed) = reconcile(table.clone());
        assert!(!changed);
        assert_eq!(after, table);
    }

    #[cfg(unix)]
    #[test]
    fn current_process_is_tracked_when_record_is_newer() {
        let rec = record("self", platform::current_pid(), ProcessStatus::Running);
        assert!(is_tracked(&rec));
    }

    #[cfg(unix)]
    #[test]
    fn recycled_pid_is_not_tracked() {
        let mut rec = record("self", platform::current_pid(), ProcessStatus::Running);
        // The record claims a launch long before this process existed.
        rec.start_time = Utc::now() - Duration::days(3650);
        assert!(is_alive(rec.pid));
        assert!(!is_tracked(&rec));
    }
}
