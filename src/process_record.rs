use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Running,
    Stopped,
    Crashed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Crashed => "crashed",
        }
    }

    /// Terminal status for an observed exit code.
    ///
    /// Non-zero codes are crashes; a missing code means the child was killed
    /// by a signal, which is how `stop` ends it, so it counts as stopped.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(code) if code != 0 => ProcessStatus::Crashed,
            _ => ProcessStatus::Stopped,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked daemon. Field order and names match `processes.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub status: ProcessStatus,
    pub log_file: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ProcessRecord {
    pub fn new(
        pid: u32,
        name: impl Into<String>,
        command: impl Into<String>,
        start_time: DateTime<Utc>,
        log_file: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            pid,
            name: name.into(),
            command: command.into(),
            start_time,
            status: ProcessStatus::Running,
            log_file: log_file.into(),
            project: project.into(),
            exit_code: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    pub fn mark_exited(&mut self, exit_code: Option<i32>) {
        self.status = ProcessStatus::from_exit_code(exit_code);
        self.exit_code = exit_code;
    }

    pub fn mark_stopped(&mut self) {
        self.status = ProcessStatus::Stopped;
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.start_time)
    }
}

/// All records of one project, at most one per name.
///
/// Serializes as a bare JSON array so the on-disk format stays a list of
/// objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProcessTable {
    records: Vec<ProcessRecord>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, keeping the last record for each duplicated name.
    pub fn from_records(records: Vec<ProcessRecord>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.upsert(record);
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&ProcessRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ProcessRecord> {
        self.records.iter_mut().find(|record| record.name == name)
    }

    /// Insert, replacing any existing record with the same name in place.
    pub fn upsert(&mut self, record: ProcessRecord) -> Option<ProcessRecord> {
        match self.get_mut(&record.name) {
            Some(existing) => Some(std::mem::replace(existing, record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ProcessRecord> {
        let index = self.records.iter().position(|record| record.name == name)?;
        Some(self.records.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.records.iter_mut()
    }

    pub fn running(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter().filter(|record| record.is_running())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ProcessRecord> {
        self.records
    }
}

// Hand-edited or foreign files may list a name twice; the last entry wins.
impl<'de> Deserialize<'de> for ProcessTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<ProcessRecord>::deserialize(deserializer).map(ProcessTable::from_records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(name: &str, pid: u32) -> ProcessRecord {
        ProcessRecord::new(
            pid,
            name,
            "sleep 5",
            "2024-01-01T12:00:00Z".parse().unwrap(),
            format!("/tmp/{name}.log"),
            "shop",
        )
    }

    #[test]
    fn upsert_replaces_existing_name() {
        let mut table = ProcessTable::new();
        assert!(table.upsert(record("web", 1)).is_none());
        let replaced = table.upsert(record("web", 2)).expect("previous record");

        assert_eq!(replaced.pid, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("web").unwrap().pid, 2);
    }

    #[test]
    fn json_format_is_stable() {
        let table = ProcessTable::from_records(vec![record("web", 42)]);
        let json = serde_json::to_value(&table).unwrap();

        assert_eq!(
            json,
            serde_json::json!([{
                "pid": 42,
                "name": "web",
                "command": "sleep 5",
                "start_time": "2024-01-01T12:00:00Z",
                "status": "running",
                "log_file": "/tmp/web.log",
                "project": "shop"
            }])
        );
    }

    #[test]
    fn reads_records_written_by_other_tools() {
        let raw = r#"[{
            "pid": 7,
            "name": "api",
            "command": "python app.py",
            "start_time": "2024-03-05T08:30:00.123456789+02:00",
            "status": "crashed",
            "log_file": "/p/.sbox/logs/api.log",
            "project": "p"
        }]"#;
        let table: ProcessTable = serde_json::from_str(raw).unwrap();
        let api = table.get("api").unwrap();

        assert_eq!(api.status, ProcessStatus::Crashed);
        assert_eq!(api.exit_code, None);
        assert_eq!(api.start_time.to_rfc3339(), "2024-03-05T06:30:00.123456789+00:00");
    }

    #[test]
    fn duplicate_names_collapse_on_load() {
        let raw = serde_json::to_string(&vec![record("web", 1), record("web", 2)]).unwrap();
        let table: ProcessTable = serde_json::from_str(&raw).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("web").unwrap().pid, 2);
    }

    #[test]
    fn exit_code_promotion() {
        let mut rec = record("job", 3);
        rec.mark_exited(Some(0));
        assert_eq!(rec.status, ProcessStatus::Stopped);
        rec.mark_exited(Some(2));
        assert_eq!(rec.status, ProcessStatus::Crashed);
        assert_eq!(rec.exit_code, Some(2));
        rec.mark_exited(None);
        assert_eq!(rec.status, ProcessStatus::Stopped);
    }
}
