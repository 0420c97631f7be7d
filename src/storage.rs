//! Persistence of the process table.

use crate::{
    error::{SupervisorError, SupervisorResult},
    process_record::{ProcessRecord, ProcessTable},
};
use dashmap::DashMap;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Unified interface over the persisted process table.
///
/// `update` is the only safe way to mutate: implementations serialize every
/// load-mutate-save cycle so concurrent writers touching different names
/// never lose each other's changes.
pub trait RecordStore: Send + Sync {
    /// Read the whole table. A missing table is empty, not an error.
    fn load(&self) -> SupervisorResult<ProcessTable>;

    /// Replace the whole table.
    fn save(&self, table: &ProcessTable) -> SupervisorResult<()>;

    /// Run `mutate` against the current table while holding the writer lock,
    /// persisting only when the table actually changed. An error from
    /// `mutate` leaves the stored table untouched.
    fn update<T, F>(&self, mutate: F) -> SupervisorResult<T>
    where
        F: FnOnce(&mut ProcessTable) -> SupervisorResult<T>;

    /// Current record for `name`, without reconciling it.
    fn get(&self, name: &str) -> SupervisorResult<Option<ProcessRecord>> {
        Ok(self.load()?.get(name).cloned())
    }

    /// Insert or replace by name, returning the replaced record.
    fn upsert(&self, record: ProcessRecord) -> SupervisorResult<Option<ProcessRecord>> {
        self.update(|table| Ok(table.upsert(record)))
    }

    fn remove(&self, name: &str) -> SupervisorResult<Option<ProcessRecord>> {
        self.update(|table| Ok(table.remove(name)))
    }
}

/// JSON file store shared by every `sbox` invocation of a project.
///
/// Writers are serialized twice over: an in-process mutex covers watcher
/// tasks and foreground operations of this process, and an exclusive
/// advisory lock on a sidecar lock file covers other processes. Saves go
/// through a temp file in the same directory followed by a rename, so readers
/// never observe a torn file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl FileStore {
    /// Store backed by the table at `path`, locked through `lock_path`.
    ///
    /// Neither file has to exist yet. Both are created on the first write.
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Location of the JSON table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> SupervisorResult<ProcessTable> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProcessTable::new()),
            Err(err) => return Err(err.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(ProcessTable::new());
        }
        serde_json::from_slice(&data).map_err(|source| SupervisorError::CorruptTable {
            path: self.path.clone(),
            source,
        })
    }

    fn write_table(&self, table: &ProcessTable) -> SupervisorResult<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(dir)?;

        let data = serde_json::to_vec_pretty(table)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".processes.")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn lock_table(&self) -> SupervisorResult<TableLock> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(TableLock { file })
    }
}

/// Held for the duration of one load-mutate-save cycle.
struct TableLock {
    file: File,
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %err, "failed to release process table lock");
        }
    }
}

impl RecordStore for FileStore {
    fn load(&self) -> SupervisorResult<ProcessTable> {
        self.read_table()
    }

    fn save(&self, table: &ProcessTable) -> SupervisorResult<()> {
        let _guard = self.writer.lock();
        let _lock = self.lock_table()?;
        self.write_table(table)
    }

    fn update<T, F>(&self, mutate: F) -> SupervisorResult<T>
    where
        F: FnOnce(&mut ProcessTable) -> SupervisorResult<T>,
    {
        let _guard = self.writer.lock();
        let _lock = self.lock_table()?;

        let original = self.read_table()?;
        let mut table = original.clone();
        let output = mutate(&mut table)?;
        if table != original {
            self.write_table(&table)?;
        }
        Ok(output)
    }
}

/// In-process store without persistence.
///
/// Used when embedding the supervisor without a project directory and in
/// tests that only exercise table logic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, ProcessRecord>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryStore {
    /// Empty store. Clones share the same records.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> ProcessTable {
        let mut records: Vec<ProcessRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        ProcessTable::from_records(records)
    }

    fn replace_all(&self, table: &ProcessTable) {
        self.records.clear();
        for record in table.iter() {
            self.records.insert(record.name.clone(), record.clone());
        }
    }
}

impl RecordStore for MemoryStore {
    fn load(&self) -> SupervisorResult<ProcessTable> {
        Ok(self.snapshot())
    }

    fn save(&self, table: &ProcessTable) -> SupervisorResult<()> {
        let _guard = self.writer.lock();
        self.replace_all(table);
        Ok(())
    }

    fn update<T, F>(&self, mutate: F) -> SupervisorResult<T>
    where
        F: FnOnce(&mut ProcessTable) -> SupervisorResult<T>,
    {
        let _guard = self.writer.lock();
        let original = self.snapshot();
        let mut table = original.clone();
        let output = mutate(&mut table)?;
        if table != original {
            self.replace_all(&table);
        }
        Ok(output)
    }
}
