//! Reading daemon logs: bounded tails, live follow, listing and pruning.

use crate::config::LOG_EXTENSION;
use crate::error::{SupervisorError, SupervisorResult};
use futures::Stream;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt};

/// Lines appended to a log after `follow` started.
pub type LogStream = Pin<Box<dyn Stream<Item = SupervisorResult<String>> + Send>>;

/// Read-only view over a project's log directory.
///
/// Each daemon writes to `<log_dir>/<name>.log`. The reader never creates
/// files, so every per-name operation fails with
/// [`SupervisorError::LogNotFound`] when the daemon has not logged yet.
#[derive(Debug, Clone)]
pub struct LogReader {
    log_dir: PathBuf,
    poll_interval: Duration,
}

impl LogReader {
    /// `poll_interval` is how long `follow` sleeps at end of file.
    pub fn new(log_dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            log_dir: log_dir.into(),
            poll_interval,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Where daemon `name` logs, whether or not the file exists yet.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.{LOG_EXTENSION}"))
    }

    fn open(&self, name: &str) -> SupervisorResult<(PathBuf, File)> {
        let path = self.log_path(name);
        match File::open(&path) {
            Ok(file) => Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SupervisorError::LogNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The last `lines` lines of the log, oldest first.
    ///
    /// Only `lines` lines are held in memory at once. A trailing line without
    /// a newline is included.
    pub fn tail(&self, name: &str, lines: usize) -> SupervisorResult<Vec<String>> {
        let (_, file) = self.open(name)?;
        if lines == 0 {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(file);
        let mut ring: VecDeque<String> = VecDeque::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            if ring.len() == lines {
                ring.pop_front();
            }
            ring.push_back(decode_line(&buf));
        }
        Ok(ring.into())
    }

    /// Stream every complete line appended to the log from now on.
    ///
    /// Starts at the current end of file, so calling it again never replays
    /// lines already seen. Bytes without a trailing newline are held back
    /// until the line completes. The stream ends only when dropped, or after
    /// yielding a read error.
    pub async fn follow(&self, name: &str) -> SupervisorResult<LogStream> {
        let (path, file) = self.open(name)?;
        let mut file = tokio::fs::File::from_std(file);
        let start = file.seek(SeekFrom::End(0)).await?;
        let interval = self.poll_interval;
        tracing::debug!(path = %path.display(), offset = start, "following log");

        let stream = async_stream::stream! {
            let mut reader = tokio::io::BufReader::new(file);
            let mut pending: Vec<u8> = Vec::new();
            loop {
                match reader.read_until(b'\n', &mut pending).await {
                    Ok(0) => tokio::time::sleep(interval).await,
                    Ok(_) if pending.ends_with(b"\n") => {
                        let line = decode_line(&pending);
                        pending.clear();
                        yield Ok(line);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        yield Err(SupervisorError::Io(err));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Daemon names that have a log file, sorted.
    pub fn list_logs(&self) -> SupervisorResult<Vec<String>> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Size of the log in bytes.
    pub fn log_size(&self, name: &str) -> SupervisorResult<u64> {
        let (_, file) = self.open(name)?;
        Ok(file.metadata()?.len())
    }

    /// Delete log files not modified within `max_age`. Records are left
    /// alone. Returns how many files were removed.
    ///
    /// Only an unreadable log directory is an error. Files that cannot be
    /// inspected or removed are logged and skipped.
    pub fn prune(&self, max_age: Duration) -> SupervisorResult<usize> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let paths = entries.filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(err) => {
                tracing::warn!(dir = %self.log_dir.display(), error = %err, "skipping unreadable log entry");
                None
            }
        });
        Ok(prune_older_than(paths, cutoff))
    }
}

fn prune_older_than(paths: impl IntoIterator<Item = PathBuf>, cutoff: SystemTime) -> usize {
    let mut removed = 0;
    for path in paths {
        let modified = match fs::symlink_metadata(&path) {
            Ok(metadata) if !metadata.is_file() => continue,
            Ok(metadata) => metadata.modified(),
            Err(err) => Err(err),
        };
        let modified = match modified {
            Ok(modified) => modified,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping log");
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "pruned old log");
                removed += 1;
            }
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to prune log"),
        }
    }
    removed
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn reader(dir: &TempDir) -> LogReader {
        LogReader::new(dir.path(), Duration::from_millis(20))
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[test]
    fn tail_missing_log() {
        let dir = TempDir::new().unwrap();
        let err = reader(&dir).tail("missing", 10).unwrap_err();
        assert!(matches!(err, SupervisorError::LogNotFound(name) if name == "missing"));
    }

    #[test]
    fn tail_returns_last_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        let body: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        append(&logs.log_path("web"), &body);

        assert_eq!(logs.tail("web", 3).unwrap(), vec!["line 8", "line 9", "line 10"]);
        assert_eq!(logs.tail("web", 50).unwrap().len(), 10);
        assert!(logs.tail("web", 0).unwrap().is_empty());
    }

    #[test]
    fn tail_with_huge_count_returns_all_lines() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        append(&logs.log_path("web"), "first\nsecond\n");

        assert_eq!(logs.tail("web", usize::MAX).unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn tail_keeps_unterminated_last_line() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        append(&logs.log_path("api"), "a\r\nb\npartial");

        assert_eq!(logs.tail("api", 2).unwrap(), vec!["b", "partial"]);
    }

    #[tokio::test]
    async fn follow_yields_only_new_complete_lines() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        let path = logs.log_path("web");
        append(&path, "old 1\nold 2\n");

        let mut stream = logs.follow("web").await.unwrap();
        append(&path, "new 1\nhal");
        let first = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), "new 1");

        append(&path, "f\n");
        let second = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert_eq!(second.unwrap().unwrap(), "half");
    }

    #[tokio::test]
    async fn follow_missing_log() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            reader(&dir).follow("ghost").await,
            Err(SupervisorError::LogNotFound(_))
        ));
    }

    #[test]
    fn list_and_size() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        append(&logs.log_path("worker"), "abc\n");
        append(&logs.log_path("api"), "");
        append(&dir.path().join("notes.txt"), "ignored");

        assert_eq!(logs.list_logs().unwrap(), vec!["api", "worker"]);
        assert_eq!(logs.log_size("worker").unwrap(), 4);
        assert!(matches!(logs.log_size("nope"), Err(SupervisorError::LogNotFound(_))));
    }

    #[test]
    fn prune_removes_only_old_files() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        append(&logs.log_path("old"), "x\n");
        append(&logs.log_path("fresh"), "y\n");
        let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60);
        File::options()
            .write(true)
            .open(logs.log_path("old"))
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();

        let removed = logs.prune(Duration::from_secs(7 * 24 * 60 * 60)).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(logs.list_logs().unwrap(), vec!["fresh"]);
    }

    #[test]
    fn prune_skips_entries_it_cannot_handle() {
        let dir = TempDir::new().unwrap();
        let logs = reader(&dir);
        fs::create_dir(logs.log_path("nested")).unwrap();
        append(&logs.log_path("a"), "x\n");
        append(&logs.log_path("b"), "y\n");
        let paths = vec![
            logs.log_path("vanished"),
            logs.log_path("nested"),
            logs.log_path("a"),
            logs.log_path("b"),
        ];

        let future = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(prune_older_than(paths, future), 2);
        assert!(logs.log_path("nested").is_dir());
        assert!(logs.list_logs().unwrap().is_empty());
    }

    #[test]
    fn prune_missing_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let logs = LogReader::new(dir.path().join("absent"), Duration::from_millis(20));
        assert_eq!(logs.prune(Duration::ZERO).unwrap(), 0);
        assert!(logs.list_logs().unwrap().is_empty());
    }
}
