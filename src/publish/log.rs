use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::core::PublishRecord;
use crate::error::PublishError;

/// Append-only NDJSON log of successful uploads. Records are never rewritten.
pub struct UploadLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UploadLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &PublishRecord) -> Result<(), PublishError> {
        let mut line =
            serde_json::to_string(record).map_err(|err| PublishError::Log(err.to_string()))?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| PublishError::Log("log lock poisoned".into()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Every readable record in append order. A missing or empty file has no
    /// records; lines that do not parse are skipped.
    pub fn read_all(&self) -> Result<Vec<PublishRecord>, PublishError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PublishRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    error = %err,
                    "skipping unreadable upload log line"
                ),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(id: &str) -> PublishRecord {
        PublishRecord {
            timestamp: datetime!(2024-05-01 12:30:00 UTC),
            video_path: format!("videos/001_{id}.mp4"),
            video_id: id.to_string(),
            title: format!("Title {id}"),
            url: format!("https://youtube.com/shorts/{id}"),
        }
    }

    #[test]
    fn missing_and_empty_logs_have_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = UploadLog::new(dir.path().join("uploads.ndjson"));
        assert!(log.read_all().unwrap().is_empty());
        fs::write(log.path(), "").unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn appends_preserve_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = UploadLog::new(dir.path().join("logs/uploads.ndjson"));
        log.append(&record("abc")).unwrap();
        let before = fs::read_to_string(log.path()).unwrap();
        log.append(&record("def")).unwrap();
        let after = fs::read_to_string(log.path()).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(log.read_all().unwrap(), vec![record("abc"), record("def")]);
        assert!(before.contains("\"timestamp\":\"2024-05-01T12:30:00Z\""));
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = UploadLog::new(dir.path().join("uploads.ndjson"));
        log.append(&record("one")).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"{not json\n\n").unwrap();
        log.append(&record("two")).unwrap();
        let ids: Vec<_> = log
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.video_id)
            .collect();
        assert_eq!(ids, vec!["one", "two"]);
    }
}
