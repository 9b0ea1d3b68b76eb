use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::errors::EngineError;

/// 日志行尾部的时间戳格式，例如 `3/7/2024  09:05:11 AM`。
const TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y  %I:%M:%S %p";

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub message: String,
    pub recorded_at: DateTime<Local>,
}

impl JournalEntry {
    pub fn render(&self) -> String {
        format!(
            "{}   [{}]",
            self.message,
            self.recorded_at.format(TIMESTAMP_FORMAT)
        )
    }
}

/// 单个图纸处理期间的可恢复问题记录，只属于当前文件。
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "rpstl::journal", "{message}");
        self.entries.push(JournalEntry {
            message,
            recorded_at: Local::now(),
        });
    }

    /// 并入另一份日志，每条消息加上前缀，保留原时间戳。
    pub fn absorb(&mut self, other: Journal, prefix: &str) {
        self.entries
            .extend(other.entries.into_iter().map(|entry| JournalEntry {
                message: format!("{prefix}{}", entry.message),
                recorded_at: entry.recorded_at,
            }));
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.message.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take(&mut self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// 整个批次的日志文件。每个图纸结束后追加并刷新；没有写入任何行时在结束时删除。
#[derive(Debug)]
pub struct LogArtifact {
    path: PathBuf,
    written: usize,
}

impl LogArtifact {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        File::create(&path).map_err(|source| EngineError::Log {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "创建日志文件");
        Ok(Self { path, written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// 追加日志并清空，返回写入的行数。
    pub fn append(&mut self, journal: &mut Journal) -> Result<usize, EngineError> {
        let entries = journal.take();
        if entries.is_empty() {
            return Ok(0);
        }
        let log_err = |source| EngineError::Log {
            path: self.path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(log_err)?;
        let mut writer = BufWriter::new(file);
        for entry in &entries {
            writeln!(writer, "{}", entry.render()).map_err(log_err)?;
        }
        writer.flush().map_err(log_err)?;
        self.written += entries.len();
        Ok(entries.len())
    }

    /// 结束批次。空日志被删除并返回 `None`。
    pub fn finish(self) -> Result<Option<PathBuf>, EngineError> {
        if self.written > 0 {
            return Ok(Some(self.path));
        }
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|source| EngineError::Log {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_renders_with_bracketed_timestamp() {
        let entry = JournalEntry {
            message: "Could not detach XREF".to_string(),
            recorded_at: Local
                .with_ymd_and_hms(2024, 3, 7, 14, 5, 9)
                .single()
                .expect("valid local time"),
        };
        assert_eq!(
            entry.render(),
            "Could not detach XREF   [3/7/2024  02:05:09 PM]"
        );
    }

    #[test]
    fn empty_log_is_removed_on_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remap_log.txt");
        let log = LogArtifact::create(&path).expect("create log");
        assert!(path.exists());
        assert_eq!(log.finish().expect("finish"), None);
        assert!(!path.exists());
    }

    #[test]
    fn appended_entries_survive_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keyfile_log.txt");
        let mut log = LogArtifact::create(&path).expect("create log");

        let mut journal = Journal::new();
        journal.record("first");
        journal.record("second");
        assert_eq!(log.append(&mut journal).expect("append"), 2);
        assert!(journal.is_empty());
        assert_eq!(log.append(&mut journal).expect("append nothing"), 0);

        let kept = log.finish().expect("finish").expect("log kept");
        let content = fs::read_to_string(kept).expect("read log");
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("first   ["));
        assert!(lines[1].ends_with(']'));
    }
}
