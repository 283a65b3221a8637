//! Append-only outcome ledger.
//!
//! Two flat text files record terminal per-message outcomes: one for
//! messages deleted after a successful reply, one for failures. Each entry is
//! a single line of `key=value` fields joined by ` | `, starting with a UTC
//! timestamp and the message UID. Lines are only ever appended.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::LedgerError;

/// Separator between `key=value` fields on a ledger line.
pub const FIELD_SEPARATOR: &str = " | ";

/// Durable record of deleted and failed message UIDs.
#[derive(Debug, Clone)]
pub struct StateLedger {
    deleted_path: PathBuf,
    failed_path: PathBuf,
}

impl StateLedger {
    /// Open the ledger, creating the parent directory of each file if needed.
    pub async fn open(
        deleted_path: impl Into<PathBuf>,
        failed_path: impl Into<PathBuf>,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            deleted_path: deleted_path.into(),
            failed_path: failed_path.into(),
        };
        ensure_parent(&ledger.deleted_path).await?;
        ensure_parent(&ledger.failed_path).await?;
        Ok(ledger)
    }

    pub fn deleted_path(&self) -> &Path {
        &self.deleted_path
    }

    pub fn failed_path(&self) -> &Path {
        &self.failed_path
    }

    /// Record that `uid` was removed from the mailbox after processing.
    pub async fn record_deleted(
        &self,
        uid: &str,
        metadata: &[(&str, &str)],
    ) -> Result<(), LedgerError> {
        append_line(&self.deleted_path, &format_entry(uid, metadata)).await
    }

    /// Record that processing `uid` failed.
    pub async fn record_failed(&self, uid: &str, reason: &str) -> Result<(), LedgerError> {
        append_line(&self.failed_path, &format_entry(uid, &[("reason", reason)])).await
    }
}

async fn ensure_parent(path: &Path) -> Result<(), LedgerError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    fs::create_dir_all(parent)
        .await
        .map_err(|source| LedgerError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })
}

/// Render one ledger line (without the trailing newline).
pub fn format_entry(uid: &str, metadata: &[(&str, &str)]) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
    let mut fields = Vec::with_capacity(metadata.len() + 2);
    fields.push(format!("timestamp={timestamp}"));
    fields.push(format!("uid={}", single_line(uid)));
    for (key, value) in metadata {
        fields.push(format!("{key}={}", single_line(value)));
    }
    fields.join(FIELD_SEPARATOR)
}

// One entry per line, always.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

async fn append_line(path: &Path, line: &str) -> Result<(), LedgerError> {
    let write_err = |source| LedgerError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(write_err)?;
    file.write_all(format!("{line}\n").as_bytes())
        .await
        .map_err(write_err)?;
    file.flush().await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_ledger() -> (StateLedger, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = StateLedger::open(
            dir.path().join("state/deleted.log"),
            dir.path().join("state/failed.log"),
        )
        .await
        .unwrap();
        (ledger, dir)
    }

    #[tokio::test]
    async fn open_creates_parent_dirs() {
        let (ledger, dir) = test_ledger().await;
        assert!(dir.path().join("state").is_dir());
        // Files themselves only appear on first write.
        assert!(!ledger.deleted_path().exists());
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let deleted = dir.path().join("a/deleted.log");
        let failed = dir.path().join("a/failed.log");
        StateLedger::open(&deleted, &failed).await.unwrap();
        StateLedger::open(&deleted, &failed).await.unwrap();
    }

    #[tokio::test]
    async fn record_deleted_writes_metadata() {
        let (ledger, _dir) = test_ledger().await;
        ledger
            .record_deleted("42", &[("attachments", "a.pdf,b.docx")])
            .await
            .unwrap();
        let content = std::fs::read_to_string(ledger.deleted_path()).unwrap();
        let line = content.lines().next().unwrap();
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        assert!(fields[0].starts_with("timestamp="));
        assert_eq!(fields[1], "uid=42");
        assert_eq!(fields[2], "attachments=a.pdf,b.docx");
    }

    #[tokio::test]
    async fn record_failed_writes_reason() {
        let (ledger, _dir) = test_ledger().await;
        ledger.record_failed("7", "LLM failure").await.unwrap();
        let content = std::fs::read_to_string(ledger.failed_path()).unwrap();
        assert!(content.contains("uid=7"));
        assert!(content.contains("reason=LLM failure"));
        assert!(!ledger.deleted_path().exists());
    }

    #[tokio::test]
    async fn entries_are_appended_never_rewritten() {
        let (ledger, _dir) = test_ledger().await;
        ledger.record_failed("1", "first").await.unwrap();
        ledger.record_failed("2", "second").await.unwrap();

        // A fresh handle on the same files keeps appending.
        let reopened = StateLedger::open(ledger.deleted_path(), ledger.failed_path())
            .await
            .unwrap();
        reopened.record_failed("3", "third").await.unwrap();

        let content = std::fs::read_to_string(ledger.failed_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("uid=1"));
        assert!(lines[1].contains("uid=2"));
        assert!(lines[2].contains("uid=3"));
    }

    #[tokio::test]
    async fn multiline_reason_stays_on_one_line() {
        let (ledger, _dir) = test_ledger().await;
        ledger
            .record_failed("9", "bad payload:\n{\"to\": 1}\r\n")
            .await
            .unwrap();
        let content = std::fs::read_to_string(ledger.failed_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn unwritable_path_fails_loudly() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the append fail.
        let blocked = dir.path().join("blocked.log");
        std::fs::create_dir_all(&blocked).unwrap();
        let ledger = StateLedger::open(&blocked, dir.path().join("failed.log"))
            .await
            .unwrap();
        let err = ledger.record_deleted("1", &[]).await.unwrap_err();
        assert!(matches!(err, LedgerError::Write { .. }));
    }

    #[test]
    fn format_entry_without_metadata() {
        let line = format_entry("abc", &[]);
        assert!(line.starts_with("timestamp="));
        assert!(line.ends_with(" | uid=abc"));
    }

    #[test]
    fn timestamp_carries_explicit_utc_offset() {
        let line = format_entry("abc", &[]);
        let timestamp = line
            .split(FIELD_SEPARATOR)
            .next()
            .and_then(|field| field.strip_prefix("timestamp="))
            .unwrap();
        assert!(timestamp.ends_with("+00:00"), "{timestamp}");
        assert!(!timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }
}
