//! Append-only JSONL audit log writer and reader

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::error::{PostbookError, PostbookResult};

use super::entry::AuditEntry;

/// Writes audit entries one JSON object per line
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append one entry
    pub fn log(&self, entry: &AuditEntry) -> PostbookResult<()> {
        self.log_batch(std::slice::from_ref(entry))
    }

    /// Append several entries with a single open and flush
    pub fn log_batch(&self, entries: &[AuditEntry]) -> PostbookResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for entry in entries {
            let json = serde_json::to_string(entry).map_err(|e| {
                PostbookError::Json(format!("Failed to serialize audit entry: {}", e))
            })?;
            buffer.push_str(&json);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| PostbookError::Io(format!("Failed to open audit log: {}", e)))?;

        // One write call keeps a batch contiguous next to other appenders
        file.write_all(buffer.as_bytes())
            .map_err(|e| PostbookError::Io(format!("Failed to write audit entry: {}", e)))?;
        file.flush()
            .map_err(|e| PostbookError::Io(format!("Failed to flush audit log: {}", e)))
    }

    /// Read all entries, oldest first
    pub fn read_all(&self) -> PostbookResult<Vec<AuditEntry>> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PostbookError::Io(format!("Failed to open audit log: {}", e))),
        };

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                PostbookError::Io(format!("Failed to read audit log line {}: {}", line_num + 1, e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
                PostbookError::Json(format!(
                    "Failed to parse audit entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// The most recent `count` entries, oldest first
    pub fn read_recent(&self, count: usize) -> PostbookResult<Vec<AuditEntry>> {
        let mut all = self.read_all()?;
        let start = all.len().saturating_sub(count);
        Ok(all.split_off(start))
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{EntityType, Operation};
    use serde_json::json;
    use tempfile::TempDir;

    fn logger() -> (AuditLogger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(temp_dir.path().join("audit.log"));
        (logger, temp_dir)
    }

    fn posted(i: usize) -> AuditEntry {
        AuditEntry::create(
            EntityType::GlTransaction,
            format!("txn-{}", i),
            Some("chase/checking".into()),
            &json!({"index": i}),
        )
    }

    #[test]
    fn test_log_and_read() {
        let (logger, _temp) = logger();
        logger.log(&posted(0)).unwrap();

        let entries = logger.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Create);
        assert_eq!(entries[0].entity_type, EntityType::GlTransaction);
    }

    #[test]
    fn test_batch_and_recent() {
        let (logger, _temp) = logger();
        let batch: Vec<_> = (0..5).map(posted).collect();
        logger.log_batch(&batch).unwrap();
        logger.log_batch(&[]).unwrap();

        let recent = logger.read_recent(2).unwrap();
        let ids: Vec<_> = recent.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, ["txn-3", "txn-4"]);
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let (logger, _temp) = logger();
        assert!(logger.read_all().unwrap().is_empty());
        assert!(!logger.path().exists());
    }

    #[test]
    fn test_reopened_logger_sees_previous_entries() {
        let (logger, temp) = logger();
        logger.log(&posted(1)).unwrap();

        let reopened = AuditLogger::new(temp.path().join("audit.log"));
        reopened.log(&posted(2)).unwrap();
        assert_eq!(reopened.read_all().unwrap().len(), 2);
    }
}
