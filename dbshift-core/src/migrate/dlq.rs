use crate::errors::ExecutionError;
use dbshift_types::checkpoint::DlqRecord;
use dbshift_types::serde_json;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const HEADER: [&str; 6] = [
    "run_id",
    "target_table",
    "error_kind",
    "error_detail",
    "occurred_at",
    "source_row",
];

/// Append-only CSV dead letter queue for one (run, table). Rows are flushed
/// as they are written; `sync` is called at chunk boundaries to pin them to
/// disk.
pub struct DlqWriter {
    writer: csv::Writer<File>,
}

impl DlqWriter {
    /// Open (or create) `dlq/<run_id>/<table>.csv`. The header is written
    /// exactly once, at file creation.
    pub fn open(dir: &Path, table: &str) -> Result<Self, ExecutionError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| ExecutionError::FileSystem(dir.to_path_buf(), e))?;
        let path = dir.join(format!("{table}.csv"));
        let is_new = !path.exists()
            || path
                .metadata()
                .map(|m| m.len() == 0)
                .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ExecutionError::FileSystem(path.clone(), e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
            writer.flush().map_err(|e| ExecutionError::FileSystem(path.clone(), e))?;
        }
        Ok(Self { writer })
    }

    /// Append one record and flush it to the OS.
    pub fn append(&mut self, record: &DlqRecord) -> Result<(), ExecutionError> {
        let source_row = serde_json::to_string(&record.source_row)
            .map_err(|e| ExecutionError::SerdeJson(PathBuf::from("dlq"), e))?;
        self.writer.write_record([
            record.run_id.as_str(),
            record.target_table.as_str(),
            &record.error_kind.to_string(),
            record.error_detail.as_str(),
            &record.occurred_at.to_rfc3339(),
            &source_row,
        ])?;
        self.writer
            .flush()
            .map_err(|e| ExecutionError::FileSystem(PathBuf::from("dlq"), e))?;
        Ok(())
    }

    /// fsync, called at chunk boundaries.
    pub fn sync(&mut self) -> Result<(), ExecutionError> {
        self.writer
            .flush()
            .map_err(|e| ExecutionError::FileSystem(PathBuf::from("dlq"), e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| ExecutionError::FileSystem(PathBuf::from("dlq"), e))?;
        Ok(())
    }
}

/// Count the data rows (excluding the header) of one table's DLQ file.
pub fn count_records(dir: &Path, table: &str) -> Result<u64, ExecutionError> {
    let path = dir.join(format!("{table}.csv"));
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&path)?;
    let mut count = 0;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbshift_types::checkpoint::LoadErrorKind;
    use dbshift_types::chrono::Utc;
    use dbshift_types::value::Value;
    use std::collections::BTreeMap;
    use tempdir::TempDir;

    fn record(detail: &str) -> DlqRecord {
        let mut source_row = BTreeMap::new();
        source_row.insert("id".to_string(), Value::Int(7));
        source_row.insert("email".to_string(), Value::Text("dup@example.com".into()));
        DlqRecord {
            run_id: "run-1".into(),
            target_table: "users".into(),
            source_row,
            error_kind: LoadErrorKind::ConstraintViolation,
            error_detail: detail.into(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn header_written_once_across_reopens() {
        let tmp = TempDir::new("dlq").unwrap();
        {
            let mut writer = DlqWriter::open(tmp.path(), "users").unwrap();
            writer.append(&record("first")).unwrap();
            writer.sync().unwrap();
        }
        {
            let mut writer = DlqWriter::open(tmp.path(), "users").unwrap();
            writer.append(&record("second")).unwrap();
            writer.sync().unwrap();
        }
        let content = std::fs::read_to_string(tmp.path().join("users.csv")).unwrap();
        assert_eq!(content.matches("run_id").count(), 1);
        assert_eq!(count_records(tmp.path(), "users").unwrap(), 2);
    }

    #[test]
    fn source_row_survives_as_json() {
        let tmp = TempDir::new("dlq").unwrap();
        let mut writer = DlqWriter::open(tmp.path(), "users").unwrap();
        writer.append(&record("dup")).unwrap();
        drop(writer);

        let content = std::fs::read_to_string(tmp.path().join("users.csv")).unwrap();
        assert!(content.contains("constraint_violation"));
        assert!(content.contains("dup@example.com"));
    }

    #[test]
    fn missing_file_counts_zero() {
        let tmp = TempDir::new("dlq").unwrap();
        assert_eq!(count_records(tmp.path(), "nothing").unwrap(), 0);
    }
}
