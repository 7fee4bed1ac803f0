use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl Display for CheckpointStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::Running => "running",
            CheckpointStatus::Done => "done",
            CheckpointStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Durable per-(run, table) progress record. `rows_loaded + rows_failed` is
/// monotonically non-decreasing across writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub target_table: String,
    pub last_offset: u64,
    /// Last primary-key value loaded, set when keyset pagination is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_key: Option<Value>,
    pub rows_loaded: u64,
    pub rows_failed: u64,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: String, target_table: String) -> Self {
        Self {
            run_id,
            target_table,
            last_offset: 0,
            last_key: None,
            rows_loaded: 0,
            rows_failed: 0,
            status: CheckpointStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Fold one committed chunk into the checkpoint.
    pub fn record_chunk(
        &mut self,
        chunk_len: u64,
        inserted: u64,
        failed: u64,
        last_key: Option<Value>,
    ) {
        self.last_offset += chunk_len;
        self.rows_loaded += inserted;
        self.rows_failed += failed;
        if last_key.is_some() {
            self.last_key = last_key;
        }
        self.updated_at = Utc::now();
    }
}

/// Classification of a row-level load failure, recorded in the DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    ConstraintViolation,
    TypeConversion,
    Encoding,
    Unknown,
}

impl Display for LoadErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadErrorKind::ConstraintViolation => "constraint_violation",
            LoadErrorKind::TypeConversion => "type_conversion",
            LoadErrorKind::Encoding => "encoding",
            LoadErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One row that failed to load, with enough context to replay it by hand.
/// The `source_row` map is sorted by column name so DLQ lines diff cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqRecord {
    pub run_id: String,
    pub target_table: String,
    pub source_row: BTreeMap<String, Value>,
    pub error_kind: LoadErrorKind,
    pub error_detail: String,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_chunk_is_monotonic() {
        let mut cp = Checkpoint::new("r".into(), "t".into());
        cp.record_chunk(100, 98, 2, Some(Value::Int(100)));
        cp.record_chunk(50, 50, 0, Some(Value::Int(150)));
        assert_eq!(cp.last_offset, 150);
        assert_eq!(cp.rows_loaded, 148);
        assert_eq!(cp.rows_failed, 2);
        assert_eq!(cp.last_key, Some(Value::Int(150)));
    }

    #[test]
    fn last_key_survives_keyless_chunks() {
        let mut cp = Checkpoint::new("r".into(), "t".into());
        cp.record_chunk(10, 10, 0, Some(Value::Int(10)));
        cp.record_chunk(10, 10, 0, None);
        assert_eq!(cp.last_key, Some(Value::Int(10)));
    }
}
