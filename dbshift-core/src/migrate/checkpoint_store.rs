use crate::errors::ExecutionError;
use crate::registry::{read_json, write_json_atomic};
use dbshift_types::checkpoint::Checkpoint;
use std::path::{Path, PathBuf};

/// Durable per-(run, table) checkpoints under `checkpoints/<run_id>/`.
/// Every save goes through a sibling temp file and an atomic rename, so a
/// crash can never leave a half-written checkpoint behind.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    pub fn load(&self, table: &str) -> Result<Option<Checkpoint>, ExecutionError> {
        let path = self.path_for(table);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), ExecutionError> {
        write_json_atomic(&self.path_for(&checkpoint.target_table), checkpoint)
    }

    pub fn list(&self) -> Result<Vec<Checkpoint>, ExecutionError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| ExecutionError::FileSystem(self.dir.clone(), e))?;
        let mut checkpoints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ExecutionError::FileSystem(self.dir.clone(), e))?;
            let path = entry.path();
            if is_checkpoint_file(&path) {
                checkpoints.push(read_json(&path)?);
            }
        }
        checkpoints.sort_by(|a: &Checkpoint, b: &Checkpoint| {
            a.target_table.cmp(&b.target_table)
        });
        Ok(checkpoints)
    }
}

fn is_checkpoint_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbshift_types::checkpoint::CheckpointStatus;
    use dbshift_types::value::Value;
    use tempdir::TempDir;

    #[test]
    fn save_load_round_trip() {
        let tmp = TempDir::new("checkpoints").unwrap();
        let store = CheckpointStore::new(tmp.path());
        assert!(store.load("users").unwrap().is_none());

        let mut checkpoint = Checkpoint::new("run-1".into(), "users".into());
        checkpoint.status = CheckpointStatus::Running;
        checkpoint.record_chunk(100, 99, 1, Some(Value::Int(100)));
        store.save(&checkpoint).unwrap();

        let loaded = store.load("users").unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.rows_loaded, 99);
        assert_eq!(loaded.last_key, Some(Value::Int(100)));
    }

    #[test]
    fn saves_are_atomic_over_rewrites() {
        let tmp = TempDir::new("checkpoints").unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut checkpoint = Checkpoint::new("run-1".into(), "users".into());
        for i in 0..10 {
            checkpoint.record_chunk(10, 10, 0, Some(Value::Int(i * 10 + 10)));
            store.save(&checkpoint).unwrap();
        }
        // No temp file survives a completed save.
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(store.load("users").unwrap().unwrap().rows_loaded, 100);
    }

    #[test]
    fn list_returns_all_tables_sorted() {
        let tmp = TempDir::new("checkpoints").unwrap();
        let store = CheckpointStore::new(tmp.path());
        store
            .save(&Checkpoint::new("run-1".into(), "zebra".into()))
            .unwrap();
        store
            .save(&Checkpoint::new("run-1".into(), "apple".into()))
            .unwrap();
        let listed = store.list().unwrap();
        assert_eq!(
            listed.iter().map(|c| c.target_table.as_str()).collect::<Vec<_>>(),
            vec!["apple", "zebra"]
        );
    }
}
