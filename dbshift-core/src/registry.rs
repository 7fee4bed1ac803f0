use crate::errors::ExecutionError;
use dbshift_types::chrono::{Duration, Utc};
use dbshift_types::constants;
use dbshift_types::run::{RunContext, RunState};
use dbshift_types::serde::de::DeserializeOwned;
use dbshift_types::serde::Serialize;
use dbshift_types::serde_json;
use dbshift_types::tracing::info;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

/// The artifact kinds namespaced by run id.
const RUN_KINDS: [&str; 8] = [
    constants::SCHEMAS_DIR,
    constants::STATS_DIR,
    constants::MAPPINGS_DIR,
    constants::DDL_DIR,
    constants::CHECKPOINTS_DIR,
    constants::DLQ_DIR,
    constants::REPORTS_DIR,
    "runs",
];

/// Mint a fresh run id: `YYYYMMDD-HHMMSS-<6 hex>`.
pub fn new_run_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}-{suffix:06x}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Owns the on-disk artifact layout. All run-scoped paths go through here so
/// the `<kind>/<run_id>/…` convention lives in one place.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    root: PathBuf,
}

impl RunRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the paths for one run. `None` selects the shared top-level
    /// directories (legacy mode).
    pub fn run(&self, run_id: Option<String>) -> RunPaths {
        RunPaths {
            root: self.root.clone(),
            run_id,
        }
    }

    /// Create the run directory skeleton and record the run context.
    pub fn create_run(&self, context: &RunContext) -> Result<RunPaths, ExecutionError> {
        let paths = self.run(Some(context.run_id.clone()));
        for kind in RUN_KINDS {
            let dir = paths.kind_dir(kind);
            fs::create_dir_all(&dir).map_err(|e| ExecutionError::FileSystem(dir.clone(), e))?;
        }
        write_json_atomic(&paths.run_context_file(), context)?;
        self.set_last_run(&context.run_id)?;
        Ok(paths)
    }

    pub fn read_run_context(&self, run_id: &str) -> Result<RunContext, ExecutionError> {
        read_json(&self.run(Some(run_id.to_string())).run_context_file())
    }

    fn run_state_file(&self) -> PathBuf {
        self.root.join(constants::RUN_STATE_FILE)
    }

    /// Record the last active run for UI resumption.
    pub fn set_last_run(&self, run_id: &str) -> Result<(), ExecutionError> {
        write_json_atomic(
            &self.run_state_file(),
            &RunState {
                last_run_id: run_id.to_string(),
                updated_at: Utc::now(),
            },
        )
    }

    pub fn last_run(&self) -> Option<String> {
        read_json::<RunState>(&self.run_state_file())
            .ok()
            .map(|s| s.last_run_id)
    }

    pub fn list_runs(&self) -> Result<Vec<String>, ExecutionError> {
        let runs_dir = self.root.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&runs_dir).map_err(|e| ExecutionError::FileSystem(runs_dir, e))?;
        let mut runs: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| name.strip_suffix(".json").map(|s| s.to_string()))
            .collect();
        runs.sort();
        Ok(runs)
    }

    /// Delete every run directory older than `max_age`. Whole runs only,
    /// never individual files.
    pub fn prune(&self, max_age: Duration) -> Result<Vec<String>, ExecutionError> {
        let cutoff = Utc::now() - max_age;
        let mut pruned = Vec::new();
        for run_id in self.list_runs()? {
            let context = match self.read_run_context(&run_id) {
                Ok(context) => context,
                Err(_) => continue,
            };
            if context.created_at >= cutoff {
                continue;
            }
            for kind in RUN_KINDS {
                let dir = self.root.join(kind).join(&run_id);
                if dir.is_dir() {
                    fs::remove_dir_all(&dir)
                        .map_err(|e| ExecutionError::FileSystem(dir.clone(), e))?;
                }
            }
            let context_file = self.run(Some(run_id.clone())).run_context_file();
            if context_file.exists() {
                fs::remove_file(&context_file)
                    .map_err(|e| ExecutionError::FileSystem(context_file.clone(), e))?;
            }
            info!("pruned run {run_id}");
            pruned.push(run_id);
        }
        Ok(pruned)
    }
}

/// Paths of one run's artifacts (or of the shared legacy directories).
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
    run_id: Option<String>,
}

impl RunPaths {
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Display form used in checkpoints and events.
    pub fn run_id_or_shared(&self) -> String {
        self.run_id.clone().unwrap_or_else(|| "shared".to_string())
    }

    fn kind_dir(&self, kind: &str) -> PathBuf {
        match &self.run_id {
            Some(run_id) if kind != "runs" => self.root.join(kind).join(run_id),
            _ => self.root.join(kind),
        }
    }

    fn run_context_file(&self) -> PathBuf {
        let name = self
            .run_id
            .clone()
            .unwrap_or_else(|| "shared".to_string());
        self.root.join("runs").join(format!("{name}.json"))
    }

    pub fn schemas_dir(&self) -> PathBuf {
        self.kind_dir(constants::SCHEMAS_DIR)
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.kind_dir(constants::STATS_DIR)
    }

    pub fn draft_mappings_dir(&self) -> PathBuf {
        self.kind_dir(constants::MAPPINGS_DIR)
            .join(constants::DRAFT_DIR)
    }

    pub fn approved_mappings_dir(&self) -> PathBuf {
        self.kind_dir(constants::MAPPINGS_DIR)
            .join(constants::APPROVED_DIR)
    }

    pub fn ddl_dir(&self) -> PathBuf {
        self.kind_dir(constants::DDL_DIR)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.kind_dir(constants::CHECKPOINTS_DIR)
    }

    pub fn dlq_dir(&self) -> PathBuf {
        self.kind_dir(constants::DLQ_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.kind_dir(constants::REPORTS_DIR)
    }
}

/// Read a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ExecutionError> {
    let bytes =
        fs::read(path).map_err(|e| ExecutionError::FileSystem(path.to_path_buf(), e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ExecutionError::SerdeJson(path.to_path_buf(), e))
}

/// Write a JSON artifact crash-safely: serialize to a sibling temp file in
/// the same directory, then rename over the destination.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ExecutionError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| ExecutionError::SerdeJson(path.to_path_buf(), e))?;
    write_atomic(path, &json)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExecutionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ExecutionError::FileSystem(parent.to_path_buf(), e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| ExecutionError::FileSystem(tmp.clone(), e))?;
    fs::rename(&tmp, path).map_err(|e| ExecutionError::FileSystem(path.to_path_buf(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn run_id_format() {
        let run_id = new_run_id();
        let parts: Vec<&str> = run_id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
        assert!(u32::from_str_radix(parts[2], 16).is_ok());
    }

    #[test]
    fn run_paths_namespace_by_run_id() {
        let registry = RunRegistry::new("/tmp/x");
        let run = registry.run(Some("20240101-000000-abcdef".to_string()));
        assert!(run
            .schemas_dir()
            .ends_with("schemas/20240101-000000-abcdef"));
        let legacy = registry.run(None);
        assert!(legacy.schemas_dir().ends_with("schemas"));
    }

    #[test]
    fn create_and_prune_runs() {
        let tmp = TempDir::new("registry").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let context = RunContext {
            run_id: new_run_id(),
            created_at: Utc::now() - Duration::days(10),
            source_engine: "postgres".into(),
            target_engine: "mysql".into(),
            artifact_root: tmp.path().display().to_string(),
        };
        let paths = registry.create_run(&context).unwrap();
        assert!(paths.schemas_dir().is_dir());
        assert_eq!(registry.last_run().as_deref(), Some(context.run_id.as_str()));

        let pruned = registry.prune(Duration::days(7)).unwrap();
        assert_eq!(pruned, vec![context.run_id.clone()]);
        assert!(!paths.schemas_dir().exists());
        assert!(registry.list_runs().unwrap().is_empty());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let tmp = TempDir::new("atomic").unwrap();
        let path = tmp.path().join("out.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = read_json(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(!path.with_extension("tmp").exists());
    }
}
