use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One migration attempt. Created at extract start, persists until pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub source_engine: String,
    pub target_engine: String,
    pub artifact_root: String,
}

/// `run_state.json` payload: the last run a UI should offer to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub last_run_id: String,
    pub updated_at: DateTime<Utc>,
}
