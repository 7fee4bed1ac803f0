pub const DEFAULT_CONFIG_PATH: &str = "dbshift-config.yaml";

pub const SCHEMAS_DIR: &str = "schemas";
pub const STATS_DIR: &str = "stats";
pub const MAPPINGS_DIR: &str = "mappings";
pub const DRAFT_DIR: &str = "draft";
pub const APPROVED_DIR: &str = "approved";
pub const DDL_DIR: &str = "ddl";
pub const CHECKPOINTS_DIR: &str = "checkpoints";
pub const DLQ_DIR: &str = "dlq";
pub const REPORTS_DIR: &str = "reports";
pub const RUN_STATE_FILE: &str = "run_state.json";

pub const DEFAULT_CHUNK_SIZE: u64 = 5_000;
pub const MAX_CHUNK_SIZE: u64 = 100_000;
pub const DEFAULT_TABLE_PARALLELISM: usize = 4;
pub const DEFAULT_PROPOSE_PARALLELISM: usize = 2;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_LLM_RETRIES: u32 = 3;
pub const DEFAULT_SAMPLE_ROWS: u64 = 1_000;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_MAX_REPORTED_KEYS: usize = 20;
