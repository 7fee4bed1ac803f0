use crate::constants;
use crate::models::connection::ConnectionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    /// Root under which all run artifact directories are created.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_app_name() -> String {
    "dbshift".to_string()
}

fn default_artifact_root() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Endpoint of an OpenAI-compatible chat completion API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Usually `${LLM_API_KEY}` in the config file.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// Token-bucket rate limit for proposal requests.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_propose_parallelism")]
    pub parallelism: usize,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_retries() -> u32 {
    constants::DEFAULT_LLM_RETRIES
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_propose_parallelism() -> usize {
    constants::DEFAULT_PROPOSE_PARALLELISM
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key: String::new(),
            max_retries: default_llm_retries(),
            requests_per_minute: default_requests_per_minute(),
            parallelism: default_propose_parallelism(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    #[serde(default = "default_table_parallelism")]
    pub table_parallelism: usize,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

fn default_chunk_size() -> u64 {
    constants::DEFAULT_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    constants::MAX_CHUNK_SIZE
}

fn default_table_parallelism() -> usize {
    constants::DEFAULT_TABLE_PARALLELISM
}

fn default_chunk_timeout_secs() -> u64 {
    constants::DEFAULT_CHUNK_TIMEOUT_SECS
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            table_parallelism: default_table_parallelism(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    /// Allowed relative row-count difference; 0.0 requires exact equality.
    #[serde(default)]
    pub row_count_tolerance: f64,
    #[serde(default = "default_float_tolerance")]
    pub float_tolerance: f64,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: u64,
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
    /// Maximum number of diverging keys reported by L3.
    #[serde(default = "default_max_reported_keys")]
    pub max_reported_keys: usize,
    /// Run later levels even when an earlier level failed.
    #[serde(default)]
    pub continue_on_failure: bool,
}

fn default_float_tolerance() -> f64 {
    constants::DEFAULT_FLOAT_TOLERANCE
}

fn default_sample_rows() -> u64 {
    constants::DEFAULT_SAMPLE_ROWS
}

fn default_sample_seed() -> u64 {
    constants::DEFAULT_SAMPLE_SEED
}

fn default_max_reported_keys() -> usize {
    constants::DEFAULT_MAX_REPORTED_KEYS
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            row_count_tolerance: 0.0,
            float_tolerance: default_float_tolerance(),
            sample_rows: default_sample_rows(),
            sample_seed: default_sample_seed(),
            max_reported_keys: default_max_reported_keys(),
            continue_on_failure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config() {
        let yaml = r#"
        source:
          engine: postgres
          host: localhost
          port: 5432
          user: app
          password: secret
          database: shop
        target:
          engine: mysql
          host: localhost
          port: 3306
          user: app
          password: secret
          database: shop
        "#;
        let config = serde_yaml::from_str::<Config>(yaml).unwrap();
        assert_eq!(config.app_name, "dbshift");
        assert_eq!(config.migration.chunk_size, 5_000);
        assert_eq!(config.validation.sample_seed, 42);
        assert!(!config.llm.enabled);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let yaml = r#"
        source:
          engine: postgres
        "#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
