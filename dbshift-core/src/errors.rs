#![allow(clippy::enum_variant_names)]

use dbshift_connector::errors::ConnectorError;
use dbshift_types::thiserror::{self, Error};
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Connect(ConnectorError),
    #[error("engine error: {0}")]
    Engine(#[from] ConnectorError),
    #[error("run {0} has no schema artifact; run `extract` first")]
    MissingSchemaArtifact(String),
    #[error("run {0} has no approved mappings; run `propose` and approve them first")]
    MissingApprovedMappings(String),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("target rejected DDL for table {table}: {source}")]
    Ddl {
        table: String,
        #[source]
        source: ConnectorError,
    },
    #[error("migration of {table} failed: {detail}")]
    TableMigration { table: String, detail: String },
    #[error("migration aborted; {dlq_rows} row(s) in the dead letter queue")]
    MigrationAborted { dlq_rows: u64 },
    #[error("validation failed for {0} table(s)")]
    ValidationFailed(usize),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("cancelled")]
    Cancelled,
    #[error("file system error {0:?}: {1}")]
    FileSystem(PathBuf, #[source] std::io::Error),
    #[error("serialization error for {0:?}: {1}")]
    SerdeJson(PathBuf, #[source] dbshift_types::serde_json::Error),
    #[error("dead letter queue write failed: {0}")]
    Dlq(#[from] csv::Error),
    #[error("internal task panic: {0}")]
    JoinError(#[source] tokio::task::JoinError),
}

impl ExecutionError {
    /// Classified process exit code per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionError::Config(_) => 2,
            ExecutionError::ValidationFailed(_) => 3,
            ExecutionError::MigrationAborted { .. } => 4,
            ExecutionError::Connect(_) | ExecutionError::Engine(_) | ExecutionError::Ddl { .. } => {
                5
            }
            _ => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping for {table} references column {column} absent from the extracted schema")]
    UnknownColumn { table: String, column: String },
    #[error("mapping for {table} is missing source column {column}")]
    MissingColumn { table: String, column: String },
    #[error("no extracted schema for mapped table {table}")]
    MissingTableSpec { table: String },
    #[error("invalid target type {target_type:?} for {table}.{column}")]
    InvalidTargetType {
        table: String,
        column: String,
        target_type: String,
    },
    #[error("primary key column {table}.{column} must stay NOT NULL")]
    NullablePrimaryKey { table: String, column: String },
    #[error("no row transform from {source_type} to {target} for {table}.{column}")]
    MissingTransform {
        table: String,
        column: String,
        source_type: String,
        target: String,
    },
    #[error("mapping file {0:?} is not valid JSON: {1}")]
    Parse(PathBuf, #[source] dbshift_types::serde_json::Error),
    #[error("mapping file {0:?} cannot be read: {1}")]
    Read(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("LLM response is not valid JSON: {0}")]
    MalformedResponse(String),
    #[error("LLM proposal rejected after {attempts} attempt(s): {last_violation}")]
    ProposalRejected {
        attempts: u32,
        last_violation: String,
    },
    #[error("LLM provider {0:?} is not supported")]
    UnknownProvider(String),
}
