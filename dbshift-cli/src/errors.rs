#![allow(clippy::enum_variant_names)]

use dbshift_core::errors::ExecutionError;
use dbshift_types::thiserror::{self, Error};
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Cli(#[from] CliError),
    #[error("source engine {0:?} is not supported (expected postgres or mssql)")]
    UnsupportedSource(String),
    #[error("target engine {0:?} is not supported (expected mysql)")]
    UnsupportedTarget(String),
}

impl OrchestrationError {
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestrationError::Execution(e) => e.exit_code(),
            OrchestrationError::Cli(_) => 2,
            OrchestrationError::UnsupportedSource(_)
            | OrchestrationError::UnsupportedTarget(_) => 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read configuration {0:?}: {1}")]
    CannotReadConfig(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    FailedToParseYaml(#[source] dbshift_types::serde_yaml::Error),
    #[error("config references unset environment variable ${{{0}}}")]
    MissingEnvVar(String),
    #[error("failed to create tokio runtime: {0}")]
    FailedToCreateTokioRuntime(#[source] std::io::Error),
    #[error("invalid flag value: {0}")]
    InvalidFlag(String),
}
