#![allow(clippy::enum_variant_names)]

use dbshift_types::errors::TypeError;
use dbshift_types::thiserror::{self, Error};

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("unknown engine: {0:?}")]
    UnknownEngine(String),
    #[error("{engine} does not support {operation}")]
    UnsupportedCapability {
        engine: &'static str,
        operation: &'static str,
    },
    #[error("failed to connect to {engine} at {host}:{port}: {source}")]
    Connect {
        engine: &'static str,
        host: String,
        port: u16,
        #[source]
        source: dbshift_types::errors::internal::BoxedError,
    },
    #[error("table {0} not found in catalog")]
    TableNotFound(String),
    #[error("cannot decode column {column} of {table}: {detail}")]
    ColumnDecode {
        table: String,
        column: String,
        detail: String,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("mysql error: {0}")]
    Mysql(#[from] mysql_async::Error),
    #[error("sql server error: {0}")]
    Mssql(#[from] tiberius::error::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Whether this error came from the remote rejecting data (as opposed to
    /// the connection or the process failing). Used by the migrator to decide
    /// between per-row DLQ routing and aborting the stage.
    pub fn is_row_level(&self) -> bool {
        matches!(self, ConnectorError::ColumnDecode { .. })
    }
}
