pub mod errors;
pub mod hash;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod test_util;

use async_trait::async_trait;
use dbshift_types::checkpoint::LoadErrorKind;
use dbshift_types::indexmap::IndexMap;
use dbshift_types::models::ConnectionConfig;
use dbshift_types::schema::{TableIdentifier, TableSpec};
use dbshift_types::serde::{Deserialize, Serialize};
use dbshift_types::value::Value;
use errors::ConnectorError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// One row, keyed by column name in selection order.
pub type SourceRow = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", crate = "dbshift_types::serde")]
pub enum Engine {
    Postgres,
    Mssql,
    Mysql,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Postgres, Engine::Mssql, Engine::Mysql];

    pub fn name(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Mssql => "mssql",
            Engine::Mysql => "mysql",
        }
    }

    pub fn supports_target(&self) -> bool {
        matches!(self, Engine::Mysql)
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            "mssql" | "sqlserver" => Ok(Engine::Mssql),
            "mysql" => Ok(Engine::Mysql),
            other => Err(ConnectorError::UnknownEngine(other.to_string())),
        }
    }
}

/// Where a table scan resumes.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanPosition {
    Start,
    /// Skip this many rows of the deterministic ordering.
    Offset(u64),
    /// Keyset pagination: rows strictly after this key of the single-column
    /// primary key. Safe under concurrent source writes.
    AfterKey { column: String, key: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub table: TableIdentifier,
    pub columns: Vec<String>,
    /// Deterministic ordering columns; primary key or all columns.
    pub order_by: Vec<String>,
    pub chunk_size: u64,
    pub position: ScanPosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowLoadError {
    pub row: SourceRow,
    pub kind: LoadErrorKind,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct BulkLoadOutcome {
    pub inserted: u64,
    pub per_row_errors: Vec<RowLoadError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Min,
    Max,
    CountDistinct,
}

impl Display for AggregateFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::CountDistinct => "count_distinct",
        };
        f.write_str(name)
    }
}

/// Hash of one sampled row, keyed by the display form of its primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "dbshift_types::serde")]
pub struct KeyHash {
    pub key: String,
    pub hash: String,
}

/// Uniform capability surface over the supported engines. This trait is the
/// only boundary between the pipeline core and engine-specific code.
///
/// Source-only engines return `UnsupportedCapability` from the write-side
/// operations; the mysql target implements the full set.
#[async_trait]
pub trait Connector: Send + Sync {
    fn engine(&self) -> Engine;

    /// Catalog introspection. Column order matches storage order.
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableSpec>, ConnectorError>;

    /// Exact `COUNT(*)`.
    async fn row_count(&self, table: &TableIdentifier) -> Result<u64, ConnectorError>;

    /// Fetch the next chunk of at most `scan.chunk_size` rows at
    /// `scan.position`, in the deterministic `scan.order_by` order. An empty
    /// result means the scan is complete.
    async fn stream_rows(&self, scan: &TableScan) -> Result<Vec<SourceRow>, ConnectorError>;

    /// Attempt a batch insert. On batch failure the connector narrows to
    /// per-row retries so successful rows still land; rejected rows come back
    /// in `per_row_errors`.
    async fn bulk_load(
        &self,
        table: &TableIdentifier,
        columns: &[String],
        rows: Vec<SourceRow>,
    ) -> Result<BulkLoadOutcome, ConnectorError>;

    /// Execute a single DDL statement.
    async fn exec_ddl(&self, statement: &str) -> Result<(), ConnectorError>;

    /// Scalar aggregate over one column.
    async fn aggregate(
        &self,
        table: &TableIdentifier,
        column: &str,
        function: AggregateFn,
    ) -> Result<Value, ConnectorError>;

    /// Hash the rows whose primary key matches one of `keys`, using the
    /// canonical value encoding. Keys absent from the table are simply
    /// missing from the result.
    async fn sample_hash(
        &self,
        table: &TableIdentifier,
        pk_columns: &[String],
        keys: &[Value],
    ) -> Result<Vec<KeyHash>, ConnectorError>;

    /// Enable or disable foreign-key enforcement for this session. Returns
    /// whether the engine actually applied the change.
    async fn toggle_fk(&self, enabled: bool) -> Result<bool, ConnectorError>;
}

/// Engine registry: build a connector for `config.engine` and verify the
/// connection.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connector>, ConnectorError> {
    let engine = Engine::from_str(&config.engine)?;
    match engine {
        Engine::Postgres => Ok(Box::new(
            postgres::PostgresConnector::connect(config).await?,
        )),
        Engine::Mssql => Ok(Box::new(mssql::MssqlConnector::connect(config).await?)),
        Engine::Mysql => Ok(Box::new(mysql::MysqlConnector::connect(config).await?)),
    }
}

/// `to_canonical` for any source engine, used by the extractor.
pub fn to_canonical(
    engine: Engine,
    raw: &str,
) -> (
    dbshift_types::canonical::CanonicalType,
    Option<dbshift_types::canonical::TypeLoss>,
) {
    match engine {
        Engine::Postgres => postgres::types::to_canonical(raw),
        Engine::Mssql => mssql::types::to_canonical(raw),
        Engine::Mysql => mysql::types::to_canonical(raw),
    }
}

pub(crate) fn unsupported(
    engine: Engine,
    operation: &'static str,
) -> ConnectorError {
    ConnectorError::UnsupportedCapability {
        engine: engine.name(),
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parse_and_display() {
        assert_eq!("postgres".parse::<Engine>().unwrap(), Engine::Postgres);
        assert_eq!("sqlserver".parse::<Engine>().unwrap(), Engine::Mssql);
        assert_eq!(Engine::Mysql.to_string(), "mysql");
        assert!("oracle".parse::<Engine>().is_err());
    }

    #[test]
    fn only_mysql_is_a_target() {
        assert!(Engine::Mysql.supports_target());
        assert!(!Engine::Postgres.supports_target());
        assert!(!Engine::Mssql.supports_target());
    }
}
