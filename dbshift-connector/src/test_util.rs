//! Deterministic in-memory connector used by pipeline tests in place of a
//! live database.

use crate::errors::ConnectorError;
use crate::{
    hash, AggregateFn, BulkLoadOutcome, Connector, Engine, KeyHash, RowLoadError, ScanPosition,
    SourceRow, TableScan,
};
use async_trait::async_trait;
use dbshift_types::checkpoint::LoadErrorKind;
use dbshift_types::ordered_float::OrderedFloat;
use dbshift_types::schema::{TableIdentifier, TableSpec};
use dbshift_types::value::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FakeTable {
    spec: Option<TableSpec>,
    rows: Vec<SourceRow>,
    /// Columns carrying a UNIQUE constraint, enforced by `bulk_load`.
    unique_columns: Vec<String>,
}

/// In-memory [Connector] with scriptable failures. Plays both the source and
/// the target role depending on how a test wires it.
#[derive(Default)]
pub struct FakeConnector {
    engine: Option<Engine>,
    tables: Mutex<HashMap<String, FakeTable>>,
    ddl_log: Mutex<Vec<String>>,
    fk_toggle_log: Mutex<Vec<bool>>,
    /// Fail this many bulk_load calls outright before succeeding.
    bulk_load_failures: AtomicU32,
}

impl FakeConnector {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Some(engine),
            ..Default::default()
        }
    }

    pub fn with_table(self, spec: TableSpec, rows: Vec<SourceRow>) -> Self {
        self.tables.lock().unwrap().insert(
            spec.name.clone(),
            FakeTable {
                spec: Some(spec),
                rows,
                unique_columns: Vec::new(),
            },
        );
        self
    }

    /// Register an empty target table with an optional UNIQUE column.
    pub fn with_target_table(self, name: &str, unique_columns: &[&str]) -> Self {
        self.tables.lock().unwrap().insert(
            name.to_string(),
            FakeTable {
                spec: None,
                rows: Vec::new(),
                unique_columns: unique_columns.iter().map(|c| c.to_string()).collect(),
            },
        );
        self
    }

    /// Make the next `n` bulk_load calls fail with a retryable error.
    pub fn fail_next_bulk_loads(&self, n: u32) {
        self.bulk_load_failures.store(n, AtomicOrdering::SeqCst);
    }

    pub fn rows_of(&self, table: &str) -> Vec<SourceRow> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn ddl_statements(&self) -> Vec<String> {
        self.ddl_log.lock().unwrap().clone()
    }

    pub fn fk_toggles(&self) -> Vec<bool> {
        self.fk_toggle_log.lock().unwrap().clone()
    }
}

/// Total order over values of the same logical type, for deterministic fake
/// scans.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Int(x), Value::UInt(y)) => (*x as i128).cmp(&(*y as i128)),
        (Value::UInt(x), Value::Int(y)) => (*x as i128).cmp(&(*y as i128)),
        (Value::Float(OrderedFloat(x)), Value::Float(OrderedFloat(y))) => x.total_cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => {
            let mut left = Vec::new();
            let mut right = Vec::new();
            a.encode_canonical(&mut left);
            b.encode_canonical(&mut right);
            left.cmp(&right)
        }
    }
}

fn row_key(row: &SourceRow, order_by: &[String]) -> Vec<Value> {
    order_by
        .iter()
        .map(|c| row.get(c.as_str()).cloned().unwrap_or(Value::Null))
        .collect()
}

fn cmp_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match cmp_values(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[async_trait]
impl Connector for FakeConnector {
    fn engine(&self) -> Engine {
        self.engine.unwrap_or(Engine::Postgres)
    }

    async fn list_tables(&self, _schema: &str) -> Result<Vec<TableSpec>, ConnectorError> {
        let tables = self.tables.lock().unwrap();
        let mut specs: Vec<TableSpec> = tables
            .values()
            .filter_map(|t| t.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    async fn row_count(&self, table: &TableIdentifier) -> Result<u64, ConnectorError> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&table.name)
            .ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;
        Ok(table.rows.len() as u64)
    }

    async fn stream_rows(&self, scan: &TableScan) -> Result<Vec<SourceRow>, ConnectorError> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&scan.table.name)
            .ok_or_else(|| ConnectorError::TableNotFound(scan.table.to_string()))?;

        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| cmp_keys(&row_key(a, &scan.order_by), &row_key(b, &scan.order_by)));

        let rows: Vec<SourceRow> = match &scan.position {
            ScanPosition::Start => rows,
            ScanPosition::Offset(offset) => rows.into_iter().skip(*offset as usize).collect(),
            ScanPosition::AfterKey { column, key } => rows
                .into_iter()
                .filter(|row| {
                    row.get(column.as_str())
                        .map(|v| cmp_values(v, key) == Ordering::Greater)
                        .unwrap_or(false)
                })
                .collect(),
        };

        Ok(rows
            .into_iter()
            .take(scan.chunk_size as usize)
            .map(|row| {
                let mut projected = SourceRow::with_capacity(scan.columns.len());
                for column in &scan.columns {
                    projected.insert(
                        column.clone(),
                        row.get(column.as_str()).cloned().unwrap_or(Value::Null),
                    );
                }
                projected
            })
            .collect())
    }

    async fn bulk_load(
        &self,
        table: &TableIdentifier,
        _columns: &[String],
        rows: Vec<SourceRow>,
    ) -> Result<BulkLoadOutcome, ConnectorError> {
        let remaining = self.bulk_load_failures.load(AtomicOrdering::SeqCst);
        if remaining > 0 {
            self.bulk_load_failures
                .store(remaining - 1, AtomicOrdering::SeqCst);
            return Err(ConnectorError::TableNotFound(format!(
                "injected bulk_load failure for {table}"
            )));
        }

        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(&table.name)
            .ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;

        let mut outcome = BulkLoadOutcome::default();
        for row in rows {
            let mut conflict = None;
            for unique in &table.unique_columns {
                let candidate = row.get(unique.as_str());
                let exists = table.rows.iter().any(|existing| {
                    existing.get(unique.as_str()) == candidate && candidate.is_some()
                });
                if exists {
                    conflict = Some(unique.clone());
                    break;
                }
            }
            match conflict {
                Some(column) => outcome.per_row_errors.push(RowLoadError {
                    row,
                    kind: LoadErrorKind::ConstraintViolation,
                    detail: format!("duplicate value for unique column {column}"),
                }),
                None => {
                    table.rows.push(row);
                    outcome.inserted += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn exec_ddl(&self, statement: &str) -> Result<(), ConnectorError> {
        self.ddl_log.lock().unwrap().push(statement.to_string());
        Ok(())
    }

    async fn aggregate(
        &self,
        table: &TableIdentifier,
        column: &str,
        function: AggregateFn,
    ) -> Result<Value, ConnectorError> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&table.name)
            .ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;
        let values: Vec<&Value> = table
            .rows
            .iter()
            .filter_map(|r| r.get(column))
            .filter(|v| !v.is_null())
            .collect();

        let result = match function {
            AggregateFn::Sum => {
                let sum: f64 = values.iter().filter_map(|v| v.as_float()).sum();
                Value::Float(OrderedFloat(sum))
            }
            AggregateFn::Min => values
                .iter()
                .min_by(|a, b| cmp_values(a, b))
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null),
            AggregateFn::Max => values
                .iter()
                .max_by(|a, b| cmp_values(a, b))
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null),
            AggregateFn::CountDistinct => {
                let mut seen = HashSet::new();
                for value in values {
                    let mut encoded = Vec::new();
                    value.encode_canonical(&mut encoded);
                    seen.insert(encoded);
                }
                Value::Int(seen.len() as i64)
            }
        };
        Ok(result)
    }

    async fn sample_hash(
        &self,
        table: &TableIdentifier,
        pk_columns: &[String],
        keys: &[Value],
    ) -> Result<Vec<KeyHash>, ConnectorError> {
        let [pk] = pk_columns else {
            return Err(crate::unsupported(
                self.engine(),
                "sample_hash on composite keys",
            ));
        };
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&table.name)
            .ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;
        let mut out = Vec::new();
        for row in &table.rows {
            let Some(key) = row.get(pk.as_str()) else {
                continue;
            };
            if keys.iter().any(|k| cmp_values(k, key) == Ordering::Equal) {
                let values: Vec<Value> = row.values().cloned().collect();
                out.push(KeyHash {
                    key: hash::key_display(&[key.clone()]),
                    hash: hash::hash_row(&values),
                });
            }
        }
        Ok(out)
    }

    async fn toggle_fk(&self, enabled: bool) -> Result<bool, ConnectorError> {
        self.fk_toggle_log.lock().unwrap().push(enabled);
        Ok(true)
    }
}
