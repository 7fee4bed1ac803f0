use crate::errors::ConnectorError;
use crate::mysql::schema;
use crate::{
    hash, AggregateFn, BulkLoadOutcome, Connector, Engine, KeyHash, RowLoadError, ScanPosition,
    SourceRow, TableScan,
};
use async_trait::async_trait;
use dbshift_types::checkpoint::LoadErrorKind;
use dbshift_types::chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use dbshift_types::models::ConnectionConfig;
use dbshift_types::ordered_float::OrderedFloat;
use dbshift_types::rust_decimal::Decimal;
use dbshift_types::schema::{TableIdentifier, TableSpec};
use dbshift_types::serde_json;
use dbshift_types::tracing::warn;
use dbshift_types::value::Value;
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Row};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Rows per INSERT statement are capped so the placeholder count stays well
/// under the wire limit even for wide tables.
const MAX_PLACEHOLDERS_PER_STATEMENT: usize = 30_000;

/// Full-capability connector for the MySQL target.
pub struct MysqlConnector {
    pool: Pool,
    /// When set, every pooled session used for loading runs with
    /// FOREIGN_KEY_CHECKS=0.
    fk_checks_disabled: AtomicBool,
}

impl MysqlConnector {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectorError> {
        // One extra slot beyond the loader pool so the validator never
        // starves behind table workers.
        let constraints = PoolConstraints::new(1, config.pool_size as usize + 1)
            .unwrap_or_default();
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()))
            .pool_opts(PoolOpts::default().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);
        // Fail fast on bad credentials instead of at first use.
        pool.get_conn().await.map_err(|e| ConnectorError::Connect {
            engine: "mysql",
            host: config.host.clone(),
            port: config.port,
            source: Box::new(e),
        })?;
        Ok(Self {
            pool,
            fk_checks_disabled: AtomicBool::new(false),
        })
    }

    /// Database name doubles as the schema on MySQL.
    fn qualified(&self, table: &TableIdentifier) -> String {
        match &table.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
            None => quote_ident(&table.name),
        }
    }

    /// Acquire a session with the current FK discipline applied.
    async fn conn(&self) -> Result<Conn, ConnectorError> {
        let mut conn = self.pool.get_conn().await?;
        if self.fk_checks_disabled.load(Ordering::SeqCst) {
            conn.query_drop("SET FOREIGN_KEY_CHECKS = 0").await?;
        } else {
            conn.query_drop("SET FOREIGN_KEY_CHECKS = 1").await?;
        }
        Ok(conn)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn value_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(v) => mysql_async::Value::Int(i64::from(*v)),
        Value::Int(v) => mysql_async::Value::Int(*v),
        Value::UInt(v) => mysql_async::Value::UInt(*v),
        Value::Float(v) => mysql_async::Value::Double(v.0),
        Value::Decimal(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Text(v) => mysql_async::Value::Bytes(v.clone().into_bytes()),
        Value::Binary(v) => mysql_async::Value::Bytes(v.clone()),
        Value::Date(v) => {
            use dbshift_types::chrono::Datelike;
            mysql_async::Value::Date(v.year() as u16, v.month() as u8, v.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(v) => mysql_async::Value::Time(
            false,
            0,
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1_000,
        ),
        Value::DateTime(v) => {
            use dbshift_types::chrono::Datelike;
            mysql_async::Value::Date(
                v.year() as u16,
                v.month() as u8,
                v.day() as u8,
                v.hour() as u8,
                v.minute() as u8,
                v.second() as u8,
                v.nanosecond() / 1_000,
            )
        }
        // Zone-aware values are normalized to UTC by the row transform; this
        // arm only fires when a transform was skipped, and still lands UTC.
        Value::DateTimeTz(v) => value_to_mysql(&Value::DateTime(v.naive_utc())),
        Value::Json(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Uuid(v) => {
            mysql_async::Value::Bytes(v.hyphenated().to_string().into_bytes())
        }
    }
}

fn decode_column(
    raw: mysql_async::Value,
    column_type: ColumnType,
    flags: ColumnFlags,
    table: &str,
    column: &str,
) -> Result<Value, ConnectorError> {
    let decode_error = |detail: String| ConnectorError::ColumnDecode {
        table: table.to_string(),
        column: column.to_string(),
        detail,
    };

    let value = match raw {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(v) => Value::Int(v),
        mysql_async::Value::UInt(v) => Value::UInt(v),
        mysql_async::Value::Float(v) => Value::Float(OrderedFloat(v as f64)),
        mysql_async::Value::Double(v) => Value::Float(OrderedFloat(v)),
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .ok_or_else(|| decode_error(format!("invalid date {year}-{month}-{day}")))?;
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                Value::Date(date)
            } else {
                let time = NaiveTime::from_hms_micro_opt(
                    hour as u32,
                    minute as u32,
                    second as u32,
                    micros,
                )
                .ok_or_else(|| decode_error("invalid time of day".to_string()))?;
                Value::DateTime(NaiveDateTime::new(date, time))
            }
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            if negative || days > 0 {
                return Err(decode_error("TIME outside 00:00-24:00".to_string()));
            }
            let time = NaiveTime::from_hms_micro_opt(
                hours as u32,
                minutes as u32,
                seconds as u32,
                micros,
            )
            .ok_or_else(|| decode_error("invalid time of day".to_string()))?;
            Value::Time(time)
        }
        mysql_async::Value::Bytes(bytes) => match column_type {
            ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| decode_error(e.to_string()))?;
                Value::Decimal(
                    Decimal::from_str(&text).map_err(|e| decode_error(e.to_string()))?,
                )
            }
            ColumnType::MYSQL_TYPE_JSON => {
                let parsed: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| decode_error(e.to_string()))?;
                Value::Json(parsed)
            }
            _ if flags.contains(ColumnFlags::BINARY_FLAG) => Value::Binary(bytes),
            _ => Value::Text(
                String::from_utf8(bytes).map_err(|e| decode_error(e.to_string()))?,
            ),
        },
    };
    Ok(value)
}

fn decode_row(row: Row, table: &str) -> Result<SourceRow, ConnectorError> {
    let columns = row.columns();
    let values = row.unwrap();
    let mut out = SourceRow::with_capacity(values.len());
    for (column, raw) in columns.iter().zip(values) {
        let name = column.name_str().to_string();
        let value = decode_column(raw, column.column_type(), column.flags(), table, &name)?;
        out.insert(name, value);
    }
    Ok(out)
}

/// Classify a per-row server error into the DLQ taxonomy.
fn classify_error(error: &mysql_async::Error) -> LoadErrorKind {
    let mysql_async::Error::Server(server) = error else {
        return LoadErrorKind::Unknown;
    };
    match server.code {
        // duplicate key, FK violations, NOT NULL
        1022 | 1048 | 1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1557 | 1586 | 1761 | 1762 => {
            LoadErrorKind::ConstraintViolation
        }
        // out of range, truncation, bad numeric/temporal literals
        1264 | 1265 | 1292 | 1366 | 1406 | 1690 => LoadErrorKind::TypeConversion,
        // character set trouble
        1267 | 1300 => LoadErrorKind::Encoding,
        _ => LoadErrorKind::Unknown,
    }
}

fn insert_statement(table: &str, columns: &[String], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let row_placeholders = format!(
        "({})",
        columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
    );
    let all_placeholders = (0..row_count)
        .map(|_| row_placeholders.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {table} ({column_list}) VALUES {all_placeholders}")
}

#[async_trait]
impl Connector for MysqlConnector {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    async fn list_tables(&self, schema_name: &str) -> Result<Vec<TableSpec>, ConnectorError> {
        let mut conn = self.conn().await?;
        schema::list_tables(&mut conn, schema_name).await
    }

    async fn row_count(&self, table: &TableIdentifier) -> Result<u64, ConnectorError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn.query_first(&sql).await?;
        Ok(count.unwrap_or(0))
    }

    async fn stream_rows(&self, scan: &TableScan) -> Result<Vec<SourceRow>, ConnectorError> {
        let columns = scan
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let order_by = scan
            .order_by
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let table = self.qualified(&scan.table);

        let mut conn = self.conn().await?;
        let rows: Vec<Row> = match &scan.position {
            ScanPosition::Start => {
                let sql = format!(
                    "SELECT {columns} FROM {table} ORDER BY {order_by} LIMIT {}",
                    scan.chunk_size
                );
                conn.query(&sql).await?
            }
            ScanPosition::Offset(offset) => {
                let sql = format!(
                    "SELECT {columns} FROM {table} ORDER BY {order_by} LIMIT {} OFFSET {offset}",
                    scan.chunk_size
                );
                conn.query(&sql).await?
            }
            ScanPosition::AfterKey { column, key } => {
                let sql = format!(
                    "SELECT {columns} FROM {table} WHERE {} > ? ORDER BY {order_by} LIMIT {}",
                    quote_ident(column),
                    scan.chunk_size
                );
                conn.exec(&sql, vec![value_to_mysql(key)]).await?
            }
        };
        drop(conn);

        let table_name = scan.table.to_string();
        rows.into_iter()
            .map(|row| decode_row(row, &table_name))
            .collect()
    }

    async fn bulk_load(
        &self,
        table: &TableIdentifier,
        columns: &[String],
        rows: Vec<SourceRow>,
    ) -> Result<BulkLoadOutcome, ConnectorError> {
        if rows.is_empty() {
            return Ok(BulkLoadOutcome::default());
        }
        let table_name = self.qualified(table);
        let rows_per_statement = (MAX_PLACEHOLDERS_PER_STATEMENT / columns.len().max(1)).max(1);

        let mut conn = self.conn().await?;
        let mut outcome = BulkLoadOutcome::default();
        for batch in rows.chunks(rows_per_statement) {
            let stmt = insert_statement(&table_name, columns, batch.len());
            let mut params = Vec::with_capacity(batch.len() * columns.len());
            for row in batch {
                for column in columns {
                    params.push(value_to_mysql(row.get(column.as_str()).unwrap_or(&Value::Null)));
                }
            }
            match conn.exec_drop(&stmt, params).await {
                Ok(()) => outcome.inserted += batch.len() as u64,
                Err(batch_error) => {
                    // The batch is atomic, so nothing landed. Narrow to
                    // per-row inserts and keep the survivors.
                    warn!(
                        "bulk load of {} rows into {table_name} failed ({batch_error}), retrying row by row",
                        batch.len()
                    );
                    let single = insert_statement(&table_name, columns, 1);
                    for row in batch {
                        let params: Vec<mysql_async::Value> = columns
                            .iter()
                            .map(|c| value_to_mysql(row.get(c.as_str()).unwrap_or(&Value::Null)))
                            .collect();
                        match conn.exec_drop(&single, params).await {
                            Ok(()) => outcome.inserted += 1,
                            Err(row_error) => outcome.per_row_errors.push(RowLoadError {
                                row: row.clone(),
                                kind: classify_error(&row_error),
                                detail: row_error.to_string(),
                            }),
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn exec_ddl(&self, statement: &str) -> Result<(), ConnectorError> {
        let mut conn = self.conn().await?;
        conn.query_drop(statement).await?;
        Ok(())
    }

    async fn aggregate(
        &self,
        table: &TableIdentifier,
        column: &str,
        function: AggregateFn,
    ) -> Result<Value, ConnectorError> {
        let column_quoted = quote_ident(column);
        let expr = match function {
            AggregateFn::Sum => format!("SUM({column_quoted})"),
            AggregateFn::Min => format!("MIN({column_quoted})"),
            AggregateFn::Max => format!("MAX({column_quoted})"),
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {column_quoted})"),
        };
        let sql = format!("SELECT {expr} FROM {}", self.qualified(table));
        let mut conn = self.conn().await?;
        let row: Option<Row> = conn.query_first(&sql).await?;
        let row = row.ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;
        let mut decoded = decode_row(row, &table.to_string())?;
        Ok(decoded
            .shift_remove_index(0)
            .map(|(_, v)| v)
            .unwrap_or(Value::Null))
    }

    async fn sample_hash(
        &self,
        table: &TableIdentifier,
        pk_columns: &[String],
        keys: &[Value],
    ) -> Result<Vec<KeyHash>, ConnectorError> {
        let [pk] = pk_columns else {
            return Err(crate::unsupported(Engine::Mysql, "sample_hash on composite keys"));
        };
        let table_name = self.qualified(table);
        let mut out = Vec::with_capacity(keys.len());
        let mut conn = self.conn().await?;
        for chunk in keys.chunks(500) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT * FROM {table_name} WHERE {} IN ({placeholders}) ORDER BY {}",
                quote_ident(pk),
                quote_ident(pk)
            );
            let params: Vec<mysql_async::Value> = chunk.iter().map(value_to_mysql).collect();
            let rows: Vec<Row> = conn.exec(&sql, params).await?;
            for row in rows {
                let decoded = decode_row(row, &table.to_string())?;
                let key = decoded.get(pk.as_str()).cloned().unwrap_or(Value::Null);
                let values: Vec<Value> = decoded.into_iter().map(|(_, v)| v).collect();
                out.push(KeyHash {
                    key: hash::key_display(&[key]),
                    hash: hash::hash_row(&values),
                });
            }
        }
        Ok(out)
    }

    async fn toggle_fk(&self, enabled: bool) -> Result<bool, ConnectorError> {
        self.fk_checks_disabled.store(!enabled, Ordering::SeqCst);
        // Apply immediately to one session to surface permission errors now
        // rather than mid-load.
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(format!("SET FOREIGN_KEY_CHECKS = {}", i32::from(enabled)))
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement_shape() {
        let stmt = insert_statement("`shop`.`users`", &["id".into(), "age".into()], 2);
        assert_eq!(
            stmt,
            "INSERT INTO `shop`.`users` (`id`, `age`) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn bool_binds_as_int() {
        assert_eq!(
            value_to_mysql(&Value::Bool(true)),
            mysql_async::Value::Int(1)
        );
        assert_eq!(value_to_mysql(&Value::Null), mysql_async::Value::NULL);
    }

    #[test]
    fn backtick_quoting() {
        assert_eq!(quote_ident("users"), "`users`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }
}
