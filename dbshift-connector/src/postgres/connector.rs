use crate::errors::ConnectorError;
use crate::postgres::schema;
use crate::{
    hash, unsupported, AggregateFn, BulkLoadOutcome, Connector, Engine, KeyHash, ScanPosition,
    SourceRow, TableScan,
};
use async_trait::async_trait;
use dbshift_types::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use dbshift_types::models::ConnectionConfig;
use dbshift_types::ordered_float::OrderedFloat;
use dbshift_types::rust_decimal::Decimal;
use dbshift_types::schema::{TableIdentifier, TableSpec};
use dbshift_types::serde_json;
use dbshift_types::tracing::debug;
use dbshift_types::uuid::Uuid;
use dbshift_types::value::Value;
use std::sync::Arc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

/// Read-side connector for PostgreSQL sources.
pub struct PostgresConnector {
    client: Arc<Client>,
}

impl PostgresConnector {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectorError> {
        let conninfo = format!(
            "host={} port={} user={} password={} dbname={}",
            config.host, config.port, config.user, config.password, config.database
        );
        let (client, connection) =
            tokio_postgres::connect(&conninfo, NoTls)
                .await
                .map_err(|e| ConnectorError::Connect {
                    engine: "postgres",
                    host: config.host.clone(),
                    port: config.port,
                    source: Box::new(e),
                })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("postgres connection closed: {e}");
            }
        });
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn qualified(&self, table: &TableIdentifier) -> String {
        match &table.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
            None => quote_ident(&table.name),
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Bind an engine-independent [Value] as a query parameter by delegating to
/// the matching native `ToSql` implementation.
#[derive(Debug)]
struct PgValue<'a>(&'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut tokio_postgres::types::private::BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            // Match the width the server inferred for the parameter.
            Value::Int(v) => match *ty {
                Type::INT2 => (*v as i16).to_sql(ty, out),
                Type::INT4 => (*v as i32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::UInt(v) => match *ty {
                Type::INT2 => (*v as i16).to_sql(ty, out),
                Type::INT4 => (*v as i32).to_sql(ty, out),
                _ => (*v as i64).to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (v.0 as f32).to_sql(ty, out),
                _ => v.0.to_sql(ty, out),
            },
            Value::Decimal(v) => v.to_sql(ty, out),
            Value::Text(v) => v.to_sql(ty, out),
            Value::Binary(v) => v.to_sql(ty, out),
            Value::Date(v) => v.to_sql(ty, out),
            Value::Time(v) => v.to_sql(ty, out),
            Value::DateTime(v) => v.to_sql(ty, out),
            Value::DateTimeTz(v) => v.to_sql(ty, out),
            Value::Json(v) => v.to_sql(ty, out),
            Value::Uuid(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode_column(row: &Row, idx: usize, table: &str) -> Result<Value, ConnectorError> {
    let column = &row.columns()[idx];
    let ty = column.type_();
    let decode_error = |detail: String| ConnectorError::ColumnDecode {
        table: table.to_string(),
        column: column.name().to_string(),
        detail,
    };

    macro_rules! take {
        ($rust:ty, $variant:expr) => {
            row.try_get::<_, Option<$rust>>(idx)
                .map(|v| v.map($variant).unwrap_or(Value::Null))
                .map_err(|e| decode_error(e.to_string()))
        };
    }

    match *ty {
        Type::BOOL => take!(bool, Value::Bool),
        Type::INT2 => take!(i16, |v| Value::Int(v as i64)),
        Type::INT4 => take!(i32, |v| Value::Int(v as i64)),
        Type::INT8 => take!(i64, Value::Int),
        Type::FLOAT4 => take!(f32, |v| Value::Float(OrderedFloat(v as f64))),
        Type::FLOAT8 => take!(f64, |v| Value::Float(OrderedFloat(v))),
        Type::NUMERIC => take!(Decimal, Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => take!(String, Value::Text),
        Type::BYTEA => take!(Vec<u8>, Value::Binary),
        Type::DATE => take!(NaiveDate, Value::Date),
        Type::TIME => take!(NaiveTime, Value::Time),
        Type::TIMESTAMP => take!(NaiveDateTime, Value::DateTime),
        Type::TIMESTAMPTZ => take!(DateTime<Utc>, |v: DateTime<Utc>| Value::DateTimeTz(
            v.with_timezone(&FixedOffset::east_opt(0).expect("utc offset"))
        )),
        Type::JSON | Type::JSONB => take!(serde_json::Value, Value::Json),
        Type::UUID => take!(Uuid, Value::Uuid),
        _ => {
            // Last resort: anything with a text representation.
            row.try_get::<_, Option<String>>(idx)
                .map(|v| v.map(Value::Text).unwrap_or(Value::Null))
                .map_err(|_| decode_error(format!("unhandled postgres type {ty}")))
        }
    }
}

fn decode_row(row: &Row, table: &str) -> Result<SourceRow, ConnectorError> {
    let mut out = SourceRow::with_capacity(row.len());
    for idx in 0..row.len() {
        let name = row.columns()[idx].name().to_string();
        out.insert(name, decode_column(row, idx, table)?);
    }
    Ok(out)
}

#[async_trait]
impl Connector for PostgresConnector {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn list_tables(&self, schema_name: &str) -> Result<Vec<TableSpec>, ConnectorError> {
        schema::list_tables(&self.client, schema_name).await
    }

    async fn row_count(&self, table: &TableIdentifier) -> Result<u64, ConnectorError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let row = self.client.query_one(&sql, &[]).await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
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

        let rows = match &scan.position {
            ScanPosition::Start => {
                let sql = format!(
                    "SELECT {columns} FROM {table} ORDER BY {order_by} LIMIT {}",
                    scan.chunk_size
                );
                self.client.query(&sql, &[]).await?
            }
            ScanPosition::Offset(offset) => {
                let sql = format!(
                    "SELECT {columns} FROM {table} ORDER BY {order_by} LIMIT {} OFFSET {offset}",
                    scan.chunk_size
                );
                self.client.query(&sql, &[]).await?
            }
            ScanPosition::AfterKey { column, key } => {
                let sql = format!(
                    "SELECT {columns} FROM {table} WHERE {} > $1 ORDER BY {order_by} LIMIT {}",
                    quote_ident(column),
                    scan.chunk_size
                );
                self.client.query(&sql, &[&PgValue(key)]).await?
            }
        };

        rows.iter()
            .map(|row| decode_row(row, &scan.table.to_string()))
            .collect()
    }

    async fn bulk_load(
        &self,
        _table: &TableIdentifier,
        _columns: &[String],
        _rows: Vec<SourceRow>,
    ) -> Result<BulkLoadOutcome, ConnectorError> {
        Err(unsupported(Engine::Postgres, "bulk_load"))
    }

    async fn exec_ddl(&self, _statement: &str) -> Result<(), ConnectorError> {
        Err(unsupported(Engine::Postgres, "exec_ddl"))
    }

    async fn aggregate(
        &self,
        table: &TableIdentifier,
        column: &str,
        function: AggregateFn,
    ) -> Result<Value, ConnectorError> {
        let column = quote_ident(column);
        let expr = match function {
            AggregateFn::Sum => format!("SUM({column})"),
            AggregateFn::Min => format!("MIN({column})"),
            AggregateFn::Max => format!("MAX({column})"),
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {column})"),
        };
        let sql = format!("SELECT {expr} FROM {}", self.qualified(table));
        let row = self.client.query_one(&sql, &[]).await?;
        decode_column(&row, 0, &table.to_string())
    }

    async fn sample_hash(
        &self,
        table: &TableIdentifier,
        pk_columns: &[String],
        keys: &[Value],
    ) -> Result<Vec<KeyHash>, ConnectorError> {
        let [pk] = pk_columns else {
            return Err(unsupported(Engine::Postgres, "sample_hash on composite keys"));
        };
        let table_name = self.qualified(table);
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(500) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT * FROM {table_name} WHERE {} IN ({placeholders}) ORDER BY {}",
                quote_ident(pk),
                quote_ident(pk)
            );
            let params: Vec<PgValue> = chunk.iter().map(PgValue).collect();
            let param_refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p as &(dyn ToSql + Sync))
                .collect();
            for row in self.client.query(&sql, &param_refs).await? {
                let decoded = decode_row(&row, &table.to_string())?;
                let key = decoded
                    .get(pk.as_str())
                    .cloned()
                    .unwrap_or(Value::Null);
                let values: Vec<Value> = decoded.into_iter().map(|(_, v)| v).collect();
                out.push(KeyHash {
                    key: hash::key_display(&[key]),
                    hash: hash::hash_row(&values),
                });
            }
        }
        Ok(out)
    }

    async fn toggle_fk(&self, _enabled: bool) -> Result<bool, ConnectorError> {
        // Source side; nothing to toggle.
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
