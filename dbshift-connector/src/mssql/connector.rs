use crate::errors::ConnectorError;
use crate::mssql::schema;
use crate::{
    hash, unsupported, AggregateFn, BulkLoadOutcome, Connector, Engine, KeyHash, ScanPosition,
    SourceRow, TableScan,
};
use async_trait::async_trait;
use dbshift_types::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use dbshift_types::models::ConnectionConfig;
use dbshift_types::ordered_float::OrderedFloat;
use dbshift_types::rust_decimal::Decimal;
use dbshift_types::schema::{TableIdentifier, TableSpec};
use dbshift_types::value::Value;
use std::borrow::Cow;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type MsClient = Client<Compat<TcpStream>>;

/// Read-side connector for SQL Server sources. The TDS client requires
/// exclusive access per query, so it sits behind a mutex.
pub struct MssqlConnector {
    client: Mutex<MsClient>,
}

impl MssqlConnector {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectorError> {
        let mut tds_config = Config::new();
        tds_config.host(&config.host);
        tds_config.port(config.port);
        tds_config.database(&config.database);
        tds_config.authentication(AuthMethod::sql_server(&config.user, &config.password));
        tds_config.trust_cert();

        let connect = async {
            let tcp = TcpStream::connect(tds_config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(tds_config, tcp.compat_write())
                .await
                .map_err(dbshift_types::errors::internal::BoxedError::from)
        };
        let client = connect.await.map_err(|e| ConnectorError::Connect {
            engine: "mssql",
            host: config.host.clone(),
            port: config.port,
            source: e,
        })?;
        Ok(Self {
            client: Mutex::new(client),
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
    format!("[{}]", ident.replace(']', "]]"))
}

/// Bind an engine-independent [Value] as a TDS parameter.
struct MsValue<'a>(&'a Value);

impl ToSql for MsValue<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(v) => ColumnData::Bit(Some(*v)),
            Value::Int(v) => ColumnData::I64(Some(*v)),
            Value::UInt(v) => ColumnData::I64(Some(*v as i64)),
            Value::Float(v) => ColumnData::F64(Some(v.0)),
            Value::Decimal(v) => v.to_sql(),
            Value::Text(v) => ColumnData::String(Some(Cow::Borrowed(v))),
            Value::Binary(v) => ColumnData::Binary(Some(Cow::Borrowed(v))),
            Value::Date(v) => v.to_sql(),
            Value::Time(v) => v.to_sql(),
            Value::DateTime(v) => v.to_sql(),
            Value::DateTimeTz(v) => v.to_sql(),
            Value::Json(v) => ColumnData::String(Some(Cow::Owned(v.to_string()))),
            Value::Uuid(v) => ColumnData::Guid(Some(*v)),
        }
    }
}

fn decode_column(
    data: &ColumnData<'static>,
    table: &str,
    column: &str,
) -> Result<Value, ConnectorError> {
    let decode_error = |detail: String| ConnectorError::ColumnDecode {
        table: table.to_string(),
        column: column.to_string(),
        detail,
    };

    let value = match data {
        ColumnData::Bit(v) => (*v).map(Value::Bool),
        ColumnData::U8(v) => (*v).map(|x| Value::Int(x as i64)),
        ColumnData::I16(v) => (*v).map(|x| Value::Int(x as i64)),
        ColumnData::I32(v) => (*v).map(|x| Value::Int(x as i64)),
        ColumnData::I64(v) => (*v).map(Value::Int),
        ColumnData::F32(v) => (*v).map(|x| Value::Float(OrderedFloat(x as f64))),
        ColumnData::F64(v) => (*v).map(|x| Value::Float(OrderedFloat(x))),
        ColumnData::String(v) => v.as_ref().map(|s| Value::Text(s.to_string())),
        ColumnData::Guid(v) => (*v).map(Value::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Binary(b.to_vec())),
        ColumnData::Numeric(_) => Decimal::from_sql(data)
            .map_err(|e| decode_error(e.to_string()))?
            .map(Value::Decimal),
        ColumnData::Date(_) => NaiveDate::from_sql(data)
            .map_err(|e| decode_error(e.to_string()))?
            .map(Value::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)
            .map_err(|e| decode_error(e.to_string()))?
            .map(Value::Time),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)
                .map_err(|e| decode_error(e.to_string()))?
                .map(Value::DateTime)
        }
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)
            .map_err(|e| decode_error(e.to_string()))?
            .map(Value::DateTimeTz),
        ColumnData::Xml(v) => v.as_ref().map(|x| Value::Text(x.to_string())),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_row(row: Row, table: &str) -> Result<SourceRow, ConnectorError> {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut out = SourceRow::with_capacity(names.len());
    for (name, data) in names.into_iter().zip(row.into_iter()) {
        let value = decode_column(&data, table, &name)?;
        out.insert(name, value);
    }
    Ok(out)
}

#[async_trait]
impl Connector for MssqlConnector {
    fn engine(&self) -> Engine {
        Engine::Mssql
    }

    async fn list_tables(&self, schema_name: &str) -> Result<Vec<TableSpec>, ConnectorError> {
        let mut client = self.client.lock().await;
        schema::list_tables(&mut client, schema_name).await
    }

    async fn row_count(&self, table: &TableIdentifier) -> Result<u64, ConnectorError> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", self.qualified(table));
        let mut client = self.client.lock().await;
        let row = client
            .query(&sql, &[])
            .await?
            .into_row()
            .await?
            .ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;
        Ok(row.get::<i64, _>(0).unwrap_or(0) as u64)
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

        let mut client = self.client.lock().await;
        let rows = match &scan.position {
            ScanPosition::Start => {
                let sql = format!(
                    "SELECT {columns} FROM {table} ORDER BY {order_by} \
                     OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY",
                    scan.chunk_size
                );
                client.query(&sql, &[]).await?.into_first_result().await?
            }
            ScanPosition::Offset(offset) => {
                let sql = format!(
                    "SELECT {columns} FROM {table} ORDER BY {order_by} \
                     OFFSET {offset} ROWS FETCH NEXT {} ROWS ONLY",
                    scan.chunk_size
                );
                client.query(&sql, &[]).await?.into_first_result().await?
            }
            ScanPosition::AfterKey { column, key } => {
                let sql = format!(
                    "SELECT {columns} FROM {table} WHERE {} > @P1 ORDER BY {order_by} \
                     OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY",
                    quote_ident(column),
                    scan.chunk_size
                );
                client
                    .query(&sql, &[&MsValue(key)])
                    .await?
                    .into_first_result()
                    .await?
            }
        };
        drop(client);

        let table_name = scan.table.to_string();
        rows.into_iter()
            .map(|row| decode_row(row, &table_name))
            .collect()
    }

    async fn bulk_load(
        &self,
        _table: &TableIdentifier,
        _columns: &[String],
        _rows: Vec<SourceRow>,
    ) -> Result<BulkLoadOutcome, ConnectorError> {
        Err(unsupported(Engine::Mssql, "bulk_load"))
    }

    async fn exec_ddl(&self, _statement: &str) -> Result<(), ConnectorError> {
        Err(unsupported(Engine::Mssql, "exec_ddl"))
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
            AggregateFn::CountDistinct => format!("COUNT_BIG(DISTINCT {column_quoted})"),
        };
        let sql = format!("SELECT {expr} FROM {}", self.qualified(table));
        let mut client = self.client.lock().await;
        let row = client
            .query(&sql, &[])
            .await?
            .into_row()
            .await?
            .ok_or_else(|| ConnectorError::TableNotFound(table.to_string()))?;
        let data = row
            .into_iter()
            .next()
            .unwrap_or(ColumnData::String(None));
        decode_column(&data, &table.to_string(), column)
    }

    async fn sample_hash(
        &self,
        table: &TableIdentifier,
        pk_columns: &[String],
        keys: &[Value],
    ) -> Result<Vec<KeyHash>, ConnectorError> {
        let [pk] = pk_columns else {
            return Err(unsupported(Engine::Mssql, "sample_hash on composite keys"));
        };
        let table_name = self.qualified(table);
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(500) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("@P{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT * FROM {table_name} WHERE {} IN ({placeholders}) ORDER BY {}",
                quote_ident(pk),
                quote_ident(pk)
            );
            let params: Vec<MsValue> = chunk.iter().map(MsValue).collect();
            let param_refs: Vec<&dyn ToSql> =
                params.iter().map(|p| p as &dyn ToSql).collect();
            let mut client = self.client.lock().await;
            let rows = client
                .query(&sql, &param_refs)
                .await?
                .into_first_result()
                .await?;
            drop(client);
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

    async fn toggle_fk(&self, _enabled: bool) -> Result<bool, ConnectorError> {
        // Source side; nothing to toggle.
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_bracket_quoted() {
        assert_eq!(quote_ident("users"), "[users]");
        assert_eq!(quote_ident("we]ird"), "[we]]ird]");
    }
}
