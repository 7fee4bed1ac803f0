use crate::errors::ConnectorError;
use crate::mssql::types::to_canonical;
use dbshift_types::schema::{ColumnRole, ColumnSpec, ForeignKeySpec, TableSpec};
use std::collections::{HashMap, HashSet};
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

type MsClient = Client<Compat<TcpStream>>;

const LIST_TABLES: &str = "
    SELECT t.name, SUM(p.rows)
    FROM sys.tables t
    JOIN sys.schemas s ON s.schema_id = t.schema_id
    JOIN sys.partitions p ON p.object_id = t.object_id AND p.index_id IN (0, 1)
    WHERE s.name = @P1
    GROUP BY t.name
    ORDER BY t.name";

const LIST_COLUMNS: &str = "
    SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH,
           NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE, COLUMN_DEFAULT
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION";

const LIST_KEY_COLUMNS: &str = "
    SELECT tc.CONSTRAINT_TYPE, kcu.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
      ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
     AND kcu.TABLE_SCHEMA = tc.TABLE_SCHEMA
    WHERE tc.TABLE_SCHEMA = @P1 AND tc.TABLE_NAME = @P2
      AND tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE')
    ORDER BY kcu.ORDINAL_POSITION";

const LIST_FOREIGN_KEYS: &str = "
    SELECT fk.name, pc.name, rt.name, rc.name
    FROM sys.foreign_keys fk
    JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
    JOIN sys.tables pt ON pt.object_id = fkc.parent_object_id
    JOIN sys.schemas s ON s.schema_id = pt.schema_id
    JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id
                       AND pc.column_id = fkc.parent_column_id
    JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id
    JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id
                       AND rc.column_id = fkc.referenced_column_id
    WHERE s.name = @P1 AND pt.name = @P2
    ORDER BY fk.name, fkc.constraint_column_id";

const LIST_INDEXED_COLUMNS: &str = "
    SELECT DISTINCT c.name
    FROM sys.indexes i
    JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
    JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
    JOIN sys.tables t ON t.object_id = i.object_id
    JOIN sys.schemas s ON s.schema_id = t.schema_id
    WHERE s.name = @P1 AND t.name = @P2
      AND i.is_primary_key = 0 AND i.is_unique = 0";

fn raw_type(
    data_type: &str,
    char_len: Option<i32>,
    precision: Option<u8>,
    scale: Option<i32>,
) -> String {
    match data_type {
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => match char_len {
            Some(-1) => format!("{data_type}(max)"),
            Some(n) => format!("{data_type}({n})"),
            None => data_type.to_string(),
        },
        "decimal" | "numeric" => match (precision, scale) {
            (Some(p), Some(s)) => format!("{data_type}({p},{s})"),
            (Some(p), None) => format!("{data_type}({p})"),
            _ => data_type.to_string(),
        },
        _ => data_type.to_string(),
    }
}

pub async fn list_tables(
    client: &mut MsClient,
    schema: &str,
) -> Result<Vec<TableSpec>, ConnectorError> {
    let rows = client
        .query(LIST_TABLES, &[&schema])
        .await?
        .into_first_result()
        .await?;
    let mut names = Vec::with_capacity(rows.len());
    for row in rows {
        let name: &str = row.get(0).unwrap_or_default();
        let estimate: i64 = row.get::<i64, _>(1).unwrap_or(0);
        names.push((name.to_string(), estimate.max(0) as u64));
    }

    let mut tables = Vec::with_capacity(names.len());
    for (name, estimate) in names {
        tables.push(read_table(client, schema, &name, estimate).await?);
    }
    Ok(tables)
}

pub async fn read_table(
    client: &mut MsClient,
    schema: &str,
    name: &str,
    row_count_estimate: u64,
) -> Result<TableSpec, ConnectorError> {
    let mut primary_key = Vec::new();
    let mut unique: HashSet<String> = HashSet::new();
    for row in client
        .query(LIST_KEY_COLUMNS, &[&schema, &name])
        .await?
        .into_first_result()
        .await?
    {
        let constraint_type: &str = row.get(0).unwrap_or_default();
        let column: &str = row.get(1).unwrap_or_default();
        if constraint_type == "PRIMARY KEY" {
            primary_key.push(column.to_string());
        } else {
            unique.insert(column.to_string());
        }
    }

    let mut indexed: HashSet<String> = HashSet::new();
    for row in client
        .query(LIST_INDEXED_COLUMNS, &[&schema, &name])
        .await?
        .into_first_result()
        .await?
    {
        if let Some(column) = row.get::<&str, _>(0) {
            indexed.insert(column.to_string());
        }
    }

    let column_rows = client
        .query(LIST_COLUMNS, &[&schema, &name])
        .await?
        .into_first_result()
        .await?;
    if column_rows.is_empty() {
        return Err(ConnectorError::TableNotFound(format!("{schema}.{name}")));
    }

    let mut columns = Vec::with_capacity(column_rows.len());
    for row in column_rows {
        let column_name: &str = row.get(0).unwrap_or_default();
        let data_type: &str = row.get(1).unwrap_or_default();
        let char_len: Option<i32> = row.get(2);
        let precision: Option<u8> = row.get(3);
        let scale: Option<i32> = row.get(4);
        let is_nullable: &str = row.get(5).unwrap_or_default();
        let default_expression: Option<&str> = row.get(6);

        let source_type_raw = raw_type(data_type, char_len, precision, scale);
        let (canonical_type, loss) = to_canonical(&source_type_raw);
        let role = if primary_key.iter().any(|pk| pk == column_name) {
            ColumnRole::PrimaryKey
        } else if unique.contains(column_name) {
            ColumnRole::Unique
        } else if indexed.contains(column_name) {
            ColumnRole::Indexed
        } else {
            ColumnRole::None
        };

        columns.push(ColumnSpec {
            name: column_name.to_string(),
            source_type_raw,
            canonical_type,
            nullable: is_nullable == "YES",
            role,
            default_expression: default_expression.map(|s| s.to_string()),
            comment: None,
            loss,
        });
    }

    let mut foreign_keys: HashMap<String, ForeignKeySpec> = HashMap::new();
    let mut fk_order = Vec::new();
    for row in client
        .query(LIST_FOREIGN_KEYS, &[&schema, &name])
        .await?
        .into_first_result()
        .await?
    {
        let constraint: &str = row.get(0).unwrap_or_default();
        let local_column: &str = row.get(1).unwrap_or_default();
        let ref_table: &str = row.get(2).unwrap_or_default();
        let ref_column: &str = row.get(3).unwrap_or_default();
        let entry = foreign_keys
            .entry(constraint.to_string())
            .or_insert_with(|| {
                fk_order.push(constraint.to_string());
                ForeignKeySpec {
                    local_columns: Vec::new(),
                    ref_table: ref_table.to_string(),
                    ref_columns: Vec::new(),
                }
            });
        entry.local_columns.push(local_column.to_string());
        entry.ref_columns.push(ref_column.to_string());
    }
    let foreign_keys = fk_order
        .into_iter()
        .filter_map(|name| foreign_keys.remove(&name))
        .collect();

    Ok(TableSpec {
        schema: schema.to_string(),
        name: name.to_string(),
        columns,
        primary_key,
        foreign_keys,
        row_count_estimate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_type_handles_max_sentinel() {
        assert_eq!(raw_type("nvarchar", Some(-1), None, None), "nvarchar(max)");
        assert_eq!(raw_type("varchar", Some(50), None, None), "varchar(50)");
        assert_eq!(raw_type("decimal", None, Some(18), Some(4)), "decimal(18,4)");
    }
}
