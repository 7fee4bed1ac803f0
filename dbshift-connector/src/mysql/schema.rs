use crate::errors::ConnectorError;
use crate::mysql::types::to_canonical;
use dbshift_types::schema::{ColumnRole, ColumnSpec, ForeignKeySpec, TableSpec};
use mysql_async::prelude::*;
use mysql_async::Conn;
use std::collections::{HashMap, HashSet};

const LIST_TABLES: &str = "
    SELECT TABLE_NAME, COALESCE(TABLE_ROWS, 0)
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME";

const LIST_COLUMNS: &str = "
    SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_COMMENT, COLUMN_KEY
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION";

const LIST_PRIMARY_KEY: &str = "
    SELECT COLUMN_NAME
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
    ORDER BY ORDINAL_POSITION";

const LIST_FOREIGN_KEYS: &str = "
    SELECT CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL
    ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION";

pub async fn list_tables(conn: &mut Conn, schema: &str) -> Result<Vec<TableSpec>, ConnectorError> {
    let names: Vec<(String, u64)> = conn.exec(LIST_TABLES, (schema,)).await?;
    let mut tables = Vec::with_capacity(names.len());
    for (name, estimate) in names {
        tables.push(read_table(conn, schema, &name, estimate).await?);
    }
    Ok(tables)
}

pub async fn read_table(
    conn: &mut Conn,
    schema: &str,
    name: &str,
    row_count_estimate: u64,
) -> Result<TableSpec, ConnectorError> {
    let primary_key: Vec<String> = conn.exec(LIST_PRIMARY_KEY, (schema, name)).await?;
    let pk_set: HashSet<&String> = primary_key.iter().collect();

    let column_rows: Vec<(String, String, String, Option<String>, String, String)> =
        conn.exec(LIST_COLUMNS, (schema, name)).await?;
    if column_rows.is_empty() {
        return Err(ConnectorError::TableNotFound(format!("{schema}.{name}")));
    }

    let mut columns = Vec::with_capacity(column_rows.len());
    for (column_name, column_type, is_nullable, default_expression, comment, column_key) in
        column_rows
    {
        let (canonical_type, loss) = to_canonical(&column_type);
        let role = if pk_set.contains(&column_name) {
            ColumnRole::PrimaryKey
        } else {
            match column_key.as_str() {
                "UNI" => ColumnRole::Unique,
                "MUL" => ColumnRole::Indexed,
                _ => ColumnRole::None,
            }
        };
        columns.push(ColumnSpec {
            name: column_name,
            source_type_raw: column_type,
            canonical_type,
            nullable: is_nullable == "YES",
            role,
            default_expression,
            comment: (!comment.is_empty()).then_some(comment),
            loss,
        });
    }

    let fk_rows: Vec<(String, String, String, String)> =
        conn.exec(LIST_FOREIGN_KEYS, (schema, name)).await?;
    let mut foreign_keys: HashMap<String, ForeignKeySpec> = HashMap::new();
    let mut fk_order = Vec::new();
    for (constraint, local_column, ref_table, ref_column) in fk_rows {
        let entry = foreign_keys.entry(constraint.clone()).or_insert_with(|| {
            fk_order.push(constraint);
            ForeignKeySpec {
                local_columns: Vec::new(),
                ref_table,
                ref_columns: Vec::new(),
            }
        });
        entry.local_columns.push(local_column);
        entry.ref_columns.push(ref_column);
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
