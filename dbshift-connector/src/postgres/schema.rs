use crate::errors::ConnectorError;
use crate::postgres::types::to_canonical;
use dbshift_types::schema::{ColumnRole, ColumnSpec, ForeignKeySpec, TableSpec};
use std::collections::{HashMap, HashSet};
use tokio_postgres::Client;

const LIST_TABLES: &str = "
    SELECT c.relname, GREATEST(c.reltuples, 0)::bigint
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relkind = 'r'
    ORDER BY c.relname";

const LIST_COLUMNS: &str = "
    SELECT column_name, data_type, character_maximum_length,
           numeric_precision, numeric_scale, is_nullable, column_default
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position";

const LIST_KEY_COLUMNS: &str = "
    SELECT tc.constraint_type, kcu.column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name
     AND kcu.table_schema = tc.table_schema
    WHERE tc.table_schema = $1 AND tc.table_name = $2
      AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
    ORDER BY kcu.ordinal_position";

const LIST_FOREIGN_KEYS: &str = "
    SELECT tc.constraint_name, kcu.column_name, ccu.table_name, ccu.column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name
     AND kcu.table_schema = tc.table_schema
    JOIN information_schema.constraint_column_usage ccu
      ON ccu.constraint_name = tc.constraint_name
     AND ccu.table_schema = tc.table_schema
    WHERE tc.table_schema = $1 AND tc.table_name = $2
      AND tc.constraint_type = 'FOREIGN KEY'
    ORDER BY tc.constraint_name, kcu.ordinal_position";

const LIST_INDEXED_COLUMNS: &str = "
    SELECT DISTINCT a.attname
    FROM pg_index i
    JOIN pg_class c ON c.oid = i.indrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
    WHERE n.nspname = $1 AND c.relname = $2
      AND NOT i.indisprimary AND NOT i.indisunique";

/// Reassemble the native type string the way `\d` would print it, so the
/// canonical parser sees `character varying(255)` rather than bare
/// `character varying`.
fn raw_type(
    data_type: &str,
    char_len: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    match data_type {
        "character varying" | "character" => match char_len {
            Some(n) => format!("{data_type}({n})"),
            None => data_type.to_string(),
        },
        "numeric" | "decimal" => match (precision, scale) {
            (Some(p), Some(s)) => format!("{data_type}({p},{s})"),
            (Some(p), None) => format!("{data_type}({p})"),
            _ => data_type.to_string(),
        },
        _ => data_type.to_string(),
    }
}

pub async fn list_tables(client: &Client, schema: &str) -> Result<Vec<TableSpec>, ConnectorError> {
    let table_rows = client.query(LIST_TABLES, &[&schema]).await?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for table_row in table_rows {
        let name: String = table_row.get(0);
        let estimate: i64 = table_row.get(1);
        tables.push(read_table(client, schema, &name, estimate as u64).await?);
    }
    Ok(tables)
}

pub async fn read_table(
    client: &Client,
    schema: &str,
    name: &str,
    row_count_estimate: u64,
) -> Result<TableSpec, ConnectorError> {
    let mut primary_key = Vec::new();
    let mut unique: HashSet<String> = HashSet::new();
    for row in client.query(LIST_KEY_COLUMNS, &[&schema, &name]).await? {
        let constraint_type: String = row.get(0);
        let column: String = row.get(1);
        if constraint_type == "PRIMARY KEY" {
            primary_key.push(column);
        } else {
            unique.insert(column);
        }
    }

    let mut indexed: HashSet<String> = HashSet::new();
    for row in client
        .query(LIST_INDEXED_COLUMNS, &[&schema, &name])
        .await?
    {
        indexed.insert(row.get(0));
    }

    let column_rows = client.query(LIST_COLUMNS, &[&schema, &name]).await?;
    if column_rows.is_empty() {
        return Err(ConnectorError::TableNotFound(format!("{schema}.{name}")));
    }

    let mut columns = Vec::with_capacity(column_rows.len());
    for row in column_rows {
        let column_name: String = row.get(0);
        let data_type: String = row.get(1);
        let char_len: Option<i32> = row.get(2);
        let precision: Option<i32> = row.get(3);
        let scale: Option<i32> = row.get(4);
        let is_nullable: String = row.get(5);
        let default_expression: Option<String> = row.get(6);

        let source_type_raw = raw_type(&data_type, char_len, precision, scale);
        let (canonical_type, loss) = to_canonical(&source_type_raw);
        let role = if primary_key.iter().any(|pk| pk == &column_name) {
            ColumnRole::PrimaryKey
        } else if unique.contains(&column_name) {
            ColumnRole::Unique
        } else if indexed.contains(&column_name) {
            ColumnRole::Indexed
        } else {
            ColumnRole::None
        };

        columns.push(ColumnSpec {
            name: column_name,
            source_type_raw,
            canonical_type,
            nullable: is_nullable == "YES",
            role,
            default_expression,
            comment: None,
            loss,
        });
    }

    let mut foreign_keys: HashMap<String, ForeignKeySpec> = HashMap::new();
    let mut fk_order = Vec::new();
    for row in client
        .query(LIST_FOREIGN_KEYS, &[&schema, &name])
        .await?
    {
        let constraint: String = row.get(0);
        let local_column: String = row.get(1);
        let ref_table: String = row.get(2);
        let ref_column: String = row.get(3);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_type_reassembles_parameters() {
        assert_eq!(
            raw_type("character varying", Some(255), None, None),
            "character varying(255)"
        );
        assert_eq!(raw_type("numeric", None, Some(18), Some(4)), "numeric(18,4)");
        assert_eq!(raw_type("integer", None, Some(32), Some(0)), "integer");
    }
}
