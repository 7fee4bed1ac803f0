use crate::canonical::{CanonicalType, TypeLoss};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How a column participates in constraints on the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    PrimaryKey,
    Unique,
    Indexed,
    None,
}

impl Default for ColumnRole {
    fn default() -> Self {
        ColumnRole::None
    }
}

/// One column as extracted from the source catalog. Immutable after
/// extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub source_type_raw: String,
    pub canonical_type: CanonicalType,
    pub nullable: bool,
    #[serde(default)]
    pub role: ColumnRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<TypeLoss>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub local_columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub row_count_estimate: u64,
}

impl TableSpec {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Deterministic ordering columns: the primary key when present,
    /// otherwise every column in storage order.
    pub fn order_by_columns(&self) -> Vec<String> {
        if self.primary_key.is_empty() {
            self.columns.iter().map(|c| c.name.clone()).collect()
        } else {
            self.primary_key.clone()
        }
    }

    /// True when offset-free keyset pagination is safe: a single integer
    /// primary-key column.
    pub fn has_monotonic_pk(&self) -> bool {
        if self.primary_key.len() != 1 {
            return false;
        }
        self.column(&self.primary_key[0])
            .map(|c| c.canonical_type.is_integer())
            .unwrap_or(false)
    }
}

/// Outcome of extracting one table. Catalog inconsistencies are isolated to
/// the table they occur in rather than failing the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableExtract {
    Ok { table: TableSpec },
    ExtractError { table: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaArtifact {
    pub source_engine: String,
    pub database: String,
    pub extracted_at: DateTime<Utc>,
    pub tables: Vec<TableExtract>,
}

impl SchemaArtifact {
    pub fn table_specs(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.iter().filter_map(|t| match t {
            TableExtract::Ok { table } => Some(table),
            TableExtract::ExtractError { .. } => None,
        })
    }

    pub fn errored_tables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tables.iter().filter_map(|t| match t {
            TableExtract::Ok { .. } => None,
            TableExtract::ExtractError { table, reason } => {
                Some((table.as_str(), reason.as_str()))
            }
        })
    }
}

/// `schema.table` identifier as requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

impl TableIdentifier {
    pub fn new(schema: Option<String>, name: String) -> Self {
        Self { schema, name }
    }
}

impl Display for TableIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_column(name: &str, role: ColumnRole) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            source_type_raw: "integer".to_string(),
            canonical_type: CanonicalType::Int4,
            nullable: false,
            role,
            default_expression: None,
            comment: None,
            loss: None,
        }
    }

    #[test]
    fn order_by_falls_back_to_all_columns() {
        let table = TableSpec {
            schema: "public".into(),
            name: "events".into(),
            columns: vec![
                int_column("a", ColumnRole::None),
                int_column("b", ColumnRole::None),
            ],
            primary_key: vec![],
            foreign_keys: vec![],
            row_count_estimate: 0,
        };
        assert_eq!(table.order_by_columns(), vec!["a", "b"]);
        assert!(!table.has_monotonic_pk());
    }

    #[test]
    fn single_integer_pk_is_monotonic() {
        let table = TableSpec {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![int_column("id", ColumnRole::PrimaryKey)],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 10,
        };
        assert!(table.has_monotonic_pk());
        assert_eq!(table.order_by_columns(), vec!["id"]);
    }
}
