use dbshift_connector::mysql::types::from_canonical;
use dbshift_types::canonical::TypeLoss;
use dbshift_types::mapping::{ColumnMapping, TableMapping, WARNING_UNKNOWN_TYPE};
use dbshift_types::schema::TableSpec;

/// Deterministic canonical→MySQL mapping. This path carries the pipeline
/// whenever the LLM is disabled or rejected, so it must cover the full
/// canonical set.
pub fn rule_based_mapping(table: &TableSpec) -> TableMapping {
    let columns = table
        .columns
        .iter()
        .map(|column| {
            let (target_type, loss) = from_canonical(&column.canonical_type);
            let warning = match loss {
                Some(TypeLoss::Unsupported) => Some(WARNING_UNKNOWN_TYPE.to_string()),
                Some(other) => Some(format!("loss={other}")),
                None => None,
            };
            ColumnMapping {
                source: column.name.clone(),
                source_type_raw: column.source_type_raw.clone(),
                canonical_type: column.canonical_type.clone(),
                target: column.name.clone(),
                target_type,
                role: column.role,
                nullable: column.nullable,
                transform_hint: None,
                warning,
            }
        })
        .collect();

    TableMapping {
        source_table: table.name.clone(),
        target_table: table.name.clone(),
        columns,
        load_order_hint: 0,
        disable_fk_during_load: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::schema::{ColumnRole, ColumnSpec};

    fn column(name: &str, raw: &str, canonical: CanonicalType) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            source_type_raw: raw.into(),
            canonical_type: canonical,
            nullable: true,
            role: ColumnRole::None,
            default_expression: None,
            comment: None,
            loss: None,
        }
    }

    #[test]
    fn covers_every_canonical_kind() {
        let table = TableSpec {
            schema: "public".into(),
            name: "t".into(),
            columns: vec![
                column("a", "boolean", CanonicalType::Bool),
                column("b", "timestamptz", CanonicalType::Datetimetz),
                column("c", "tsvector", CanonicalType::Unknown),
                column("d", "numeric(18,4)", CanonicalType::decimal(18, 4)),
            ],
            primary_key: vec![],
            foreign_keys: vec![],
            row_count_estimate: 0,
        };
        let mapping = rule_based_mapping(&table);
        let types: Vec<&str> = mapping
            .columns
            .iter()
            .map(|c| c.target_type.as_str())
            .collect();
        assert_eq!(types, vec!["TINYINT(1)", "DATETIME", "LONGTEXT", "DECIMAL(18,4)"]);
        assert_eq!(
            mapping.columns[2].warning.as_deref(),
            Some(WARNING_UNKNOWN_TYPE)
        );
        assert_eq!(mapping.columns[1].warning.as_deref(), Some("loss=timezone"));
    }
}
