use crate::errors::ExecutionError;
use crate::events::{Event, EventSink};
use crate::registry::{write_atomic, RunPaths};
use dbshift_connector::Connector;
use dbshift_types::mapping::TableMapping;
use dbshift_types::schema::{ColumnRole, TableSpec};
use dbshift_types::tracing::info;

const STAGE: &str = "apply-schema";

fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Render the `CREATE TABLE IF NOT EXISTS` statement for one approved
/// mapping: columns in source order, primary key, and the secondary indexes
/// implied by column roles. Foreign keys are deliberately absent here; they
/// are added in an end-of-stage batch so creation order never matters.
pub fn create_table_statement(mapping: &TableMapping) -> String {
    let mut lines: Vec<String> = mapping
        .columns
        .iter()
        .map(|column| {
            let null_clause = if column.nullable { "" } else { " NOT NULL" };
            format!(
                "  {} {}{}",
                quote(&column.target),
                column.target_type,
                null_clause
            )
        })
        .collect();

    let pk = mapping.primary_key_targets();
    if !pk.is_empty() {
        let cols: Vec<String> = pk.iter().map(|c| quote(c)).collect();
        lines.push(format!("  PRIMARY KEY ({})", cols.join(", ")));
    }
    for column in &mapping.columns {
        match column.role {
            ColumnRole::Unique => lines.push(format!(
                "  UNIQUE KEY {} ({})",
                quote(&format!("uq_{}_{}", mapping.target_table, column.target)),
                quote(&column.target)
            )),
            ColumnRole::Indexed => lines.push(format!(
                "  KEY {} ({})",
                quote(&format!("ix_{}_{}", mapping.target_table, column.target)),
                quote(&column.target)
            )),
            ColumnRole::PrimaryKey | ColumnRole::None => {}
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;",
        quote(&mapping.target_table),
        lines.join(",\n")
    )
}

/// Render the deferred `ADD FOREIGN KEY` batch for one table.
pub fn foreign_key_statements(mapping: &TableMapping, spec: &TableSpec) -> Vec<String> {
    spec.foreign_keys
        .iter()
        .enumerate()
        .map(|(i, fk)| {
            let local: Vec<String> = fk.local_columns.iter().map(|c| quote(c)).collect();
            let referenced: Vec<String> = fk.ref_columns.iter().map(|c| quote(c)).collect();
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});",
                quote(&mapping.target_table),
                quote(&format!("fk_{}_{}", mapping.target_table, i)),
                local.join(", "),
                quote(&fk.ref_table),
                referenced.join(", ")
            )
        })
        .collect()
}

/// Run the apply-schema stage. Always writes `ddl/<run_id>/<table>.sql`;
/// in apply mode also executes every statement, stopping at the first
/// failure (already-created tables stay, and the stage is idempotent thanks
/// to IF NOT EXISTS).
pub async fn run_apply_schema(
    target: &dyn Connector,
    mappings: &[TableMapping],
    specs: &[TableSpec],
    paths: &RunPaths,
    apply: bool,
    events: &EventSink,
) -> Result<(), ExecutionError> {
    let mut creates: Vec<(String, String)> = Vec::new();
    let mut fk_batch: Vec<(String, String)> = Vec::new();

    for mapping in mappings {
        let create = create_table_statement(mapping);
        let fks = specs
            .iter()
            .find(|s| s.name == mapping.source_table)
            .map(|spec| foreign_key_statements(mapping, spec))
            .unwrap_or_default();

        let mut file_content = create.clone();
        for fk in &fks {
            file_content.push_str("\n\n");
            file_content.push_str(fk);
        }
        file_content.push('\n');
        let path = paths
            .ddl_dir()
            .join(format!("{}.sql", mapping.target_table));
        write_atomic(&path, file_content.as_bytes())?;

        creates.push((mapping.target_table.clone(), create));
        for fk in fks {
            fk_batch.push((mapping.target_table.clone(), fk));
        }
    }

    if !apply {
        info!("dry run: wrote DDL for {} table(s)", creates.len());
        events.done(STAGE);
        return Ok(());
    }

    for (table, statement) in creates.iter().chain(fk_batch.iter()) {
        target
            .exec_ddl(statement)
            .await
            .map_err(|source| ExecutionError::Ddl {
                table: table.clone(),
                source,
            })?;
        events.emit(Event::TableDone {
            stage: STAGE.to_string(),
            table: table.clone(),
        });
    }
    events.done(STAGE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propose::rules::rule_based_mapping;
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::schema::{ColumnSpec, ForeignKeySpec};

    fn column(name: &str, canonical: CanonicalType, role: ColumnRole, nullable: bool) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            source_type_raw: String::new(),
            canonical_type: canonical,
            nullable,
            role,
            default_expression: None,
            comment: None,
            loss: None,
        }
    }

    #[test]
    fn users_table_ddl_matches_expected_shape() {
        let spec = TableSpec {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![
                column("id", CanonicalType::Int4, ColumnRole::PrimaryKey, false),
                column("age", CanonicalType::Int2, ColumnRole::None, true),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 2,
        };
        let ddl = create_table_statement(&rule_based_mapping(&spec));
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS `users` (\n  `id` INT NOT NULL,\n  `age` SMALLINT,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;"
        );
    }

    #[test]
    fn unique_and_indexed_roles_become_keys() {
        let spec = TableSpec {
            schema: "public".into(),
            name: "accounts".into(),
            columns: vec![
                column("id", CanonicalType::Int8, ColumnRole::PrimaryKey, false),
                column("email", CanonicalType::text(Some(120)), ColumnRole::Unique, false),
                column("region", CanonicalType::text(Some(16)), ColumnRole::Indexed, true),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 0,
        };
        let ddl = create_table_statement(&rule_based_mapping(&spec));
        assert!(ddl.contains("UNIQUE KEY `uq_accounts_email` (`email`)"));
        assert!(ddl.contains("KEY `ix_accounts_region` (`region`)"));
    }

    #[test]
    fn foreign_keys_are_deferred_alter_statements() {
        let spec = TableSpec {
            schema: "public".into(),
            name: "orders".into(),
            columns: vec![
                column("id", CanonicalType::Int8, ColumnRole::PrimaryKey, false),
                column("user_id", CanonicalType::Int4, ColumnRole::Indexed, false),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKeySpec {
                local_columns: vec!["user_id".into()],
                ref_table: "users".into(),
                ref_columns: vec!["id".into()],
            }],
            row_count_estimate: 0,
        };
        let mapping = rule_based_mapping(&spec);
        let fks = foreign_key_statements(&mapping, &spec);
        assert_eq!(fks.len(), 1);
        assert_eq!(
            fks[0],
            "ALTER TABLE `orders` ADD CONSTRAINT `fk_orders_0` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`);"
        );
        assert!(!create_table_statement(&mapping).contains("FOREIGN KEY"));
    }
}
