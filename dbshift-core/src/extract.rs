use crate::errors::ExecutionError;
use crate::events::{Event, EventSink};
use crate::registry::{write_json_atomic, RunPaths};
use dbshift_connector::Connector;
use dbshift_types::chrono::Utc;
use dbshift_types::schema::{SchemaArtifact, TableExtract, TableSpec};
use dbshift_types::serde::Serialize;
use dbshift_types::tracing::{info, warn};

const STAGE: &str = "extract";

/// Catalog-only row statistics written alongside the schema artifact.
#[derive(Debug, Serialize)]
#[serde(crate = "dbshift_types::serde")]
struct TableStats {
    table: String,
    row_count_estimate: u64,
}

/// Run the extract stage: introspect the source catalog and persist one
/// schema artifact per table under `schemas/<run_id>/`.
///
/// A failure while persisting one table is isolated as an `extract_error`
/// entry; only a catalog-level failure aborts the stage.
pub async fn run_extract(
    source: &dyn Connector,
    schema_filter: &str,
    table_filter: Option<&[String]>,
    paths: &RunPaths,
    events: &EventSink,
) -> Result<SchemaArtifact, ExecutionError> {
    let specs = source
        .list_tables(schema_filter)
        .await
        .map_err(ExecutionError::Connect)?;

    let mut tables = Vec::with_capacity(specs.len());
    for spec in specs {
        if let Some(filter) = table_filter {
            if !filter.iter().any(|t| t == &spec.name) {
                continue;
            }
        }
        let entry = match persist_table(&spec, paths) {
            Ok(()) => {
                info!(
                    "extracted {} ({} columns, ~{} rows)",
                    spec.qualified_name(),
                    spec.columns.len(),
                    spec.row_count_estimate
                );
                events.emit(Event::TableDone {
                    stage: STAGE.to_string(),
                    table: spec.name.clone(),
                });
                TableExtract::Ok { table: spec }
            }
            Err(e) => {
                warn!("extraction of {} failed: {e}", spec.qualified_name());
                TableExtract::ExtractError {
                    table: spec.name.clone(),
                    reason: e.to_string(),
                }
            }
        };
        tables.push(entry);
    }

    let artifact = SchemaArtifact {
        source_engine: source.engine().to_string(),
        database: schema_filter.to_string(),
        extracted_at: Utc::now(),
        tables,
    };
    events.done(STAGE);
    Ok(artifact)
}

fn persist_table(spec: &TableSpec, paths: &RunPaths) -> Result<(), ExecutionError> {
    let schema_file = paths.schemas_dir().join(format!("{}.json", spec.name));
    write_json_atomic(&schema_file, spec)?;
    let stats_file = paths.stats_dir().join(format!("{}.json", spec.name));
    write_json_atomic(
        &stats_file,
        &TableStats {
            table: spec.qualified_name(),
            row_count_estimate: spec.row_count_estimate,
        },
    )
}

/// Load every table spec previously extracted for this run.
pub fn load_schema_artifact(paths: &RunPaths) -> Result<Vec<TableSpec>, ExecutionError> {
    let dir = paths.schemas_dir();
    if !dir.is_dir() {
        return Err(ExecutionError::MissingSchemaArtifact(
            paths.run_id_or_shared(),
        ));
    }
    let mut specs = Vec::new();
    let entries =
        std::fs::read_dir(&dir).map_err(|e| ExecutionError::FileSystem(dir.clone(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ExecutionError::FileSystem(dir.clone(), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            specs.push(crate::registry::read_json::<TableSpec>(&path)?);
        }
    }
    if specs.is_empty() {
        return Err(ExecutionError::MissingSchemaArtifact(
            paths.run_id_or_shared(),
        ));
    }
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RunRegistry;
    use dbshift_connector::test_util::FakeConnector;
    use dbshift_connector::Engine;
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::schema::{ColumnRole, ColumnSpec};
    use tempdir::TempDir;

    fn users_table() -> TableSpec {
        TableSpec {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![ColumnSpec {
                name: "id".into(),
                source_type_raw: "integer".into(),
                canonical_type: CanonicalType::Int4,
                nullable: false,
                role: ColumnRole::PrimaryKey,
                default_expression: None,
                comment: None,
                loss: None,
            }],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 2,
        }
    }

    #[tokio::test]
    async fn extract_writes_schema_and_stats_artifacts() {
        let tmp = TempDir::new("extract").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let paths = registry.run(Some("20240101-000000-abc123".into()));
        let source = FakeConnector::new(Engine::Postgres).with_table(users_table(), vec![]);

        let artifact = run_extract(&source, "public", None, &paths, &EventSink::disabled())
            .await
            .unwrap();
        assert_eq!(artifact.table_specs().count(), 1);
        assert!(paths.schemas_dir().join("users.json").is_file());
        assert!(paths.stats_dir().join("users.json").is_file());

        let loaded = load_schema_artifact(&paths).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "users");
    }

    #[tokio::test]
    async fn table_filter_limits_extraction() {
        let tmp = TempDir::new("extract").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let paths = registry.run(Some("20240101-000000-abc124".into()));
        let source = FakeConnector::new(Engine::Postgres).with_table(users_table(), vec![]);

        let filter = vec!["other".to_string()];
        let artifact = run_extract(
            &source,
            "public",
            Some(&filter),
            &paths,
            &EventSink::disabled(),
        )
        .await
        .unwrap();
        assert_eq!(artifact.table_specs().count(), 0);
    }
}
