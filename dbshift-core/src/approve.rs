use crate::errors::{ExecutionError, MappingError};
use crate::registry::RunPaths;
use crate::transform;
use dbshift_connector::mysql::types::is_valid_target_type;
use dbshift_types::mapping::TableMapping;
use dbshift_types::schema::TableSpec;
use dbshift_types::serde_json;
use dbshift_types::tracing::{info, warn};
use std::fs;
use std::path::Path;

/// Structural and semantic validation of one mapping file against the
/// extracted table spec.
///
/// Canonical-set membership is enforced by the type system at parse time;
/// everything else is checked here so problems surface before DDL or data
/// ever move.
pub fn validate_mapping(
    mapping: &TableMapping,
    spec: Option<&TableSpec>,
) -> Result<(), MappingError> {
    for column in &mapping.columns {
        if !is_valid_target_type(&column.target_type) {
            return Err(MappingError::InvalidTargetType {
                table: mapping.source_table.clone(),
                column: column.source.clone(),
                target_type: column.target_type.clone(),
            });
        }
        if column.role == dbshift_types::schema::ColumnRole::PrimaryKey && column.nullable {
            return Err(MappingError::NullablePrimaryKey {
                table: mapping.source_table.clone(),
                column: column.source.clone(),
            });
        }
        // Every mapped pair must have a registered row transform.
        let (target_canonical, _) =
            dbshift_connector::mysql::types::to_canonical(&column.target_type);
        if transform::transform_for(&column.canonical_type, &target_canonical).is_none() {
            return Err(MappingError::MissingTransform {
                table: mapping.source_table.clone(),
                column: column.source.clone(),
                source_type: column.canonical_type.to_string(),
                target: target_canonical.to_string(),
            });
        }
    }

    let Some(spec) = spec else {
        return Ok(());
    };
    // A column on only one side of the mapping is an error, in both
    // directions.
    for column in &mapping.columns {
        if spec.column(&column.source).is_none() {
            return Err(MappingError::UnknownColumn {
                table: mapping.source_table.clone(),
                column: column.source.clone(),
            });
        }
    }
    for column in &spec.columns {
        if mapping.column_for_source(&column.name).is_none() {
            return Err(MappingError::MissingColumn {
                table: mapping.source_table.clone(),
                column: column.name.clone(),
            });
        }
    }
    for fk in &spec.foreign_keys {
        for column in &fk.local_columns {
            if mapping.column_for_source(column).is_none() {
                return Err(MappingError::MissingColumn {
                    table: mapping.source_table.clone(),
                    column: column.clone(),
                });
            }
        }
    }
    Ok(())
}

pub fn load_mapping(path: &Path) -> Result<TableMapping, MappingError> {
    let bytes = fs::read(path).map_err(|e| MappingError::Read(path.to_path_buf(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| MappingError::Parse(path.to_path_buf(), e))
}

/// Promote one draft mapping to approved: validate, then atomically rename
/// into the approved directory.
pub fn approve(
    table: &str,
    paths: &RunPaths,
    spec: Option<&TableSpec>,
) -> Result<(), ExecutionError> {
    let draft = paths.draft_mappings_dir().join(format!("{table}.json"));
    let mapping = load_mapping(&draft)?;
    validate_mapping(&mapping, spec)?;

    let approved_dir = paths.approved_mappings_dir();
    fs::create_dir_all(&approved_dir)
        .map_err(|e| ExecutionError::FileSystem(approved_dir.clone(), e))?;
    let approved = approved_dir.join(format!("{table}.json"));
    fs::rename(&draft, &approved)
        .map_err(|e| ExecutionError::FileSystem(approved.clone(), e))?;
    info!("approved mapping for {table}");
    Ok(())
}

/// Approve every draft in the run. Per-table failures are reported and do
/// not abort the remaining promotions.
pub fn approve_all(
    paths: &RunPaths,
    specs: &[TableSpec],
) -> Result<Vec<(String, MappingError)>, ExecutionError> {
    let draft_dir = paths.draft_mappings_dir();
    if !draft_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut failures = Vec::new();
    let entries =
        fs::read_dir(&draft_dir).map_err(|e| ExecutionError::FileSystem(draft_dir.clone(), e))?;
    let mut tables: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.strip_suffix(".json").map(|s| s.to_string()))
        .collect();
    tables.sort();

    for table in tables {
        let spec = specs.iter().find(|s| s.name == table);
        match approve(&table, paths, spec) {
            Ok(()) => {}
            Err(ExecutionError::Mapping(e)) => {
                warn!("mapping for {table} failed validation: {e}");
                failures.push((table, e));
            }
            Err(other) => return Err(other),
        }
    }
    Ok(failures)
}

/// Load every approved mapping of the run, sorted by table name.
pub fn load_approved(paths: &RunPaths) -> Result<Vec<TableMapping>, ExecutionError> {
    let dir = paths.approved_mappings_dir();
    if !dir.is_dir() {
        return Err(ExecutionError::MissingApprovedMappings(
            paths.run_id_or_shared(),
        ));
    }
    let entries = fs::read_dir(&dir).map_err(|e| ExecutionError::FileSystem(dir.clone(), e))?;
    let mut mappings = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ExecutionError::FileSystem(dir.clone(), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            mappings.push(load_mapping(&path)?);
        }
    }
    if mappings.is_empty() {
        return Err(ExecutionError::MissingApprovedMappings(
            paths.run_id_or_shared(),
        ));
    }
    mappings.sort_by(|a, b| a.source_table.cmp(&b.source_table));
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propose::rules::rule_based_mapping;
    use crate::registry::{write_json_atomic, RunRegistry};
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::schema::{ColumnRole, ColumnSpec};
    use tempdir::TempDir;

    fn table_spec() -> TableSpec {
        TableSpec {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![
                ColumnSpec {
                    name: "id".into(),
                    source_type_raw: "integer".into(),
                    canonical_type: CanonicalType::Int4,
                    nullable: false,
                    role: ColumnRole::PrimaryKey,
                    default_expression: None,
                    comment: None,
                    loss: None,
                },
                ColumnSpec {
                    name: "email".into(),
                    source_type_raw: "character varying(120)".into(),
                    canonical_type: CanonicalType::text(Some(120)),
                    nullable: false,
                    role: ColumnRole::Unique,
                    default_expression: None,
                    comment: None,
                    loss: None,
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 0,
        }
    }

    #[test]
    fn valid_mapping_passes() {
        let spec = table_spec();
        let mapping = rule_based_mapping(&spec);
        validate_mapping(&mapping, Some(&spec)).unwrap();
    }

    #[test]
    fn extra_mapping_column_is_rejected() {
        let spec = table_spec();
        let mut mapping = rule_based_mapping(&spec);
        mapping.columns[1].source = "phantom".into();
        let err = validate_mapping(&mapping, Some(&spec)).unwrap_err();
        assert!(matches!(err, MappingError::UnknownColumn { .. }));
    }

    #[test]
    fn missing_mapping_column_is_rejected() {
        let spec = table_spec();
        let mut mapping = rule_based_mapping(&spec);
        mapping.columns.pop();
        let err = validate_mapping(&mapping, Some(&spec)).unwrap_err();
        assert!(matches!(err, MappingError::MissingColumn { .. }));
    }

    #[test]
    fn bad_target_type_is_rejected() {
        let spec = table_spec();
        let mut mapping = rule_based_mapping(&spec);
        mapping.columns[0].target_type = "WIDGET".into();
        let err = validate_mapping(&mapping, Some(&spec)).unwrap_err();
        assert!(matches!(err, MappingError::InvalidTargetType { .. }));
    }

    #[test]
    fn approve_moves_draft_to_approved() {
        let tmp = TempDir::new("approve").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let paths = registry.run(Some("20240101-000000-aaaaaa".into()));
        let spec = table_spec();
        let mapping = rule_based_mapping(&spec);
        write_json_atomic(
            &paths.draft_mappings_dir().join("users.json"),
            &mapping,
        )
        .unwrap();

        approve("users", &paths, Some(&spec)).unwrap();
        assert!(!paths.draft_mappings_dir().join("users.json").exists());
        assert!(paths.approved_mappings_dir().join("users.json").is_file());

        let approved = load_approved(&paths).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].source_table, "users");
    }

    #[test]
    fn approve_all_reports_failures_without_aborting() {
        let tmp = TempDir::new("approve").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let paths = registry.run(Some("20240101-000000-bbbbbb".into()));
        let spec = table_spec();

        let good = rule_based_mapping(&spec);
        write_json_atomic(&paths.draft_mappings_dir().join("users.json"), &good).unwrap();

        let mut bad = rule_based_mapping(&spec);
        bad.source_table = "orders".into();
        bad.columns[0].target_type = "WIDGET".into();
        write_json_atomic(&paths.draft_mappings_dir().join("orders.json"), &bad).unwrap();

        let failures = approve_all(&paths, std::slice::from_ref(&spec)).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "orders");
        assert!(paths.approved_mappings_dir().join("users.json").is_file());
        assert!(paths.draft_mappings_dir().join("orders.json").is_file());
    }
}
