use crate::errors::ExecutionError;
use crate::events::{Event, EventSink};
use crate::registry::{write_atomic, write_json_atomic, RunPaths};
use dbshift_connector::{AggregateFn, Connector, ScanPosition, TableScan};
use dbshift_types::mapping::TableMapping;
use dbshift_types::models::config::ValidationConfig;
use dbshift_types::schema::{ColumnRole, TableIdentifier, TableSpec};
use dbshift_types::tracing::info;
use dbshift_types::validation::{CheckKind, CheckOutcome, ValidationResult};
use dbshift_types::value::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const STAGE: &str = "validate";
const KEY_SCAN_CHUNK: u64 = 10_000;

/// Highest check level to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    L1,
    L2,
    L3,
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "L1" => Ok(Level::L1),
            "L2" => Ok(Level::L2),
            "L3" => Ok(Level::L3),
            other => Err(format!("unknown validation level {other:?}")),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Decimal(d) => {
            use dbshift_types::rust_decimal::prelude::ToPrimitive;
            d.to_f64()
        }
        other => other.as_float(),
    }
}

fn within_relative_tolerance(left: f64, right: f64, tolerance: f64) -> bool {
    if left == right {
        return true;
    }
    let scale = left.abs().max(right.abs()).max(1.0);
    ((left - right) / scale).abs() <= tolerance
}

/// L1: exact (or tolerance-bounded) row count comparison.
async fn check_row_count(
    source: &dyn Connector,
    target: &dyn Connector,
    source_table: &TableIdentifier,
    target_table: &TableIdentifier,
    config: &ValidationConfig,
) -> Result<CheckOutcome, ExecutionError> {
    let source_count = source
        .row_count(source_table)
        .await
        .map_err(ExecutionError::Engine)?;
    let target_count = target
        .row_count(target_table)
        .await
        .map_err(ExecutionError::Engine)?;
    let pass = if config.row_count_tolerance == 0.0 {
        source_count == target_count
    } else {
        within_relative_tolerance(
            source_count as f64,
            target_count as f64,
            config.row_count_tolerance,
        )
    };
    Ok(CheckOutcome {
        kind: CheckKind::L1RowCount,
        pass,
        details: if pass {
            format!("source={source_count} target={target_count}")
        } else {
            format!("row_count_mismatch: source={source_count} target={target_count}")
        },
        warnings: Vec::new(),
    })
}

/// L2: SUM/MIN/MAX per numeric column with relative float tolerance, plus
/// COUNT(DISTINCT) per high-cardinality (key-role) column. Known-lossy
/// mappings downgrade mismatches to warnings.
async fn check_aggregates(
    source: &dyn Connector,
    target: &dyn Connector,
    source_table: &TableIdentifier,
    target_table: &TableIdentifier,
    mapping: &TableMapping,
    config: &ValidationConfig,
) -> Result<CheckOutcome, ExecutionError> {
    let mut failures = Vec::new();
    let mut warnings = Vec::new();
    let mut compared = 0;

    for column in &mapping.columns {
        let lossy = !column.canonical_type.is_lossless();
        if column.canonical_type.is_numeric() {
            for function in [AggregateFn::Sum, AggregateFn::Min, AggregateFn::Max] {
                let left = source
                    .aggregate(source_table, &column.source, function)
                    .await
                    .map_err(ExecutionError::Engine)?;
                let right = target
                    .aggregate(target_table, &column.target, function)
                    .await
                    .map_err(ExecutionError::Engine)?;
                compared += 1;
                let matches = match (numeric(&left), numeric(&right)) {
                    (Some(l), Some(r)) => {
                        within_relative_tolerance(l, r, config.float_tolerance)
                    }
                    (None, None) => true,
                    _ => false,
                };
                if !matches {
                    let detail = format!(
                        "{}({}) source={left} target={right}",
                        function, column.source
                    );
                    if lossy {
                        warnings.push(detail);
                    } else {
                        failures.push(detail);
                    }
                }
            }
        } else if matches!(column.role, ColumnRole::PrimaryKey | ColumnRole::Unique) {
            let left = source
                .aggregate(source_table, &column.source, AggregateFn::CountDistinct)
                .await
                .map_err(ExecutionError::Engine)?;
            let right = target
                .aggregate(target_table, &column.target, AggregateFn::CountDistinct)
                .await
                .map_err(ExecutionError::Engine)?;
            compared += 1;
            if numeric(&left) != numeric(&right) {
                let detail = format!(
                    "count_distinct({}) source={left} target={right}",
                    column.source
                );
                if lossy {
                    warnings.push(detail);
                } else {
                    failures.push(detail);
                }
            }
        }
    }

    let pass = failures.is_empty();
    Ok(CheckOutcome {
        kind: CheckKind::L2Aggregate,
        pass,
        details: if pass {
            format!("{compared} aggregate(s) compared")
        } else {
            failures.join("; ")
        },
        warnings,
    })
}

/// Seeded uniform sample of the source primary keys.
async fn sample_keys(
    source: &dyn Connector,
    source_table: &TableIdentifier,
    pk: &str,
    sample_rows: u64,
    seed: u64,
) -> Result<Vec<Value>, ExecutionError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut reservoir: Vec<Value> = Vec::with_capacity(sample_rows as usize);
    let mut seen: u64 = 0;
    let mut offset = 0u64;
    loop {
        let chunk = source
            .stream_rows(&TableScan {
                table: source_table.clone(),
                columns: vec![pk.to_string()],
                order_by: vec![pk.to_string()],
                chunk_size: KEY_SCAN_CHUNK,
                position: ScanPosition::Offset(offset),
            })
            .await
            .map_err(ExecutionError::Engine)?;
        if chunk.is_empty() {
            break;
        }
        offset += chunk.len() as u64;
        for row in chunk {
            let Some(key) = row.get(pk).cloned() else {
                continue;
            };
            seen += 1;
            if reservoir.len() < sample_rows as usize {
                reservoir.push(key);
            } else {
                let slot = rng.gen_range(0..seen);
                if (slot as usize) < reservoir.len() {
                    reservoir[slot as usize] = key;
                }
            }
        }
    }
    Ok(reservoir)
}

/// L3: hash the sampled rows on both sides with the shared canonical
/// encoding and diff the sets.
async fn check_sample_hash(
    source: &dyn Connector,
    target: &dyn Connector,
    source_table: &TableIdentifier,
    target_table: &TableIdentifier,
    spec: &TableSpec,
    mapping: &TableMapping,
    config: &ValidationConfig,
) -> Result<CheckOutcome, ExecutionError> {
    if spec.primary_key.len() != 1 {
        return Ok(CheckOutcome {
            kind: CheckKind::L3SampleHash,
            pass: true,
            details: "skipped: sample hashing requires a single-column primary key".to_string(),
            warnings: vec!["table not sampled".to_string()],
        });
    }
    let source_pk = spec.primary_key[0].clone();
    let target_pk = mapping
        .column_for_source(&source_pk)
        .map(|c| c.target.clone())
        .unwrap_or_else(|| source_pk.clone());

    let keys = sample_keys(
        source,
        source_table,
        &source_pk,
        config.sample_rows,
        config.sample_seed,
    )
    .await?;
    if keys.is_empty() {
        return Ok(CheckOutcome {
            kind: CheckKind::L3SampleHash,
            pass: true,
            details: "empty table".to_string(),
            warnings: Vec::new(),
        });
    }

    let source_hashes = source
        .sample_hash(source_table, std::slice::from_ref(&source_pk), &keys)
        .await
        .map_err(ExecutionError::Engine)?;
    let target_hashes = target
        .sample_hash(target_table, std::slice::from_ref(&target_pk), &keys)
        .await
        .map_err(ExecutionError::Engine)?;

    let target_by_key: HashMap<&str, &str> = target_hashes
        .iter()
        .map(|kh| (kh.key.as_str(), kh.hash.as_str()))
        .collect();
    let mut diverging: Vec<String> = Vec::new();
    for kh in &source_hashes {
        match target_by_key.get(kh.key.as_str()) {
            Some(hash) if *hash == kh.hash => {}
            Some(_) => diverging.push(format!("{}: hash mismatch", kh.key)),
            None => diverging.push(format!("{}: missing on target", kh.key)),
        }
    }

    let pass = diverging.is_empty();
    let sampled = source_hashes.len();
    let details = if pass {
        format!("{sampled} row(s) sampled, all hashes match")
    } else {
        let mut shown: Vec<String> = diverging
            .iter()
            .take(config.max_reported_keys)
            .cloned()
            .collect();
        if diverging.len() > shown.len() {
            shown.push(format!("(+{} more)", diverging.len() - shown.len()));
        }
        format!("sample_mismatch: {}", shown.join("; "))
    };
    Ok(CheckOutcome {
        kind: CheckKind::L3SampleHash,
        pass,
        details,
        warnings: Vec::new(),
    })
}

/// Validate one migrated table up to `level`. Later levels run only when
/// earlier ones pass, unless `continue_on_failure` is set.
#[allow(clippy::too_many_arguments)]
pub async fn validate_table(
    source: &dyn Connector,
    target: &dyn Connector,
    mapping: &TableMapping,
    spec: &TableSpec,
    config: &ValidationConfig,
    level: Level,
) -> Result<ValidationResult, ExecutionError> {
    let source_table = TableIdentifier::new(Some(spec.schema.clone()), spec.name.clone());
    let target_table = TableIdentifier::new(None, mapping.target_table.clone());

    let mut checks = Vec::new();
    let l1 = check_row_count(source, target, &source_table, &target_table, config).await?;
    let mut proceed = l1.pass || config.continue_on_failure;
    checks.push(l1);

    if level >= Level::L2 && proceed {
        let l2 = check_aggregates(
            source,
            target,
            &source_table,
            &target_table,
            mapping,
            config,
        )
        .await?;
        proceed = l2.pass || config.continue_on_failure;
        checks.push(l2);
    }
    if level >= Level::L3 && proceed {
        checks.push(
            check_sample_hash(
                source,
                target,
                &source_table,
                &target_table,
                spec,
                mapping,
                config,
            )
            .await?,
        );
    }
    Ok(ValidationResult::new(mapping.target_table.clone(), checks))
}

fn html_summary(results: &[ValidationResult]) -> String {
    let mut rows = String::new();
    for result in results {
        let status = if result.pass { "PASS" } else { "FAIL" };
        let detail: Vec<String> = result
            .checks
            .iter()
            .map(|c| {
                let outcome: &str = if c.pass { "pass" } else { c.details.as_str() };
                format!("{}: {}", c.kind, outcome)
            })
            .collect();
        rows.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            if result.pass { "pass" } else { "fail" },
            result.target_table,
            status,
            detail.join("<br>")
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html><head><title>dbshift validation report</title>\n<style>\n\
         table {{ border-collapse: collapse; font-family: monospace; }}\n\
         td, th {{ border: 1px solid #999; padding: 4px 8px; }}\n\
         tr.pass td {{ background: #e9f7ec; }}\n\
         tr.fail td {{ background: #fbeaea; }}\n\
         </style></head><body>\n<h1>Validation report</h1>\n\
         <table>\n<tr><th>table</th><th>status</th><th>checks</th></tr>\n{rows}</table>\n\
         </body></html>\n"
    )
}

/// Run the validate stage over every approved mapping and write the JSON and
/// HTML reports.
pub async fn run_validate(
    source: &dyn Connector,
    target: &dyn Connector,
    mappings: &[TableMapping],
    specs: &[TableSpec],
    config: &ValidationConfig,
    level: Level,
    paths: &RunPaths,
    events: &EventSink,
) -> Result<Vec<ValidationResult>, ExecutionError> {
    let mut results = Vec::new();
    for mapping in mappings {
        let Some(spec) = specs.iter().find(|s| s.name == mapping.source_table) else {
            continue;
        };
        let result = validate_table(source, target, mapping, spec, config, level).await?;
        info!(
            "validated {}: {}",
            result.target_table,
            if result.pass { "pass" } else { "FAIL" }
        );
        events.emit(Event::TableDone {
            stage: STAGE.to_string(),
            table: result.target_table.clone(),
        });
        results.push(result);
    }

    let reports_dir = paths.reports_dir();
    write_json_atomic(&reports_dir.join("summary.json"), &results)?;
    write_atomic(
        &reports_dir.join("summary.html"),
        html_summary(&results).as_bytes(),
    )?;
    events.done(STAGE);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propose::rules::rule_based_mapping;
    use crate::registry::RunRegistry;
    use dbshift_connector::test_util::FakeConnector;
    use dbshift_connector::{Engine, SourceRow};
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::schema::ColumnSpec;
    use tempdir::TempDir;

    fn spec() -> TableSpec {
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
                    name: "age".into(),
                    source_type_raw: "smallint".into(),
                    canonical_type: CanonicalType::Int2,
                    nullable: true,
                    role: ColumnRole::None,
                    default_expression: None,
                    comment: None,
                    loss: None,
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 2,
        }
    }

    fn row(id: i64, age: i64) -> SourceRow {
        let mut row = SourceRow::new();
        row.insert("id".into(), Value::Int(id));
        row.insert("age".into(), Value::Int(age));
        row
    }

    fn config() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[tokio::test]
    async fn identical_tables_pass_all_levels() {
        let rows = vec![row(1, 20), row(2, 30)];
        let source = FakeConnector::new(Engine::Postgres).with_table(spec(), rows.clone());
        let target = FakeConnector::new(Engine::Mysql).with_table(spec(), rows);

        let result = validate_table(
            &source,
            &target,
            &rule_based_mapping(&spec()),
            &spec(),
            &config(),
            Level::L3,
        )
        .await
        .unwrap();
        assert!(result.pass, "{:?}", result.checks);
        assert_eq!(result.checks.len(), 3);
    }

    #[tokio::test]
    async fn missing_row_fails_l1_and_skips_later_levels() {
        let source =
            FakeConnector::new(Engine::Postgres).with_table(spec(), vec![row(1, 20), row(2, 30)]);
        let target = FakeConnector::new(Engine::Mysql).with_table(spec(), vec![row(1, 20)]);

        let result = validate_table(
            &source,
            &target,
            &rule_based_mapping(&spec()),
            &spec(),
            &config(),
            Level::L3,
        )
        .await
        .unwrap();
        assert!(!result.pass);
        assert_eq!(result.checks.len(), 1);
        assert!(result.checks[0].details.contains("row_count_mismatch"));
    }

    #[tokio::test]
    async fn diverging_value_is_caught_by_l2_and_l3() {
        let source =
            FakeConnector::new(Engine::Postgres).with_table(spec(), vec![row(1, 20), row(2, 30)]);
        let target = FakeConnector::new(Engine::Mysql)
            .with_table(spec(), vec![row(1, 20), row(2, 99)]);

        let mut cfg = config();
        cfg.continue_on_failure = true;
        let result = validate_table(
            &source,
            &target,
            &rule_based_mapping(&spec()),
            &spec(),
            &cfg,
            Level::L3,
        )
        .await
        .unwrap();
        assert!(!result.pass);
        let l2 = result
            .checks
            .iter()
            .find(|c| c.kind == CheckKind::L2Aggregate)
            .unwrap();
        assert!(!l2.pass);
        let l3 = result
            .checks
            .iter()
            .find(|c| c.kind == CheckKind::L3SampleHash)
            .unwrap();
        assert!(!l3.pass);
        assert!(l3.details.contains("sample_mismatch"));
    }

    #[tokio::test]
    async fn reports_are_written() {
        let tmp = TempDir::new("validate").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let paths = registry.run(Some("20240101-000000-feed01".into()));
        let rows = vec![row(1, 20)];
        let source = FakeConnector::new(Engine::Postgres).with_table(spec(), rows.clone());
        let target = FakeConnector::new(Engine::Mysql).with_table(spec(), rows);

        let results = run_validate(
            &source,
            &target,
            &[rule_based_mapping(&spec())],
            &[spec()],
            &config(),
            Level::L3,
            &paths,
            &EventSink::disabled(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert!(paths.reports_dir().join("summary.json").is_file());
        let html =
            std::fs::read_to_string(paths.reports_dir().join("summary.html")).unwrap();
        assert!(html.contains("users"));
        assert!(html.contains("PASS"));
    }

    #[test]
    fn relative_tolerance() {
        assert!(within_relative_tolerance(100.0, 100.0, 0.0));
        assert!(within_relative_tolerance(1_000_000.0, 1_000_000.5, 1e-4));
        assert!(!within_relative_tolerance(100.0, 105.0, 1e-4));
    }
}
