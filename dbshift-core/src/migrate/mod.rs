pub mod checkpoint_store;
pub mod dlq;
pub mod plan;
pub mod table;

use crate::errors::ExecutionError;
use crate::events::EventSink;
use crate::registry::RunPaths;
use crate::shutdown::ShutdownReceiver;
use checkpoint_store::CheckpointStore;
use dbshift_connector::Connector;
use dbshift_types::checkpoint::Checkpoint;
use dbshift_types::mapping::TableMapping;
use dbshift_types::schema::TableSpec;
use dbshift_types::tracing::{error, info, warn};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
pub use table::{migrate_table, MigrateOptions};

const STAGE: &str = "migrate";

#[derive(Debug)]
pub struct MigrateOutcome {
    pub checkpoints: Vec<Checkpoint>,
    pub dlq_rows: u64,
}

/// Guarantees FK enforcement is restored on every exit path of the migrate
/// stage.
async fn with_fk_disabled<F, T>(
    target: &Arc<dyn Connector>,
    needed: bool,
    body: F,
) -> Result<T, ExecutionError>
where
    F: std::future::Future<Output = Result<T, ExecutionError>>,
{
    if !needed {
        return body.await;
    }
    target
        .toggle_fk(false)
        .await
        .map_err(ExecutionError::Engine)?;
    info!("disabled target foreign key checks for the load");
    let result = body.await;
    match target.toggle_fk(true).await {
        Ok(_) => info!("re-enabled target foreign key checks"),
        // The load outcome matters more than the toggle; report and keep the
        // original result.
        Err(e) => error!("failed to re-enable foreign key checks: {e}"),
    }
    result
}

/// Run the migrate stage over the approved mappings: topologically ordered,
/// chunked, checkpointed, DLQ-routed.
#[allow(clippy::too_many_arguments)]
pub async fn run_migrate(
    source: Arc<dyn Connector>,
    target: Arc<dyn Connector>,
    mappings: &[TableMapping],
    specs: &[TableSpec],
    options: &MigrateOptions,
    table_parallelism: usize,
    paths: &RunPaths,
    events: &EventSink,
    shutdown: &ShutdownReceiver,
) -> Result<MigrateOutcome, ExecutionError> {
    let tables: Vec<String> = mappings.iter().map(|m| m.source_table.clone()).collect();
    for mapping in mappings {
        if !specs.iter().any(|s| s.name == mapping.source_table) {
            return Err(ExecutionError::Mapping(
                crate::errors::MappingError::MissingTableSpec {
                    table: mapping.source_table.clone(),
                },
            ));
        }
    }
    let load_plan = plan::plan_load_order(specs, &tables);
    let fk_disable_needed = load_plan.needs_fk_disable()
        || mappings.iter().any(|m| m.disable_fk_during_load);

    let store = CheckpointStore::new(paths.checkpoints_dir());
    let run_id = paths.run_id_or_shared();
    let dlq_dir = paths.dlq_dir();

    let result = with_fk_disabled(&target, fk_disable_needed, async {
        let mut checkpoints = Vec::new();
        for (stage_index, units) in load_plan.stages.iter().enumerate() {
            info!(
                "migrate stage {}/{}: {} unit(s)",
                stage_index + 1,
                load_plan.stages.len(),
                units.len()
            );
            let unit_results: Vec<Result<Vec<Checkpoint>, ExecutionError>> =
                stream::iter(units)
                    .map(|unit| {
                        let source = source.clone();
                        let target = target.clone();
                        let store = store.clone();
                        let run_id = run_id.clone();
                        let dlq_dir = dlq_dir.clone();
                        async move {
                            let mut done = Vec::new();
                            // Tables inside a unit (an FK cycle) load
                            // sequentially.
                            for table_name in &unit.tables {
                                let mapping = mappings
                                    .iter()
                                    .find(|m| &m.source_table == table_name)
                                    .expect("plan only contains mapped tables");
                                let spec = specs
                                    .iter()
                                    .find(|s| &s.name == table_name)
                                    .expect("plan only contains extracted tables");
                                let checkpoint = migrate_table(
                                    source.clone(),
                                    target.clone(),
                                    mapping,
                                    spec,
                                    &store,
                                    &dlq_dir,
                                    options,
                                    &run_id,
                                    events,
                                    shutdown,
                                )
                                .await
                                .map_err(|e| match e {
                                    ExecutionError::Cancelled => ExecutionError::Cancelled,
                                    other => ExecutionError::TableMigration {
                                        table: table_name.clone(),
                                        detail: other.to_string(),
                                    },
                                })?;
                                done.push(checkpoint);
                            }
                            Ok(done)
                        }
                    })
                    .buffer_unordered(table_parallelism.max(1))
                    .collect()
                    .await;

            for unit_result in unit_results {
                checkpoints.extend(unit_result?);
            }
        }
        Ok(checkpoints)
    })
    .await;

    let mut dlq_rows = 0;
    for mapping in mappings {
        dlq_rows += dlq::count_records(&dlq_dir, &mapping.target_table)?;
    }

    match result {
        Ok(checkpoints) => {
            if dlq_rows > 0 {
                warn!("{dlq_rows} row(s) routed to the dead letter queue");
            }
            events.done(STAGE);
            Ok(MigrateOutcome {
                checkpoints,
                dlq_rows,
            })
        }
        Err(ExecutionError::Cancelled) => {
            events.error(STAGE, "cancelled");
            Err(ExecutionError::Cancelled)
        }
        Err(e) => {
            events.error(STAGE, e.to_string());
            error!("{e}");
            Err(ExecutionError::MigrationAborted { dlq_rows })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propose::rules::rule_based_mapping;
    use crate::registry::RunRegistry;
    use dbshift_connector::test_util::FakeConnector;
    use dbshift_connector::{Engine, SourceRow};
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::checkpoint::CheckpointStatus;
    use dbshift_types::schema::{ColumnRole, ColumnSpec, ForeignKeySpec};
    use dbshift_types::value::Value;
    use tempdir::TempDir;

    fn int_column(name: &str, role: ColumnRole) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            source_type_raw: "integer".into(),
            canonical_type: CanonicalType::Int4,
            nullable: false,
            role,
            default_expression: None,
            comment: None,
            loss: None,
        }
    }

    fn text_column(name: &str, role: ColumnRole) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            source_type_raw: "character varying(120)".into(),
            canonical_type: CanonicalType::text(Some(120)),
            nullable: false,
            role,
            default_expression: None,
            comment: None,
            loss: None,
        }
    }

    fn users_spec(rows: u64) -> TableSpec {
        TableSpec {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![
                int_column("id", ColumnRole::PrimaryKey),
                text_column("email", ColumnRole::Unique),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: rows,
        }
    }

    fn user_row(id: i64, email: &str) -> SourceRow {
        let mut row = SourceRow::new();
        row.insert("id".into(), Value::Int(id));
        row.insert("email".into(), Value::Text(email.into()));
        row
    }

    fn options(chunk_size: u64) -> MigrateOptions {
        MigrateOptions {
            chunk_size,
            max_chunk_size: 100_000,
            chunk_timeout: std::time::Duration::from_secs(600),
        }
    }

    struct Harness {
        _tmp: TempDir,
        paths: crate::registry::RunPaths,
        source: Arc<FakeConnector>,
        target: Arc<FakeConnector>,
    }

    fn harness(source: FakeConnector, target: FakeConnector) -> Harness {
        let tmp = TempDir::new("migrate").unwrap();
        let registry = RunRegistry::new(tmp.path());
        let paths = registry.run(Some("20240101-000000-cafe01".into()));
        Harness {
            _tmp: tmp,
            paths,
            source: Arc::new(source),
            target: Arc::new(target),
        }
    }

    #[tokio::test]
    async fn migrates_all_rows_and_marks_done() {
        let rows: Vec<SourceRow> = (1..=250)
            .map(|i| user_row(i, &format!("u{i}@example.com")))
            .collect();
        let h = harness(
            FakeConnector::new(Engine::Postgres).with_table(users_spec(250), rows),
            FakeConnector::new(Engine::Mysql).with_target_table("users", &[]),
        );
        let spec = users_spec(250);
        let mappings = vec![rule_based_mapping(&spec)];

        let outcome = run_migrate(
            h.source.clone(),
            h.target.clone(),
            &mappings,
            std::slice::from_ref(&spec),
            &options(50),
            4,
            &h.paths,
            &EventSink::disabled(),
            &ShutdownReceiver::never(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.dlq_rows, 0);
        assert_eq!(outcome.checkpoints.len(), 1);
        let checkpoint = &outcome.checkpoints[0];
        assert_eq!(checkpoint.status, CheckpointStatus::Done);
        assert_eq!(checkpoint.rows_loaded, 250);
        assert_eq!(checkpoint.rows_failed, 0);
        assert_eq!(h.target.rows_of("users").len(), 250);
    }

    #[tokio::test]
    async fn resume_continues_from_checkpoint_without_duplicates() {
        let rows: Vec<SourceRow> = (1..=100)
            .map(|i| user_row(i, &format!("u{i}@example.com")))
            .collect();
        let h = harness(
            FakeConnector::new(Engine::Postgres).with_table(users_spec(100), rows.clone()),
            FakeConnector::new(Engine::Mysql).with_target_table("users", &[]),
        );
        let spec = users_spec(100);
        let mappings = vec![rule_based_mapping(&spec)];

        // Simulate a prior run that committed 60 rows then died: load the
        // first 60 rows into the target and persist a matching checkpoint.
        let store = CheckpointStore::new(h.paths.checkpoints_dir());
        let mut interrupted = Checkpoint::new("20240101-000000-cafe01".into(), "users".into());
        interrupted.status = CheckpointStatus::Running;
        interrupted.record_chunk(60, 60, 0, Some(Value::Int(60)));
        store.save(&interrupted).unwrap();
        for row in rows.iter().take(60) {
            h.target
                .bulk_load(
                    &dbshift_types::schema::TableIdentifier::new(None, "users".into()),
                    &["id".into(), "email".into()],
                    vec![row.clone()],
                )
                .await
                .unwrap();
        }

        let outcome = run_migrate(
            h.source.clone(),
            h.target.clone(),
            &mappings,
            std::slice::from_ref(&spec),
            &options(25),
            1,
            &h.paths,
            &EventSink::disabled(),
            &ShutdownReceiver::never(),
        )
        .await
        .unwrap();

        let checkpoint = &outcome.checkpoints[0];
        assert_eq!(checkpoint.status, CheckpointStatus::Done);
        assert_eq!(checkpoint.rows_loaded, 100);
        // No duplicates: exactly the source row set landed.
        let landed = h.target.rows_of("users");
        assert_eq!(landed.len(), 100);
        let mut ids: Vec<i64> = landed
            .iter()
            .map(|r| r.get("id").unwrap().as_int().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, (1..=100).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn duplicate_unique_value_goes_to_dlq() {
        let rows = vec![
            user_row(1, "a@example.com"),
            user_row(2, "dup@example.com"),
            user_row(3, "dup@example.com"),
        ];
        let h = harness(
            FakeConnector::new(Engine::Postgres).with_table(users_spec(3), rows),
            FakeConnector::new(Engine::Mysql).with_target_table("users", &["email"]),
        );
        let spec = users_spec(3);
        let mappings = vec![rule_based_mapping(&spec)];

        let outcome = run_migrate(
            h.source.clone(),
            h.target.clone(),
            &mappings,
            std::slice::from_ref(&spec),
            &options(50),
            1,
            &h.paths,
            &EventSink::disabled(),
            &ShutdownReceiver::never(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.dlq_rows, 1);
        let checkpoint = &outcome.checkpoints[0];
        assert_eq!(checkpoint.rows_loaded, 2);
        assert_eq!(checkpoint.rows_failed, 1);
        assert_eq!(checkpoint.status, CheckpointStatus::Done);
        assert_eq!(h.target.rows_of("users").len(), 2);

        let dlq_file = h.paths.dlq_dir().join("users.csv");
        let content = std::fs::read_to_string(dlq_file).unwrap();
        assert!(content.contains("constraint_violation"));
    }

    #[tokio::test]
    async fn cyclic_fk_tables_load_with_fk_disabled_and_reenabled() {
        let mut spec_a = users_spec(1);
        spec_a.name = "a".into();
        spec_a.foreign_keys = vec![ForeignKeySpec {
            local_columns: vec!["id".into()],
            ref_table: "b".into(),
            ref_columns: vec!["id".into()],
        }];
        let mut spec_b = users_spec(1);
        spec_b.name = "b".into();
        spec_b.foreign_keys = vec![ForeignKeySpec {
            local_columns: vec!["id".into()],
            ref_table: "a".into(),
            ref_columns: vec!["id".into()],
        }];

        let h = harness(
            FakeConnector::new(Engine::Postgres)
                .with_table(spec_a.clone(), vec![user_row(1, "a@x")])
                .with_table(spec_b.clone(), vec![user_row(1, "b@x")]),
            FakeConnector::new(Engine::Mysql)
                .with_target_table("a", &[])
                .with_target_table("b", &[]),
        );
        let mappings = vec![rule_based_mapping(&spec_a), rule_based_mapping(&spec_b)];
        let specs = vec![spec_a, spec_b];

        run_migrate(
            h.source.clone(),
            h.target.clone(),
            &mappings,
            &specs,
            &options(10),
            2,
            &h.paths,
            &EventSink::disabled(),
            &ShutdownReceiver::never(),
        )
        .await
        .unwrap();

        // FK checks off before the load, back on after it.
        assert_eq!(h.target.fk_toggles(), vec![false, true]);
        assert_eq!(h.target.rows_of("a").len(), 1);
        assert_eq!(h.target.rows_of("b").len(), 1);
    }

    #[tokio::test]
    async fn transient_bulk_load_failure_retries_and_still_lands() {
        let rows: Vec<SourceRow> =
            (1..=20).map(|i| user_row(i, &format!("u{i}@x"))).collect();
        let h = harness(
            FakeConnector::new(Engine::Postgres).with_table(users_spec(20), rows),
            FakeConnector::new(Engine::Mysql).with_target_table("users", &[]),
        );
        h.target.fail_next_bulk_loads(1);
        let spec = users_spec(20);
        let mappings = vec![rule_based_mapping(&spec)];

        let outcome = run_migrate(
            h.source.clone(),
            h.target.clone(),
            &mappings,
            std::slice::from_ref(&spec),
            &options(10),
            1,
            &h.paths,
            &EventSink::disabled(),
            &ShutdownReceiver::never(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.checkpoints[0].rows_loaded, 20);
        assert_eq!(h.target.rows_of("users").len(), 20);
    }
}
