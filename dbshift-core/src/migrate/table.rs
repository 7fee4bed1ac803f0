use crate::errors::{ExecutionError, MappingError};
use crate::events::{Event, EventSink};
use crate::migrate::checkpoint_store::CheckpointStore;
use crate::migrate::dlq::DlqWriter;
use crate::shutdown::ShutdownReceiver;
use crate::transform::{self, RowTransform};
use dbshift_connector::errors::ConnectorError;
use dbshift_connector::{Connector, ScanPosition, SourceRow, TableScan};
use dbshift_types::checkpoint::{Checkpoint, CheckpointStatus, DlqRecord, LoadErrorKind};
use dbshift_types::chrono::Utc;
use dbshift_types::mapping::TableMapping;
use dbshift_types::schema::{TableIdentifier, TableSpec};
use dbshift_types::tracing::{info, warn};
use dbshift_types::value::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const STAGE: &str = "migrate";
const MIN_CHUNK_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub chunk_size: u64,
    pub max_chunk_size: u64,
    pub chunk_timeout: Duration,
}

/// One column's migration plan: source name, target name, and the pure
/// transform between their canonical types.
struct ColumnPlan {
    source: String,
    target: String,
    transform: RowTransform,
}

fn column_plans(mapping: &TableMapping) -> Result<Vec<ColumnPlan>, MappingError> {
    mapping
        .columns
        .iter()
        .map(|column| {
            let (target_canonical, _) =
                dbshift_connector::mysql::types::to_canonical(&column.target_type);
            let transform = transform::transform_for(&column.canonical_type, &target_canonical)
                .ok_or_else(|| MappingError::MissingTransform {
                    table: mapping.source_table.clone(),
                    column: column.source.clone(),
                    source_type: column.canonical_type.to_string(),
                    target: target_canonical.to_string(),
                })?;
            Ok(ColumnPlan {
                source: column.source.clone(),
                target: column.target.clone(),
                transform,
            })
        })
        .collect()
}

fn spawn_fetch(
    source: Arc<dyn Connector>,
    scan: TableScan,
) -> JoinHandle<Result<Vec<SourceRow>, ConnectorError>> {
    tokio::spawn(async move { source.stream_rows(&scan).await })
}

fn dlq_record(run_id: &str, table: &str, row: &SourceRow, kind: LoadErrorKind, detail: String) -> DlqRecord {
    let source_row: BTreeMap<String, Value> =
        row.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    DlqRecord {
        run_id: run_id.to_string(),
        target_table: table.to_string(),
        source_row,
        error_kind: kind,
        error_detail: detail,
        occurred_at: Utc::now(),
    }
}

enum LoadResult {
    Loaded {
        outcome: dbshift_connector::BulkLoadOutcome,
        retried: bool,
    },
    ChunkFailed(String),
}

/// Bulk load with the per-chunk timeout. One retry on a connector-level
/// failure; a second failure (or a timeout) fails the whole chunk.
async fn load_chunk(
    target: &Arc<dyn Connector>,
    table: &TableIdentifier,
    columns: &[String],
    rows: &[SourceRow],
    timeout: Duration,
) -> LoadResult {
    for attempt in 0..2 {
        let load = target.bulk_load(table, columns, rows.to_vec());
        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(outcome)) => {
                return LoadResult::Loaded {
                    outcome,
                    retried: attempt > 0,
                }
            }
            Ok(Err(e)) => {
                if attempt == 0 {
                    warn!("bulk load into {table} failed ({e}), retrying once");
                } else {
                    return LoadResult::ChunkFailed(e.to_string());
                }
            }
            Err(_) => {
                return LoadResult::ChunkFailed(format!(
                    "bulk load timed out after {}s",
                    timeout.as_secs()
                ))
            }
        }
    }
    unreachable!("load_chunk returns within two attempts")
}

/// Migrate one table: resume from the durable checkpoint, stream ordered
/// chunks, transform every cell, bulk load, route rejected rows to the DLQ,
/// and commit the checkpoint after every chunk.
///
/// Reading of chunk N+1 overlaps the load of chunk N through a single
/// prefetch slot.
#[allow(clippy::too_many_arguments)]
pub async fn migrate_table(
    source: Arc<dyn Connector>,
    target: Arc<dyn Connector>,
    mapping: &TableMapping,
    spec: &TableSpec,
    store: &CheckpointStore,
    dlq_dir: &Path,
    options: &MigrateOptions,
    run_id: &str,
    events: &EventSink,
    shutdown: &ShutdownReceiver,
) -> Result<Checkpoint, ExecutionError> {
    let plans = column_plans(mapping)?;
    let source_columns: Vec<String> = plans.iter().map(|p| p.source.clone()).collect();
    let target_columns: Vec<String> = plans.iter().map(|p| p.target.clone()).collect();

    let source_table = TableIdentifier::new(Some(spec.schema.clone()), spec.name.clone());
    let target_table = TableIdentifier::new(None, mapping.target_table.clone());

    let mut checkpoint = store
        .load(&mapping.target_table)?
        .unwrap_or_else(|| Checkpoint::new(run_id.to_string(), mapping.target_table.clone()));
    if checkpoint.status == CheckpointStatus::Done {
        info!("{} already migrated, skipping", mapping.target_table);
        return Ok(checkpoint);
    }
    if checkpoint.last_offset > 0 {
        info!(
            "resuming {} from offset {}",
            mapping.target_table, checkpoint.last_offset
        );
    }
    checkpoint.status = CheckpointStatus::Running;
    store.save(&checkpoint)?;

    let total_rows = source
        .row_count(&source_table)
        .await
        .map_err(ExecutionError::Engine)?;

    // Keyset pagination is only safe with a single monotonic integer PK;
    // otherwise fall back to OFFSET over the full deterministic ordering.
    let keyset_column = spec
        .has_monotonic_pk()
        .then(|| spec.primary_key[0].clone());
    if keyset_column.is_none() && spec.primary_key.is_empty() {
        events.log(
            "warn",
            format!(
                "{} has no primary key; offset resume is unsafe under concurrent writes",
                spec.qualified_name()
            ),
        );
    }
    let order_by = match &keyset_column {
        Some(pk) => vec![pk.clone()],
        None => spec.order_by_columns(),
    };

    let mut dlq = DlqWriter::open(dlq_dir, &mapping.target_table)?;
    let mut chunk_size = options.chunk_size.max(1).min(options.max_chunk_size);
    // AIMD: grow by a quarter of the configured size per clean chunk, halve
    // on any bulk-load trouble, never below the floor.
    let chunk_floor = options.chunk_size.min(MIN_CHUNK_SIZE).max(1);
    let additive_step = (options.chunk_size / 4).max(1);

    let mut fetch_offset = checkpoint.last_offset;
    let position = match (&keyset_column, &checkpoint.last_key) {
        (Some(pk), Some(key)) => ScanPosition::AfterKey {
            column: pk.clone(),
            key: key.clone(),
        },
        _ if fetch_offset > 0 => ScanPosition::Offset(fetch_offset),
        _ => ScanPosition::Start,
    };
    let scan = TableScan {
        table: source_table.clone(),
        columns: source_columns.clone(),
        order_by: order_by.clone(),
        chunk_size,
        position,
    };
    let mut fetch = spawn_fetch(source.clone(), scan);

    loop {
        if !shutdown.is_running() {
            // The previous chunk is committed; just stop cleanly.
            fetch.abort();
            store.save(&checkpoint)?;
            return Err(ExecutionError::Cancelled);
        }

        let rows = (&mut fetch)
            .await
            .map_err(ExecutionError::JoinError)?
            .map_err(ExecutionError::Engine)?;
        if rows.is_empty() {
            checkpoint.status = CheckpointStatus::Done;
            store.save(&checkpoint)?;
            break;
        }
        let chunk_len = rows.len() as u64;
        fetch_offset += chunk_len;
        let chunk_last_key = keyset_column.as_ref().and_then(|pk| {
            rows.last()
                .and_then(|row| row.get(pk.as_str()).cloned())
        });

        // Overlap the next read with this chunk's transform + load.
        let next_position = match (&keyset_column, &chunk_last_key) {
            (Some(pk), Some(key)) => ScanPosition::AfterKey {
                column: pk.clone(),
                key: key.clone(),
            },
            _ => ScanPosition::Offset(fetch_offset),
        };
        fetch = spawn_fetch(
            source.clone(),
            TableScan {
                table: source_table.clone(),
                columns: source_columns.clone(),
                order_by: order_by.clone(),
                chunk_size,
                position: next_position,
            },
        );

        // Per-cell transforms; a failing row goes to the DLQ instead of the
        // target.
        let mut transformed = Vec::with_capacity(rows.len());
        let mut failed_rows = 0u64;
        for row in &rows {
            let mut out = SourceRow::with_capacity(plans.len());
            let mut failure: Option<String> = None;
            for plan in &plans {
                let cell = row.get(plan.source.as_str()).cloned().unwrap_or(Value::Null);
                match transform::apply(plan.transform, cell) {
                    Ok(value) => {
                        out.insert(plan.target.clone(), value);
                    }
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }
            match failure {
                Some(detail) => {
                    dlq.append(&dlq_record(
                        run_id,
                        &mapping.target_table,
                        row,
                        LoadErrorKind::TypeConversion,
                        detail,
                    ))?;
                    failed_rows += 1;
                }
                None => transformed.push(out),
            }
        }

        let mut inserted = 0u64;
        if !transformed.is_empty() {
            match load_chunk(
                &target,
                &target_table,
                &target_columns,
                &transformed,
                options.chunk_timeout,
            )
            .await
            {
                LoadResult::Loaded { outcome, retried } => {
                    inserted = outcome.inserted;
                    for error in outcome.per_row_errors {
                        dlq.append(&dlq_record(
                            run_id,
                            &mapping.target_table,
                            &error.row,
                            error.kind,
                            error.detail,
                        ))?;
                        failed_rows += 1;
                    }
                    chunk_size = if retried {
                        (chunk_size / 2).max(chunk_floor)
                    } else {
                        (chunk_size + additive_step).min(options.max_chunk_size)
                    };
                }
                LoadResult::ChunkFailed(detail) => {
                    chunk_size = (chunk_size / 2).max(chunk_floor);
                    for row in &transformed {
                        dlq.append(&dlq_record(
                            run_id,
                            &mapping.target_table,
                            row,
                            LoadErrorKind::Unknown,
                            detail.clone(),
                        ))?;
                        failed_rows += 1;
                    }
                }
            }
        }
        dlq.sync()?;

        checkpoint.record_chunk(chunk_len, inserted, failed_rows, chunk_last_key);
        store.save(&checkpoint)?;
        events.emit(Event::Progress {
            stage: STAGE.to_string(),
            table: mapping.target_table.clone(),
            rows_done: checkpoint.rows_loaded + checkpoint.rows_failed,
            rows_total: total_rows,
        });
    }

    fetch.abort();
    events.emit(Event::TableDone {
        stage: STAGE.to_string(),
        table: mapping.target_table.clone(),
    });
    info!(
        "migrated {}: {} loaded, {} failed",
        mapping.target_table, checkpoint.rows_loaded, checkpoint.rows_failed
    );
    Ok(checkpoint)
}
