use crate::cli::types::{
    ApplySchema, Approve, Clean, Extract, Migrate, Propose, ShowCheckpoints, Validate,
    ValidateMapping,
};
use crate::errors::{CliError, OrchestrationError};
use dbshift_connector::{connect, Connector, Engine};
use dbshift_core::errors::ExecutionError;
use dbshift_core::events::EventSink;
use dbshift_core::migrate::checkpoint_store::CheckpointStore;
use dbshift_core::migrate::MigrateOptions;
use dbshift_core::propose::client::{HttpProposalClient, ProposalClient};
use dbshift_core::registry::{new_run_id, RunPaths, RunRegistry};
use dbshift_core::validate::Level;
use dbshift_core::{approve, ddl, extract, migrate, propose, shutdown, validate};
use dbshift_types::chrono::{Duration, Utc};
use dbshift_types::models::Config;
use dbshift_types::prettytable::{row, Table};
use dbshift_types::run::RunContext;
use dbshift_types::tracing::info;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::runtime::Runtime;

pub struct Orchestrator {
    pub config: Config,
    pub runtime: Arc<Runtime>,
    registry: RunRegistry,
    events: EventSink,
    show_spinner: bool,
}

impl Orchestrator {
    pub fn new(config: Config, progress_json: bool) -> Result<Self, CliError> {
        let runtime = Runtime::new().map_err(CliError::FailedToCreateTokioRuntime)?;
        let registry = RunRegistry::new(config.artifact_root.clone());
        let events = if progress_json {
            EventSink::stdout()
        } else {
            EventSink::disabled()
        };
        Ok(Self {
            config,
            runtime: Arc::new(runtime),
            registry,
            events,
            show_spinner: !progress_json,
        })
    }

    fn spinner(&self, message: &str) -> Option<crate::progress::StageSpinner> {
        self.show_spinner
            .then(|| crate::progress::StageSpinner::start(message.to_string()))
    }

    fn paths(&self, run_id: Option<String>) -> RunPaths {
        self.registry.run(run_id)
    }

    fn source_engine(&self) -> Result<Engine, OrchestrationError> {
        let engine = Engine::from_str(&self.config.source.engine)
            .map_err(|_| OrchestrationError::UnsupportedSource(self.config.source.engine.clone()))?;
        if engine.supports_target() {
            return Err(OrchestrationError::UnsupportedSource(
                self.config.source.engine.clone(),
            ));
        }
        Ok(engine)
    }

    fn connect_source(&self) -> Result<Box<dyn Connector>, OrchestrationError> {
        self.source_engine()?;
        self.runtime
            .block_on(connect(&self.config.source))
            .map_err(|e| ExecutionError::Connect(e).into())
    }

    fn connect_target(&self) -> Result<Box<dyn Connector>, OrchestrationError> {
        let engine = Engine::from_str(&self.config.target.engine)
            .map_err(|_| OrchestrationError::UnsupportedTarget(self.config.target.engine.clone()))?;
        if !engine.supports_target() {
            return Err(OrchestrationError::UnsupportedTarget(
                self.config.target.engine.clone(),
            ));
        }
        self.runtime
            .block_on(connect(&self.config.target))
            .map_err(|e| ExecutionError::Connect(e).into())
    }

    pub fn extract(&self, args: Extract) -> Result<(), OrchestrationError> {
        let run_id = match args.run_id.as_deref() {
            Some("new") => Some(new_run_id()),
            other => other.map(|s| s.to_string()),
        };
        let paths = match &run_id {
            Some(run_id) => self.registry.create_run(&RunContext {
                run_id: run_id.clone(),
                created_at: Utc::now(),
                source_engine: self.config.source.engine.clone(),
                target_engine: self.config.target.engine.clone(),
                artifact_root: self.config.artifact_root.clone(),
            })?,
            None => self.paths(None),
        };

        let source = self.connect_source()?;
        let schema = args
            .schema
            .unwrap_or_else(|| self.config.source.schema_or_default().to_string());
        if let Some(database) = &args.database {
            if database != &self.config.source.database {
                info!(
                    "note: connected to configured database {:?}, not {database:?}",
                    self.config.source.database
                );
            }
        }

        let artifact = self.runtime.block_on(extract::run_extract(
            source.as_ref(),
            &schema,
            None,
            &paths,
            &self.events,
        ))?;
        for (table, reason) in artifact.errored_tables() {
            info!("table {table} skipped: {reason}");
        }
        println!(
            "extracted {} table(s) into {:?} (run: {})",
            artifact.table_specs().count(),
            paths.schemas_dir(),
            paths.run_id_or_shared()
        );
        Ok(())
    }

    pub fn propose(&self, args: Propose) -> Result<(), OrchestrationError> {
        let paths = self.paths(args.run_id);
        let tables = extract::load_schema_artifact(&paths)?;

        let mut llm_config = self.config.llm.clone();
        if let Some(provider) = args.provider {
            llm_config.enabled = true;
            llm_config.provider = provider;
        }
        if let Some(model) = args.model {
            llm_config.model = model;
        }
        let client: Option<Box<dyn ProposalClient>> = if llm_config.enabled {
            Some(Box::new(
                HttpProposalClient::from_config(&llm_config).map_err(ExecutionError::Llm)?,
            ))
        } else {
            None
        };

        let mappings = self.runtime.block_on(propose::run_propose(
            &tables,
            client.as_deref(),
            llm_config.max_retries,
            llm_config.parallelism,
            &paths,
            &self.events,
        ))?;
        let warnings: usize = mappings.iter().map(|m| m.warnings().count()).sum();
        println!(
            "proposed {} mapping(s) ({warnings} warning(s)) into {:?}",
            mappings.len(),
            paths.draft_mappings_dir()
        );
        Ok(())
    }

    pub fn validate_mapping(&self, args: ValidateMapping) -> Result<(), OrchestrationError> {
        let paths = self.paths(args.run_id);
        let specs = extract::load_schema_artifact(&paths).unwrap_or_default();

        match args.path {
            Some(path) => {
                let mapping = approve::load_mapping(&path).map_err(ExecutionError::Mapping)?;
                let spec = specs.iter().find(|s| s.name == mapping.source_table);
                approve::validate_mapping(&mapping, spec).map_err(ExecutionError::Mapping)?;
                println!("{} is valid", path.display());
            }
            None => {
                let draft_dir = paths.draft_mappings_dir();
                let mut checked = 0;
                for entry in std::fs::read_dir(&draft_dir)
                    .map_err(|e| ExecutionError::FileSystem(draft_dir.clone(), e))?
                {
                    let entry =
                        entry.map_err(|e| ExecutionError::FileSystem(draft_dir.clone(), e))?;
                    if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let mapping =
                        approve::load_mapping(&entry.path()).map_err(ExecutionError::Mapping)?;
                    let spec = specs.iter().find(|s| s.name == mapping.source_table);
                    approve::validate_mapping(&mapping, spec).map_err(ExecutionError::Mapping)?;
                    checked += 1;
                }
                println!("{checked} draft mapping(s) are valid");
            }
        }
        Ok(())
    }

    pub fn approve(&self, args: Approve) -> Result<(), OrchestrationError> {
        let paths = self.paths(args.run_id);
        let specs = extract::load_schema_artifact(&paths).unwrap_or_default();

        if args.all {
            let failures = approve::approve_all(&paths, &specs)?;
            if failures.is_empty() {
                println!("all draft mappings approved");
            } else {
                for (table, error) in &failures {
                    println!("{table}: {error}");
                }
                println!("{} mapping(s) failed validation", failures.len());
            }
            return Ok(());
        }

        let table = args.table.ok_or_else(|| {
            CliError::InvalidFlag("approve needs a table name or --all".to_string())
        })?;
        let spec = specs.iter().find(|s| s.name == table);
        approve::approve(&table, &paths, spec)?;
        println!("approved {table}");
        Ok(())
    }

    pub fn apply_schema(&self, args: ApplySchema) -> Result<(), OrchestrationError> {
        let paths = self.paths(args.run_id);
        let mappings = approve::load_approved(&paths)?;
        let specs = extract::load_schema_artifact(&paths)?;
        let target = self.connect_target()?;

        let apply = args.apply && !args.dry_run;
        self.runtime.block_on(ddl::run_apply_schema(
            target.as_ref(),
            &mappings,
            &specs,
            &paths,
            apply,
            &self.events,
        ))?;
        println!(
            "{} DDL for {} table(s) in {:?}",
            if apply { "applied" } else { "wrote" },
            mappings.len(),
            paths.ddl_dir()
        );
        Ok(())
    }

    pub fn migrate(&self, args: Migrate) -> Result<(), OrchestrationError> {
        let paths = self.paths(args.run_id);
        let mut mappings = approve::load_approved(&paths)?;
        if let Some(tables) = &args.tables {
            mappings.retain(|m| tables.iter().any(|t| t == &m.source_table));
        }
        let specs = extract::load_schema_artifact(&paths)?;

        let source: Arc<dyn Connector> = Arc::from(self.connect_source()?);
        let target: Arc<dyn Connector> = Arc::from(self.connect_target()?);

        let options = MigrateOptions {
            chunk_size: args.chunk_size.unwrap_or(self.config.migration.chunk_size),
            max_chunk_size: self.config.migration.max_chunk_size,
            chunk_timeout: StdDuration::from_secs(self.config.migration.chunk_timeout_secs),
        };

        let (sender, receiver) = shutdown::new();
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing the current chunk");
                sender.shutdown();
            }
        });

        let spinner = self.spinner(&format!("migrating {} table(s)", mappings.len()));
        let outcome = self.runtime.block_on(migrate::run_migrate(
            source,
            target,
            &mappings,
            &specs,
            &options,
            self.config.migration.table_parallelism,
            &paths,
            &self.events,
            &receiver,
        ));
        if let Some(spinner) = spinner {
            spinner.finish(match &outcome {
                Ok(o) => format!("migrated {} table(s)", o.checkpoints.len()),
                Err(_) => "migration failed".to_string(),
            });
        }
        let outcome = outcome?;

        let loaded: u64 = outcome.checkpoints.iter().map(|c| c.rows_loaded).sum();
        println!(
            "migrated {} table(s): {loaded} row(s) loaded, {} in DLQ",
            outcome.checkpoints.len(),
            outcome.dlq_rows
        );
        Ok(())
    }

    pub fn validate(&self, args: Validate) -> Result<(), OrchestrationError> {
        let level = Level::from_str(&args.level)
            .map_err(CliError::InvalidFlag)?;
        let paths = self.paths(args.run_id);
        let mappings = approve::load_approved(&paths)?;
        let specs = extract::load_schema_artifact(&paths)?;
        let source = self.connect_source()?;
        let target = self.connect_target()?;

        let results = self.runtime.block_on(validate::run_validate(
            source.as_ref(),
            target.as_ref(),
            &mappings,
            &specs,
            &self.config.validation,
            level,
            &paths,
            &self.events,
        ))?;

        let mut table = Table::new();
        table.add_row(row!["TABLE", "STATUS", "CHECKS"]);
        for result in &results {
            let checks: Vec<String> = result
                .checks
                .iter()
                .map(|c| {
                    format!("{}={}", c.kind, if c.pass { "pass" } else { "fail" })
                })
                .collect();
            table.add_row(row![
                result.target_table,
                if result.pass { "PASS" } else { "FAIL" },
                checks.join(" ")
            ]);
        }
        table.printstd();
        println!("report: {:?}", paths.reports_dir().join("summary.json"));

        let failed = results.iter().filter(|r| !r.pass).count();
        if failed > 0 {
            return Err(ExecutionError::ValidationFailed(failed).into());
        }
        Ok(())
    }

    pub fn show_checkpoints(&self, args: ShowCheckpoints) -> Result<(), OrchestrationError> {
        let paths = self.paths(args.run_id);
        let store = CheckpointStore::new(paths.checkpoints_dir());
        let checkpoints = store.list().map_err(OrchestrationError::Execution)?;
        if checkpoints.is_empty() {
            println!("no checkpoints for run {}", paths.run_id_or_shared());
            return Ok(());
        }
        let mut table = Table::new();
        table.add_row(row![
            "TABLE", "STATUS", "OFFSET", "LOADED", "FAILED", "UPDATED"
        ]);
        for checkpoint in checkpoints {
            table.add_row(row![
                checkpoint.target_table,
                checkpoint.status,
                checkpoint.last_offset,
                checkpoint.rows_loaded,
                checkpoint.rows_failed,
                checkpoint.updated_at.to_rfc3339()
            ]);
        }
        table.printstd();
        Ok(())
    }

    pub fn list_engines(&self) -> Result<(), OrchestrationError> {
        let mut table = Table::new();
        table.add_row(row!["ENGINE", "SOURCE", "TARGET"]);
        for engine in Engine::ALL {
            table.add_row(row![
                engine,
                if engine.supports_target() { "no" } else { "yes" },
                if engine.supports_target() { "yes" } else { "no" }
            ]);
        }
        table.printstd();
        Ok(())
    }

    pub fn clean(&self, args: Clean) -> Result<(), OrchestrationError> {
        let pruned = self
            .registry
            .prune(Duration::days(args.older_than_days))
            .map_err(OrchestrationError::Execution)?;
        println!("pruned {} run(s)", pruned.len());
        Ok(())
    }
}
