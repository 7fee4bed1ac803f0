use clap::{Args, Parser, Subcommand};
use dbshift_types::constants::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, name = "dbshift")]
#[command(about = "Heterogeneous database migration: extract, propose, review, apply-schema, migrate, validate")]
pub struct Cli {
    #[arg(global = true, short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: String,
    /// Emit machine-readable JSON progress events on stdout.
    #[arg(global = true, long)]
    pub progress_json: bool,

    #[clap(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Introspect the source schema into per-table artifacts")]
    Extract(Extract),
    #[command(about = "Draft target type mappings for the extracted tables")]
    Propose(Propose),
    #[command(name = "validate-mapping", about = "Structurally validate mapping files")]
    ValidateMapping(ValidateMapping),
    #[command(about = "Promote draft mappings to approved")]
    Approve(Approve),
    #[command(name = "apply-schema", about = "Generate target DDL, optionally executing it")]
    ApplySchema(ApplySchema),
    #[command(about = "Run the chunked, resumable data migration")]
    Migrate(Migrate),
    #[command(about = "Compare source and target (row counts, aggregates, sample hashes)")]
    Validate(Validate),
    #[command(name = "show-checkpoints", about = "Show per-table migration checkpoints")]
    ShowCheckpoints(ShowCheckpoints),
    #[command(name = "list-engines", about = "List supported engines")]
    ListEngines,
    #[command(about = "Delete run artifact directories older than a cutoff")]
    Clean(Clean),
}

#[derive(Debug, Args)]
pub struct Extract {
    /// Run id to namespace artifacts under; pass `new` to mint one.
    #[arg(long)]
    pub run_id: Option<String>,
    /// Source database override; defaults to the configured database.
    #[arg(long)]
    pub database: Option<String>,
    /// Source schema filter; defaults to the engine's usual schema.
    #[arg(long)]
    pub schema: Option<String>,
}

#[derive(Debug, Args)]
pub struct Propose {
    #[arg(long)]
    pub run_id: Option<String>,
    /// LLM provider; overrides the configured one and enables the LLM.
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Debug, Args)]
pub struct ValidateMapping {
    /// Mapping file to validate; all drafts of the run when omitted.
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct Approve {
    /// Table to approve; use --all for every draft.
    pub table: Option<String>,
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ApplySchema {
    #[arg(long)]
    pub run_id: Option<String>,
    /// Write DDL files without touching the target.
    #[arg(long, conflicts_with = "apply")]
    pub dry_run: bool,
    /// Execute the DDL against the target.
    #[arg(long)]
    pub apply: bool,
}

#[derive(Debug, Args)]
pub struct Migrate {
    #[arg(long)]
    pub run_id: Option<String>,
    /// Comma-separated subset of tables to migrate.
    #[arg(long, value_delimiter = ',')]
    pub tables: Option<Vec<String>>,
    #[arg(long)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Args)]
pub struct Validate {
    #[arg(long)]
    pub run_id: Option<String>,
    /// Highest check level to run: L1, L2 or L3.
    #[arg(long, default_value = "L3")]
    pub level: String,
}

#[derive(Debug, Args)]
pub struct ShowCheckpoints {
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct Clean {
    /// Delete runs older than this many days.
    #[arg(long, default_value_t = 30)]
    pub older_than_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_migrate_with_table_list() {
        let cli = Cli::parse_from([
            "dbshift",
            "migrate",
            "--run-id",
            "20240101-000000-abcdef",
            "--tables",
            "users,orders",
            "--chunk-size",
            "1000",
        ]);
        let Commands::Migrate(migrate) = cli.cmd else {
            panic!("expected migrate command");
        };
        assert_eq!(migrate.run_id.as_deref(), Some("20240101-000000-abcdef"));
        assert_eq!(
            migrate.tables,
            Some(vec!["users".to_string(), "orders".to_string()])
        );
        assert_eq!(migrate.chunk_size, Some(1000));
    }

    #[test]
    fn apply_schema_modes_conflict() {
        assert!(Cli::try_parse_from(["dbshift", "apply-schema", "--dry-run", "--apply"]).is_err());
        assert!(Cli::try_parse_from(["dbshift", "apply-schema", "--apply"]).is_ok());
    }
}
