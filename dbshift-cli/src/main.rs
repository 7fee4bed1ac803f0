use clap::Parser;
use dbshift_cli::cli::init_orchestrator;
use dbshift_cli::cli::types::{Cli, Commands};
use dbshift_cli::errors::OrchestrationError;
use dbshift_types::tracing::error;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        error!("{e}");
        process::exit(e.exit_code());
    }
}

fn run() -> Result<(), OrchestrationError> {
    let cli = Cli::parse();
    let orchestrator = init_orchestrator(&cli.config_path, cli.progress_json)?;

    match cli.cmd {
        Commands::Extract(args) => orchestrator.extract(args),
        Commands::Propose(args) => orchestrator.propose(args),
        Commands::ValidateMapping(args) => orchestrator.validate_mapping(args),
        Commands::Approve(args) => orchestrator.approve(args),
        Commands::ApplySchema(args) => orchestrator.apply_schema(args),
        Commands::Migrate(args) => orchestrator.migrate(args),
        Commands::Validate(args) => orchestrator.validate(args),
        Commands::ShowCheckpoints(args) => orchestrator.show_checkpoints(args),
        Commands::ListEngines => orchestrator.list_engines(),
        Commands::Clean(args) => orchestrator.clean(args),
    }
}
