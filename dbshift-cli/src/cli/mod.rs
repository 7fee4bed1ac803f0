pub mod types;

use crate::config_helper::load_config;
use crate::errors::CliError;
use crate::orchestrator::Orchestrator;
use std::path::Path;

pub fn init_orchestrator(
    config_path: &str,
    progress_json: bool,
) -> Result<Orchestrator, CliError> {
    let config = load_config(Path::new(config_path))?;
    Orchestrator::new(config, progress_json)
}
