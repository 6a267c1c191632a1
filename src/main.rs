use anyhow::Result;
use clap::Parser;

use vitrine::bootstrap::{self, setup::initialize_logger};
use vitrine::cli::{self, Cli};
use vitrine::common::WORKER_RUNTIME;
use vitrine::common::errors::handle_error;
use vitrine::config::AppConfig;
use vitrine::operations::Library;

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_logger();

    let config = AppConfig::from_env().map_err(handle_error)?;
    bootstrap::initialize(&config).map_err(handle_error)?;
    let library = Library::open(config).map_err(handle_error)?;

    WORKER_RUNTIME
        .block_on(cli::run(cli, library))
        .map_err(handle_error)
}
