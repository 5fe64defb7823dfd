mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use splitbox::config::Config;
use splitbox::observability::init_tracing;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };
    init_tracing(&config.logging.filter);
    tracing::debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Config => print!("{}", cli::render_config(&config)?),
        Commands::Plan(args) => {
            let report = cli::plan(&config, &args);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
