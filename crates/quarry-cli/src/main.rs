mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, WeightCommands};

#[tokio::main]
async fn main() -> Result<()> {
    quarry_runtime::init_logging();
    let cli = Cli::parse();

    // init writes the config file, so it must not try to read one
    if let Commands::Init { path } = &cli.command {
        return commands::init::run_init(path);
    }
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Index { dir } => commands::index::execute(dir, &config).await,
        Commands::Ask { query, thread } => commands::ask::execute(query, thread, &config).await,
        Commands::Chat => commands::chat::execute(&config).await,
        Commands::Serve { host, port } => commands::serve::execute(host, port, &config).await,
        Commands::Weights { action } => match action {
            WeightCommands::List => commands::weights::list(&config),
            WeightCommands::Set { id, value } => commands::weights::set(&id, value, &config),
        },
    }
}
