mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};
use commands::CliError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match invar_config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Command::ServeApi => commands::serve_api(config).await,
        Command::ServeWorker => commands::serve_worker(config).await,
        Command::Import {
            dry_run,
            project_id,
        } => commands::import(config, dry_run, project_id).await,
    };

    match result {
        Ok(()) => {}
        Err(CliError::Config(e)) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(2);
        }
        Err(CliError::Startup(e)) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
