use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "invar",
    about = "Inventory and reconciliation service for heterogeneous compute hardware",
    version
)]
pub struct Cli {
    /// Path to the service configuration file (YAML).
    #[arg(long, env = "INVAR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API server.
    ServeApi,

    /// Run the reconciler, processing pending worker tasks periodically.
    ServeWorker,

    /// Import existing downstream resources into the inventory with their
    /// tasks already marked STEADY.
    Import {
        /// Print what would be imported without writing to the store.
        #[arg(long)]
        dry_run: bool,

        /// Project to assign imported hardware to.
        #[arg(long, default_value = "")]
        project_id: String,
    },
}
