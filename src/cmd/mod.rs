//! CLI command handlers

use clap::Subcommand;

pub mod diagnostics;
pub mod migrate;
pub mod root;

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations and exit
    Migrate,
    /// Run migrations then start the server (the default when no subcommand is given)
    Serve,
    /// Run diagnostics and display host/Docker environment information
    Diagnostics,
}
