//! `migrate` command - applies pending database migrations and exits.

use anyhow::Result;
use tracing::info;

use gobox_daemon::config::Configuration;
use gobox_daemon::db::Database;

pub async fn run(config_path: &str) -> Result<()> {
    let config = Configuration::load_or_default(config_path)?;
    Database::migrate(&config.database.path)?;
    info!(path = %config.database.path.display(), "database is up to date");
    Ok(())
}
