//! `serve` (default) command - starts the daemon: box store, container
//! driver, session manager, reaper, and HTTP/WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gobox_daemon::config::Configuration;
use gobox_daemon::db::Database;
use gobox_daemon::driver::{ContainerDriver, DockerDriver, DockerDriverConfig};
use gobox_daemon::reaper;
use gobox_daemon::router::{self, AppState};
use gobox_daemon::session::SessionManager;

/// Run the daemon.
pub async fn run(config_path: &str) -> Result<()> {
    info!(path = %config_path, "loading configuration");
    let config = Configuration::load_or_default(config_path)?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        environment = %config.environment,
        "configuration loaded"
    );

    let db = Arc::new(Database::open(&config.database.path)?);

    let driver_config = DockerDriverConfig {
        base_image: config.docker.base_image.clone(),
        network_name: config.docker.network.clone(),
        memory_limit_bytes: config.docker.memory_limit_bytes(),
        nano_cpus: config.docker.nano_cpus(),
        storage_limit_mb: config.docker.storage_limit_mb,
    };
    let driver: Arc<dyn ContainerDriver> =
        Arc::new(DockerDriver::new(&config.docker.socket, driver_config)?);

    reconcile_on_startup(&driver, &db).await;

    let sessions = SessionManager::spawn_with_grace(
        driver.clone(),
        db.clone(),
        Duration::from_secs(config.session.shutdown_grace_secs),
    );

    let shutdown_token = CancellationToken::new();
    reaper::spawn(
        driver.clone(),
        db.clone(),
        Duration::from_secs(config.session.reap_interval_secs),
        Duration::from_secs(config.session.max_idle_secs),
        shutdown_token.clone(),
    );

    let state = AppState {
        driver,
        db,
        sessions,
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("invalid bind address");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token))
        .await?;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal(shutdown_token: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    warn!("received shutdown signal, stopping background tasks");
    shutdown_token.cancel();
}

/// One-time sweep at startup: remove any `gobox.managed` container that has
/// no matching box row, left behind by a crash between create and the
/// database write. Best-effort; failures here are logged, not fatal.
async fn reconcile_on_startup(driver: &Arc<dyn ContainerDriver>, db: &Arc<Database>) {
    let managed = match driver.list_managed().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "startup reconciliation could not list managed containers");
            return;
        }
    };

    for container_id in managed {
        match db.boxes().get_by_container_id(&container_id).await {
            Ok(Some(_)) => continue,
            Ok(None) => {
                info!(%container_id, "removing orphaned container with no box row");
                if let Err(e) = driver.remove(&container_id).await {
                    warn!(%container_id, error = %e, "failed to remove orphaned container");
                }
            }
            Err(e) => {
                warn!(%container_id, error = %e, "startup reconciliation could not query box store");
            }
        }
    }
}
