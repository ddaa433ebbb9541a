//! Container driver: the contract the session manager uses to create,
//! resume, attach to, stop, and remove the Linux container backing one box.
//!
//! Kept behind a trait so the session manager (and its tests) never depend on
//! `bollard` directly, the same separation the teacher draws between
//! `ProcessEnvironment` and its Docker implementation.

mod docker;

pub use docker::DockerDriver;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// One chunk of container output, as delivered by the driver's attach stream.
pub type OutputChunk = DriverResult<Vec<u8>>;

/// A live attach session: an input sink and an output stream, both scoped to
/// the lifetime of one connection's stream pump.
pub struct AttachHandle {
    pub input: std::pin::Pin<Box<dyn AsyncWrite + Send>>,
    pub output: BoxStream<'static, OutputChunk>,
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create a new container for this box, named `box-<uuid>`. Returns the
    /// runtime container id.
    async fn create(&self, box_id: uuid::Uuid) -> DriverResult<String>;

    /// Make sure the container is running, starting it if it was paused or
    /// stopped. Idempotent. Surfaces `NotFound` distinctly so callers can
    /// recreate the box.
    async fn ensure_running(&self, container_id: &str) -> DriverResult<()>;

    /// Attach to the container's stdio stream.
    async fn attach(&self, container_id: &str) -> DriverResult<AttachHandle>;

    /// Stop the container gracefully. Idempotent: already-stopped or
    /// already-gone containers are treated as success.
    async fn stop(&self, container_id: &str) -> DriverResult<()>;

    /// Remove the container and its volumes.
    async fn remove(&self, container_id: &str) -> DriverResult<()>;

    /// List the ids of all containers this driver manages (labeled
    /// `gobox.managed=true`), running or not. Used by the startup
    /// reconciliation sweep to find containers with no matching box row.
    async fn list_managed(&self) -> DriverResult<Vec<String>>;
}
