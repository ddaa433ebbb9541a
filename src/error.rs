//! Daemon-wide error kinds and their HTTP/WebSocket surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::driver::DriverError;
use crate::session::SvcError;

/// Error kinds surfaced across the daemon.
///
/// Each variant carries a human message and maps to an HTTP status for the
/// pre-upgrade REST path, or to a WebSocket close code 1011 after upgrade.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl DaemonError {
    /// Short machine-readable kind name used in the error envelope and in
    /// WebSocket close reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            DaemonError::Validation(_) => "VALIDATION",
            DaemonError::NotFound(_) => "NOT_FOUND",
            DaemonError::Conflict(_) => "CONFLICT",
            DaemonError::Unauthorized(_) => "UNAUTHORIZED",
            DaemonError::Internal(_) => "INTERNAL",
            DaemonError::Database(_) => "DATABASE",
            DaemonError::Docker(_) => "DOCKER",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DaemonError::Validation(_) => StatusCode::BAD_REQUEST,
            DaemonError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DaemonError::NotFound(_) => StatusCode::NOT_FOUND,
            DaemonError::Conflict(_) => StatusCode::CONFLICT,
            DaemonError::Internal(_)
            | DaemonError::Database(_)
            | DaemonError::Docker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<SvcError> for DaemonError {
    fn from(err: SvcError) -> Self {
        let message = err.to_string();
        match err {
            SvcError::EmptyFingerprint => DaemonError::Validation(message),
            SvcError::Database(DatabaseError::NotFound(m)) => DaemonError::NotFound(m),
            SvcError::Database(DatabaseError::Conflict(m)) => DaemonError::Conflict(m),
            SvcError::Database(other) => DaemonError::Database(other),
            SvcError::Driver(DriverError::NotFound(m)) => DaemonError::NotFound(m),
            SvcError::Driver(DriverError::Docker(e)) => DaemonError::Docker(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
