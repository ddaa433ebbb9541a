//! `GET /api/v1/box/connect?fingerprint=<string>` — the WebSocket upgrade
//! that hands a client stream off to `Svc::connect` and the stream pump.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::session::{run_pumps, Svc};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub fingerprint: String,
}

pub async fn connect_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let svc = Svc::new(state.driver.clone(), state.db.clone(), state.sessions.clone());

    let connected = match svc.connect(&query.fingerprint).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(fingerprint = %query.fingerprint, error = %e, "connect failed before upgrade");
            return crate::error::DaemonError::from(e).into_response();
        }
    };

    let fingerprint = query.fingerprint;

    ws.on_upgrade(move |socket| async move {
        info!(%fingerprint, container_id = %connected.container_id, "session attached");

        if let Err(e) = run_pumps(socket, connected.attach).await {
            warn!(%fingerprint, error = %e, "stream pump ended with error");
        }

        connected.guard.finish().await;
    })
}
