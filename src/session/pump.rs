//! Stream pump: the two directed byte pumps that shuttle bytes between a
//! client WebSocket and a container's attach handle, per spec §4.4.
//!
//! The outbound (client→container) pump is the "master": when it returns,
//! the inbound (container→client) task is aborted so neither pump outlives
//! the session's `release` (Testable Property 5 — bounded joint teardown).

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::warn;

use crate::driver::AttachHandle;

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("client stream error: {0}")]
    Internal(String),
}

/// Run both pumps for one attach session until the client closes, the
/// container errors out, or the connection is otherwise lost. On an error
/// exit, sends a WebSocket close frame with code 1011 if the sender is
/// still reachable.
pub async fn run_pumps(ws: WebSocket, mut attach: AttachHandle) -> Result<(), PumpError> {
    let (ws_tx, mut ws_rx) = ws.split();
    let mut output = attach.output;
    let (return_tx, return_rx) = oneshot::channel();

    let inbound = tokio::spawn(async move {
        let mut ws_tx = ws_tx;
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "attach output stream error");
                    break;
                }
            }
        }
        let _ = return_tx.send(ws_tx);
    });

    let outbound_result = run_outbound(&mut ws_rx, &mut attach.input).await;

    inbound.abort();
    let ws_tx = return_rx.await.ok();

    if outbound_result.is_err() {
        if let Some(mut ws_tx) = ws_tx {
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "internal error".into(),
                })))
                .await;
        }
    }

    outbound_result
}

async fn run_outbound(
    ws_rx: &mut SplitStream,
    input: &mut std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>,
) -> Result<(), PumpError> {
    while let Some(msg) = ws_rx.next().await {
        let msg = msg.map_err(|e| PumpError::Internal(e.to_string()))?;

        let payload = match msg {
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if payload.is_empty() {
            continue;
        }

        input
            .write_all(&payload)
            .await
            .map_err(|e| PumpError::Internal(e.to_string()))?;
        input
            .flush()
            .await
            .map_err(|e| PumpError::Internal(e.to_string()))?;
    }

    Ok(())
}

type SplitStream = futures_util::stream::SplitStream<WebSocket>;
