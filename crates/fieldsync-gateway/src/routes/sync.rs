//! Replication sessions over WebSocket.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use fieldsync_store::{ProjectHandle, PublicId, ReplicationStream};
use futures::{future, SinkExt, StreamExt};

use crate::bridge::{Bridge, CloseReason};
use crate::error::{GatewayError, Result};
use crate::AppState;

/// Sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/sync/:project_id", get(sync_project))
}

/// Upgrade to a replication session for one project.
///
/// Unknown or malformed ids are a 404 before any upgrade happens.
async fn sync_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    if state.config.require_sync_auth {
        state.auth.authorize(&headers)?;
    }

    let public_id: PublicId = project_id
        .parse()
        .map_err(|_| GatewayError::ProjectNotFound)?;
    let project = state.store.get_project(&public_id).await?;

    let ws = ws.map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))?;
    let stream = state.store.open_replication_stream(&project).await?;

    Ok(ws.on_upgrade(move |socket| run_session(state, project, stream, socket)))
}

/// Bridge one socket to one replication stream until either side ends.
pub async fn run_session(
    state: AppState,
    project: ProjectHandle,
    stream: ReplicationStream,
    socket: WebSocket,
) {
    let (bridge, handle) = Bridge::new(state.config.bridge.clone());
    let session_id = state.sessions.register(project.public_id, handle);
    tracing::info!(session = session_id, project = %project.public_id, "sync session opened");

    let (ws_tx, ws_rx) = socket.split();
    let sink = ws_tx.with(|chunk: Bytes| {
        future::ready(Ok::<_, axum::Error>(Message::Binary(chunk.to_vec())))
    });
    let source = ws_rx
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(Message::Text(text)) => Some(Ok(Bytes::from(text))),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
        });

    let report = bridge.run(sink, source, stream).await;
    state.sessions.remove(session_id);

    match report.reason {
        CloseReason::Completed | CloseReason::Cancelled => tracing::info!(
            session = session_id,
            project = %project.public_id,
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            reason = ?report.reason,
            "sync session closed"
        ),
        CloseReason::SocketError | CloseReason::StreamError => tracing::warn!(
            session = session_id,
            project = %project.public_id,
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            reason = ?report.reason,
            error = ?report.error,
            "sync session failed"
        ),
    }
}
