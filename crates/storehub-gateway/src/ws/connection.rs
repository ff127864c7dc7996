use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::ws::send::WsSink;

/// Axum handler: upgrades HTTP to WebSocket at GET /ws.
///
/// A request that is not a valid upgrade is answered with 400 and nothing
/// is registered.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(remote = %addr, reason = %rejection.body_text(), "websocket upgrade rejected");
            return (StatusCode::BAD_REQUEST, "could not open websocket connection").into_response();
        }
    };

    ws.on_failed_upgrade(move |e| warn!(remote = %addr, error = %e, "websocket handshake failed"))
        .on_upgrade(move |socket| run_connection(socket, addr, state))
}

/// Lives for the whole WS session. Hands the write half to the hub and
/// watches the read half for the peer going away.
async fn run_connection(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let (tx, mut rx) = socket.split();

    let session = match state.hub.connect(addr.to_string(), WsSink(tx)).await {
        Ok(session) => session,
        Err(e) => {
            warn!(remote = %addr, error = %e, "hub refused connection");
            return;
        }
    };
    let conn_id = session.id;

    // server → client only; inbound frames just tell us the peer is alive
    loop {
        tokio::select! {
            _ = session.transport.cancelled() => break,
            msg = rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%conn_id, error = %e, "read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    if let Err(e) = state.hub.unregister(conn_id).await {
        debug!(%conn_id, error = %e, "unregister after disconnect skipped");
    }
}
