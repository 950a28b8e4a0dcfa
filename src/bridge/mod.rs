// ============================================================================
// Event Router - Realtime Session Bridge
// ============================================================================
//
// One bridge per accepted client connection: a dedicated upstream event
// session paired exclusively with that client, with unrestricted
// bidirectional forwarding of named events between the two. Events are
// never cross-delivered between clients because no upstream session is
// ever shared.
//
// Lifecycle: client disconnect tears down the paired upstream session
// synchronously. The reverse is deliberately asymmetric: losing the
// upstream (or never reaching it) leaves the client connection open in a
// degraded mode, since the client still gets value from the HTTP surface.
//
// ============================================================================

pub mod session;
pub mod upstream;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::context::AppContext;
use crate::utils::bearer_token;

use session::{ClientSession, EventMessage};
use upstream::{EVENT_CHANNEL_CAPACITY, UpstreamSession, connect_with_retry};

#[derive(Deserialize)]
pub struct SocketParams {
    /// Handshake credential for clients that cannot set headers
    token: Option<String>,
}

/// WebSocket upgrade endpoint for mobile clients.
///
/// The credential (Authorization header or `?token=`) is captured once at
/// handshake time and used only to seed the paired upstream session's
/// authentication context; the router itself never inspects it.
pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
) -> Response {
    let credential = bearer_token(&headers)
        .map(str::to_string)
        .or(params.token);

    ws.on_upgrade(move |socket| handle_socket(socket, ctx, credential))
}

/// Runs one client connection end to end: opens the paired upstream
/// session, adapts the socket into event channels, and drives the bridge
/// until the client goes away.
async fn handle_socket(socket: WebSocket, ctx: AppContext, credential: Option<String>) {
    let connection_id = Uuid::new_v4();
    tracing::info!(connection_id = %connection_id, "mobile client connected");

    let upstream = match connect_with_retry(
        ctx.connector.as_ref(),
        credential.as_deref(),
        &ctx.config.upstream.retry,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            // Degraded mode: the client keeps its connection (and the HTTP
            // surface); only event forwarding is unavailable.
            tracing::error!(
                connection_id = %connection_id,
                error = %e,
                "upstream event session unavailable, continuing without forwarding"
            );
            UpstreamSession::detached()
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (from_client_tx, from_client_rx) = mpsc::channel::<EventMessage>(EVENT_CHANNEL_CAPACITY);
    let (to_client_tx, mut to_client_rx) = mpsc::channel::<EventMessage>(EVENT_CHANNEL_CAPACITY);

    // Client read pump: socket frames -> bridge. Ends on disconnect, which
    // the bridge observes as a closed channel.
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<EventMessage>(text.as_str()) {
                        Ok(event) => {
                            if from_client_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "dropping malformed client frame"),
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "client read error");
                    break;
                }
            }
        }
    });

    // Client write pump: bridge -> socket frames
    let writer = tokio::spawn(async move {
        while let Some(event) = to_client_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "failed to serialize event for client"),
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let client = ClientSession {
        id: connection_id,
        from_client: from_client_rx,
        to_client: to_client_tx,
    };

    run_bridge(client, upstream).await;

    reader.abort();
    let _ = writer.await;
    tracing::info!(connection_id = %connection_id, "bridge torn down");
}

/// Full-duplex forwarding loop for one (client, upstream) pairing.
///
/// Any event name, payload unmodified, per-direction arrival order
/// preserved. Returns when the client disconnects, after closing the
/// upstream session exactly once. If the upstream half ends first, the
/// loop keeps serving the client in degraded mode (upstream-bound events
/// become no-ops).
pub async fn run_bridge(mut client: ClientSession, mut upstream: UpstreamSession) {
    let mut upstream_open = !upstream.is_closed();

    loop {
        tokio::select! {
            inbound = client.from_client.recv() => match inbound {
                Some(event) => {
                    tracing::debug!(connection_id = %client.id, event = %event.event, "client -> upstream");
                    upstream.send(event).await;
                }
                None => {
                    tracing::info!(connection_id = %client.id, "mobile client disconnected");
                    upstream.close();
                    break;
                }
            },
            outbound = upstream.recv(), if upstream_open => match outbound {
                Some(event) => {
                    tracing::debug!(connection_id = %client.id, event = %event.event, "upstream -> client");
                    if client.to_client.send(event).await.is_err() {
                        tracing::info!(connection_id = %client.id, "client delivery half gone");
                        upstream.close();
                        break;
                    }
                }
                None => {
                    upstream_open = false;
                    tracing::warn!(
                        connection_id = %client.id,
                        "upstream session ended, continuing in degraded mode"
                    );
                }
            },
        }
    }
}
