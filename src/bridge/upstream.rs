// ============================================================================
// Upstream Session Factory
// ============================================================================
//
// Opens one dedicated connection to the upstream event service per client,
// forwarding the client's credential as connection-time authentication.
// Connection establishment is an explicit state machine (disconnected ->
// connecting -> connected) with bounded retry and a fixed backoff, so it
// stays unit-testable without real sockets: the `UpstreamConnector` trait
// is the seam, `WsConnector` the production implementation.
//
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http, protocol::Message},
};

use crate::config::RetryPolicy;
use crate::error::AppError;

use super::session::EventMessage;

/// Buffered events per direction before backpressure kicks in
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle of an upstream session attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle to one outbound connection to the upstream event service.
///
/// Owned exclusively by one Event Router; never shared across clients.
/// Sends after the session closed (or after the underlying connection
/// died) are delivered as no-ops instead of errors.
pub struct UpstreamSession {
    outbound: mpsc::Sender<EventMessage>,
    inbound: mpsc::Receiver<EventMessage>,
    close_tx: Option<oneshot::Sender<()>>,
    closed: bool,
}

impl UpstreamSession {
    /// Assembles a session from its raw channel halves. Used by connector
    /// implementations, including test doubles.
    pub fn from_parts(
        outbound: mpsc::Sender<EventMessage>,
        inbound: mpsc::Receiver<EventMessage>,
        close_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            close_tx: Some(close_tx),
            closed: false,
        }
    }

    /// A session with no upstream behind it: every send is a no-op and
    /// `recv` reports end-of-stream immediately. Used when connection
    /// retries are exhausted and the bridge degrades.
    pub fn detached() -> Self {
        let (outbound, out_rx) = mpsc::channel(1);
        drop(out_rx);
        let (in_tx, inbound) = mpsc::channel(1);
        drop(in_tx);

        Self {
            outbound,
            inbound,
            close_tx: None,
            closed: true,
        }
    }

    /// Forward one event to the upstream. A closed session swallows the
    /// event with a debug log; it never errors and never panics.
    pub async fn send(&mut self, event: EventMessage) {
        if self.closed {
            tracing::debug!(event = %event.event, "dropping event for closed upstream session");
            return;
        }

        if self.outbound.send(event).await.is_err() {
            self.closed = true;
            tracing::debug!("upstream session write half gone, marking closed");
        }
    }

    /// Next event from the upstream, any name. `None` means the upstream
    /// side of the session has ended.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.inbound.recv().await
    }

    /// Tear the session down. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// One connection attempt to the upstream event service. The seam that
/// lets the retry machinery and the Event Router run against doubles.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, credential: Option<&str>) -> Result<UpstreamSession, AppError>;
}

/// Establish an upstream session with bounded retry and fixed backoff.
///
/// Exhausting `policy.max_attempts` surfaces `UpstreamConnect` to the
/// caller instead of retrying indefinitely.
pub async fn connect_with_retry(
    connector: &dyn UpstreamConnector,
    credential: Option<&str>,
    policy: &RetryPolicy,
) -> Result<UpstreamSession, AppError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut state = SessionState::Disconnected;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        state = SessionState::Connecting;
        tracing::debug!(attempt, max_attempts, ?state, "connecting to upstream event service");

        match connector.connect(credential).await {
            Ok(session) => {
                state = SessionState::Connected;
                tracing::debug!(attempt, ?state, "upstream event session established");
                return Ok(session);
            }
            Err(e) => {
                state = SessionState::Disconnected;
                tracing::warn!(attempt, max_attempts, ?state, error = %e, "upstream connect attempt failed");
                last_error = e.to_string();

                if attempt < max_attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    Err(AppError::UpstreamConnect(format!(
        "exhausted {} attempts: {}",
        max_attempts, last_error
    )))
}

/// Production connector: a WebSocket client connection to the upstream
/// event endpoint, authenticated at handshake time.
pub struct WsConnector {
    events_url: String,
}

impl WsConnector {
    pub fn new(events_url: String) -> Self {
        Self { events_url }
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn connect(&self, credential: Option<&str>) -> Result<UpstreamSession, AppError> {
        let mut request = self
            .events_url
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::UpstreamConnect(e.to_string()))?;

        // Credential travels as connection-time auth, not per event
        if let Some(token) = credential {
            let value = format!("Bearer {}", token)
                .parse::<http::HeaderValue>()
                .map_err(|_| {
                    AppError::UpstreamConnect("credential is not a valid header value".to_string())
                })?;
            request
                .headers_mut()
                .insert(http::header::AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| AppError::UpstreamConnect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<EventMessage>(EVENT_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<EventMessage>(EVENT_CHANNEL_CAPACITY);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        // Write pump: outbound events -> upstream socket. A close signal
        // (or the handle being dropped) sends a Close frame and stops.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    event = out_rx.recv() => match event {
                        Some(event) => match serde_json::to_string(&event) {
                            Ok(text) => {
                                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "failed to serialize outbound event")
                            }
                        },
                        None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        });

        // Read pump: upstream socket -> inbound events, name-agnostic
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<EventMessage>(text.as_str()) {
                            Ok(event) => {
                                if in_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping malformed upstream frame")
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "upstream read error");
                        break;
                    }
                }
            }
        });

        Ok(UpstreamSession::from_parts(out_tx, in_rx, close_tx))
    }
}
