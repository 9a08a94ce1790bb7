use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    state::SharedState,
};

/// Identifies the target SSE stream for logging on teardown.
#[derive(Clone, Copy, Debug)]
pub enum StreamKind {
    Public,
    Admin,
}

impl StreamKind {
    fn name(self) -> &'static str {
        match self {
            StreamKind::Public => "public",
            StreamKind::Admin => "admin",
        }
    }
}

/// Subscribe to the shared public SSE stream.
pub async fn subscribe_public(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    let receiver = state.public_sse().subscribe();
    broadcast_handshake(state, StreamKind::Public).await;
    receiver
}

/// Subscribe to the admin stream after checking the shared admin credential.
pub async fn subscribe_admin(
    state: &SharedState,
    token: Option<&str>,
) -> Result<broadcast::Receiver<ServerEvent>, ServiceError> {
    match token {
        Some(token) if token == state.admin_code() => {}
        Some(_) => return Err(ServiceError::Unauthorized("invalid admin token".into())),
        None => {
            return Err(ServiceError::Unauthorized(
                "missing admin token query parameter `token`".into(),
            ));
        }
    }
    let receiver = state.admin_sse().subscribe();
    broadcast_handshake(state, StreamKind::Admin).await;
    Ok(receiver)
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(stream = kind.name(), skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }
        tracing::info!(stream = kind.name(), "SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Announce a new subscription with the current phase and degraded flag.
async fn broadcast_handshake(state: &SharedState, kind: StreamKind) {
    let phase = state.game().lock().await.phase_view();
    let handshake = Handshake {
        stream: kind.name().to_string(),
        message: format!("{} stream connected", kind.name()),
        degraded: state.is_degraded(),
        phase,
    };
    let hub = match kind {
        StreamKind::Public => state.public_sse(),
        StreamKind::Admin => state.admin_sse(),
    };
    if let Ok(event) = ServerEvent::json(Some("handshake".to_string()), &handshake) {
        hub.broadcast(event);
    }
}
