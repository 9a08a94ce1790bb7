use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    services::game_service,
    state::{SharedState, game::ConnectionId},
};

/// Time a fresh socket gets to send its first message.
const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The writer task of a socket has stopped.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Drive a player or admin WebSocket until it closes.
///
/// Each socket gets a connection id; the `join` message binds it to a session.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection: ConnectionId = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    state.connections().insert(connection, outbound_tx.clone());
    info!(connection = %connection, "websocket connected");

    let first = match tokio::time::timeout(JOIN_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(message))) => message,
        Ok(Some(Err(err))) => {
            warn!(connection = %connection, error = %err, "websocket receive error");
            teardown(&state, connection, writer_task, outbound_tx).await;
            return;
        }
        Ok(None) => {
            teardown(&state, connection, writer_task, outbound_tx).await;
            return;
        }
        Err(_) => {
            warn!(connection = %connection, "websocket sent nothing before the join timeout");
            let _ = outbound_tx.send(Message::Close(None));
            teardown(&state, connection, writer_task, outbound_tx).await;
            return;
        }
    };

    let mut next = Some(Ok(first));
    while let Some(frame) = next {
        match frame {
            Ok(Message::Text(text)) => {
                debug!(connection = %connection, payload = %text, "received client message");
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        game_service::handle_client_message(&state, connection, message).await
                    }
                    Err(err) => {
                        warn!(connection = %connection, error = %err, "failed to parse client message");
                        let reply = ServerMessage::error("invalid_message", err);
                        if send_message_to_websocket(&outbound_tx, &reply).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection = %connection, "websocket closed by client");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
        next = receiver.next().await;
    }

    teardown(&state, connection, writer_task, outbound_tx).await;
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; only a closed writer is reported.
pub fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), ConnectionClosed>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| ConnectionClosed)
}

/// Detach the socket from the game, then wait for the writer to wind down.
async fn teardown(
    state: &SharedState,
    connection: ConnectionId,
    writer_task: JoinHandle<()>,
    outbound_tx: mpsc::UnboundedSender<Message>,
) {
    state.connections().remove(&connection);
    game_service::handle_disconnect(state, connection).await;
    info!(connection = %connection, "websocket disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_sent_as_json_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        send_message_to_websocket(&tx, &ServerMessage::GameRestarted).unwrap();

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"game_restarted"}"#),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn closed_writer_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(send_message_to_websocket(&tx, &ServerMessage::GameRestarted).is_err());
    }
}
