//! Runs the coordinator under its lock and carries out the effects it returns
//! before the lock is released, so every socket queue sees messages in the
//! order the coordinator produced them.

use std::time::Duration;

use axum::extract::ws::Message;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        admin::{ActionResponse, ErrorAnalytics, StatusReport},
        ws::{ClientMessage, ServerMessage},
    },
    error::ServiceError,
    services::{sse_events, websocket_service::send_message_to_websocket},
    state::{
        SharedState,
        coordinator::{AdminCommand, Effect, GenerationRequest, Outbox, TimerKind},
        game::{ConnectionId, Round},
        ledger::GenerationOutcome,
    },
};

/// Apply one client message.
pub async fn handle_client_message(
    state: &SharedState,
    connection: ConnectionId,
    message: ClientMessage,
) {
    let mut game = state.game().lock().await;
    let outbox = game.handle(connection, message);
    dispatch(state, outbox);
}

/// React to a closed socket.
pub async fn handle_disconnect(state: &SharedState, connection: ConnectionId) {
    let mut game = state.game().lock().await;
    let outbox = game.disconnect(connection);
    dispatch(state, outbox);
}

/// Apply an operator command from the REST surface.
pub async fn run_admin_command(
    state: &SharedState,
    command: AdminCommand,
) -> Result<ActionResponse, ServiceError> {
    let phase = {
        let mut game = state.game().lock().await;
        let outbox = game.operator(command)?;
        dispatch(state, outbox);
        game.phase_view()
    };
    info!(command = ?command, "operator command applied");
    Ok(ActionResponse {
        message: format!("{command:?} applied"),
        phase,
    })
}

/// Status surface, including the persistence failure counter.
pub async fn status(state: &SharedState) -> StatusReport {
    let mut report = state.game().lock().await.status();
    report.persistence_failures = state.persistence_failures();
    report
}

/// Generation failures of the current game.
pub async fn error_analytics(state: &SharedState) -> ErrorAnalytics {
    state.game().lock().await.error_analytics()
}

/// Carry out coordinator effects in order.
///
/// Callers hold the game lock. Every effect is non-blocking: socket writes and
/// the persistence queue are unbounded channels, timers and generations are
/// spawned tasks that take the lock themselves.
pub fn dispatch(state: &SharedState, outbox: Outbox) {
    for effect in outbox {
        match effect {
            Effect::Send { to, mut message } => {
                if let ServerMessage::AdminStatus { status } = &mut message {
                    status.persistence_failures = state.persistence_failures();
                }
                send_to(state, to, &message)
            }
            Effect::Close { connection } => close(state, connection),
            Effect::Persist(job) => state.enqueue_persist(job),
            Effect::ScheduleTimer {
                kind,
                game,
                round,
                after,
            } => spawn_timer(state.clone(), kind, game, round, after),
            Effect::Generate(request) => spawn_generation(state.clone(), request),
            Effect::Notify(notice) => sse_events::publish_notice(state, notice),
        }
    }
}

fn send_to(state: &SharedState, connection: ConnectionId, message: &ServerMessage) {
    let Some(tx) = state.connections().get(&connection).map(|entry| entry.value().clone()) else {
        debug!(connection = %connection, "dropping message for a closed socket");
        return;
    };
    if send_message_to_websocket(&tx, message).is_err() {
        debug!(connection = %connection, "socket writer already gone");
    }
}

fn close(state: &SharedState, connection: ConnectionId) {
    if let Some((_, tx)) = state.connections().remove(&connection) {
        let _ = tx.send(Message::Close(None));
    }
}

fn spawn_timer(state: SharedState, kind: TimerKind, game: Uuid, round: Round, after: Duration) {
    debug!(kind = ?kind, game = %game, round, secs = after.as_secs(), "timer armed");
    tokio::spawn(async move {
        sleep(after).await;
        let mut coordinator = state.game().lock().await;
        let outbox = coordinator.timer_fired(kind, game, round);
        dispatch(&state, outbox);
    });
}

fn spawn_generation(state: SharedState, request: GenerationRequest) {
    let generator = state.generator();
    tokio::spawn(async move {
        let entry = request.entry;
        let player = request.player;
        let outcome = generator.generate(request).await;
        if let GenerationOutcome::Failed { error_type, .. } = &outcome {
            warn!(entry = %entry, player = %player, error_type = error_type.as_str(), "generation produced an error entry");
        }
        let mut game = state.game().lock().await;
        let outbox = game.generation_finished(entry, outcome);
        dispatch(&state, outbox);
    });
}
