use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{
        phase::PhaseView,
        sse::{
            AdminChangedEvent, LobbyEvent, PersistenceAlert, PhaseChangedEvent,
            SelectionBlockedEvent, ServerEvent, SystemStatus,
        },
    },
    state::{SharedState, coordinator::Notice},
};

const EVENT_PHASE_CHANGED: &str = "phase_changed";
const EVENT_LOBBY_UPDATED: &str = "lobby.updated";
const EVENT_SELECTION_BLOCKED: &str = "selection.blocked";
const EVENT_ADMIN_CHANGED: &str = "admin.changed";
const EVENT_PERSISTENCE_ALERT: &str = "persistence.alert";
const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Mirror a coordinator notice on the SSE streams.
pub fn publish_notice(state: &SharedState, notice: Notice) {
    match notice {
        Notice::PhaseChanged(phase) => broadcast_phase_changed(state, phase),
        Notice::LobbyChanged { players, connected } => {
            let payload = LobbyEvent { players, connected };
            send_public_event(state, EVENT_LOBBY_UPDATED, &payload);
            send_admin_event(state, EVENT_LOBBY_UPDATED, &payload);
        }
        Notice::SelectionBlocked { round, players } => {
            send_admin_event(
                state,
                EVENT_SELECTION_BLOCKED,
                &SelectionBlockedEvent { round, players },
            );
        }
        Notice::AdminChanged { holder } => {
            send_admin_event(
                state,
                EVENT_ADMIN_CHANGED,
                &AdminChangedEvent { session_id: holder },
            );
        }
    }
}

/// Broadcast a gameplay phase change notification.
pub fn broadcast_phase_changed(state: &SharedState, phase: PhaseView) {
    let payload = PhaseChangedEvent(phase);
    send_public_event(state, EVENT_PHASE_CHANGED, &payload);
    send_admin_event(state, EVENT_PHASE_CHANGED, &payload);
}

/// Tell operators that a record was given up on.
pub fn broadcast_persistence_alert(state: &SharedState, alert: &PersistenceAlert) {
    send_admin_event(state, EVENT_PERSISTENCE_ALERT, alert);
}

/// Broadcast the degraded flag to every stream.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    let payload = SystemStatus { degraded };
    send_public_event(state, EVENT_SYSTEM_STATUS, &payload);
    send_admin_event(state, EVENT_SYSTEM_STATUS, &payload);
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}

fn send_admin_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.admin_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize admin SSE payload"),
    }
}
