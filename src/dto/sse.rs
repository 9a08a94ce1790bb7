use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dto::phase::PhaseView, state::game::Round};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already encoded payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream (`public` or `admin`).
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
    /// Phase at subscription time.
    pub phase: PhaseView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast whenever the gameplay phase changes.
pub struct PhaseChangedEvent(pub PhaseView);

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the lobby population changes.
pub struct LobbyEvent {
    pub players: usize,
    pub connected: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Admin-only: selection is waiting on players without a valid image.
pub struct SelectionBlockedEvent {
    pub round: Round,
    pub players: Vec<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Admin-only: the admin role moved to another session.
pub struct AdminChangedEvent {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Admin-only: a record could not be stored after every retry.
pub struct PersistenceAlert {
    /// Kind of record (`vote`, `selection`, ...).
    pub record: String,
    pub attempts: u32,
    pub error: String,
    /// Failures since start-up, this one included.
    pub total_failures: u64,
}
