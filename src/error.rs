use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::state::{
    admin::AdminError,
    game::PlayerId,
    ledger::LedgerError,
    selection::SelectionError,
    session::SessionError,
    state_machine::{GamePhase, TransitionError},
    voting::VoteError,
};

/// Errors raised while applying a player or admin action to the game.
///
/// None of them leaves a partial mutation behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Identity or lobby failure.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Ledger bookkeeping failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Selection rejected.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// Vote rejected.
    #[error(transparent)]
    Vote(#[from] VoteError),
    /// Phase change refused.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Admin role check failed.
    #[error(transparent)]
    Admin(#[from] AdminError),
    /// The action does not apply to the current phase.
    #[error("`{action}` is not allowed during {phase}")]
    WrongPhase {
        /// Action attempted.
        action: &'static str,
        /// Current phase.
        phase: GamePhase,
    },
    /// The socket already carries a session.
    #[error("this connection already joined as `{0}`")]
    AlreadyJoined(PlayerId),
    /// The game cannot start without players.
    #[error("at least one player must be connected to start")]
    NoPlayers,
    /// Malformed payload.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Message type the server does not know.
    #[error("unknown message type")]
    UnknownMessage,
}

impl GameError {
    /// Stable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::Session(err) => match err {
                SessionError::AlreadyConnected(_) => "already_connected",
                SessionError::UnknownPlayer(_) => "unknown_player",
                SessionError::UnknownConnection => "not_joined",
                SessionError::LobbyFull { .. } => "lobby_full",
                SessionError::NotEnoughPlayers { .. } => "not_enough_players",
                SessionError::NotAParticipant(_) => "not_a_participant",
            },
            GameError::Ledger(_) => "unknown_entry",
            GameError::Selection(err) => err.code(),
            GameError::Vote(err) => err.code(),
            GameError::Transition(TransitionError::Stale { .. }) => "stale_event",
            GameError::Transition(TransitionError::Invalid(_)) => "invalid_transition",
            GameError::Admin(AdminError::NotAdmin(_)) => "not_admin",
            GameError::Admin(AdminError::CannotRemoveAdmin) => "cannot_remove_admin",
            GameError::WrongPhase { .. } => "wrong_phase",
            GameError::AlreadyJoined(_) => "already_joined",
            GameError::NoPlayers => "no_players",
            GameError::InvalidInput(_) => "invalid_input",
            GameError::UnknownMessage => "unknown_message",
        }
    }
}

impl From<ValidationErrors> for GameError {
    fn from(err: ValidationErrors) -> Self {
        GameError::InvalidInput(err.to_string())
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<GameError> for ServiceError {
    fn from(err: GameError) -> Self {
        let message = err.to_string();
        match err {
            GameError::Admin(AdminError::NotAdmin(_)) => ServiceError::Unauthorized(message),
            GameError::Session(SessionError::UnknownPlayer(_)) => ServiceError::NotFound(message),
            GameError::InvalidInput(_)
            | GameError::UnknownMessage
            | GameError::Selection(_)
            | GameError::Vote(_) => ServiceError::InvalidInput(message),
            _ => ServiceError::InvalidState(message),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_rejections_keep_their_reason_code() {
        let err = GameError::from(SelectionError::ErrorImageSelection);
        assert_eq!(err.code(), "error_image_selection");
        assert!(matches!(
            ServiceError::from(err),
            ServiceError::InvalidInput(_)
        ));
    }

    #[test]
    fn admin_failures_map_to_unauthorized() {
        let err = GameError::from(AdminError::NotAdmin(uuid::Uuid::nil()));
        let app: AppError = ServiceError::from(err).into();
        assert_eq!(app.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
