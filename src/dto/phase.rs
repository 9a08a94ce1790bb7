use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{game::Round, state_machine::GamePhase};

/// Publicly visible game phase exposed to clients (WebSocket/REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleGamePhase {
    /// Waiting for the admin to start.
    Lobby,
    /// Players submit prompts.
    Playing,
    /// Players pick their image.
    Selecting,
    /// Players vote.
    Voting,
    /// Round results.
    Results,
    /// Final standings.
    GameOver,
}

impl From<&GamePhase> for VisibleGamePhase {
    fn from(value: &GamePhase) -> Self {
        match value {
            GamePhase::Lobby => VisibleGamePhase::Lobby,
            GamePhase::Playing(_) => VisibleGamePhase::Playing,
            GamePhase::Selecting(_) => VisibleGamePhase::Selecting,
            GamePhase::Voting(_) => VisibleGamePhase::Voting,
            GamePhase::Results(_) => VisibleGamePhase::Results,
            GamePhase::GameOver => VisibleGamePhase::GameOver,
        }
    }
}

/// Phase together with the round it belongs to.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
pub struct PhaseView {
    pub phase: VisibleGamePhase,
    pub round: Option<Round>,
    pub total_rounds: Round,
}

impl PhaseView {
    /// Project a state machine phase.
    pub fn new(phase: &GamePhase, total_rounds: Round) -> Self {
        Self {
            phase: phase.into(),
            round: phase.round(),
            total_rounds,
        }
    }
}
