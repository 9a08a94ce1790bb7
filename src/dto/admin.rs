//! DTO definitions used by the admin REST API, the admin status surface and documentation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::phase::PhaseView,
    state::{
        game::{PromptId, Round, Team},
        ledger::GenerationErrorKind,
    },
};

/// Selection and vote bookkeeping of one player for the current round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerStatusView {
    pub session_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub connected: bool,
    pub is_admin: bool,
    pub gamemaster: bool,
    pub score: u32,
    /// Prompts submitted this round.
    pub prompts_submitted: usize,
    /// Prompts of this round that produced an image.
    pub valid_images: usize,
    pub selected_prompt_id: Option<PromptId>,
    pub excluded: bool,
    pub has_voted: bool,
}

/// Everything an operator needs to unblock a stuck round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusReport {
    pub phase: PhaseView,
    /// Seconds until the running phase timer fires, when one is armed.
    pub remaining_secs: Option<u64>,
    pub players: Vec<PlayerStatusView>,
    /// Connected players that cannot select because none of their images generated.
    pub blocked_players: Vec<Uuid>,
    /// Players still choosing their image.
    pub selections_waiting: usize,
    /// Captured voters that have not voted yet.
    pub missing_voters: Vec<Uuid>,
    /// Persistence jobs dropped after exhausting their retries.
    pub persistence_failures: u64,
}

/// Optional expected round attached to an override so a repeated request is a no-op.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct OverrideRequest {
    #[validate(range(min = 1, max = 20))]
    #[serde(default)]
    pub round: Option<Round>,
}

/// Request to move a player to another team.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TeamChangeRequest {
    pub team: Team,
}

/// Generic action acknowledgement used by admin endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
    pub phase: PhaseView,
}

/// One prompt whose image generation failed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerationErrorView {
    pub session_id: Uuid,
    pub player_name: String,
    pub round: Round,
    /// Position among the author's prompts for the round.
    pub sequence: u32,
    pub prompt: String,
    pub error_type: GenerationErrorKind,
    /// Backend message, when the backend gave one.
    pub message: Option<String>,
}

/// Failed generations of one player, counted by error type.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerErrorSummary {
    pub session_id: Uuid,
    pub name: String,
    pub total_errors: usize,
    pub errors_by_type: BTreeMap<String, usize>,
}

/// Generation failures of the current game.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorAnalytics {
    pub total_errors: usize,
    /// Every round of the game is listed, including those without failures.
    pub errors_by_round: BTreeMap<Round, usize>,
    pub errors_by_type: BTreeMap<String, usize>,
    /// Only players with at least one failure, in join order.
    pub players: Vec<PlayerErrorSummary>,
    /// Failures in submission order.
    pub errors: Vec<GenerationErrorView>,
}
