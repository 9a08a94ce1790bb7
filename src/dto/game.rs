//! Player-facing projections of the game state shared by WebSocket and REST payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::validate_player_name,
    state::{
        game::{Character, EntryId, PromptId, Round, Team},
        ledger::{EntryStatus, GenerationErrorKind, LedgerEntry},
        session::PlayerSession,
        voting::Candidate,
    },
};

/// Join payload, validated before it reaches the registry.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    /// Reconnect token remembered by the client from a previous `joined`.
    #[serde(default)]
    pub reconnect_token: Option<Uuid>,
    #[validate(custom(function = "validate_player_name"))]
    pub name: String,
}

/// State of a player as seen by the player itself.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerView {
    pub session_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub character: Option<Character>,
    pub score: u32,
    pub is_admin: bool,
    /// Joined with the admin credential; gamemasters do not compete.
    pub gamemaster: bool,
}

impl PlayerView {
    /// Project a session for the given round.
    pub fn new(session: &PlayerSession, round: Option<Round>) -> Self {
        Self {
            session_id: session.id,
            name: session.name.clone(),
            team: session.team,
            character: session.is_participant().then(|| session.character(round)).flatten(),
            score: session.score,
            is_admin: session.is_admin,
            gamemaster: session.gamemaster,
        }
    }
}

/// Generation state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Valid,
    Error,
}

/// One ledger entry sent back to its author.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntryView {
    pub entry_id: EntryId,
    pub sequence: u32,
    pub prompt: String,
    pub state: EntryState,
    /// Only set for valid entries.
    pub image_ref: Option<String>,
    /// Only set for valid entries; the one identifier a selection may reference.
    pub prompt_id: Option<PromptId>,
    /// Only set for error entries.
    pub error_type: Option<GenerationErrorKind>,
}

impl From<&LedgerEntry> for EntryView {
    fn from(entry: &LedgerEntry) -> Self {
        let state = match entry.status {
            EntryStatus::Pending => EntryState::Pending,
            EntryStatus::Valid { .. } => EntryState::Valid,
            EntryStatus::Error { .. } => EntryState::Error,
        };
        Self {
            entry_id: entry.id,
            sequence: entry.sequence,
            prompt: entry.prompt.clone(),
            state,
            image_ref: entry.image_ref().map(str::to_string),
            prompt_id: entry.prompt_id(),
            error_type: entry.error_type(),
        }
    }
}

/// Anonymous image offered for vote.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CandidateView {
    pub votee_id: Uuid,
    pub prompt_id: PromptId,
    pub image_ref: String,
}

impl From<&Candidate> for CandidateView {
    fn from(candidate: &Candidate) -> Self {
        Self {
            votee_id: candidate.player,
            prompt_id: candidate.prompt_id,
            image_ref: candidate.image_ref.clone(),
        }
    }
}

/// Votes one player received in a round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundResultView {
    pub session_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub character: Character,
    pub prompt_id: PromptId,
    pub prompt: String,
    pub image_ref: String,
    pub votes: u32,
}

/// Running total of a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScoreView {
    pub session_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub score: u32,
}

/// Final ranking line.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingView {
    pub rank: usize,
    pub session_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    /// Character of the last round.
    pub character: Option<Character>,
    pub score: u32,
    /// Votes per round, index 0 is round 1.
    pub round_scores: Vec<u32>,
    pub prompt_count: usize,
}

/// Lobby line shown to gamemasters.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminPlayerView {
    pub session_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub connected: bool,
    pub is_admin: bool,
    pub gamemaster: bool,
    pub score: u32,
}

impl From<&PlayerSession> for AdminPlayerView {
    fn from(session: &PlayerSession) -> Self {
        Self {
            session_id: session.id,
            name: session.name.clone(),
            team: session.team,
            connected: session.is_connected(),
            is_admin: session.is_admin,
            gamemaster: session.gamemaster,
            score: session.score,
        }
    }
}
