use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::state::game::{Character, Round, Team};

/// Current time formatted for storage.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// A played game, created at start and closed at game over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Stable identifier for the game.
    pub id: Uuid,
    /// Rounds planned for the game.
    pub total_rounds: Round,
    /// RFC 3339 start time.
    pub started_at: String,
}

/// A round, created when prompting opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    pub game_id: Uuid,
    pub round: Round,
    /// Target image players try to reproduce.
    pub target_id: u32,
    pub started_at: String,
}

/// A participant as it was when the game started or its team changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub id: Uuid,
    pub game_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    /// Character shown from round 2 onwards.
    pub character: Option<Character>,
}

/// A completed ledger entry, valid or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptEntity {
    pub game_id: Uuid,
    pub round: Round,
    pub player_id: Uuid,
    pub entry_id: u64,
    pub sequence: u32,
    pub prompt: String,
    /// Present iff the entry produced an image.
    pub prompt_id: Option<u64>,
    pub image_ref: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// A player's image for a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionEntity {
    pub game_id: Uuid,
    pub round: Round,
    pub player_id: Uuid,
    pub prompt_id: u64,
    /// True when the selection timer picked the image.
    pub automatic: bool,
    pub created_at: String,
}

/// A vote, with the votee's selected prompt for auditing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    pub game_id: Uuid,
    pub round: Round,
    pub voter_id: Uuid,
    pub votee_id: Uuid,
    pub prompt_id: u64,
    pub created_at: String,
}

/// Unit of work handed to the persistence worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistJob {
    /// Record a new game.
    CreateGame(GameEntity),
    /// Close a game.
    EndGame {
        /// Game to close.
        game_id: Uuid,
        /// Rounds that reached their results.
        rounds_completed: Round,
    },
    /// Record a new round.
    CreateRound(RoundEntity),
    /// Close the prompting part of a round.
    EndRound {
        /// Owning game.
        game_id: Uuid,
        /// Round to close.
        round: Round,
    },
    /// Record a player or its new team.
    Player(PlayerEntity),
    /// Record a completed prompt.
    Prompt(PromptEntity),
    /// Record a selection.
    Selection(SelectionEntity),
    /// Record a vote.
    Vote(VoteEntity),
}

impl PersistJob {
    /// Short job name used in logs and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistJob::CreateGame(_) => "create_game",
            PersistJob::EndGame { .. } => "end_game",
            PersistJob::CreateRound(_) => "create_round",
            PersistJob::EndRound { .. } => "end_round",
            PersistJob::Player(_) => "player",
            PersistJob::Prompt(_) => "prompt",
            PersistJob::Selection(_) => "selection",
            PersistJob::Vote(_) => "vote",
        }
    }
}
