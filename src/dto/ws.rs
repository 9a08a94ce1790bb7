use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dto::{
        admin::StatusReport,
        game::{
            AdminPlayerView, CandidateView, EntryView, PlayerView, RoundResultView, ScoreView,
            StandingView,
        },
        phase::PhaseView,
    },
    state::game::{Character, EntryId, PromptId, Round, TargetImage, Team},
};

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Messages accepted from player and gamemaster WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        /// Private token from an earlier `joined`; public session ids are not accepted.
        #[serde(default)]
        reconnect_token: Option<Uuid>,
        name: String,
    },
    StartGame,
    AssignTeams,
    SubmitPrompt {
        text: String,
    },
    /// Error images carry no prompt id, hence the option.
    SelectImage {
        #[serde(default)]
        prompt_id: Option<PromptId>,
    },
    CheckSelectionStatus,
    CastVote {
        votee_id: Uuid,
        #[serde(default)]
        prompt_id: Option<PromptId>,
    },
    AdminEndRound {
        #[serde(default)]
        round: Option<Round>,
    },
    AdminSkipSelection {
        #[serde(default)]
        round: Option<Round>,
    },
    AdminSkipVoting {
        #[serde(default)]
        round: Option<Round>,
    },
    AdminNextRound {
        #[serde(default)]
        round: Option<Round>,
    },
    AdminRestartGame,
    SetPlayerTeam {
        session_id: Uuid,
        team: Team,
    },
    RemovePlayer {
        session_id: Uuid,
    },
    ClearLobby,
    AdminGetStatus,
    AdminExcludePlayer {
        session_id: Uuid,
    },
    #[serde(other)]
    Unknown,
}

/// View a reconnecting client needs to resume the current phase.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Replay {
    Lobby,
    Playing {
        round: Round,
        target: TargetImage,
        end_time: Option<String>,
        /// Every entry of the round in order, errors included.
        entries: Vec<EntryView>,
    },
    Selecting {
        round: Round,
        /// Valid entries only.
        images: Vec<EntryView>,
        /// Confirmed selection; it cannot change anymore.
        confirmed_prompt_id: Option<PromptId>,
        /// Latest valid entry, preselected when nothing is confirmed.
        provisional_prompt_id: Option<PromptId>,
        end_time: Option<String>,
        /// Set once the timer fired and the player has no valid image.
        blocked: bool,
    },
    Voting {
        round: Round,
        /// Candidates without the player's own image.
        candidates: Vec<CandidateView>,
        has_voted: bool,
    },
    Results {
        round: Round,
        results: Vec<RoundResultView>,
        scores: Vec<ScoreView>,
    },
    GameOver {
        standings: Vec<StandingView>,
    },
}

/// Messages pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        player: PlayerView,
        /// Only ever sent to the session owner.
        reconnect_token: Uuid,
        phase: PhaseView,
        reconnected: bool,
        replay: Replay,
    },
    TeamAssigned {
        team: Option<Team>,
        character: Option<Character>,
    },
    RoundStarted {
        round: Round,
        total_rounds: Round,
        target: TargetImage,
        character: Option<Character>,
        duration_secs: u64,
        end_time: String,
    },
    PromptAccepted {
        entry_id: EntryId,
        sequence: u32,
        prompt: String,
    },
    ImageReady {
        entry: EntryView,
    },
    SelectionOpened {
        round: Round,
        images: Vec<EntryView>,
        provisional_prompt_id: Option<PromptId>,
        duration_secs: u64,
        end_time: String,
    },
    SelectionResult {
        success: bool,
        prompt_id: Option<PromptId>,
        /// Set when the selection timer picked the image.
        automatic: bool,
        reason: Option<String>,
        message: Option<String>,
    },
    SelectionStatus {
        round: Round,
        confirmed_prompt_id: Option<PromptId>,
        waiting: usize,
        blocked: bool,
    },
    SelectionWaiting {
        round: Round,
        remaining: usize,
    },
    VotingOpened {
        round: Round,
        candidates: Vec<CandidateView>,
        /// Client countdown hint; voting closes on completion or admin action.
        duration_secs: u64,
        start_time: String,
    },
    VoteResult {
        success: bool,
        votee_id: Option<Uuid>,
        reason: Option<String>,
        message: Option<String>,
    },
    RoundResults {
        round: Round,
        results: Vec<RoundResultView>,
        scores: Vec<ScoreView>,
    },
    GameOver {
        standings: Vec<StandingView>,
    },
    PhaseChanged {
        phase: PhaseView,
    },
    AdminPlayerListUpdate {
        players: Vec<AdminPlayerView>,
    },
    AdminStatus {
        status: StatusReport,
    },
    AdminRoleChanged {
        is_admin: bool,
    },
    GameRestarted,
    Removed {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    /// Build an error message from a stable code and a human readable text.
    pub fn error(code: impl Into<String>, message: impl ToString) -> Self {
        Self::Error {
            code: code.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"select_image","prompt_id":7}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SelectImage {
                prompt_id: Some(PromptId(7))
            }
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"select_image"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SelectImage { prompt_id: None }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"admin_next_round"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::AdminNextRound { round: None }));
    }

    #[test]
    fn unknown_client_messages_do_not_fail() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"dance"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn server_errors_are_tagged() {
        let json = serde_json::to_value(ServerMessage::error("wrong_phase", "nope")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "wrong_phase");
    }
}
