//! Rebuilds what a (re)connecting client must see to resume the current phase.

use std::time::SystemTime;

use crate::{
    config::GameSettings,
    dto::{
        format_system_time,
        game::{CandidateView, EntryView},
        ws::Replay,
    },
    state::{
        game::PlayerId,
        ledger::SubmissionLedger,
        scoring,
        selection::SelectionCoordinator,
        session::SessionRegistry,
        state_machine::GamePhase,
        voting::VotingCoordinator,
    },
};

/// Read-only view over the game used to build replays.
pub struct GameView<'a> {
    /// Current phase.
    pub phase: GamePhase,
    /// Deadline of the running phase timer.
    pub deadline: Option<SystemTime>,
    /// Game rules.
    pub settings: &'a GameSettings,
    /// Registry.
    pub sessions: &'a SessionRegistry,
    /// Ledger.
    pub ledger: &'a SubmissionLedger,
    /// Selections.
    pub selection: &'a SelectionCoordinator,
    /// Voting rounds.
    pub voting: &'a VotingCoordinator,
}

/// Replay of the current phase for `player`.
pub fn replay(view: &GameView<'_>, player: &PlayerId) -> Replay {
    let end_time = view.deadline.map(format_system_time);
    match view.phase {
        GamePhase::Lobby => Replay::Lobby,
        GamePhase::Playing(round) => Replay::Playing {
            round,
            target: view.settings.target_for(round),
            end_time,
            entries: view
                .ledger
                .entries(player, round)
                .map(EntryView::from)
                .collect(),
        },
        GamePhase::Selecting(round) => {
            let confirmed = view.selection.selection(player, round).map(|s| s.prompt_id);
            let provisional = match confirmed {
                Some(_) => None,
                None => view
                    .ledger
                    .last_valid(player, round)
                    .and_then(|e| e.prompt_id()),
            };
            Replay::Selecting {
                round,
                images: view
                    .ledger
                    .valid_entries(player, round)
                    .map(EntryView::from)
                    .collect(),
                confirmed_prompt_id: confirmed,
                provisional_prompt_id: provisional,
                end_time,
                blocked: view
                    .selection
                    .blocked(view.sessions, round)
                    .contains(player),
            }
        }
        GamePhase::Voting(round) => Replay::Voting {
            round,
            candidates: view
                .voting
                .round(round)
                .map(|v| v.candidates_for(player).map(CandidateView::from).collect())
                .unwrap_or_default(),
            has_voted: view.voting.has_voted(player, round),
        },
        GamePhase::Results(round) => Replay::Results {
            round,
            results: view
                .voting
                .round(round)
                .map(|v| scoring::round_results(view.sessions, v))
                .unwrap_or_default(),
            scores: scoring::scores(view.sessions),
        },
        GamePhase::GameOver => Replay::GameOver {
            standings: scoring::standings(
                view.sessions,
                view.ledger,
                view.settings.total_rounds,
            ),
        },
    }
}
