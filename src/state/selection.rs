//! Per-round image selection: one confirmed valid entry per player.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::state::{
    game::{EntryId, PlayerId, PromptId, Round},
    ledger::{EntryStatus, SubmissionLedger},
    session::SessionRegistry,
};

/// How a selection came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    /// The player confirmed it.
    Confirmed,
    /// The selection timer picked the latest valid entry.
    Timeout,
}

/// A player's chosen image for a round. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Owner.
    pub player: PlayerId,
    /// Round.
    pub round: Round,
    /// Ledger entry chosen.
    pub entry: EntryId,
    /// Selectable identifier of the entry.
    pub prompt_id: PromptId,
    /// Prompt text of the entry.
    pub prompt: String,
    /// Image reference of the entry.
    pub image_ref: String,
    /// Confirmation or timeout.
    pub source: SelectionSource,
}

/// Rejections of [`SelectionCoordinator::select_image`]. Nothing is stored on rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The identifier does not name a valid entry of this player for this round.
    #[error("prompt id does not belong to one of your images this round")]
    UnknownPromptId,
    /// The referenced submission failed to generate.
    #[error("images that failed to generate cannot be selected")]
    ErrorImageSelection,
    /// A selection already exists and cannot change.
    #[error("your selection for this round is already confirmed")]
    AlreadyConfirmed,
}

impl SelectionError {
    /// Stable reason code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownPromptId => "unknown_prompt_id",
            Self::ErrorImageSelection => "error_image_selection",
            Self::AlreadyConfirmed => "already_confirmed",
        }
    }
}

/// Outcome of [`SelectionCoordinator::timeout_resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutResolution {
    /// Selections created from each player's latest valid entry.
    pub resolved: Vec<Selection>,
    /// Required players left without any valid entry.
    pub blocked: Vec<PlayerId>,
}

/// Selections of the current game plus the per-round bookkeeping that drives completion.
#[derive(Debug, Clone, Default)]
pub struct SelectionCoordinator {
    selections: IndexMap<(PlayerId, Round), Selection>,
    excluded: HashSet<(PlayerId, Round)>,
    timed_out: HashSet<Round>,
}

impl SelectionCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm `prompt_id` as the player's image for `round`.
    ///
    /// A missing identifier means the client pointed at an error image, which carries none.
    pub fn select_image(
        &mut self,
        ledger: &SubmissionLedger,
        player: PlayerId,
        round: Round,
        prompt_id: Option<PromptId>,
    ) -> Result<&Selection, SelectionError> {
        if self.selections.contains_key(&(player, round)) {
            return Err(SelectionError::AlreadyConfirmed);
        }
        let prompt_id = prompt_id.ok_or(SelectionError::ErrorImageSelection)?;
        let entry = ledger
            .find_by_prompt(prompt_id)
            .filter(|e| e.player == player && e.round == round)
            .ok_or(SelectionError::UnknownPromptId)?;
        let EntryStatus::Valid { image_ref, .. } = &entry.status else {
            return Err(SelectionError::ErrorImageSelection);
        };

        let selection = Selection {
            player,
            round,
            entry: entry.id,
            prompt_id,
            prompt: entry.prompt.clone(),
            image_ref: image_ref.clone(),
            source: SelectionSource::Confirmed,
        };
        Ok(self.insert(selection))
    }

    /// Give every non-excluded participant lacking a selection their latest valid entry.
    ///
    /// Players with zero valid entries get nothing; the connected ones are reported blocked.
    pub fn timeout_resolve(
        &mut self,
        ledger: &SubmissionLedger,
        sessions: &SessionRegistry,
        round: Round,
    ) -> TimeoutResolution {
        self.timed_out.insert(round);
        let mut resolution = TimeoutResolution::default();

        for session in sessions.participants() {
            let key = (session.id, round);
            if self.selections.contains_key(&key) || self.excluded.contains(&key) {
                continue;
            }
            match self.auto_select(ledger, session.id, round) {
                Some(selection) => resolution.resolved.push(selection),
                None if session.is_connected() => resolution.blocked.push(session.id),
                None => {}
            }
        }
        resolution
    }

    /// Resolve a single player after the selection timer already fired.
    ///
    /// Used when a generation finishes late or a blocked player comes back.
    pub fn resolve_late(
        &mut self,
        ledger: &SubmissionLedger,
        player: PlayerId,
        round: Round,
    ) -> Option<Selection> {
        if !self.timed_out.contains(&round)
            || self.selections.contains_key(&(player, round))
            || self.excluded.contains(&(player, round))
        {
            return None;
        }
        self.auto_select(ledger, player, round)
    }

    fn auto_select(
        &mut self,
        ledger: &SubmissionLedger,
        player: PlayerId,
        round: Round,
    ) -> Option<Selection> {
        let entry = ledger.last_valid(&player, round)?;
        let EntryStatus::Valid {
            image_ref,
            prompt_id,
        } = &entry.status
        else {
            return None;
        };
        let selection = Selection {
            player,
            round,
            entry: entry.id,
            prompt_id: *prompt_id,
            prompt: entry.prompt.clone(),
            image_ref: image_ref.clone(),
            source: SelectionSource::Timeout,
        };
        Some(self.insert(selection).clone())
    }

    fn insert(&mut self, selection: Selection) -> &Selection {
        let key = (selection.player, selection.round);
        self.selections.entry(key).or_insert(selection)
    }

    /// Drop a player from the round's selection requirement. Returns `false` if already excluded.
    pub fn exclude(&mut self, player: PlayerId, round: Round) -> bool {
        self.excluded.insert((player, round))
    }

    /// True when the player was excluded from the round.
    pub fn is_excluded(&self, player: &PlayerId, round: Round) -> bool {
        self.excluded.contains(&(*player, round))
    }

    /// True once the selection timer of the round fired.
    pub fn timed_out(&self, round: Round) -> bool {
        self.timed_out.contains(&round)
    }

    /// The player's selection for the round.
    pub fn selection(&self, player: &PlayerId, round: Round) -> Option<&Selection> {
        self.selections.get(&(*player, round))
    }

    /// Every selection of the round in creation order.
    pub fn selections(&self, round: Round) -> impl Iterator<Item = &Selection> {
        self.selections.values().filter(move |s| s.round == round)
    }

    /// Required players still lacking a selection: connected, participating and not excluded.
    ///
    /// A player who selected stays required but is satisfied by construction.
    pub fn missing(&self, sessions: &SessionRegistry, round: Round) -> Vec<PlayerId> {
        sessions
            .connected_participants()
            .map(|s| s.id)
            .filter(|id| {
                !self.excluded.contains(&(*id, round)) && !self.selections.contains_key(&(*id, round))
            })
            .collect()
    }

    /// Players blocked after the timer fired, i.e. still missing once auto-selection ran.
    pub fn blocked(&self, sessions: &SessionRegistry, round: Round) -> Vec<PlayerId> {
        if self.timed_out(round) {
            self.missing(sessions, round)
        } else {
            Vec::new()
        }
    }

    /// Every required player holds a selection. An empty requirement is complete.
    pub fn is_complete(&self, sessions: &SessionRegistry, round: Round) -> bool {
        self.missing(sessions, round).is_empty()
    }

    /// Forget a player's bookkeeping, used when the player leaves the lobby.
    pub fn forget_player(&mut self, player: &PlayerId) {
        self.selections.retain(|(p, _), _| p != player);
        self.excluded.retain(|(p, _)| p != player);
    }

    /// Drop every selection, exclusion and timeout marker.
    pub fn clear(&mut self) {
        self.selections.clear();
        self.excluded.clear();
        self.timed_out.clear();
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::state::ledger::{GenerationErrorKind, GenerationOutcome};

    struct Fixture {
        sessions: SessionRegistry,
        ledger: SubmissionLedger,
        selection: SelectionCoordinator,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sessions: SessionRegistry::new(40, 3),
                ledger: SubmissionLedger::new(),
                selection: SelectionCoordinator::new(),
            }
        }

        fn player(&mut self, name: &str) -> (PlayerId, Uuid) {
            let conn = Uuid::new_v4();
            let id = self.sessions.join(None, name, conn, false).unwrap().player;
            (id, conn)
        }

        fn valid(&mut self, player: PlayerId, round: Round) -> PromptId {
            let id = self.ledger.append(player, round, "prompt");
            self.ledger
                .complete(
                    id,
                    GenerationOutcome::Image {
                        image_ref: format!("/img/{id}.png"),
                    },
                )
                .unwrap()
                .prompt_id()
                .unwrap()
        }

        fn error(&mut self, player: PlayerId, round: Round) {
            let id = self.ledger.append(player, round, "bad");
            self.ledger
                .complete(
                    id,
                    GenerationOutcome::Failed {
                        error_type: GenerationErrorKind::NoCandidates,
                        message: None,
                    },
                )
                .unwrap();
        }
    }

    #[test]
    fn confirming_a_valid_entry_stores_it_once() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.player("alice");
        let first = fx.valid(alice, 1);
        let second = fx.valid(alice, 1);

        let stored = fx
            .selection
            .select_image(&fx.ledger, alice, 1, Some(first))
            .unwrap()
            .clone();
        assert_eq!(stored.prompt_id, first);
        assert_eq!(stored.source, SelectionSource::Confirmed);

        let err = fx
            .selection
            .select_image(&fx.ledger, alice, 1, Some(second))
            .unwrap_err();
        assert_eq!(err, SelectionError::AlreadyConfirmed);
        assert_eq!(fx.selection.selection(&alice, 1).unwrap().prompt_id, first);
    }

    #[test]
    fn error_images_and_foreign_ids_are_rejected() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.player("alice");
        let (bob, _) = fx.player("bob");
        fx.error(alice, 1);
        let bobs = fx.valid(bob, 1);

        assert_eq!(
            fx.selection.select_image(&fx.ledger, alice, 1, None),
            Err(SelectionError::ErrorImageSelection)
        );
        assert_eq!(
            fx.selection.select_image(&fx.ledger, alice, 1, Some(bobs)),
            Err(SelectionError::UnknownPromptId)
        );
        assert_eq!(
            fx.selection
                .select_image(&fx.ledger, bob, 2, Some(bobs))
                .unwrap_err(),
            SelectionError::UnknownPromptId
        );
        assert!(fx.selection.selection(&alice, 1).is_none());
    }

    #[test]
    fn timeout_picks_latest_valid_and_blocks_zero_valid_players() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.player("alice");
        let (bob, _) = fx.player("bob");
        fx.valid(alice, 1);
        let latest = fx.valid(alice, 1);
        fx.error(alice, 1);
        fx.error(bob, 1);

        let resolution = fx.selection.timeout_resolve(&fx.ledger, &fx.sessions, 1);
        assert_eq!(resolution.resolved.len(), 1);
        assert_eq!(resolution.resolved[0].prompt_id, latest);
        assert_eq!(resolution.resolved[0].source, SelectionSource::Timeout);
        assert_eq!(resolution.blocked, vec![bob]);
        assert!(fx.selection.selection(&bob, 1).is_none());
        assert!(!fx.selection.is_complete(&fx.sessions, 1));
        assert_eq!(fx.selection.blocked(&fx.sessions, 1), vec![bob]);
    }

    #[test]
    fn exclusion_unblocks_completion() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.player("alice");
        let (bob, _) = fx.player("bob");
        let pick = fx.valid(alice, 1);
        fx.error(bob, 1);
        fx.selection
            .select_image(&fx.ledger, alice, 1, Some(pick))
            .unwrap();
        fx.selection.timeout_resolve(&fx.ledger, &fx.sessions, 1);
        assert!(!fx.selection.is_complete(&fx.sessions, 1));

        assert!(fx.selection.exclude(bob, 1));
        assert!(fx.selection.is_complete(&fx.sessions, 1));
    }

    #[test]
    fn disconnected_players_without_selection_are_not_required() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.player("alice");
        let (_bob, bob_conn) = fx.player("bob");
        let pick = fx.valid(alice, 1);
        fx.sessions.disconnect(bob_conn);

        assert!(!fx.selection.is_complete(&fx.sessions, 1));
        fx.selection
            .select_image(&fx.ledger, alice, 1, Some(pick))
            .unwrap();
        assert!(fx.selection.is_complete(&fx.sessions, 1));
    }

    #[test]
    fn late_valid_result_resolves_a_blocked_player() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.player("alice");
        assert!(fx.selection.resolve_late(&fx.ledger, alice, 1).is_none());

        fx.selection.timeout_resolve(&fx.ledger, &fx.sessions, 1);
        assert_eq!(fx.selection.blocked(&fx.sessions, 1), vec![alice]);

        let late = fx.valid(alice, 1);
        let resolved = fx.selection.resolve_late(&fx.ledger, alice, 1).unwrap();
        assert_eq!(resolved.prompt_id, late);
        assert!(fx.selection.is_complete(&fx.sessions, 1));
    }
}
