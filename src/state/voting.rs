//! Voting rounds: a captured set of required voters and immutable votes.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::state::{
    game::{PlayerId, PromptId, Round},
    selection::SelectionCoordinator,
    session::SessionRegistry,
};

/// An image up for vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Author of the image.
    pub player: PlayerId,
    /// Selected identifier.
    pub prompt_id: PromptId,
    /// Prompt text.
    pub prompt: String,
    /// Image reference.
    pub image_ref: String,
}

/// A stored vote. Never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Round the vote belongs to.
    pub round: Round,
    /// Who voted.
    pub voter: PlayerId,
    /// Who received the vote.
    pub votee: PlayerId,
    /// The votee's selected identifier at vote time, kept for auditing.
    pub prompt_id: PromptId,
}

/// Rejections of [`VotingCoordinator::cast_vote`]. Nothing is stored on rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    /// Voting for the round is not open.
    #[error("voting is not open for round {0}")]
    NotOpen(Round),
    /// Players cannot vote for their own image.
    #[error("you cannot vote for your own image")]
    SelfVote,
    /// The voter already voted this round.
    #[error("you already voted this round")]
    DuplicateVote,
    /// The votee has no image in this round.
    #[error("player `{0}` has no image up for vote")]
    UnknownCandidate(PlayerId),
}

impl VoteError {
    /// Stable reason code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOpen(_) => "voting_not_open",
            Self::SelfVote => "self_vote",
            Self::DuplicateVote => "duplicate_vote",
            Self::UnknownCandidate(_) => "unknown_candidate",
        }
    }
}

/// State of one round's voting.
#[derive(Debug, Clone)]
pub struct VotingRound {
    round: Round,
    active_set: IndexSet<PlayerId>,
    candidates: IndexMap<PlayerId, Candidate>,
    votes: IndexMap<PlayerId, Vote>,
    closed: bool,
}

impl VotingRound {
    /// Round number.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Voters captured when voting opened. Never changes afterwards.
    pub fn active_set(&self) -> &IndexSet<PlayerId> {
        &self.active_set
    }

    /// Candidates in selection order.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    /// Candidates a given player may vote for.
    pub fn candidates_for(&self, viewer: &PlayerId) -> impl Iterator<Item = &Candidate> {
        let viewer = *viewer;
        self.candidates.values().filter(move |c| c.player != viewer)
    }

    /// Stored votes in arrival order.
    pub fn votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }

    /// The vote a player cast, if any.
    pub fn vote_of(&self, voter: &PlayerId) -> Option<&Vote> {
        self.votes.get(voter)
    }

    /// Captured voters that have not voted yet. Disconnected members stay listed.
    pub fn missing_voters(&self) -> Vec<PlayerId> {
        self.active_set
            .iter()
            .filter(|id| !self.votes.contains_key(*id))
            .copied()
            .collect()
    }

    /// Every captured voter has voted. An empty set is complete.
    pub fn is_complete(&self) -> bool {
        self.active_set.iter().all(|id| self.votes.contains_key(id))
    }

    /// Votes received per candidate, zero included, in candidate order.
    pub fn tally(&self) -> IndexMap<PlayerId, u32> {
        let mut tally: IndexMap<PlayerId, u32> =
            self.candidates.keys().map(|id| (*id, 0)).collect();
        for vote in self.votes.values() {
            *tally.entry(vote.votee).or_insert(0) += 1;
        }
        tally
    }
}

/// Voting state of every round of the current game.
#[derive(Debug, Clone, Default)]
pub struct VotingCoordinator {
    rounds: IndexMap<Round, VotingRound>,
}

impl VotingCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open voting for `round`, capturing the players that are connected and hold a selection.
    ///
    /// Opening twice returns the round captured the first time.
    pub fn open_voting(
        &mut self,
        round: Round,
        sessions: &SessionRegistry,
        selections: &SelectionCoordinator,
    ) -> &VotingRound {
        self.rounds.entry(round).or_insert_with(|| {
            let candidates: IndexMap<PlayerId, Candidate> = selections
                .selections(round)
                .map(|s| {
                    (
                        s.player,
                        Candidate {
                            player: s.player,
                            prompt_id: s.prompt_id,
                            prompt: s.prompt.clone(),
                            image_ref: s.image_ref.clone(),
                        },
                    )
                })
                .collect();
            let active_set = candidates
                .keys()
                .filter(|id| sessions.is_connected(id))
                .copied()
                .collect();
            VotingRound {
                round,
                active_set,
                candidates,
                votes: IndexMap::new(),
                closed: false,
            }
        })
    }

    /// Store a vote of `voter` for `votee`'s selected image.
    ///
    /// The stored identifier is the server's view of the votee's selection.
    pub fn cast_vote(
        &mut self,
        voter: PlayerId,
        round: Round,
        votee: PlayerId,
    ) -> Result<&Vote, VoteError> {
        let voting = self
            .rounds
            .get_mut(&round)
            .filter(|v| !v.closed)
            .ok_or(VoteError::NotOpen(round))?;
        if voter == votee {
            return Err(VoteError::SelfVote);
        }
        if voting.votes.contains_key(&voter) {
            return Err(VoteError::DuplicateVote);
        }
        let candidate = voting
            .candidates
            .get(&votee)
            .ok_or(VoteError::UnknownCandidate(votee))?;

        let vote = Vote {
            round,
            voter,
            votee,
            prompt_id: candidate.prompt_id,
        };
        Ok(voting.votes.entry(voter).or_insert(vote))
    }

    /// Stop accepting votes for the round.
    pub fn close(&mut self, round: Round) {
        if let Some(voting) = self.rounds.get_mut(&round) {
            voting.closed = true;
        }
    }

    /// Voting state of a round.
    pub fn round(&self, round: Round) -> Option<&VotingRound> {
        self.rounds.get(&round)
    }

    /// True once every captured voter voted. Unopened rounds are never complete.
    pub fn is_complete(&self, round: Round) -> bool {
        self.rounds.get(&round).is_some_and(VotingRound::is_complete)
    }

    /// True when the player already voted in the round.
    pub fn has_voted(&self, voter: &PlayerId, round: Round) -> bool {
        self.rounds
            .get(&round)
            .is_some_and(|v| v.votes.contains_key(voter))
    }

    /// Drop every round.
    pub fn clear(&mut self) {
        self.rounds.clear();
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::state::ledger::{GenerationOutcome, SubmissionLedger};

    struct Fixture {
        sessions: SessionRegistry,
        ledger: SubmissionLedger,
        selection: SelectionCoordinator,
        voting: VotingCoordinator,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sessions: SessionRegistry::new(40, 3),
                ledger: SubmissionLedger::new(),
                selection: SelectionCoordinator::new(),
                voting: VotingCoordinator::new(),
            }
        }

        fn selected_player(&mut self, name: &str) -> (PlayerId, Uuid) {
            let conn = Uuid::new_v4();
            let id = self.sessions.join(None, name, conn, false).unwrap().player;
            let entry = self.ledger.append(id, 1, name);
            let prompt = self
                .ledger
                .complete(
                    entry,
                    GenerationOutcome::Image {
                        image_ref: format!("/img/{name}.png"),
                    },
                )
                .unwrap()
                .prompt_id();
            self.selection
                .select_image(&self.ledger, id, 1, prompt)
                .unwrap();
            (id, conn)
        }

        fn open(&mut self) -> VotingRound {
            self.voting
                .open_voting(1, &self.sessions, &self.selection)
                .clone()
        }
    }

    #[test]
    fn self_and_duplicate_votes_are_rejected() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.selected_player("alice");
        let (bob, _) = fx.selected_player("bob");
        let (carol, _) = fx.selected_player("carol");
        fx.open();

        assert_eq!(fx.voting.cast_vote(alice, 1, alice), Err(VoteError::SelfVote));
        fx.voting.cast_vote(alice, 1, bob).unwrap();
        assert_eq!(
            fx.voting.cast_vote(alice, 1, carol),
            Err(VoteError::DuplicateVote)
        );

        let round = fx.voting.round(1).unwrap();
        assert_eq!(round.votes().count(), 1);
        assert_eq!(round.vote_of(&alice).unwrap().votee, bob);
    }

    #[test]
    fn active_set_is_captured_once() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.selected_player("alice");
        let (bob, bob_conn) = fx.selected_player("bob");
        let first = fx.open();
        assert_eq!(first.active_set().len(), 2);

        fx.sessions.disconnect(bob_conn);
        fx.selected_player("carol");
        let again = fx.open();
        assert_eq!(again.active_set(), first.active_set());
        assert!(again.active_set().contains(&alice));
        assert!(again.active_set().contains(&bob));
    }

    #[test]
    fn disconnected_members_stay_required() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.selected_player("alice");
        let (bob, bob_conn) = fx.selected_player("bob");
        fx.open();

        fx.voting.cast_vote(alice, 1, bob).unwrap();
        fx.sessions.disconnect(bob_conn);
        assert!(!fx.voting.is_complete(1));
        assert_eq!(fx.voting.round(1).unwrap().missing_voters(), vec![bob]);

        fx.voting.cast_vote(bob, 1, alice).unwrap();
        assert!(fx.voting.is_complete(1));
    }

    #[test]
    fn voters_outside_the_set_are_accepted_but_not_required() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.selected_player("alice");
        let (bob, _) = fx.selected_player("bob");
        fx.open();
        let late = fx
            .sessions
            .join(None, "late", Uuid::new_v4(), false)
            .unwrap()
            .player;

        let vote = fx.voting.cast_vote(late, 1, alice).unwrap().clone();
        assert_eq!(vote.votee, alice);
        assert!(!fx.voting.is_complete(1));

        fx.voting.cast_vote(alice, 1, bob).unwrap();
        fx.voting.cast_vote(bob, 1, alice).unwrap();
        assert!(fx.voting.is_complete(1));
        assert_eq!(fx.voting.round(1).unwrap().tally()[&alice], 2);
    }

    #[test]
    fn closed_or_unopened_rounds_refuse_votes() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.selected_player("alice");
        let (bob, _) = fx.selected_player("bob");
        assert_eq!(fx.voting.cast_vote(alice, 1, bob), Err(VoteError::NotOpen(1)));

        fx.open();
        fx.voting.close(1);
        assert_eq!(fx.voting.cast_vote(alice, 1, bob), Err(VoteError::NotOpen(1)));
        assert_eq!(
            fx.voting.cast_vote(alice, 2, bob).unwrap_err(),
            VoteError::NotOpen(2)
        );
    }

    #[test]
    fn votes_for_players_without_an_image_are_rejected() {
        let mut fx = Fixture::new();
        let (alice, _) = fx.selected_player("alice");
        fx.open();
        let ghost = Uuid::new_v4();
        assert_eq!(
            fx.voting.cast_vote(alice, 1, ghost),
            Err(VoteError::UnknownCandidate(ghost))
        );
        assert!(!fx.voting.is_complete(1));
    }
}
