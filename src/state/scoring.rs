//! Result tables built from the voting state and the registry.

use std::cmp::Reverse;

use crate::{
    dto::game::{RoundResultView, ScoreView, StandingView},
    state::{
        game::{Character, Round},
        ledger::SubmissionLedger,
        session::SessionRegistry,
        voting::VotingRound,
    },
};

/// Votes per candidate of a round, most voted first.
pub fn round_results(sessions: &SessionRegistry, voting: &VotingRound) -> Vec<RoundResultView> {
    let tally = voting.tally();
    let mut results: Vec<RoundResultView> = voting
        .candidates()
        .map(|candidate| {
            let session = sessions.get(&candidate.player);
            let team = session.and_then(|s| s.team);
            RoundResultView {
                session_id: candidate.player,
                name: session.map(|s| s.name.clone()).unwrap_or_default(),
                team,
                character: Character::for_round(team, voting.round()),
                prompt_id: candidate.prompt_id,
                prompt: candidate.prompt.clone(),
                image_ref: candidate.image_ref.clone(),
                votes: tally.get(&candidate.player).copied().unwrap_or(0),
            }
        })
        .collect();
    results.sort_by_key(|r| Reverse(r.votes));
    results
}

/// Running totals of every participant, highest first.
pub fn scores(sessions: &SessionRegistry) -> Vec<ScoreView> {
    let mut scores: Vec<ScoreView> = sessions
        .participants()
        .map(|s| ScoreView {
            session_id: s.id,
            name: s.name.clone(),
            team: s.team,
            score: s.score,
        })
        .collect();
    scores.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    scores
}

/// Final ranking. Equal scores share a rank.
pub fn standings(
    sessions: &SessionRegistry,
    ledger: &SubmissionLedger,
    last_round: Round,
) -> Vec<StandingView> {
    let mut standings: Vec<StandingView> = sessions
        .participants()
        .map(|s| StandingView {
            rank: 0,
            session_id: s.id,
            name: s.name.clone(),
            team: s.team,
            character: s.character(Some(last_round)),
            score: s.score,
            round_scores: s.round_scores.clone(),
            prompt_count: ledger.total_count(&s.id),
        })
        .collect();
    standings.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

    let mut previous: Option<(u32, usize)> = None;
    for (index, standing) in standings.iter_mut().enumerate() {
        standing.rank = match previous {
            Some((score, rank)) if score == standing.score => rank,
            _ => index + 1,
        };
        previous = Some((standing.score, standing.rank));
    }
    standings
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn equal_scores_share_a_rank() {
        let mut sessions = SessionRegistry::new(40, 3);
        let ledger = SubmissionLedger::new();
        let a = sessions.join(None, "a", Uuid::new_v4(), false).unwrap().player;
        let b = sessions.join(None, "b", Uuid::new_v4(), false).unwrap().player;
        let c = sessions.join(None, "c", Uuid::new_v4(), false).unwrap().player;
        sessions.join(None, "gm", Uuid::new_v4(), true).unwrap();
        sessions.record_round_score(&a, 1, 2);
        sessions.record_round_score(&b, 1, 2);
        sessions.record_round_score(&c, 1, 1);

        let standings = standings(&sessions, &ledger, 3);
        let ranks: Vec<(Uuid, usize)> = standings.iter().map(|s| (s.session_id, s.rank)).collect();
        assert_eq!(ranks, vec![(a, 1), (b, 1), (c, 3)]);
        assert_eq!(standings[0].round_scores, vec![2, 0, 0]);
    }
}
