use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Stable player identity, kept by the client across reconnects.
pub type PlayerId = Uuid;

/// Identifier of a single WebSocket connection. A player owns at most one at a time.
pub type ConnectionId = Uuid;

/// Round number, starting at 1.
pub type Round = u8;

/// Server-issued identifier of a valid ledger entry. Error entries never get one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct PromptId(pub u64);

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a ledger entry, issued at submission time while generation is pending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two experiment teams players are split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Team {
    /// Control team, always paired with Bud.
    A,
    /// Treatment team, paired with Spud from round 2 onwards.
    B,
}

/// Companion character shown to a player while prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Character {
    /// Neutral assistant.
    Bud,
    /// Sustainability-minded plant.
    Spud,
}

impl Character {
    /// Character a team member sees in a given round.
    ///
    /// Round 1 is the control round for everyone; afterwards team B switches to Spud.
    pub fn for_round(team: Option<Team>, round: Round) -> Self {
        match (team, round) {
            (_, 1) => Character::Bud,
            (Some(Team::B), _) => Character::Spud,
            _ => Character::Bud,
        }
    }

    /// Character bound to a team outside of any round (lobby display).
    pub fn for_team(team: Team) -> Self {
        match team {
            Team::A => Character::Bud,
            Team::B => Character::Spud,
        }
    }
}

/// Image players try to reproduce during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TargetImage {
    /// Target identifier.
    pub id: u32,
    /// URL of the static asset.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_one_is_control_for_everyone() {
        assert_eq!(Character::for_round(Some(Team::B), 1), Character::Bud);
        assert_eq!(Character::for_round(Some(Team::A), 1), Character::Bud);
    }

    #[test]
    fn team_b_sees_spud_after_round_one() {
        assert_eq!(Character::for_round(Some(Team::B), 2), Character::Spud);
        assert_eq!(Character::for_round(Some(Team::B), 3), Character::Spud);
        assert_eq!(Character::for_round(Some(Team::A), 3), Character::Bud);
        assert_eq!(Character::for_round(None, 2), Character::Bud);
    }
}
