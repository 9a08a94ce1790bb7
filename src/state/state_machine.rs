use std::fmt;

use thiserror::Error;

use crate::state::game::Round;

/// High-level phases the game can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamePhase {
    /// Players gather; teams can be managed.
    Lobby,
    /// Players submit prompts for the round.
    Playing(Round),
    /// Players confirm one of their valid images.
    Selecting(Round),
    /// Players vote for someone else's image.
    Voting(Round),
    /// Round results are displayed until the admin moves on.
    Results(Round),
    /// Final standings are displayed until the admin restarts.
    GameOver,
}

impl GamePhase {
    /// Round the phase belongs to, if any.
    pub fn round(&self) -> Option<Round> {
        match self {
            GamePhase::Playing(r)
            | GamePhase::Selecting(r)
            | GamePhase::Voting(r)
            | GamePhase::Results(r) => Some(*r),
            GamePhase::Lobby | GamePhase::GameOver => None,
        }
    }

    /// Phase name without the round.
    pub fn name(&self) -> &'static str {
        match self {
            GamePhase::Lobby => "lobby",
            GamePhase::Playing(_) => "playing",
            GamePhase::Selecting(_) => "selecting",
            GamePhase::Voting(_) => "voting",
            GamePhase::Results(_) => "results",
            GamePhase::GameOver => "game_over",
        }
    }

    /// Position along the forward-only progression of one game.
    fn ordinal(&self) -> u32 {
        match self {
            GamePhase::Lobby => 0,
            GamePhase::Playing(r) => u32::from(*r) * 4,
            GamePhase::Selecting(r) => u32::from(*r) * 4 + 1,
            GamePhase::Voting(r) => u32::from(*r) * 4 + 2,
            GamePhase::Results(r) => u32::from(*r) * 4 + 3,
            GamePhase::GameOver => u32::MAX,
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.round() {
            Some(round) => write!(f, "{}({round})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// Events that can be applied to the state machine.
///
/// Round-bound events carry the round they were issued for so that a trigger
/// arriving after the game moved on is recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Admin starts the game from the lobby.
    AdminStart,
    /// The round timer fired.
    RoundTimerExpired {
        /// Round the timer was armed for.
        round: Round,
    },
    /// Admin ends the prompting phase early.
    AdminEndRound {
        /// Round the admin saw.
        round: Round,
    },
    /// Every required player holds a selection.
    SelectionComplete {
        /// Round observed complete.
        round: Round,
    },
    /// The selection timer fired and auto-selection left nobody blocked.
    SelectionTimerExpired {
        /// Round the timer was armed for.
        round: Round,
    },
    /// Admin forces voting to open.
    AdminSkipSelection {
        /// Round the admin saw.
        round: Round,
    },
    /// Every captured voter has voted.
    VotingComplete {
        /// Round observed complete.
        round: Round,
    },
    /// Admin closes voting early.
    AdminSkipVoting {
        /// Round the admin saw.
        round: Round,
    },
    /// Admin leaves the results screen.
    AdminNextRound {
        /// Round the admin saw.
        round: Round,
    },
    /// Admin throws the game away and returns to the lobby.
    Restart,
}

impl GameEvent {
    /// Phase the event is meant to fire from, for round-bound events.
    fn source(&self) -> Option<GamePhase> {
        match *self {
            GameEvent::AdminStart | GameEvent::Restart => None,
            GameEvent::RoundTimerExpired { round } | GameEvent::AdminEndRound { round } => {
                Some(GamePhase::Playing(round))
            }
            GameEvent::SelectionComplete { round }
            | GameEvent::SelectionTimerExpired { round }
            | GameEvent::AdminSkipSelection { round } => Some(GamePhase::Selecting(round)),
            GameEvent::VotingComplete { round } | GameEvent::AdminSkipVoting { round } => {
                Some(GamePhase::Voting(round))
            }
            GameEvent::AdminNextRound { round } => Some(GamePhase::Results(round)),
        }
    }
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Errors raised by [`GameStateMachine::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The event belongs to a phase the game already left; it must be discarded.
    #[error("stale event {event:?} discarded in {current}")]
    Stale {
        /// Current phase.
        current: GamePhase,
        /// The outdated event.
        event: GameEvent,
    },
    /// The event makes no sense from the current phase.
    #[error(transparent)]
    Invalid(#[from] InvalidTransition),
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
}

/// Forward-only round/phase state machine.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
    total_rounds: Round,
}

impl GameStateMachine {
    /// Create a new state machine in the lobby for a game of `total_rounds` rounds.
    pub fn new(total_rounds: Round) -> Self {
        Self {
            phase: GamePhase::Lobby,
            version: 0,
            total_rounds: total_rounds.max(1),
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Number of rounds in a game.
    pub fn total_rounds(&self) -> Round {
        self.total_rounds
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
        }
    }

    /// Apply `event`, returning the new phase.
    ///
    /// Applying the same round-bound event twice yields one transition and one
    /// [`TransitionError::Stale`].
    pub fn apply(&mut self, event: GameEvent) -> Result<GamePhase, TransitionError> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, TransitionError> {
        let next = match (self.phase, event) {
            (GamePhase::Lobby, GameEvent::AdminStart) => GamePhase::Playing(1),
            (
                GamePhase::Playing(r),
                GameEvent::RoundTimerExpired { round } | GameEvent::AdminEndRound { round },
            ) if r == round => GamePhase::Selecting(r),
            (
                GamePhase::Selecting(r),
                GameEvent::SelectionComplete { round }
                | GameEvent::SelectionTimerExpired { round }
                | GameEvent::AdminSkipSelection { round },
            ) if r == round => GamePhase::Voting(r),
            (
                GamePhase::Voting(r),
                GameEvent::VotingComplete { round } | GameEvent::AdminSkipVoting { round },
            ) if r == round => GamePhase::Results(r),
            (GamePhase::Results(r), GameEvent::AdminNextRound { round }) if r == round => {
                if r < self.total_rounds {
                    GamePhase::Playing(r + 1)
                } else {
                    GamePhase::GameOver
                }
            }
            (from, GameEvent::Restart) if from != GamePhase::Lobby => GamePhase::Lobby,
            (from, event) => {
                return Err(match event.source() {
                    Some(source) if from.ordinal() > source.ordinal() => {
                        TransitionError::Stale {
                            current: from,
                            event,
                        }
                    }
                    _ => InvalidTransition { from, event }.into(),
                });
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut GameStateMachine, event: GameEvent) -> GamePhase {
        sm.apply(event).unwrap()
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = GameStateMachine::new(3);
        assert_eq!(sm.phase(), GamePhase::Lobby);
        assert_eq!(sm.snapshot().version, 0);
    }

    #[test]
    fn full_happy_path_through_game() {
        let mut sm = GameStateMachine::new(3);

        assert_eq!(apply(&mut sm, GameEvent::AdminStart), GamePhase::Playing(1));
        for round in 1..=3 {
            assert_eq!(
                apply(&mut sm, GameEvent::RoundTimerExpired { round }),
                GamePhase::Selecting(round)
            );
            assert_eq!(
                apply(&mut sm, GameEvent::SelectionComplete { round }),
                GamePhase::Voting(round)
            );
            assert_eq!(
                apply(&mut sm, GameEvent::VotingComplete { round }),
                GamePhase::Results(round)
            );
            let expected = if round < 3 {
                GamePhase::Playing(round + 1)
            } else {
                GamePhase::GameOver
            };
            assert_eq!(apply(&mut sm, GameEvent::AdminNextRound { round }), expected);
        }
        assert_eq!(apply(&mut sm, GameEvent::Restart), GamePhase::Lobby);
        assert_eq!(sm.snapshot().version, 14);
    }

    #[test]
    fn duplicate_trigger_transitions_once() {
        let mut sm = GameStateMachine::new(3);
        apply(&mut sm, GameEvent::AdminStart);

        apply(&mut sm, GameEvent::AdminEndRound { round: 1 });
        let err = sm
            .apply(GameEvent::RoundTimerExpired { round: 1 })
            .unwrap_err();
        assert!(matches!(err, TransitionError::Stale { .. }));
        assert_eq!(sm.phase(), GamePhase::Selecting(1));
        assert_eq!(sm.snapshot().version, 2);
    }

    #[test]
    fn timer_from_a_previous_round_is_stale() {
        let mut sm = GameStateMachine::new(3);
        apply(&mut sm, GameEvent::AdminStart);
        apply(&mut sm, GameEvent::AdminEndRound { round: 1 });
        apply(&mut sm, GameEvent::AdminSkipSelection { round: 1 });
        apply(&mut sm, GameEvent::AdminSkipVoting { round: 1 });
        apply(&mut sm, GameEvent::AdminNextRound { round: 1 });

        let err = sm
            .apply(GameEvent::SelectionTimerExpired { round: 1 })
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Stale {
                current: GamePhase::Playing(2),
                event: GameEvent::SelectionTimerExpired { round: 1 },
            }
        );
    }

    #[test]
    fn results_never_advance_without_the_admin() {
        let mut sm = GameStateMachine::new(1);
        apply(&mut sm, GameEvent::AdminStart);
        apply(&mut sm, GameEvent::AdminEndRound { round: 1 });
        apply(&mut sm, GameEvent::SelectionComplete { round: 1 });
        apply(&mut sm, GameEvent::VotingComplete { round: 1 });

        let err = sm.apply(GameEvent::VotingComplete { round: 1 }).unwrap_err();
        assert!(matches!(err, TransitionError::Stale { .. }));
        assert_eq!(
            apply(&mut sm, GameEvent::AdminNextRound { round: 1 }),
            GamePhase::GameOver
        );
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = GameStateMachine::new(3);
        let err = sm
            .apply(GameEvent::VotingComplete { round: 1 })
            .unwrap_err();
        match err {
            TransitionError::Invalid(invalid) => {
                assert_eq!(invalid.from, GamePhase::Lobby);
                assert_eq!(invalid.event, GameEvent::VotingComplete { round: 1 });
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            sm.apply(GameEvent::Restart),
            Err(TransitionError::Invalid(_))
        ));
    }

    #[test]
    fn restart_works_from_any_running_phase() {
        let mut sm = GameStateMachine::new(3);
        apply(&mut sm, GameEvent::AdminStart);
        apply(&mut sm, GameEvent::AdminEndRound { round: 1 });
        assert_eq!(apply(&mut sm, GameEvent::Restart), GamePhase::Lobby);
        assert_eq!(apply(&mut sm, GameEvent::AdminStart), GamePhase::Playing(1));
    }
}
