//! Session registry: stable player identities and their connection status.
//!
//! Sessions survive disconnects. Only an explicit removal (lobby management)
//! or a clear of the lobby drops one.

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::{Rng, seq::SliceRandom};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::state::game::{Character, ConnectionId, PlayerId, Round, Team};

/// Secret handed to the owner of a session in `joined`; the only way to reattach.
///
/// Distinct from the public [`PlayerId`], which other players see in candidates and scores.
pub type ReconnectToken = Uuid;

/// Whether a session currently owns a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A socket is attached.
    Connected,
    /// The last socket went away; the session is kept.
    Disconnected,
}

/// Everything the server knows about one player.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Stable public identity.
    pub id: PlayerId,
    /// Private credential for reattaching after a disconnect.
    pub reconnect_token: ReconnectToken,
    /// Name shown to other players.
    pub name: String,
    /// Team, once assigned.
    pub team: Option<Team>,
    /// Accumulated votes over every finished round.
    pub score: u32,
    /// Votes received per round, index 0 is round 1.
    pub round_scores: Vec<u32>,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Socket currently bound to the session.
    pub connection: Option<ConnectionId>,
    /// Joined with the shared admin credential. Gamemasters never play.
    pub gamemaster: bool,
    /// Currently holds the admin role.
    pub is_admin: bool,
}

impl PlayerSession {
    fn new(
        id: PlayerId,
        reconnect_token: ReconnectToken,
        name: String,
        connection: ConnectionId,
        gamemaster: bool,
        rounds: usize,
    ) -> Self {
        Self {
            id,
            reconnect_token,
            name,
            team: None,
            score: 0,
            round_scores: vec![0; rounds],
            status: ConnectionStatus::Connected,
            connection: Some(connection),
            gamemaster,
            is_admin: false,
        }
    }

    /// True while a socket is attached.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Gamemasters are staff, everyone else competes.
    pub fn is_participant(&self) -> bool {
        !self.gamemaster
    }

    /// Character for the given round, `None` outside of rounds.
    pub fn character(&self, round: Option<Round>) -> Option<Character> {
        match round {
            Some(round) => Some(Character::for_round(self.team, round)),
            None => self.team.map(Character::for_team),
        }
    }
}

/// How a join request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// A new session was created.
    Fresh,
    /// A disconnected session was reattached to the new socket.
    Reattached,
}

/// Result of [`SessionRegistry::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Identity of the (possibly new) session.
    pub player: PlayerId,
    /// Credential to send back to the owner only.
    pub token: ReconnectToken,
    /// Fresh or reattached.
    pub kind: JoinKind,
}

/// Team split produced by [`SessionRegistry::assign_teams`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamSplit {
    /// Members of team A.
    pub team_a: Vec<PlayerId>,
    /// Members of team B.
    pub team_b: Vec<PlayerId>,
    /// Disconnected players dropped from the lobby.
    pub dropped: Vec<PlayerId>,
}

/// Failures raised by the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The identity is already bound to another live connection.
    #[error("player `{0}` is already connected elsewhere")]
    AlreadyConnected(PlayerId),
    /// No session exists for the identity.
    #[error("unknown player `{0}`")]
    UnknownPlayer(PlayerId),
    /// The connection is not bound to any session.
    #[error("connection has not joined the game")]
    UnknownConnection,
    /// Fresh joins are refused once the lobby is full.
    #[error("the game is full ({max} players)")]
    LobbyFull {
        /// Configured capacity.
        max: usize,
    },
    /// Team assignment needs more connected players.
    #[error("need at least {required} connected players to assign teams, found {connected}")]
    NotEnoughPlayers {
        /// Minimum connected participants.
        required: usize,
        /// Connected participants found.
        connected: usize,
    },
    /// The operation only applies to competing players.
    #[error("player `{0}` is a gamemaster, not a participant")]
    NotAParticipant(PlayerId),
}

/// Registry of every session, in join order.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: IndexMap<PlayerId, PlayerSession>,
    connections: HashMap<ConnectionId, PlayerId>,
    tokens: HashMap<ReconnectToken, PlayerId>,
    max_players: usize,
    rounds: usize,
}

impl SessionRegistry {
    /// Create an empty registry accepting up to `max_players` participants.
    pub fn new(max_players: usize, rounds: usize) -> Self {
        Self {
            sessions: IndexMap::new(),
            connections: HashMap::new(),
            tokens: HashMap::new(),
            max_players,
            rounds,
        }
    }

    /// Attach `connection` to the session owning `token`, creating one when unknown.
    ///
    /// An unknown or missing token is never an error: it degrades to a fresh join
    /// with a server-minted identity. A public player id is not a token.
    pub fn join(
        &mut self,
        token: Option<ReconnectToken>,
        name: &str,
        connection: ConnectionId,
        gamemaster: bool,
    ) -> Result<JoinOutcome, SessionError> {
        let name = name.trim();

        if let Some(id) = token.and_then(|t| self.tokens.get(&t).copied())
            && let Some(session) = self.sessions.get_mut(&id)
        {
            if session.is_connected() {
                return Err(SessionError::AlreadyConnected(id));
            }
            session.status = ConnectionStatus::Connected;
            session.connection = Some(connection);
            if !name.is_empty() && !session.gamemaster {
                session.name = name.to_string();
            }
            session.gamemaster |= gamemaster;
            self.connections.insert(connection, id);
            return Ok(JoinOutcome {
                player: id,
                token: session.reconnect_token,
                kind: JoinKind::Reattached,
            });
        }

        if !gamemaster && self.participants().count() >= self.max_players {
            return Err(SessionError::LobbyFull {
                max: self.max_players,
            });
        }

        let id = Uuid::new_v4();
        let token = Uuid::new_v4();
        let display = if gamemaster {
            "Gamemaster".to_string()
        } else if name.is_empty() {
            format!("Player{}", self.sessions.len() + 1)
        } else {
            name.to_string()
        };
        self.sessions.insert(
            id,
            PlayerSession::new(id, token, display, connection, gamemaster, self.rounds),
        );
        self.connections.insert(connection, id);
        self.tokens.insert(token, id);
        Ok(JoinOutcome {
            player: id,
            token,
            kind: JoinKind::Fresh,
        })
    }

    /// Mark the owner of `connection` as disconnected.
    ///
    /// Returns `None` when the connection was already superseded or never joined.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Option<PlayerId> {
        let id = self.connections.remove(&connection)?;
        let session = self.sessions.get_mut(&id)?;
        if session.connection != Some(connection) {
            return None;
        }
        session.status = ConnectionStatus::Disconnected;
        session.connection = None;
        Some(id)
    }

    /// Resolve the session bound to a live connection.
    pub fn player_for(&self, connection: ConnectionId) -> Result<PlayerId, SessionError> {
        self.connections
            .get(&connection)
            .copied()
            .ok_or(SessionError::UnknownConnection)
    }

    /// Look a session up.
    pub fn get(&self, id: &PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(id)
    }

    /// Look a session up mutably.
    pub fn get_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(id)
    }

    /// Look a session up or fail with [`SessionError::UnknownPlayer`].
    pub fn require(&self, id: &PlayerId) -> Result<&PlayerSession, SessionError> {
        self.sessions.get(id).ok_or(SessionError::UnknownPlayer(*id))
    }

    /// Connection status of a session, `false` for unknown identities.
    pub fn is_connected(&self, id: &PlayerId) -> bool {
        self.sessions.get(id).is_some_and(PlayerSession::is_connected)
    }

    /// Every session in join order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Competing players, connected or not.
    pub fn participants(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values().filter(|s| s.is_participant())
    }

    /// Competing players with a live socket.
    pub fn connected_participants(&self) -> impl Iterator<Item = &PlayerSession> {
        self.participants().filter(|s| s.is_connected())
    }

    /// Live connections of every session matching `filter`.
    pub fn connections_where<F>(&self, filter: F) -> Vec<ConnectionId>
    where
        F: Fn(&PlayerSession) -> bool,
    {
        self.sessions
            .values()
            .filter(|s| filter(s))
            .filter_map(|s| s.connection)
            .collect()
    }

    /// Delete a session outright, returning it with the connection it still held.
    pub fn remove(&mut self, id: &PlayerId) -> Option<PlayerSession> {
        let session = self.sessions.shift_remove(id)?;
        self.tokens.remove(&session.reconnect_token);
        if let Some(connection) = session.connection {
            self.connections.remove(&connection);
        }
        Some(session)
    }

    /// Remove every participant, keeping gamemaster sessions.
    pub fn clear_participants(&mut self) -> Vec<PlayerSession> {
        let ids: Vec<PlayerId> = self.participants().map(|s| s.id).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Randomly split connected participants into two balanced teams.
    ///
    /// Disconnected participants are dropped from the lobby; they can join again later.
    pub fn assign_teams<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<TeamSplit, SessionError> {
        let connected = self.connected_participants().count();
        if connected < 2 {
            return Err(SessionError::NotEnoughPlayers {
                required: 2,
                connected,
            });
        }

        let dropped: Vec<PlayerId> = self
            .participants()
            .filter(|s| !s.is_connected())
            .map(|s| s.id)
            .collect();
        for id in &dropped {
            self.remove(id);
        }

        let mut ids: Vec<PlayerId> = self.participants().map(|s| s.id).collect();
        ids.shuffle(rng);
        let midpoint = ids.len() / 2;
        let (team_a, team_b) = ids.split_at(midpoint);

        for id in team_a {
            if let Some(session) = self.sessions.get_mut(id) {
                session.team = Some(Team::A);
            }
        }
        for id in team_b {
            if let Some(session) = self.sessions.get_mut(id) {
                session.team = Some(Team::B);
            }
        }

        Ok(TeamSplit {
            team_a: team_a.to_vec(),
            team_b: team_b.to_vec(),
            dropped,
        })
    }

    /// Give every participant without a team a seat on the smaller team.
    ///
    /// Returns the players whose team changed.
    pub fn balance_unassigned<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<PlayerId> {
        let mut unassigned: Vec<PlayerId> = self
            .participants()
            .filter(|s| s.team.is_none())
            .map(|s| s.id)
            .collect();
        unassigned.shuffle(rng);

        for id in &unassigned {
            let on_a = self.participants().filter(|s| s.team == Some(Team::A)).count();
            let on_b = self.participants().filter(|s| s.team == Some(Team::B)).count();
            let team = if on_a < on_b { Team::A } else { Team::B };
            if let Some(session) = self.sessions.get_mut(id) {
                session.team = Some(team);
            }
        }
        unassigned
    }

    /// Move a participant to `team`.
    pub fn set_team(&mut self, id: &PlayerId, team: Team) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or(SessionError::UnknownPlayer(*id))?;
        if session.gamemaster {
            return Err(SessionError::NotAParticipant(*id));
        }
        session.team = Some(team);
        Ok(())
    }

    /// Credit `votes` to a player for `round`.
    pub fn record_round_score(&mut self, id: &PlayerId, round: Round, votes: u32) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.score += votes;
            if let Some(slot) = session.round_scores.get_mut(usize::from(round) - 1) {
                *slot = votes;
            }
        }
    }

    /// Forget scores and teams ahead of a new game. Connections are untouched.
    pub fn reset_progress(&mut self) {
        for session in self.sessions.values_mut() {
            session.score = 0;
            session.round_scores = vec![0; self.rounds];
            if session.is_participant() {
                session.team = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(40, 3)
    }

    #[test]
    fn unknown_token_is_a_fresh_join() {
        let mut reg = registry();
        let token = Uuid::new_v4();
        let outcome = reg.join(Some(token), "alice", Uuid::new_v4(), false).unwrap();
        assert_eq!(outcome.kind, JoinKind::Fresh);
        assert_ne!(outcome.player, token);
        assert_ne!(outcome.token, token);
    }

    #[test]
    fn public_id_of_a_disconnected_player_does_not_reattach() {
        let mut reg = registry();
        let conn = Uuid::new_v4();
        let victim = reg.join(None, "bob", conn, false).unwrap().player;
        reg.disconnect(conn);

        let outcome = reg.join(Some(victim), "mallory", Uuid::new_v4(), false).unwrap();
        assert_eq!(outcome.kind, JoinKind::Fresh);
        assert_ne!(outcome.player, victim);
        let bob = reg.get(&victim).unwrap();
        assert_eq!(bob.name, "bob");
        assert!(!bob.is_connected());
    }

    #[test]
    fn removed_session_token_is_forgotten() {
        let mut reg = registry();
        let outcome = reg.join(None, "alice", Uuid::new_v4(), false).unwrap();
        reg.remove(&outcome.player);

        let again = reg.join(Some(outcome.token), "alice", Uuid::new_v4(), false).unwrap();
        assert_eq!(again.kind, JoinKind::Fresh);
    }

    #[test]
    fn disconnect_keeps_the_session() {
        let mut reg = registry();
        let conn = Uuid::new_v4();
        let id = reg.join(None, "alice", conn, false).unwrap().player;

        assert_eq!(reg.disconnect(conn), Some(id));
        let session = reg.get(&id).unwrap();
        assert_eq!(session.status, ConnectionStatus::Disconnected);
        assert!(session.connection.is_none());
    }

    #[test]
    fn reattach_preserves_team_and_score() {
        let mut reg = registry();
        let conn = Uuid::new_v4();
        let joined = reg.join(None, "alice", conn, false).unwrap();
        let id = joined.player;
        reg.set_team(&id, Team::B).unwrap();
        reg.record_round_score(&id, 1, 2);
        reg.disconnect(conn);

        let next = Uuid::new_v4();
        let outcome = reg.join(Some(joined.token), "alice", next, false).unwrap();
        assert_eq!(outcome.kind, JoinKind::Reattached);
        let session = reg.get(&id).unwrap();
        assert_eq!(session.team, Some(Team::B));
        assert_eq!(session.score, 2);
        assert_eq!(reg.player_for(next), Ok(id));
    }

    #[test]
    fn second_live_connection_is_rejected() {
        let mut reg = registry();
        let joined = reg.join(None, "alice", Uuid::new_v4(), false).unwrap();
        let id = joined.player;
        let err = reg.join(Some(joined.token), "alice", Uuid::new_v4(), false).unwrap_err();
        assert_eq!(err, SessionError::AlreadyConnected(id));
    }

    #[test]
    fn stale_connection_disconnect_is_ignored() {
        let mut reg = registry();
        let first = Uuid::new_v4();
        let joined = reg.join(None, "alice", first, false).unwrap();
        let id = joined.player;
        reg.disconnect(first);
        let second = Uuid::new_v4();
        reg.join(Some(joined.token), "alice", second, false).unwrap();

        assert_eq!(reg.disconnect(first), None);
        assert!(reg.is_connected(&id));
    }

    #[test]
    fn lobby_capacity_only_counts_participants() {
        let mut reg = SessionRegistry::new(1, 3);
        reg.join(None, "alice", Uuid::new_v4(), false).unwrap();
        reg.join(None, "code", Uuid::new_v4(), true).unwrap();
        let err = reg.join(None, "bob", Uuid::new_v4(), false).unwrap_err();
        assert_eq!(err, SessionError::LobbyFull { max: 1 });
    }

    #[test]
    fn team_assignment_is_balanced_and_drops_disconnected() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(7);
        for name in ["a", "b", "c", "d", "e"] {
            reg.join(None, name, Uuid::new_v4(), false).unwrap();
        }
        let gone = Uuid::new_v4();
        let gone_id = reg.join(None, "gone", gone, false).unwrap().player;
        reg.disconnect(gone);

        let split = reg.assign_teams(&mut rng).unwrap();
        assert_eq!(split.dropped, vec![gone_id]);
        assert_eq!(split.team_a.len(), 2);
        assert_eq!(split.team_b.len(), 3);
        assert!(reg.get(&gone_id).is_none());
    }

    #[test]
    fn team_assignment_needs_two_connected_players() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(1);
        reg.join(None, "a", Uuid::new_v4(), false).unwrap();
        reg.join(None, "gm", Uuid::new_v4(), true).unwrap();
        assert!(matches!(
            reg.assign_teams(&mut rng),
            Err(SessionError::NotEnoughPlayers { connected: 1, .. })
        ));
    }

    #[test]
    fn gamemasters_cannot_join_a_team() {
        let mut reg = registry();
        let gm = reg.join(None, "code", Uuid::new_v4(), true).unwrap().player;
        assert_eq!(
            reg.set_team(&gm, Team::A),
            Err(SessionError::NotAParticipant(gm))
        );
    }
}
