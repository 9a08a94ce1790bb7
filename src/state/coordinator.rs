//! The game coordinator: the single owner of every piece of game state.
//!
//! Every entry point is synchronous and returns an [`Outbox`] of effects
//! (messages, persistence jobs, timers, generation requests) that the service
//! layer carries out in order while it still holds the lock.

use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::GameSettings,
    dao::models::{
        GameEntity, PersistJob, PlayerEntity, PromptEntity, RoundEntity, SelectionEntity,
        VoteEntity, now_rfc3339,
    },
    dto::{
        admin::{
            ErrorAnalytics, GenerationErrorView, PlayerErrorSummary, PlayerStatusView,
            StatusReport,
        },
        format_system_time,
        game::{AdminPlayerView, CandidateView, EntryView, JoinRequest, PlayerView},
        phase::PhaseView,
        validation::validate_prompt,
        ws::{ClientMessage, ServerMessage},
    },
    error::GameError,
    state::{
        admin::{AdminFailover, AdminHandover},
        game::{Character, ConnectionId, EntryId, PlayerId, PromptId, Round, Team},
        ledger::{EntryStatus, GenerationOutcome, LedgerEntry, SubmissionLedger},
        recovery::{self, GameView},
        scoring,
        selection::{Selection, SelectionCoordinator, SelectionSource},
        session::{JoinKind, PlayerSession, SessionError, SessionRegistry},
        state_machine::{GameEvent, GamePhase, GameStateMachine, Snapshot, TransitionError},
        voting::VotingCoordinator,
    },
};

/// Phase timers armed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Prompting time of a round.
    Round,
    /// Selection time of a round.
    Selection,
}

/// Image generation to run outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Ledger entry waiting for the outcome.
    pub entry: EntryId,
    /// Author.
    pub player: PlayerId,
    /// Round of the submission.
    pub round: Round,
    /// Prompt text.
    pub prompt: String,
    /// Earlier prompts of the same player in the round, oldest first.
    pub context: Vec<String>,
}

/// Game happenings mirrored on the SSE streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The phase changed.
    PhaseChanged(PhaseView),
    /// Someone joined, left or changed team.
    LobbyChanged {
        /// Participants known.
        players: usize,
        /// Participants connected.
        connected: usize,
    },
    /// Selection cannot complete without an admin decision.
    SelectionBlocked {
        /// Round.
        round: Round,
        /// Players with no valid image.
        players: Vec<PlayerId>,
    },
    /// The admin role moved.
    AdminChanged {
        /// New holder.
        holder: PlayerId,
    },
}

/// Side effect requested by the coordinator.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Push a message to one socket.
    Send {
        /// Target socket.
        to: ConnectionId,
        /// Message.
        message: ServerMessage,
    },
    /// Close a socket after its pending messages.
    Close {
        /// Socket to close.
        connection: ConnectionId,
    },
    /// Hand a job to the persistence worker.
    Persist(PersistJob),
    /// Arm a phase timer.
    ScheduleTimer {
        /// Which timer.
        kind: TimerKind,
        /// Game the timer belongs to.
        game: Uuid,
        /// Round the timer belongs to.
        round: Round,
        /// Delay.
        after: Duration,
    },
    /// Start an image generation.
    Generate(GenerationRequest),
    /// Mirror an event on the SSE streams.
    Notify(Notice),
}

/// Ordered list of effects produced by one coordinator call.
#[derive(Debug, Default)]
pub struct Outbox {
    effects: Vec<Effect>,
}

impl Outbox {
    fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        self.push(Effect::Send { to, message });
    }

    fn persist(&mut self, job: PersistJob) {
        self.push(Effect::Persist(job));
    }

    fn notify(&mut self, notice: Notice) {
        self.push(Effect::Notify(notice));
    }

    /// Effects in emission order.
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Messages addressed to one socket, in order.
    pub fn messages_for(&self, connection: ConnectionId) -> Vec<&ServerMessage> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send { to, message } if *to == connection => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl IntoIterator for Outbox {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.effects.into_iter()
    }
}

/// Administrative commands, issued over the admin socket or the REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// Lobby to round 1.
    StartGame,
    /// Random balanced team split.
    AssignTeams,
    /// Close prompting early.
    EndRound {
        /// Expected round; defaults to the current one.
        round: Option<Round>,
    },
    /// Open voting without waiting for every selection.
    SkipSelection {
        /// Expected round; defaults to the current one.
        round: Option<Round>,
    },
    /// Close voting early.
    SkipVoting {
        /// Expected round; defaults to the current one.
        round: Option<Round>,
    },
    /// Leave the results screen.
    NextRound {
        /// Expected round; defaults to the current one.
        round: Option<Round>,
    },
    /// Back to the lobby, keeping sessions.
    Restart,
    /// Move a player to a team.
    SetTeam {
        /// Target player.
        player: PlayerId,
        /// New team.
        team: Team,
    },
    /// Drop a player from the lobby.
    RemovePlayer {
        /// Target player.
        player: PlayerId,
    },
    /// Drop every player from the lobby.
    ClearLobby,
    /// Release a blocked player from the current selection requirement.
    ExcludePlayer {
        /// Target player.
        player: PlayerId,
    },
}

impl TryFrom<ClientMessage> for AdminCommand {
    type Error = GameError;

    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        Ok(match message {
            ClientMessage::StartGame => AdminCommand::StartGame,
            ClientMessage::AssignTeams => AdminCommand::AssignTeams,
            ClientMessage::AdminEndRound { round } => AdminCommand::EndRound { round },
            ClientMessage::AdminSkipSelection { round } => AdminCommand::SkipSelection { round },
            ClientMessage::AdminSkipVoting { round } => AdminCommand::SkipVoting { round },
            ClientMessage::AdminNextRound { round } => AdminCommand::NextRound { round },
            ClientMessage::AdminRestartGame => AdminCommand::Restart,
            ClientMessage::SetPlayerTeam { session_id, team } => AdminCommand::SetTeam {
                player: session_id,
                team,
            },
            ClientMessage::RemovePlayer { session_id } => AdminCommand::RemovePlayer {
                player: session_id,
            },
            ClientMessage::ClearLobby => AdminCommand::ClearLobby,
            ClientMessage::AdminExcludePlayer { session_id } => AdminCommand::ExcludePlayer {
                player: session_id,
            },
            _ => return Err(GameError::UnknownMessage),
        })
    }
}

/// Single owner of the registry, ledger, selection, voting, phase and admin state.
pub struct GameCoordinator {
    settings: GameSettings,
    machine: GameStateMachine,
    sessions: SessionRegistry,
    ledger: SubmissionLedger,
    selection: SelectionCoordinator,
    voting: VotingCoordinator,
    admin: AdminFailover,
    game_id: Option<Uuid>,
    deadline: Option<SystemTime>,
    rounds_completed: Round,
    rng: StdRng,
}

impl GameCoordinator {
    /// Create a coordinator in the lobby.
    pub fn new(settings: GameSettings) -> Self {
        Self::with_rng(settings, StdRng::from_os_rng())
    }

    /// Create a coordinator with a given random source for team splits.
    pub fn with_rng(settings: GameSettings, rng: StdRng) -> Self {
        Self {
            machine: GameStateMachine::new(settings.total_rounds),
            sessions: SessionRegistry::new(settings.max_players, usize::from(settings.total_rounds)),
            ledger: SubmissionLedger::new(),
            selection: SelectionCoordinator::new(),
            voting: VotingCoordinator::new(),
            admin: AdminFailover::new(settings.admin_reclaim),
            game_id: None,
            deadline: None,
            rounds_completed: 0,
            rng,
            settings,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.machine.phase()
    }

    /// Phase and transition counter.
    pub fn snapshot(&self) -> Snapshot {
        self.machine.snapshot()
    }

    /// Current phase in its wire form.
    pub fn phase_view(&self) -> PhaseView {
        PhaseView::new(&self.machine.phase(), self.machine.total_rounds())
    }

    /// Read access to the registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Identifier of the running game, if one started.
    pub fn game_id(&self) -> Option<Uuid> {
        self.game_id
    }

    /// Apply one message received on `connection`.
    pub fn handle(&mut self, connection: ConnectionId, message: ClientMessage) -> Outbox {
        let mut out = Outbox::default();
        if let Err(err) = self.dispatch(connection, message, &mut out) {
            self.reject(connection, err, &mut out);
        }
        out
    }

    /// Apply an admin command coming from the operator REST surface.
    pub fn operator(&mut self, command: AdminCommand) -> Result<Outbox, GameError> {
        let mut out = Outbox::default();
        self.apply_admin(command, &mut out)?;
        Ok(out)
    }

    /// A socket went away.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Outbox {
        let mut out = Outbox::default();
        let Some(player) = self.sessions.disconnect(connection) else {
            return out;
        };
        info!(player = %player, phase = %self.machine.phase(), "player disconnected");

        if let Some(handover) = self.admin.on_disconnect(&mut self.sessions, player) {
            self.announce_handover(handover, &mut out);
        }
        self.push_player_list(&mut out);
        self.advance_if_complete(&mut out);
        out
    }

    /// A phase timer fired.
    ///
    /// Timers armed by an earlier game are discarded: round numbers restart
    /// with every game, so only the game id tells them apart.
    pub fn timer_fired(&mut self, kind: TimerKind, game: Uuid, round: Round) -> Outbox {
        let mut out = Outbox::default();
        if self.game_id != Some(game) {
            debug!(timer = ?kind, game = %game, round, "timer of a finished game discarded");
            return out;
        }
        let result = match kind {
            TimerKind::Round => self.advance(GameEvent::RoundTimerExpired { round }, &mut out),
            TimerKind::Selection => self.selection_timer(round, &mut out),
        };
        if let Err(err) = result {
            self.discard(err);
        }
        out
    }

    /// An image generation finished.
    pub fn generation_finished(&mut self, entry: EntryId, outcome: GenerationOutcome) -> Outbox {
        let mut out = Outbox::default();
        let entry = match self.ledger.complete(entry, outcome) {
            Ok(entry) => entry.clone(),
            Err(err) => {
                debug!(entry = %entry, error = %err, "discarding generation result");
                return out;
            }
        };

        if let Some(game_id) = self.game_id {
            out.persist(PersistJob::Prompt(prompt_entity(game_id, &entry)));
        }
        if let Some(connection) = self.connection_of(&entry.player) {
            out.send(
                connection,
                ServerMessage::ImageReady {
                    entry: EntryView::from(&entry),
                },
            );
        }

        if entry.is_valid() && self.machine.phase() == GamePhase::Selecting(entry.round) {
            if let Some(selection) =
                self.selection
                    .resolve_late(&self.ledger, entry.player, entry.round)
            {
                info!(player = %entry.player, round = entry.round, "late image resolved a blocked selection");
                self.selection_recorded(&selection, true, &mut out);
                self.push_status_to_admins(&mut out);
            }
            self.advance_if_complete(&mut out);
        }
        out
    }

    /// Status surface for operators.
    pub fn status(&self) -> StatusReport {
        let phase = self.machine.phase();
        let round = phase.round();
        let players = self
            .sessions
            .iter()
            .map(|s| PlayerStatusView {
                session_id: s.id,
                name: s.name.clone(),
                team: s.team,
                connected: s.is_connected(),
                is_admin: s.is_admin,
                gamemaster: s.gamemaster,
                score: s.score,
                prompts_submitted: round.map_or(0, |r| self.ledger.count(&s.id, r)),
                valid_images: round.map_or(0, |r| self.ledger.valid_entries(&s.id, r).count()),
                selected_prompt_id: round
                    .and_then(|r| self.selection.selection(&s.id, r))
                    .map(|sel| sel.prompt_id),
                excluded: round.is_some_and(|r| self.selection.is_excluded(&s.id, r)),
                has_voted: round.is_some_and(|r| self.voting.has_voted(&s.id, r)),
            })
            .collect();

        let (blocked_players, selections_waiting) = match phase {
            GamePhase::Selecting(r) => (
                self.selection.blocked(&self.sessions, r),
                self.selection.missing(&self.sessions, r).len(),
            ),
            _ => (Vec::new(), 0),
        };
        let missing_voters = match phase {
            GamePhase::Voting(r) => self
                .voting
                .round(r)
                .map(|v| v.missing_voters())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        StatusReport {
            phase: self.phase_view(),
            remaining_secs: self
                .deadline
                .and_then(|d| d.duration_since(SystemTime::now()).ok())
                .map(|d| d.as_secs()),
            players,
            blocked_players,
            selections_waiting,
            missing_voters,
            // Owned by the persistence worker; stamped by the service layer.
            persistence_failures: 0,
        }
    }

    /// Generation failures of the current game, grouped by round, type and player.
    pub fn error_analytics(&self) -> ErrorAnalytics {
        let errors: Vec<GenerationErrorView> = self
            .ledger
            .errors()
            .filter_map(|entry| {
                let EntryStatus::Error {
                    error_type,
                    message,
                } = &entry.status
                else {
                    return None;
                };
                Some(GenerationErrorView {
                    session_id: entry.player,
                    player_name: self
                        .sessions
                        .get(&entry.player)
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                    round: entry.round,
                    sequence: entry.sequence,
                    prompt: entry.prompt.clone(),
                    error_type: *error_type,
                    message: message.clone(),
                })
            })
            .collect();

        let mut errors_by_round: BTreeMap<Round, usize> =
            (1..=self.machine.total_rounds()).map(|r| (r, 0)).collect();
        let mut errors_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for error in &errors {
            *errors_by_round.entry(error.round).or_default() += 1;
            *errors_by_type
                .entry(error.error_type.as_str().to_string())
                .or_default() += 1;
        }

        let players = self
            .sessions
            .iter()
            .filter_map(|session| {
                let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
                for error in errors.iter().filter(|e| e.session_id == session.id) {
                    *by_type
                        .entry(error.error_type.as_str().to_string())
                        .or_default() += 1;
                }
                let total_errors: usize = by_type.values().sum();
                (total_errors > 0).then(|| PlayerErrorSummary {
                    session_id: session.id,
                    name: session.name.clone(),
                    total_errors,
                    errors_by_type: by_type,
                })
            })
            .collect();

        ErrorAnalytics {
            total_errors: errors.len(),
            errors_by_round,
            errors_by_type,
            players,
            errors,
        }
    }

    fn dispatch(
        &mut self,
        connection: ConnectionId,
        message: ClientMessage,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        match message {
            ClientMessage::Join {
                reconnect_token,
                name,
            } => self.join(
                connection,
                JoinRequest {
                    reconnect_token,
                    name,
                },
                out,
            ),
            ClientMessage::Unknown => Err(GameError::UnknownMessage),
            message => {
                let player = self.sessions.player_for(connection)?;
                match message {
                    ClientMessage::SubmitPrompt { text } => self.submit_prompt(player, text, out),
                    ClientMessage::SelectImage { prompt_id } => {
                        self.select_image(player, prompt_id, out)
                    }
                    ClientMessage::CheckSelectionStatus => {
                        self.check_selection_status(player, connection, out)
                    }
                    ClientMessage::CastVote {
                        votee_id,
                        prompt_id,
                    } => self.cast_vote(player, connection, votee_id, prompt_id, out),
                    ClientMessage::AdminGetStatus => {
                        self.admin.authorize(&self.sessions, player)?;
                        out.send(
                            connection,
                            ServerMessage::AdminStatus {
                                status: self.status(),
                            },
                        );
                        Ok(())
                    }
                    message => {
                        let command = AdminCommand::try_from(message)?;
                        self.admin.authorize(&self.sessions, player)?;
                        info!(admin = %player, command = ?command, "admin command");
                        self.apply_admin(command, out)
                    }
                }
            }
        }
    }

    fn reject(&self, connection: ConnectionId, err: GameError, out: &mut Outbox) {
        let message = match &err {
            GameError::Transition(TransitionError::Stale { .. }) => {
                debug!(connection = %connection, error = %err, "stale request discarded");
                return;
            }
            GameError::Selection(reason) => ServerMessage::SelectionResult {
                success: false,
                prompt_id: None,
                automatic: false,
                reason: Some(reason.code().to_string()),
                message: Some(reason.to_string()),
            },
            GameError::Vote(reason) => ServerMessage::VoteResult {
                success: false,
                votee_id: None,
                reason: Some(reason.code().to_string()),
                message: Some(reason.to_string()),
            },
            other => ServerMessage::error(other.code(), other),
        };
        warn!(connection = %connection, code = err.code(), error = %err, "rejected client request");
        out.send(connection, message);
    }

    fn discard(&self, err: GameError) {
        match err {
            GameError::Transition(TransitionError::Stale { current, event }) => {
                debug!(phase = %current, event = ?event, "stale trigger discarded");
            }
            other => warn!(error = %other, "trigger ignored"),
        }
    }

    fn apply_admin(&mut self, command: AdminCommand, out: &mut Outbox) -> Result<(), GameError> {
        match command {
            AdminCommand::StartGame => self.start_game(out),
            AdminCommand::AssignTeams => self.assign_teams(out),
            AdminCommand::EndRound { round } => {
                let round = self.expected_round(round, "admin_end_round")?;
                self.advance(GameEvent::AdminEndRound { round }, out)
            }
            AdminCommand::SkipSelection { round } => {
                let round = self.expected_round(round, "admin_skip_selection")?;
                if self.machine.phase() == GamePhase::Selecting(round) {
                    self.resolve_selection_timeout(round, out);
                }
                self.advance(GameEvent::AdminSkipSelection { round }, out)
            }
            AdminCommand::SkipVoting { round } => {
                let round = self.expected_round(round, "admin_skip_voting")?;
                self.advance(GameEvent::AdminSkipVoting { round }, out)
            }
            AdminCommand::NextRound { round } => {
                let round = self.expected_round(round, "admin_next_round")?;
                self.advance(GameEvent::AdminNextRound { round }, out)
            }
            AdminCommand::Restart => self.advance(GameEvent::Restart, out),
            AdminCommand::SetTeam { player, team } => self.set_team(player, team, out),
            AdminCommand::RemovePlayer { player } => self.remove_player(player, out),
            AdminCommand::ClearLobby => self.clear_lobby(out),
            AdminCommand::ExcludePlayer { player } => self.exclude_player(player, out),
        }
    }

    fn expected_round(&self, round: Option<Round>, action: &'static str) -> Result<Round, GameError> {
        let phase = self.machine.phase();
        round
            .or(phase.round())
            .ok_or(GameError::WrongPhase { action, phase })
    }

    fn join(
        &mut self,
        connection: ConnectionId,
        request: JoinRequest,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        request.validate()?;
        if let Ok(existing) = self.sessions.player_for(connection) {
            return Err(GameError::AlreadyJoined(existing));
        }

        let gamemaster = request.name.trim() == self.settings.admin_code;
        let outcome =
            self.sessions
                .join(request.reconnect_token, &request.name, connection, gamemaster)?;
        let player = outcome.player;
        let reconnected = outcome.kind == JoinKind::Reattached;
        let phase = self.machine.phase();
        info!(player = %player, reconnected, gamemaster, phase = %phase, "player joined");

        if let Some(handover) = self.admin.on_join(&mut self.sessions, player) {
            self.announce_handover(handover, out);
        }

        let participant = self.sessions.get(&player).is_some_and(PlayerSession::is_participant);
        if participant && !reconnected && !matches!(phase, GamePhase::Lobby | GamePhase::GameOver) {
            self.sessions.balance_unassigned(&mut self.rng);
            self.persist_player(player, out);
            if let GamePhase::Selecting(r) | GamePhase::Voting(r) | GamePhase::Results(r) = phase {
                self.selection.exclude(player, r);
            }
        }
        if reconnected
            && let GamePhase::Selecting(r) = phase
            && let Some(selection) = self.selection.resolve_late(&self.ledger, player, r)
        {
            self.selection_recorded(&selection, false, out);
        }

        let view = self.view();
        let replay = recovery::replay(&view, &player);
        if let Some(session) = self.sessions.get(&player) {
            out.send(
                connection,
                ServerMessage::Joined {
                    player: PlayerView::new(session, phase.round()),
                    reconnect_token: outcome.token,
                    phase: self.phase_view(),
                    reconnected,
                    replay,
                },
            );
        }
        self.push_player_list(out);
        self.advance_if_complete(out);
        Ok(())
    }

    fn start_game(&mut self, out: &mut Outbox) -> Result<(), GameError> {
        let phase = self.machine.phase();
        if phase != GamePhase::Lobby {
            return Err(GameError::WrongPhase {
                action: "start_game",
                phase,
            });
        }
        if self.sessions.connected_participants().next().is_none() {
            return Err(GameError::NoPlayers);
        }

        let balanced = self.sessions.balance_unassigned(&mut self.rng);
        let game_id = Uuid::new_v4();
        self.game_id = Some(game_id);
        self.rounds_completed = 0;
        out.persist(PersistJob::CreateGame(GameEntity {
            id: game_id,
            total_rounds: self.machine.total_rounds(),
            started_at: now_rfc3339(),
        }));
        let participants: Vec<PlayerId> = self.sessions.participants().map(|s| s.id).collect();
        for player in participants {
            self.persist_player(player, out);
        }
        for player in balanced {
            self.send_team(player, out);
        }
        info!(game = %game_id, players = self.sessions.participants().count(), "game started");
        self.advance(GameEvent::AdminStart, out)
    }

    fn assign_teams(&mut self, out: &mut Outbox) -> Result<(), GameError> {
        let phase = self.machine.phase();
        if phase != GamePhase::Lobby {
            return Err(GameError::WrongPhase {
                action: "assign_teams",
                phase,
            });
        }
        let split = self.sessions.assign_teams(&mut self.rng)?;
        info!(
            team_a = split.team_a.len(),
            team_b = split.team_b.len(),
            dropped = split.dropped.len(),
            "teams assigned"
        );
        for player in split.team_a.iter().chain(split.team_b.iter()) {
            self.send_team(*player, out);
        }
        for player in &split.dropped {
            self.ledger.forget_player(player);
            self.selection.forget_player(player);
        }
        self.push_player_list(out);
        Ok(())
    }

    fn set_team(&mut self, player: PlayerId, team: Team, out: &mut Outbox) -> Result<(), GameError> {
        self.sessions.set_team(&player, team)?;
        info!(player = %player, team = ?team, "team changed");
        self.persist_player(player, out);
        self.send_team(player, out);
        self.push_player_list(out);
        Ok(())
    }

    fn remove_player(&mut self, player: PlayerId, out: &mut Outbox) -> Result<(), GameError> {
        self.ensure_lobby_management("remove_player")?;
        self.admin.ensure_removable(player)?;
        let session = self
            .sessions
            .remove(&player)
            .ok_or(SessionError::UnknownPlayer(player))?;
        info!(player = %player, name = %session.name, "player removed");
        self.evict(session, out);
        self.push_player_list(out);
        Ok(())
    }

    fn clear_lobby(&mut self, out: &mut Outbox) -> Result<(), GameError> {
        self.ensure_lobby_management("clear_lobby")?;
        let removed = self.sessions.clear_participants();
        info!(count = removed.len(), "lobby cleared");
        for session in removed {
            self.evict(session, out);
        }
        self.push_player_list(out);
        Ok(())
    }

    fn ensure_lobby_management(&self, action: &'static str) -> Result<(), GameError> {
        match self.machine.phase() {
            GamePhase::Lobby | GamePhase::GameOver => Ok(()),
            phase => Err(GameError::WrongPhase { action, phase }),
        }
    }

    fn evict(&mut self, session: PlayerSession, out: &mut Outbox) {
        self.ledger.forget_player(&session.id);
        self.selection.forget_player(&session.id);
        self.admin.forget(&session.id);
        if let Some(connection) = session.connection {
            out.send(
                connection,
                ServerMessage::Removed {
                    reason: "removed by the admin".into(),
                },
            );
            out.push(Effect::Close { connection });
        }
    }

    fn exclude_player(&mut self, player: PlayerId, out: &mut Outbox) -> Result<(), GameError> {
        let phase = self.machine.phase();
        let GamePhase::Selecting(round) = phase else {
            return Err(GameError::WrongPhase {
                action: "admin_exclude_player",
                phase,
            });
        };
        if !self.sessions.require(&player)?.is_participant() {
            return Err(SessionError::NotAParticipant(player).into());
        }
        if self.selection.exclude(player, round) {
            info!(player = %player, round, "player excluded from selection");
        }
        self.push_status_to_admins(out);
        self.advance_if_complete(out);
        Ok(())
    }

    fn require_participant(&self, player: PlayerId) -> Result<(), GameError> {
        if self.sessions.require(&player)?.is_participant() {
            Ok(())
        } else {
            Err(SessionError::NotAParticipant(player).into())
        }
    }

    fn submit_prompt(
        &mut self,
        player: PlayerId,
        text: String,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        let phase = self.machine.phase();
        let GamePhase::Playing(round) = phase else {
            return Err(GameError::WrongPhase {
                action: "submit_prompt",
                phase,
            });
        };
        self.require_participant(player)?;
        validate_prompt(&text).map_err(|err| GameError::InvalidInput(err.to_string()))?;

        let prompt = text.trim().to_string();
        let entry = self.ledger.append(player, round, prompt.clone());
        let sequence = self.ledger.get(&entry).map_or(1, |e| e.sequence);
        debug!(player = %player, round, entry = %entry, "prompt accepted");

        if let Some(connection) = self.connection_of(&player) {
            out.send(
                connection,
                ServerMessage::PromptAccepted {
                    entry_id: entry,
                    sequence,
                    prompt: prompt.clone(),
                },
            );
        }
        out.push(Effect::Generate(GenerationRequest {
            entry,
            player,
            round,
            prompt,
            context: self.ledger.context_before(&entry),
        }));
        Ok(())
    }

    fn select_image(
        &mut self,
        player: PlayerId,
        prompt_id: Option<PromptId>,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        let phase = self.machine.phase();
        let GamePhase::Selecting(round) = phase else {
            return Err(GameError::WrongPhase {
                action: "select_image",
                phase,
            });
        };
        self.require_participant(player)?;

        let selection = self
            .selection
            .select_image(&self.ledger, player, round, prompt_id)?
            .clone();
        info!(player = %player, round, prompt_id = %selection.prompt_id, "selection confirmed");
        self.selection_recorded(&selection, true, out);

        let remaining = self.selection.missing(&self.sessions, round).len();
        self.broadcast(ServerMessage::SelectionWaiting { round, remaining }, out);
        self.push_status_to_admins(out);
        self.advance_if_complete(out);
        Ok(())
    }

    fn check_selection_status(
        &self,
        player: PlayerId,
        connection: ConnectionId,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        let phase = self.machine.phase();
        let GamePhase::Selecting(round) = phase else {
            return Err(GameError::WrongPhase {
                action: "check_selection_status",
                phase,
            });
        };
        out.send(
            connection,
            ServerMessage::SelectionStatus {
                round,
                confirmed_prompt_id: self.selection.selection(&player, round).map(|s| s.prompt_id),
                waiting: self.selection.missing(&self.sessions, round).len(),
                blocked: self.selection.blocked(&self.sessions, round).contains(&player),
            },
        );
        Ok(())
    }

    fn cast_vote(
        &mut self,
        voter: PlayerId,
        connection: ConnectionId,
        votee: PlayerId,
        claimed: Option<PromptId>,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        let phase = self.machine.phase();
        let GamePhase::Voting(round) = phase else {
            return Err(GameError::WrongPhase {
                action: "cast_vote",
                phase,
            });
        };
        self.require_participant(voter)?;

        let vote = self.voting.cast_vote(voter, round, votee)?.clone();
        if let Some(claimed) = claimed
            && claimed != vote.prompt_id
        {
            warn!(
                voter = %voter,
                votee = %votee,
                claimed = %claimed,
                stored = %vote.prompt_id,
                "vote referenced a stale prompt id; kept the votee's selection"
            );
        }
        info!(voter = %voter, votee = %votee, round, "vote cast");

        if let Some(game_id) = self.game_id {
            out.persist(PersistJob::Vote(VoteEntity {
                game_id,
                round,
                voter_id: voter,
                votee_id: votee,
                prompt_id: vote.prompt_id.0,
                created_at: now_rfc3339(),
            }));
        }
        out.send(
            connection,
            ServerMessage::VoteResult {
                success: true,
                votee_id: Some(votee),
                reason: None,
                message: None,
            },
        );
        self.push_status_to_admins(out);
        self.advance_if_complete(out);
        Ok(())
    }

    fn selection_timer(&mut self, round: Round, out: &mut Outbox) -> Result<(), GameError> {
        let phase = self.machine.phase();
        if phase != GamePhase::Selecting(round) {
            return Err(TransitionError::Stale {
                current: phase,
                event: GameEvent::SelectionTimerExpired { round },
            }
            .into());
        }
        self.deadline = None;
        self.resolve_selection_timeout(round, out);
        if self.selection.is_complete(&self.sessions, round) {
            self.advance(GameEvent::SelectionTimerExpired { round }, out)
        } else {
            info!(round, "selection stays open until blocked players are resolved");
            Ok(())
        }
    }

    fn resolve_selection_timeout(&mut self, round: Round, out: &mut Outbox) {
        let resolution = self
            .selection
            .timeout_resolve(&self.ledger, &self.sessions, round);
        for selection in &resolution.resolved {
            self.selection_recorded(selection, true, out);
        }
        info!(round, resolved = resolution.resolved.len(), "selection timeout resolved");

        if !resolution.blocked.is_empty() {
            warn!(round, blocked = ?resolution.blocked, "selection blocked: players without a valid image");
            for player in &resolution.blocked {
                if let Some(connection) = self.connection_of(player) {
                    out.send(
                        connection,
                        ServerMessage::SelectionStatus {
                            round,
                            confirmed_prompt_id: None,
                            waiting: resolution.blocked.len(),
                            blocked: true,
                        },
                    );
                }
            }
            out.notify(Notice::SelectionBlocked {
                round,
                players: resolution.blocked,
            });
            self.push_status_to_admins(out);
        }
    }

    fn selection_recorded(&self, selection: &Selection, notify_owner: bool, out: &mut Outbox) {
        let automatic = selection.source == SelectionSource::Timeout;
        if let Some(game_id) = self.game_id {
            out.persist(PersistJob::Selection(SelectionEntity {
                game_id,
                round: selection.round,
                player_id: selection.player,
                prompt_id: selection.prompt_id.0,
                automatic,
                created_at: now_rfc3339(),
            }));
        }
        if notify_owner && let Some(connection) = self.connection_of(&selection.player) {
            out.send(
                connection,
                ServerMessage::SelectionResult {
                    success: true,
                    prompt_id: Some(selection.prompt_id),
                    automatic,
                    reason: None,
                    message: None,
                },
            );
        }
    }

    /// Apply a trigger, then follow any completion it unlocked.
    fn advance(&mut self, event: GameEvent, out: &mut Outbox) -> Result<(), GameError> {
        self.transition(event, out)?;
        self.advance_if_complete(out);
        Ok(())
    }

    fn advance_if_complete(&mut self, out: &mut Outbox) {
        loop {
            let event = match self.machine.phase() {
                // An empty requirement only resolves through the timer or the admin.
                GamePhase::Selecting(round)
                    if self.selection.selections(round).next().is_some()
                        && self.selection.is_complete(&self.sessions, round) =>
                {
                    GameEvent::SelectionComplete { round }
                }
                GamePhase::Voting(round) if self.voting.is_complete(round) => {
                    GameEvent::VotingComplete { round }
                }
                _ => break,
            };
            if let Err(err) = self.transition(event, out) {
                self.discard(err);
                break;
            }
        }
    }

    fn transition(&mut self, event: GameEvent, out: &mut Outbox) -> Result<(), GameError> {
        let from = self.machine.phase();
        let next = self.machine.apply(event)?;
        info!(from = %from, to = %next, event = ?event, "phase transition");

        match next {
            GamePhase::Lobby => self.reset(from, out),
            GamePhase::Playing(round) => self.enter_playing(round, out),
            GamePhase::Selecting(round) => self.enter_selecting(round, out),
            GamePhase::Voting(round) => self.enter_voting(round, out),
            GamePhase::Results(round) => self.enter_results(round, out),
            GamePhase::GameOver => self.enter_game_over(out),
        }

        let phase = self.phase_view();
        self.broadcast(ServerMessage::PhaseChanged { phase }, out);
        out.notify(Notice::PhaseChanged(phase));
        Ok(())
    }

    fn enter_playing(&mut self, round: Round, out: &mut Outbox) {
        let now = SystemTime::now();
        let duration = self.settings.round_duration;
        let deadline = now + duration;
        self.deadline = Some(deadline);
        let target = self.settings.target_for(round);

        if let Some(game_id) = self.game_id {
            out.persist(PersistJob::CreateRound(RoundEntity {
                game_id,
                round,
                target_id: target.id,
                started_at: now_rfc3339(),
            }));
        }
        for session in self.sessions.iter() {
            let Some(connection) = session.connection else {
                continue;
            };
            out.send(
                connection,
                ServerMessage::RoundStarted {
                    round,
                    total_rounds: self.machine.total_rounds(),
                    target: target.clone(),
                    character: session
                        .is_participant()
                        .then(|| Character::for_round(session.team, round)),
                    duration_secs: duration.as_secs(),
                    end_time: format_system_time(deadline),
                },
            );
        }
        if let Some(game) = self.game_id {
            out.push(Effect::ScheduleTimer {
                kind: TimerKind::Round,
                game,
                round,
                after: duration,
            });
        }
    }

    fn enter_selecting(&mut self, round: Round, out: &mut Outbox) {
        let duration = self.settings.selection_duration;
        let deadline = SystemTime::now() + duration;
        self.deadline = Some(deadline);

        if let Some(game_id) = self.game_id {
            out.persist(PersistJob::EndRound { game_id, round });
        }
        for session in self.sessions.iter() {
            let Some(connection) = session.connection else {
                continue;
            };
            out.send(
                connection,
                ServerMessage::SelectionOpened {
                    round,
                    images: self
                        .ledger
                        .valid_entries(&session.id, round)
                        .map(EntryView::from)
                        .collect(),
                    provisional_prompt_id: self
                        .ledger
                        .last_valid(&session.id, round)
                        .and_then(LedgerEntry::prompt_id),
                    duration_secs: duration.as_secs(),
                    end_time: format_system_time(deadline),
                },
            );
        }
        if let Some(game) = self.game_id {
            out.push(Effect::ScheduleTimer {
                kind: TimerKind::Selection,
                game,
                round,
                after: duration,
            });
        }
    }

    fn enter_voting(&mut self, round: Round, out: &mut Outbox) {
        self.deadline = None;
        let start_time = format_system_time(SystemTime::now());
        let voting = self
            .voting
            .open_voting(round, &self.sessions, &self.selection);
        info!(
            round,
            voters = voting.active_set().len(),
            candidates = voting.candidates().count(),
            "voting opened"
        );

        for session in self.sessions.iter() {
            let Some(connection) = session.connection else {
                continue;
            };
            out.send(
                connection,
                ServerMessage::VotingOpened {
                    round,
                    candidates: voting
                        .candidates_for(&session.id)
                        .map(CandidateView::from)
                        .collect(),
                    duration_secs: self.settings.voting_duration.as_secs(),
                    start_time: start_time.clone(),
                },
            );
        }
    }

    fn enter_results(&mut self, round: Round, out: &mut Outbox) {
        self.deadline = None;
        self.voting.close(round);
        self.rounds_completed = round;
        let Some(voting) = self.voting.round(round) else {
            return;
        };
        for (player, votes) in voting.tally() {
            self.sessions.record_round_score(&player, round, votes);
        }
        let results = scoring::round_results(&self.sessions, voting);
        let scores = scoring::scores(&self.sessions);
        self.broadcast(
            ServerMessage::RoundResults {
                round,
                results,
                scores,
            },
            out,
        );
    }

    fn enter_game_over(&mut self, out: &mut Outbox) {
        self.deadline = None;
        if let Some(game_id) = self.game_id {
            out.persist(PersistJob::EndGame {
                game_id,
                rounds_completed: self.rounds_completed,
            });
        }
        let standings = scoring::standings(&self.sessions, &self.ledger, self.machine.total_rounds());
        info!(players = standings.len(), "game over");
        self.broadcast(ServerMessage::GameOver { standings }, out);
    }

    fn reset(&mut self, from: GamePhase, out: &mut Outbox) {
        if from != GamePhase::GameOver
            && let Some(game_id) = self.game_id
        {
            out.persist(PersistJob::EndGame {
                game_id,
                rounds_completed: self.rounds_completed,
            });
        }
        self.ledger.clear();
        self.selection.clear();
        self.voting.clear();
        self.sessions.reset_progress();
        self.game_id = None;
        self.deadline = None;
        self.rounds_completed = 0;
        info!(from = %from, "game restarted");

        self.broadcast(ServerMessage::GameRestarted, out);
        self.push_player_list(out);
    }

    fn announce_handover(&self, handover: AdminHandover, out: &mut Outbox) {
        info!(
            previous = ?handover.previous,
            current = %handover.current,
            reason = ?handover.reason,
            "admin role handed over"
        );
        if let Some(previous) = handover.previous
            && let Some(connection) = self.connection_of(&previous)
        {
            out.send(connection, ServerMessage::AdminRoleChanged { is_admin: false });
        }
        if let Some(connection) = self.connection_of(&handover.current) {
            out.send(connection, ServerMessage::AdminRoleChanged { is_admin: true });
        }
        out.notify(Notice::AdminChanged {
            holder: handover.current,
        });
    }

    fn send_team(&self, player: PlayerId, out: &mut Outbox) {
        let Some(session) = self.sessions.get(&player) else {
            return;
        };
        if let Some(connection) = session.connection {
            out.send(
                connection,
                ServerMessage::TeamAssigned {
                    team: session.team,
                    character: session.character(self.machine.phase().round()),
                },
            );
        }
    }

    fn persist_player(&self, player: PlayerId, out: &mut Outbox) {
        let (Some(game_id), Some(session)) = (self.game_id, self.sessions.get(&player)) else {
            return;
        };
        if !session.is_participant() {
            return;
        }
        out.persist(PersistJob::Player(PlayerEntity {
            id: session.id,
            game_id,
            name: session.name.clone(),
            team: session.team,
            character: session.team.map(Character::for_team),
        }));
    }

    fn push_player_list(&self, out: &mut Outbox) {
        let players: Vec<AdminPlayerView> = self.sessions.iter().map(AdminPlayerView::from).collect();
        for connection in self.sessions.connections_where(|s| s.gamemaster) {
            out.send(
                connection,
                ServerMessage::AdminPlayerListUpdate {
                    players: players.clone(),
                },
            );
        }
        out.notify(Notice::LobbyChanged {
            players: self.sessions.participants().count(),
            connected: self.sessions.connected_participants().count(),
        });
    }

    fn push_status_to_admins(&self, out: &mut Outbox) {
        let admins = self.sessions.connections_where(|s| s.is_admin);
        if admins.is_empty() {
            return;
        }
        let status = self.status();
        for connection in admins {
            out.send(
                connection,
                ServerMessage::AdminStatus {
                    status: status.clone(),
                },
            );
        }
    }

    fn broadcast(&self, message: ServerMessage, out: &mut Outbox) {
        for connection in self.sessions.connections_where(|_| true) {
            out.send(connection, message.clone());
        }
    }

    fn connection_of(&self, player: &PlayerId) -> Option<ConnectionId> {
        self.sessions.get(player).and_then(|s| s.connection)
    }

    fn view(&self) -> GameView<'_> {
        GameView {
            phase: self.machine.phase(),
            deadline: self.deadline,
            settings: &self.settings,
            sessions: &self.sessions,
            ledger: &self.ledger,
            selection: &self.selection,
            voting: &self.voting,
        }
    }
}

fn prompt_entity(game_id: Uuid, entry: &LedgerEntry) -> PromptEntity {
    let (error_type, error_message) = match &entry.status {
        EntryStatus::Error {
            error_type,
            message,
        } => (Some(error_type.as_str().to_string()), message.clone()),
        _ => (None, None),
    };
    PromptEntity {
        game_id,
        round: entry.round,
        player_id: entry.player,
        entry_id: entry.id.0,
        sequence: entry.sequence,
        prompt: entry.prompt.clone(),
        prompt_id: entry.prompt_id().map(|p| p.0),
        image_ref: entry.image_ref().map(str::to_string),
        error_type,
        error_message,
        created_at: now_rfc3339(),
    }
}
