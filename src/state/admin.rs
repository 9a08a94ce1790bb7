//! Single-holder admin role with failover between gamemaster sessions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::{game::PlayerId, session::SessionRegistry};

/// What happens when the first admin comes back while a backup holds the role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// The backup keeps the role; the original becomes a standby.
    #[default]
    KeepBackup,
    /// The original admin takes the role back on reconnection.
    RestoreOriginal,
}

/// Why the role moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverReason {
    /// The role was vacant.
    Claimed,
    /// The holder disconnected and a connected standby took over.
    Failover,
    /// The original admin took the role back.
    Reclaimed,
}

/// A change of admin holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminHandover {
    /// Former holder, demoted in the same step.
    pub previous: Option<PlayerId>,
    /// New holder.
    pub current: PlayerId,
    /// Why it happened.
    pub reason: HandoverReason,
}

/// Failures raised by admin checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// The caller does not hold the admin role.
    #[error("player `{0}` is not the active admin")]
    NotAdmin(PlayerId),
    /// The active admin cannot be removed from the game.
    #[error("the active admin cannot be removed")]
    CannotRemoveAdmin,
}

/// Tracks the single admin holder and performs promotions atomically on the registry.
#[derive(Debug, Clone, Default)]
pub struct AdminFailover {
    holder: Option<PlayerId>,
    original: Option<PlayerId>,
    policy: ReclaimPolicy,
}

impl AdminFailover {
    /// Create an empty manager.
    pub fn new(policy: ReclaimPolicy) -> Self {
        Self {
            holder: None,
            original: None,
            policy,
        }
    }

    /// Current holder.
    pub fn holder(&self) -> Option<PlayerId> {
        self.holder
    }

    /// First player that ever held the role.
    pub fn original(&self) -> Option<PlayerId> {
        self.original
    }

    /// Configured reclaim policy.
    pub fn policy(&self) -> ReclaimPolicy {
        self.policy
    }

    /// React to a gamemaster session (re)joining.
    pub fn on_join(
        &mut self,
        sessions: &mut SessionRegistry,
        player: PlayerId,
    ) -> Option<AdminHandover> {
        if !sessions.get(&player).is_some_and(|s| s.gamemaster) {
            return None;
        }
        match self.holder {
            Some(holder) if holder == player => {
                if let Some(session) = sessions.get_mut(&player) {
                    session.is_admin = true;
                }
                None
            }
            Some(holder) if sessions.is_connected(&holder) => {
                if self.policy == ReclaimPolicy::RestoreOriginal && self.original == Some(player) {
                    Some(self.transfer(sessions, player, HandoverReason::Reclaimed))
                } else {
                    None
                }
            }
            _ => Some(self.transfer(sessions, player, HandoverReason::Claimed)),
        }
    }

    /// React to a session losing its connection.
    ///
    /// When the holder leaves, the first connected standby is promoted. Without
    /// one the role stays with the disconnected holder until a gamemaster joins.
    pub fn on_disconnect(
        &mut self,
        sessions: &mut SessionRegistry,
        player: PlayerId,
    ) -> Option<AdminHandover> {
        if self.holder != Some(player) {
            return None;
        }
        let standby = sessions
            .iter()
            .find(|s| s.gamemaster && s.id != player && s.is_connected())
            .map(|s| s.id)?;
        Some(self.transfer(sessions, standby, HandoverReason::Failover))
    }

    /// Demote the holder and promote `to` in one step.
    fn transfer(
        &mut self,
        sessions: &mut SessionRegistry,
        to: PlayerId,
        reason: HandoverReason,
    ) -> AdminHandover {
        let previous = self.holder.filter(|id| *id != to);
        if let Some(previous) = previous
            && let Some(session) = sessions.get_mut(&previous)
        {
            session.is_admin = false;
        }
        if let Some(session) = sessions.get_mut(&to) {
            session.is_admin = true;
        }
        self.holder = Some(to);
        self.original.get_or_insert(to);
        AdminHandover {
            previous,
            current: to,
            reason,
        }
    }

    /// Only the connected holder may issue admin commands.
    pub fn authorize(&self, sessions: &SessionRegistry, player: PlayerId) -> Result<(), AdminError> {
        if self.holder == Some(player) && sessions.is_connected(&player) {
            Ok(())
        } else {
            Err(AdminError::NotAdmin(player))
        }
    }

    /// Refuse to remove the holder from the game.
    pub fn ensure_removable(&self, player: PlayerId) -> Result<(), AdminError> {
        if self.holder == Some(player) {
            Err(AdminError::CannotRemoveAdmin)
        } else {
            Ok(())
        }
    }

    /// Forget a removed standby.
    pub fn forget(&mut self, player: &PlayerId) {
        if self.original.as_ref() == Some(player) {
            self.original = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn gamemaster(sessions: &mut SessionRegistry) -> (PlayerId, Uuid) {
        let conn = Uuid::new_v4();
        let id = sessions.join(None, "code", conn, true).unwrap().player;
        (id, conn)
    }

    fn admins(sessions: &SessionRegistry) -> Vec<PlayerId> {
        sessions.iter().filter(|s| s.is_admin).map(|s| s.id).collect()
    }

    #[test]
    fn first_gamemaster_claims_the_role() {
        let mut sessions = SessionRegistry::new(40, 3);
        let mut admin = AdminFailover::new(ReclaimPolicy::KeepBackup);
        let (gm, _) = gamemaster(&mut sessions);
        let (backup, _) = gamemaster(&mut sessions);

        let handover = admin.on_join(&mut sessions, gm).unwrap();
        assert_eq!(handover.reason, HandoverReason::Claimed);
        assert!(admin.on_join(&mut sessions, backup).is_none());
        assert_eq!(admins(&sessions), vec![gm]);
        assert!(admin.authorize(&sessions, gm).is_ok());
        assert_eq!(
            admin.authorize(&sessions, backup),
            Err(AdminError::NotAdmin(backup))
        );
    }

    #[test]
    fn players_never_claim_the_role() {
        let mut sessions = SessionRegistry::new(40, 3);
        let mut admin = AdminFailover::new(ReclaimPolicy::KeepBackup);
        let player = sessions
            .join(None, "alice", Uuid::new_v4(), false)
            .unwrap()
            .player;
        assert!(admin.on_join(&mut sessions, player).is_none());
        assert!(admin.holder().is_none());
    }

    #[test]
    fn disconnect_promotes_backup_atomically() {
        let mut sessions = SessionRegistry::new(40, 3);
        let mut admin = AdminFailover::new(ReclaimPolicy::KeepBackup);
        let (gm, gm_conn) = gamemaster(&mut sessions);
        let (backup, _) = gamemaster(&mut sessions);
        admin.on_join(&mut sessions, gm);
        admin.on_join(&mut sessions, backup);

        sessions.disconnect(gm_conn);
        let handover = admin.on_disconnect(&mut sessions, gm).unwrap();
        assert_eq!(handover.previous, Some(gm));
        assert_eq!(handover.current, backup);
        assert_eq!(admins(&sessions), vec![backup]);
    }

    #[test]
    fn returning_original_does_not_reclaim_by_default() {
        let mut sessions = SessionRegistry::new(40, 3);
        let mut admin = AdminFailover::new(ReclaimPolicy::KeepBackup);
        let (gm, gm_conn) = gamemaster(&mut sessions);
        let (backup, _) = gamemaster(&mut sessions);
        admin.on_join(&mut sessions, gm);
        sessions.disconnect(gm_conn);
        admin.on_disconnect(&mut sessions, gm);

        let token = sessions.get(&gm).unwrap().reconnect_token;
        sessions.join(Some(token), "code", Uuid::new_v4(), true).unwrap();
        assert!(admin.on_join(&mut sessions, gm).is_none());
        assert_eq!(admin.holder(), Some(backup));
        assert_eq!(admins(&sessions), vec![backup]);
    }

    #[test]
    fn restore_original_policy_reclaims() {
        let mut sessions = SessionRegistry::new(40, 3);
        let mut admin = AdminFailover::new(ReclaimPolicy::RestoreOriginal);
        let (gm, gm_conn) = gamemaster(&mut sessions);
        let (backup, _) = gamemaster(&mut sessions);
        admin.on_join(&mut sessions, gm);
        sessions.disconnect(gm_conn);
        admin.on_disconnect(&mut sessions, gm);

        let token = sessions.get(&gm).unwrap().reconnect_token;
        sessions.join(Some(token), "code", Uuid::new_v4(), true).unwrap();
        let handover = admin.on_join(&mut sessions, gm).unwrap();
        assert_eq!(handover.reason, HandoverReason::Reclaimed);
        assert_eq!(handover.previous, Some(backup));
        assert_eq!(admins(&sessions), vec![gm]);
    }

    #[test]
    fn lone_admin_keeps_role_across_reconnect() {
        let mut sessions = SessionRegistry::new(40, 3);
        let mut admin = AdminFailover::new(ReclaimPolicy::KeepBackup);
        let (gm, gm_conn) = gamemaster(&mut sessions);
        admin.on_join(&mut sessions, gm);

        sessions.disconnect(gm_conn);
        assert!(admin.on_disconnect(&mut sessions, gm).is_none());
        assert!(admin.authorize(&sessions, gm).is_err());

        let token = sessions.get(&gm).unwrap().reconnect_token;
        sessions.join(Some(token), "code", Uuid::new_v4(), true).unwrap();
        admin.on_join(&mut sessions, gm);
        assert!(admin.authorize(&sessions, gm).is_ok());
        assert_eq!(admin.ensure_removable(gm), Err(AdminError::CannotRemoveAdmin));
    }
}
