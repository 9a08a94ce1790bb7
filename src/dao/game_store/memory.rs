use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::GameStore,
        models::{GameEntity, PlayerEntity, PromptEntity, RoundEntity, SelectionEntity, VoteEntity},
        storage::{StorageError, StorageResult},
    },
    state::game::Round,
};

/// Everything written to a [`MemoryGameStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    pub games: Vec<GameEntity>,
    /// Closed games with the number of rounds they completed.
    pub ended_games: Vec<(Uuid, Round)>,
    pub rounds: Vec<RoundEntity>,
    pub ended_rounds: Vec<(Uuid, Round)>,
    pub players: Vec<PlayerEntity>,
    pub prompts: Vec<PromptEntity>,
    pub selections: Vec<SelectionEntity>,
    pub votes: Vec<VoteEntity>,
}

#[derive(Debug, Error)]
#[error("in-memory store is offline")]
struct Offline;

/// Process-local store used when no durable backend is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    records: Arc<Mutex<MemoryRecords>>,
    failures_left: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Toggle the health check result.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Copy of every record written so far.
    pub async fn records(&self) -> MemoryRecords {
        self.records.lock().await.clone()
    }

    fn write<F>(&self, apply: F) -> BoxFuture<'static, StorageResult<()>>
    where
        F: FnOnce(&mut MemoryRecords) + Send + 'static,
    {
        let store = self.clone();
        Box::pin(async move {
            let failing = store
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing || store.offline.load(Ordering::SeqCst) {
                return Err(StorageError::unavailable(
                    "memory store rejected the write".into(),
                    Offline,
                ));
            }
            apply(&mut *store.records.lock().await);
            Ok(())
        })
    }
}

impl GameStore for MemoryGameStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.games.push(game))
    }

    fn end_game(
        &self,
        game_id: Uuid,
        rounds_completed: Round,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.ended_games.push((game_id, rounds_completed)))
    }

    fn save_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.rounds.push(round))
    }

    fn end_round(&self, game_id: Uuid, round: Round) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.ended_rounds.push((game_id, round)))
    }

    fn save_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| {
            r.players
                .retain(|p| !(p.id == player.id && p.game_id == player.game_id));
            r.players.push(player);
        })
    }

    fn save_prompt(&self, prompt: PromptEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.prompts.push(prompt))
    }

    fn save_selection(
        &self,
        selection: SelectionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.selections.push(selection))
    }

    fn save_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.write(move |r| r.votes.push(vote))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let offline = self.offline.load(Ordering::SeqCst);
        Box::pin(async move {
            if offline {
                Err(StorageError::unavailable(
                    "memory store is offline".into(),
                    Offline,
                ))
            } else {
                Ok(())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::now_rfc3339;

    #[tokio::test]
    async fn writes_are_recorded() {
        let store = MemoryGameStore::new();
        let game = GameEntity {
            id: Uuid::new_v4(),
            total_rounds: 3,
            started_at: now_rfc3339(),
        };
        store.save_game(game.clone()).await.unwrap();
        store.end_game(game.id, 3).await.unwrap();

        let records = store.records().await;
        assert_eq!(records.games, vec![game.clone()]);
        assert_eq!(records.ended_games, vec![(game.id, 3)]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryGameStore::new();
        store.fail_next(1);
        assert!(store.end_round(Uuid::new_v4(), 1).await.is_err());
        assert!(store.end_round(Uuid::new_v4(), 1).await.is_ok());
        assert_eq!(store.records().await.ended_rounds.len(), 1);
    }
}
