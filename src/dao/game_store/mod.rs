pub mod memory;
#[cfg(feature = "rest-store")]
pub mod rest;

use crate::dao::models::{
    GameEntity, PersistJob, PlayerEntity, PromptEntity, RoundEntity, SelectionEntity, VoteEntity,
};
use crate::dao::storage::StorageResult;
use crate::state::game::Round;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the durable record of played games.
///
/// Every write is fire-and-forget from the game's point of view.
pub trait GameStore: Send + Sync {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn end_game(&self, game_id: Uuid, rounds_completed: Round)
    -> BoxFuture<'static, StorageResult<()>>;
    fn save_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn end_round(&self, game_id: Uuid, round: Round) -> BoxFuture<'static, StorageResult<()>>;
    fn save_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn save_prompt(&self, prompt: PromptEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn save_selection(&self, selection: SelectionEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    fn save_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Route a job to the matching store call.
pub fn execute(store: &dyn GameStore, job: PersistJob) -> BoxFuture<'static, StorageResult<()>> {
    match job {
        PersistJob::CreateGame(game) => store.save_game(game),
        PersistJob::EndGame {
            game_id,
            rounds_completed,
        } => store.end_game(game_id, rounds_completed),
        PersistJob::CreateRound(round) => store.save_round(round),
        PersistJob::EndRound { game_id, round } => store.end_round(game_id, round),
        PersistJob::Player(player) => store.save_player(player),
        PersistJob::Prompt(prompt) => store.save_prompt(prompt),
        PersistJob::Selection(selection) => store.save_selection(selection),
        PersistJob::Vote(vote) => store.save_vote(vote),
    }
}
