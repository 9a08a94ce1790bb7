use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::GameStore,
        models::{
            GameEntity, PlayerEntity, PromptEntity, RoundEntity, SelectionEntity, VoteEntity,
            now_rfc3339,
        },
        storage::{StorageError, StorageResult},
    },
    state::game::Round,
};

use super::{
    config::RestConfig,
    error::{RestDaoError, RestResult},
};

const GAMES: &str = "games";
const ROUNDS: &str = "rounds";
const PLAYERS: &str = "players";
const PROMPTS: &str = "prompts";
const SELECTIONS: &str = "image_selections";
const VOTES: &str = "votes";

/// Row-oriented store speaking the PostgREST dialect.
#[derive(Clone)]
pub struct RestGameStore {
    client: Client,
    base_url: Arc<str>,
    api_key: Option<Arc<str>>,
}

impl RestGameStore {
    /// Build the client and check that the store answers.
    pub async fn connect(config: RestConfig) -> RestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| RestDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
            api_key: config.api_key.map(Arc::<str>::from),
        };

        store.ping().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.api_key {
            Some(ref key) => builder
                .header("apikey", key.as_ref())
                .bearer_auth(key.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, path: &str, builder: reqwest::RequestBuilder) -> RestResult<()> {
        let response = builder
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RestDaoError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            })
        }
    }

    async fn insert<T>(&self, table: &str, row: &T) -> RestResult<()>
    where
        T: ?Sized + Serialize,
    {
        let builder = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(row);
        self.send(table, builder).await
    }

    async fn update<T>(&self, table: &str, filter: &[(&str, String)], patch: &T) -> RestResult<()>
    where
        T: ?Sized + Serialize,
    {
        let builder = self
            .request(Method::PATCH, table)
            .query(filter)
            .header("Prefer", "return=minimal")
            .json(patch);
        self.send(table, builder).await
    }

    async fn ping(&self) -> RestResult<()> {
        let builder = self.request(Method::GET, "");
        self.send("/", builder).await
    }

    fn spawn_insert<T>(&self, table: &'static str, row: T) -> BoxFuture<'static, StorageResult<()>>
    where
        T: Serialize,
    {
        let store = self.clone();
        // Serialized up front so the future owns plain JSON and stays `Send`.
        let row = serde_json::to_value(row);
        Box::pin(async move {
            let row = row.map_err(|err| StorageError::Rejected {
                message: format!("unserializable `{table}` record: {err}"),
            })?;
            store.insert(table, &row).await.map_err(Into::into)
        })
    }
}

impl GameStore for RestGameStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.spawn_insert(GAMES, game)
    }

    fn end_game(
        &self,
        game_id: Uuid,
        rounds_completed: Round,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = [("id", format!("eq.{game_id}"))];
            let patch = json!({
                "ended_at": now_rfc3339(),
                "rounds_completed": rounds_completed,
            });
            store
                .update(GAMES, &filter, &patch)
                .await
                .map_err(Into::into)
        })
    }

    fn save_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.spawn_insert(ROUNDS, round)
    }

    fn end_round(&self, game_id: Uuid, round: Round) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = [
                ("game_id", format!("eq.{game_id}")),
                ("round", format!("eq.{round}")),
            ];
            let patch = json!({ "ended_at": now_rfc3339() });
            store
                .update(ROUNDS, &filter, &patch)
                .await
                .map_err(Into::into)
        })
    }

    fn save_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::POST, PLAYERS)
                .query(&[("on_conflict", "id,game_id")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&player);
            store.send(PLAYERS, builder).await.map_err(Into::into)
        })
    }

    fn save_prompt(&self, prompt: PromptEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.spawn_insert(PROMPTS, prompt)
    }

    fn save_selection(
        &self,
        selection: SelectionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.spawn_insert(SELECTIONS, selection)
    }

    fn save_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.spawn_insert(VOTES, vote)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::VoteEntity;

    fn unreachable_store() -> RestGameStore {
        RestGameStore {
            client: Client::new(),
            base_url: Arc::from("http://127.0.0.1:9"),
            api_key: None,
        }
    }

    #[tokio::test]
    async fn row_inserts_run_on_their_own_task() {
        let store = unreachable_store();
        let vote = VoteEntity {
            game_id: Uuid::new_v4(),
            round: 1,
            voter_id: Uuid::new_v4(),
            votee_id: Uuid::new_v4(),
            prompt_id: 7,
            created_at: now_rfc3339(),
        };

        let err = tokio::spawn(store.save_vote(vote))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
