//! Drives a full round through the service layer with in-memory collaborators.

use std::{sync::Arc, time::Duration};

use axum::extract::ws::Message;
use prompt_party_back::{
    config::GameSettings,
    dao::game_store::memory::MemoryGameStore,
    dto::ws::ClientMessage,
    services::{game_service, image_service::PlaceholderGenerator, persistence},
    state::{
        AppState, SharedState, coordinator::AdminCommand, game::PromptId,
        state_machine::GamePhase,
    },
};
use serde_json::Value;
use tokio::{sync::mpsc, time::timeout};
use uuid::Uuid;

struct Socket {
    conn: Uuid,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Socket {
    fn open(state: &SharedState) -> Self {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state.connections().insert(conn, tx);
        Self { conn, rx }
    }

    /// Wait for the next message of the given type, skipping others.
    async fn expect(&mut self, kind: &str) -> Value {
        let deadline = Duration::from_secs(2);
        loop {
            let frame = timeout(deadline, self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("no `{kind}` message in time"))
                .expect("socket closed");
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
    }
}

async fn join(state: &SharedState, name: &str) -> (Socket, Uuid) {
    let mut socket = Socket::open(state);
    game_service::handle_client_message(
        state,
        socket.conn,
        ClientMessage::Join {
            reconnect_token: None,
            name: name.into(),
        },
    )
    .await;
    let joined = socket.expect("joined").await;
    let id = joined["player"]["session_id"].as_str().unwrap().parse().unwrap();
    (socket, id)
}

async fn submit(state: &SharedState, socket: &mut Socket, text: &str) -> PromptId {
    game_service::handle_client_message(
        state,
        socket.conn,
        ClientMessage::SubmitPrompt { text: text.into() },
    )
    .await;
    let ready = socket.expect("image_ready").await;
    PromptId(ready["entry"]["prompt_id"].as_u64().expect("valid entry"))
}

async fn phase(state: &SharedState) -> GamePhase {
    state.game().lock().await.phase()
}

#[tokio::test]
async fn one_round_is_played_and_recorded() {
    let settings = GameSettings {
        admin_code: "letmein".into(),
        total_rounds: 2,
        ..GameSettings::default()
    };
    let (state, queue) = AppState::new(settings, Arc::new(PlaceholderGenerator::default()));
    let store = MemoryGameStore::new();
    state.install_game_store(Arc::new(store.clone())).await;
    tokio::spawn(persistence::run(
        state.clone(),
        queue,
        persistence::RetryPolicy::default(),
    ));
    let mut spectators = state.public_sse().subscribe();

    let (_admin, _) = join(&state, "letmein").await;
    let (mut ana, ana_id) = join(&state, "ana").await;
    let (mut bo, bo_id) = join(&state, "bo").await;

    game_service::run_admin_command(&state, AdminCommand::StartGame)
        .await
        .unwrap();
    assert_eq!(phase(&state).await, GamePhase::Playing(1));
    ana.expect("round_started").await;

    let ana_prompt = submit(&state, &mut ana, "a lighthouse made of cheese").await;
    let bo_prompt = submit(&state, &mut bo, "a cat piloting a zeppelin").await;

    game_service::run_admin_command(&state, AdminCommand::EndRound { round: Some(1) })
        .await
        .unwrap();
    assert_eq!(phase(&state).await, GamePhase::Selecting(1));

    for (socket, prompt) in [(&ana, ana_prompt), (&bo, bo_prompt)] {
        game_service::handle_client_message(
            &state,
            socket.conn,
            ClientMessage::SelectImage {
                prompt_id: Some(prompt),
            },
        )
        .await;
    }
    assert_eq!(phase(&state).await, GamePhase::Voting(1));

    game_service::handle_client_message(
        &state,
        ana.conn,
        ClientMessage::CastVote {
            votee_id: bo_id,
            prompt_id: Some(bo_prompt),
        },
    )
    .await;
    game_service::handle_client_message(
        &state,
        bo.conn,
        ClientMessage::CastVote {
            votee_id: ana_id,
            prompt_id: Some(ana_prompt),
        },
    )
    .await;
    assert_eq!(phase(&state).await, GamePhase::Results(1));
    let results = ana.expect("round_results").await;
    assert_eq!(results["round"], 1);

    // A repeated override aimed at the closed round is refused without effect.
    assert!(
        game_service::run_admin_command(&state, AdminCommand::EndRound { round: Some(1) })
            .await
            .is_err()
    );
    assert_eq!(phase(&state).await, GamePhase::Results(1));

    let mut recorded = false;
    for _ in 0..100 {
        let records = store.records().await;
        if records.votes.len() == 2 && records.selections.len() == 2 && records.prompts.len() == 2
        {
            assert_eq!(records.games.len(), 1);
            recorded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recorded, "round records were not persisted");

    let mut saw_phase_change = false;
    while let Ok(event) = spectators.try_recv() {
        if event.event.as_deref() == Some("phase_changed") {
            saw_phase_change = true;
        }
    }
    assert!(saw_phase_change);
    assert_eq!(game_service::status(&state).await.persistence_failures, 0);
}

#[tokio::test]
async fn closed_socket_does_not_stall_the_game() {
    let settings = GameSettings {
        admin_code: "letmein".into(),
        ..GameSettings::default()
    };
    let (state, _queue) = AppState::new(settings, Arc::new(PlaceholderGenerator::default()));

    let (_admin, _) = join(&state, "letmein").await;
    let (gone, _) = join(&state, "gone").await;
    let (mut stays, _) = join(&state, "stays").await;

    // Drop the receiving half; the writer is gone but the entry is still registered.
    drop(gone.rx);

    game_service::run_admin_command(&state, AdminCommand::StartGame)
        .await
        .unwrap();
    stays.expect("round_started").await;
    assert_eq!(phase(&state).await, GamePhase::Playing(1));

    game_service::handle_disconnect(&state, gone.conn).await;
    assert_eq!(phase(&state).await, GamePhase::Playing(1));
}

#[tokio::test]
async fn admin_socket_status_counts_persistence_failures() {
    let settings = GameSettings {
        admin_code: "letmein".into(),
        ..GameSettings::default()
    };
    let (state, _queue) = AppState::new(settings, Arc::new(PlaceholderGenerator::default()));
    let (mut admin, _) = join(&state, "letmein").await;

    state.record_persistence_failure();
    state.record_persistence_failure();
    while admin.rx.try_recv().is_ok() {}

    game_service::handle_client_message(&state, admin.conn, ClientMessage::AdminGetStatus).await;
    let reply = admin.expect("admin_status").await;
    assert_eq!(reply["status"]["persistence_failures"], 2);
    assert_eq!(game_service::status(&state).await.persistence_failures, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_reach_the_gamemaster_in_order() {
    let settings = GameSettings {
        admin_code: "letmein".into(),
        ..GameSettings::default()
    };
    let (state, _queue) = AppState::new(settings, Arc::new(PlaceholderGenerator::default()));
    let (mut admin, _) = join(&state, "letmein").await;
    while admin.rx.try_recv().is_ok() {}

    let joins: Vec<_> = (0..16)
        .map(|n| {
            let state = state.clone();
            tokio::spawn(async move {
                let socket = Socket::open(&state);
                game_service::handle_client_message(
                    &state,
                    socket.conn,
                    ClientMessage::Join {
                        reconnect_token: None,
                        name: format!("player-{n}"),
                    },
                )
                .await;
                socket
            })
        })
        .collect();
    for handle in joins {
        handle.await.unwrap();
    }

    // Every join adds one player, so lists must arrive strictly growing.
    let mut sizes = Vec::new();
    while let Ok(Message::Text(text)) = admin.rx.try_recv() {
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        if value["type"] == "admin_player_list_update" {
            sizes.push(value["players"].as_array().unwrap().len());
        }
    }
    assert_eq!(sizes.len(), 16);
    assert!(sizes.windows(2).all(|pair| pair[0] < pair[1]), "{sizes:?}");
}
