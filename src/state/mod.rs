pub mod admin;
pub mod coordinator;
pub mod game;
pub mod ledger;
pub mod recovery;
pub mod scoring;
pub mod selection;
pub mod session;
mod sse;
pub mod state_machine;
pub mod voting;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};

use crate::{
    config::GameSettings,
    dao::{game_store::GameStore, models::PersistJob},
    error::ServiceError,
    services::image_service::ImageGenerator,
    state::{coordinator::GameCoordinator, game::ConnectionId},
};

pub use self::sse::SseHub;
use self::sse::SseState;

pub type SharedState = Arc<AppState>;

/// Receiving end of the persistence queue, drained by the persistence worker.
pub type PersistQueue = mpsc::UnboundedReceiver<PersistJob>;

/// Central application state: the game coordinator plus the handles used to
/// carry out its effects.
pub struct AppState {
    game: Mutex<GameCoordinator>,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    sse: SseState,
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    degraded: watch::Sender<bool>,
    persist_tx: mpsc::UnboundedSender<PersistJob>,
    persistence_failures: AtomicU64,
    generator: Arc<dyn ImageGenerator>,
    admin_code: String,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply,
    /// together with the queue the persistence worker must drain.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(settings: GameSettings, generator: Arc<dyn ImageGenerator>) -> (SharedState, PersistQueue) {
        Self::with_coordinator(GameCoordinator::new(settings.clone()), settings, generator)
    }

    /// Same as [`AppState::new`] with a prepared coordinator.
    pub fn with_coordinator(
        coordinator: GameCoordinator,
        settings: GameSettings,
        generator: Arc<dyn ImageGenerator>,
    ) -> (SharedState, PersistQueue) {
        let (degraded_tx, _rx) = watch::channel(true);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            game: Mutex::new(coordinator),
            connections: DashMap::new(),
            sse: SseState::new(64, 64),
            game_store: RwLock::new(None),
            degraded: degraded_tx,
            persist_tx,
            persistence_failures: AtomicU64::new(0),
            generator,
            admin_code: settings.admin_code,
        });
        (state, persist_rx)
    }

    /// The single serialization domain of the game.
    pub fn game(&self) -> &Mutex<GameCoordinator> {
        &self.game
    }

    /// Writers of the open WebSockets keyed by connection.
    pub fn connections(&self) -> &DashMap<ConnectionId, mpsc::UnboundedSender<Message>> {
        &self.connections
    }

    /// Image generation collaborator.
    pub fn generator(&self) -> Arc<dyn ImageGenerator> {
        self.generator.clone()
    }

    /// Shared credential guarding the admin REST surface.
    pub fn admin_code(&self) -> &str {
        &self.admin_code
    }

    /// Queue a job for the persistence worker. Never blocks the game.
    pub fn enqueue_persist(&self, job: PersistJob) {
        if self.persist_tx.send(job).is_err() {
            tracing::error!("persistence worker is gone; dropping record");
            self.record_persistence_failure();
        }
    }

    /// Count a record that could not be stored.
    pub fn record_persistence_failure(&self) -> u64 {
        self.persistence_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records that could not be stored since start-up.
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::SeqCst)
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Return the installed store or a degraded-mode error.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn install_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin()
    }
}
