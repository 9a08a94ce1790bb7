//! Prompt Party Back binary entrypoint wiring REST, WebSocket, SSE, image generation and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prompt_party_back::{
    config::{AppConfig, StorageConfig},
    dao::{
        game_store::{GameStore, memory::MemoryGameStore},
        storage::StorageError,
    },
    routes,
    services::{image_service, persistence, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let generator =
        image_service::from_config(&config.image_backend).context("building image backend")?;

    let (app_state, persist_queue) = AppState::new(config.game.clone(), generator);

    tokio::spawn(persistence::run(
        app_state.clone(),
        persist_queue,
        persistence::RetryPolicy::default(),
    ));
    spawn_storage_supervisor(app_state.clone(), config.storage.clone());

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the supervisor for the configured storage backend.
fn spawn_storage_supervisor(state: SharedState, storage: StorageConfig) {
    match storage {
        StorageConfig::Memory => {
            info!("storing game records in memory");
            let store = MemoryGameStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok::<Arc<dyn GameStore>, StorageError>(Arc::new(store)) }
            }));
        }
        #[cfg(feature = "rest-store")]
        StorageConfig::Rest { base_url, api_key } => {
            use prompt_party_back::dao::game_store::rest::{RestConfig, RestGameStore};

            tokio::spawn(storage_supervisor::run(state, move || {
                let base_url = base_url.clone();
                let api_key = api_key.clone();
                async move {
                    let config = match base_url {
                        Some(url) => {
                            let config = RestConfig::new(url);
                            match api_key.or_else(|| env::var("STORE_API_KEY").ok()) {
                                Some(key) => config.with_api_key(key),
                                None => config,
                            }
                        }
                        None => RestConfig::from_env()?,
                    };
                    let store = RestGameStore::connect(config).await?;
                    Ok::<Arc<dyn GameStore>, StorageError>(Arc::new(store))
                }
            }));
        }
        #[cfg(not(feature = "rest-store"))]
        StorageConfig::Rest { .. } => {
            tracing::error!("REST storage requested but the `rest-store` feature is disabled; running degraded");
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
