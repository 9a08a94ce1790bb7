use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness, the current phase and storage health.
///
/// Storage trouble only degrades the answer; the game keeps running without it.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let storage_ok = match state.require_game_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        Err(err) => {
            warn!(error = %err, "no storage backend installed");
            false
        }
    };

    let phase = state.game().lock().await.phase_view();
    let failures = state.persistence_failures();
    if storage_ok && !state.is_degraded() {
        HealthResponse::ok(phase, failures)
    } else {
        HealthResponse::degraded(phase, failures)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::GameSettings, dao::game_store::memory::MemoryGameStore,
        services::image_service::PlaceholderGenerator, state::AppState,
    };

    #[tokio::test]
    async fn offline_store_reports_degraded() {
        let (state, _queue) = AppState::new(
            GameSettings::default(),
            Arc::new(PlaceholderGenerator::default()),
        );
        assert_eq!(health_status(&state).await.status, "degraded");

        let store = MemoryGameStore::new();
        state.install_game_store(Arc::new(store.clone())).await;
        assert_eq!(health_status(&state).await.status, "ok");

        store.set_offline(true);
        assert_eq!(health_status(&state).await.status, "degraded");
    }
}
