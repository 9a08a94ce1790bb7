use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::phase::PhaseView;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Current game phase.
    pub phase: PhaseView,
    /// Records that could not be stored since start-up.
    pub persistence_failures: u64,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(phase: PhaseView, persistence_failures: u64) -> Self {
        Self {
            status: "ok".to_string(),
            phase,
            persistence_failures,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(phase: PhaseView, persistence_failures: u64) -> Self {
        Self {
            status: "degraded".to_string(),
            phase,
            persistence_failures,
        }
    }
}
