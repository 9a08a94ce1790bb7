use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification of the game server.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::admin::status,
        crate::routes::admin::error_analytics,
        crate::routes::admin::start_game,
        crate::routes::admin::end_round,
        crate::routes::admin::skip_selection,
        crate::routes::admin::skip_voting,
        crate::routes::admin::next_round,
        crate::routes::admin::restart,
        crate::routes::admin::exclude_player,
        crate::routes::admin::change_team,
        crate::routes::admin::remove_player,
        crate::routes::admin::clear_lobby,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::admin::StatusReport,
            crate::dto::admin::PlayerStatusView,
            crate::dto::admin::OverrideRequest,
            crate::dto::admin::TeamChangeRequest,
            crate::dto::admin::ActionResponse,
            crate::dto::admin::ErrorAnalytics,
            crate::dto::admin::PlayerErrorSummary,
            crate::dto::admin::GenerationErrorView,
            crate::state::ledger::GenerationErrorKind,
            crate::dto::phase::PhaseView,
            crate::dto::game::PlayerView,
            crate::dto::game::EntryView,
            crate::dto::game::CandidateView,
            crate::dto::game::RoundResultView,
            crate::dto::game::StandingView,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::LobbyEvent,
            crate::dto::sse::SelectionBlockedEvent,
            crate::dto::sse::AdminChangedEvent,
            crate::dto::sse::PersistenceAlert,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "game", description = "Player and admin WebSocket"),
        (name = "admin", description = "Operator overrides and status"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_admin_overrides() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/admin/game/skip-selection"));
        assert!(doc.paths.paths.contains_key("/admin/status"));
        assert!(doc.paths.paths.contains_key("/admin/analytics/errors"));
    }
}
