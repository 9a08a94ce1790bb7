use std::convert::Infallible;

use axum::{
    Router,
    extract::{Query, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{
    error::AppError,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

/// Credential of the admin stream; browsers cannot set headers on `EventSource`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AdminStreamQuery {
    /// Shared admin code.
    pub token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/sse/public",
    tag = "sse",
    responses((status = 200, description = "Public SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream phase and lobby events to spectator screens.
pub async fn public_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_public(&state).await;
    info!("New public SSE connection");
    sse_service::to_sse_stream(receiver, StreamKind::Public)
}

#[utoipa::path(
    get,
    path = "/sse/admin",
    tag = "sse",
    params(AdminStreamQuery),
    responses(
        (status = 200, description = "Admin SSE stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or invalid admin code")
    )
)]
/// Stream operator events: blocked selections, role changes and persistence alerts.
pub async fn admin_stream(
    State(state): State<SharedState>,
    Query(query): Query<AdminStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    let receiver = sse_service::subscribe_admin(&state, query.token.as_deref()).await?;
    info!("New admin SSE connection");
    Ok(sse_service::to_sse_stream(receiver, StreamKind::Admin))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/public", get(public_stream))
        .route("/sse/admin", get(admin_stream))
}
