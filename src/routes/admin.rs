use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::admin::{
        ActionResponse, ErrorAnalytics, OverrideRequest, StatusReport, TeamChangeRequest,
    },
    error::AppError,
    services::game_service,
    state::{SharedState, coordinator::AdminCommand},
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints mirroring the admin WebSocket commands.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/status", get(status))
        .route("/admin/analytics/errors", get(error_analytics))
        .route("/admin/game/start", post(start_game))
        .route("/admin/game/end-round", post(end_round))
        .route("/admin/game/skip-selection", post(skip_selection))
        .route("/admin/game/skip-voting", post(skip_voting))
        .route("/admin/game/next-round", post(next_round))
        .route("/admin/game/restart", post(restart))
        .route("/admin/players/{id}/exclude", post(exclude_player))
        .route("/admin/players/{id}/team", put(change_team))
        .route("/admin/players/{id}", delete(remove_player))
        .route("/admin/lobby/clear", post(clear_lobby))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Phase, timers, per-player progress, blocked players and persistence failures.
#[utoipa::path(
    get,
    path = "/admin/status",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    responses((status = 200, description = "Current game status", body = StatusReport))
)]
pub async fn status(State(state): State<SharedState>) -> Json<StatusReport> {
    Json(game_service::status(&state).await)
}

/// Image generation failures of the current game by round, type and player.
#[utoipa::path(
    get,
    path = "/admin/analytics/errors",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    responses((status = 200, description = "Generation error summary", body = ErrorAnalytics))
)]
pub async fn error_analytics(State(state): State<SharedState>) -> Json<ErrorAnalytics> {
    Json(game_service::error_analytics(&state).await)
}

/// Start round 1, balancing players without a team.
#[utoipa::path(
    post,
    path = "/admin/game/start",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    responses((status = 200, description = "Game started", body = ActionResponse))
)]
pub async fn start_game(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    let response = game_service::run_admin_command(&state, AdminCommand::StartGame).await?;
    Ok(Json(response))
}

/// Close prompting early and open selection.
#[utoipa::path(
    post,
    path = "/admin/game/end-round",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    request_body = OverrideRequest,
    responses((status = 200, description = "Prompting closed", body = ActionResponse))
)]
pub async fn end_round(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OverrideRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::EndRound {
        round: payload.round,
    };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Resolve missing selections now and open voting.
#[utoipa::path(
    post,
    path = "/admin/game/skip-selection",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    request_body = OverrideRequest,
    responses((status = 200, description = "Voting opened", body = ActionResponse))
)]
pub async fn skip_selection(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OverrideRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::SkipSelection {
        round: payload.round,
    };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Close voting and publish the round results.
#[utoipa::path(
    post,
    path = "/admin/game/skip-voting",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    request_body = OverrideRequest,
    responses((status = 200, description = "Voting closed", body = ActionResponse))
)]
pub async fn skip_voting(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OverrideRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::SkipVoting {
        round: payload.round,
    };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Leave the results screen for the next round or the final standings.
#[utoipa::path(
    post,
    path = "/admin/game/next-round",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    request_body = OverrideRequest,
    responses((status = 200, description = "Advanced", body = ActionResponse))
)]
pub async fn next_round(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OverrideRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::NextRound {
        round: payload.round,
    };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Return to the lobby keeping every session.
#[utoipa::path(
    post,
    path = "/admin/game/restart",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    responses((status = 200, description = "Game restarted", body = ActionResponse))
)]
pub async fn restart(State(state): State<SharedState>) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        game_service::run_admin_command(&state, AdminCommand::Restart).await?,
    ))
}

/// Release a blocked player from the current selection requirement.
#[utoipa::path(
    post,
    path = "/admin/players/{id}/exclude",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code"),
    ("id" = Uuid, Path, description = "Session to exclude")),
    responses((status = 200, description = "Player excluded", body = ActionResponse))
)]
pub async fn exclude_player(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::ExcludePlayer { player: id };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Move a player to another team.
#[utoipa::path(
    put,
    path = "/admin/players/{id}/team",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code"),
    ("id" = Uuid, Path, description = "Session to move")),
    request_body = TeamChangeRequest,
    responses((status = 200, description = "Team changed", body = ActionResponse))
)]
pub async fn change_team(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<TeamChangeRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::SetTeam {
        player: id,
        team: payload.team,
    };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Drop a player from the lobby, closing their socket.
#[utoipa::path(
    delete,
    path = "/admin/players/{id}",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code"),
    ("id" = Uuid, Path, description = "Session to remove")),
    responses(
        (status = 200, description = "Player removed", body = ActionResponse),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn remove_player(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let command = AdminCommand::RemovePlayer { player: id };
    Ok(Json(game_service::run_admin_command(&state, command).await?))
}

/// Drop every player from the lobby.
#[utoipa::path(
    post,
    path = "/admin/lobby/clear",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Shared admin code")),
    responses((status = 200, description = "Lobby cleared", body = ActionResponse))
)]
pub async fn clear_lobby(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        game_service::run_admin_command(&state, AdminCommand::ClearLobby).await?,
    ))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    if provided == state.admin_code() {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("invalid admin token".into()))
    }
}
