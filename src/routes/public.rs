use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};

use crate::{
    dto::{
        admin::ChallengeView,
        common::{StandingsView, TeamView},
        phase::TransitionResponse,
        public::{
            ChallengeRequest, JoinTeamRequest, RoundResponse, StandingsQuery, SubmitAnswerRequest,
            SubmitAnswerResponse,
        },
        validation::ValidJson,
    },
    error::{AppError, ErrorBody},
    services::{game_service, public_service},
    state::SharedState,
};

/// Endpoints used by team clients and the arena display.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/round", get(get_round))
        .route("/standings", get(get_standings))
        .route("/teams", post(join_team))
        .route("/answers", post(submit_answer))
        .route("/challenges", post(create_challenge))
        .route("/game/expire", post(expire))
}

#[utoipa::path(
    get,
    path = "/round",
    tag = "public",
    responses((status = 200, description = "Active round and its questions, without answer keys", body = RoundResponse))
)]
/// Return the active round; reports no round when storage is unavailable.
pub async fn get_round(State(state): State<SharedState>) -> Json<RoundResponse> {
    Json(public_service::active_round(&state).await)
}

#[utoipa::path(
    get,
    path = "/standings",
    tag = "public",
    params(StandingsQuery),
    responses(
        (status = 200, description = "Current projection", body = StandingsView),
        (status = 404, description = "Unknown team", body = ErrorBody)
    )
)]
pub async fn get_standings(
    State(state): State<SharedState>,
    Query(query): Query<StandingsQuery>,
) -> Result<Json<StandingsView>, AppError> {
    Ok(Json(public_service::standings(&state, query).await?))
}

#[utoipa::path(
    post,
    path = "/teams",
    tag = "public",
    request_body = JoinTeamRequest,
    responses(
        (status = 200, description = "Team joined or rejoined", body = TeamView),
        (status = 409, description = "Name taken or division full", body = ErrorBody)
    )
)]
/// Join the game as a new team.
pub async fn join_team(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<JoinTeamRequest>,
) -> Result<Json<TeamView>, AppError> {
    Ok(Json(public_service::join_team(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/answers",
    tag = "public",
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = SubmitAnswerResponse),
        (status = 400, description = "Payload does not fit the question type", body = ErrorBody),
        (status = 404, description = "Unknown team", body = ErrorBody),
        (status = 409, description = "Answer rejected, see `code`", body = ErrorBody)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<SubmitAnswerRequest>,
) -> Result<Json<SubmitAnswerResponse>, AppError> {
    Ok(Json(public_service::submit_answer(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/challenges",
    tag = "public",
    request_body = ChallengeRequest,
    responses(
        (status = 200, description = "Challenge raised", body = ChallengeView),
        (status = 409, description = "Answer not graded or already challenged", body = ErrorBody)
    )
)]
/// Dispute the grading of the team's answer to a question.
pub async fn create_challenge(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<ChallengeRequest>,
) -> Result<Json<ChallengeView>, AppError> {
    Ok(Json(public_service::create_challenge(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/game/expire",
    tag = "public",
    responses((status = 200, description = "Expiry check result; `applied` is false when nothing was due", body = TransitionResponse))
)]
/// Run the expiry check; safe to call from any number of clients.
pub async fn expire(State(state): State<SharedState>) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = game_service::check_expiry(&state).await?;
    Ok(Json(game_service::transition_response(&state, outcome).await?))
}
