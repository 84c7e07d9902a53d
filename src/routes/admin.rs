use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, header::AUTHORIZATION},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        admin::{
            AdminSnapshot, ApplyEliminationRequest, ApplyEliminationResponse, ChallengeView,
            CheckScoreQuery, CheckScoreResponse, CreateQuestionRequest, CreateRoundRequest,
            DivisionTiesResponse, EliminationQuery, EliminationReportView, GameConfigView,
            GradeAnswerRequest, GradeAnswerResponse, KickRequest, KickResponse,
            ModifyScoresRequest, ModifyScoresResponse, PushQuestionRequest, ResetScoresResponse,
            ResolveChallengeRequest, RoundStatusRequest,
        },
        common::{QuestionView, RoundView, StandingsView},
        phase::TransitionResponse,
        validation::ValidJson,
    },
    error::{AppError, ErrorBody},
    services::{admin_service, auth_service, game_service, scoring_service},
    state::SharedState,
};

/// Admin-only endpoints, every one behind the bearer token check.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin", get(snapshot))
        .route("/admin/standings", get(standings))
        .route("/admin/modify-scores", post(modify_scores))
        .route("/admin/reset-scores", post(reset_scores))
        .route("/admin/kick", post(kick))
        .route("/admin/check-score", get(check_score))
        .route("/admin/division-ties", get(division_ties))
        .route("/admin/push-question", post(push_question))
        .route("/admin/stop", post(stop))
        .route("/admin/pause-grading", post(pause_grading))
        .route("/admin/resume", post(resume))
        .route("/admin/answers/{id}/grade", post(grade_answer))
        .route("/admin/elimination", get(elimination))
        .route("/admin/eliminate", post(eliminate))
        .route("/admin/config", put(update_config))
        .route("/admin/rounds", post(create_round))
        .route("/admin/rounds/{id}/status", post(set_round_status))
        .route("/admin/questions", post(create_question))
        .route("/admin/challenges/{id}/resolve", post(resolve_challenge))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

/// Full admin console snapshot.
#[utoipa::path(
    get,
    path = "/admin",
    tag = "admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Teams, rounds, questions, answers, challenges, state and config", body = AdminSnapshot),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody)
    )
)]
pub async fn snapshot(State(state): State<SharedState>) -> Result<Json<AdminSnapshot>, AppError> {
    Ok(Json(admin_service::snapshot(&state).await?))
}

#[utoipa::path(
    get,
    path = "/admin/standings",
    tag = "admin",
    security(("bearer" = [])),
    responses((status = 200, description = "Admin projection with answer keys", body = StandingsView))
)]
pub async fn standings(State(state): State<SharedState>) -> Result<Json<StandingsView>, AppError> {
    Ok(Json(admin_service::standings(&state).await?))
}

/// Set, add or subtract points for several teams; missing teams are skipped.
#[utoipa::path(
    post,
    path = "/admin/modify-scores",
    tag = "admin",
    security(("bearer" = [])),
    request_body = ModifyScoresRequest,
    responses(
        (status = 200, description = "Scores updated", body = ModifyScoresResponse),
        (status = 400, description = "Invalid request", body = ErrorBody)
    )
)]
pub async fn modify_scores(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<ModifyScoresRequest>,
) -> Result<Json<ModifyScoresResponse>, AppError> {
    Ok(Json(scoring_service::modify_scores(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/admin/reset-scores",
    tag = "admin",
    security(("bearer" = [])),
    responses((status = 200, description = "Every score and streak set to zero", body = ResetScoresResponse))
)]
pub async fn reset_scores(
    State(state): State<SharedState>,
) -> Result<Json<ResetScoresResponse>, AppError> {
    Ok(Json(scoring_service::reset_scores(&state).await?))
}

/// Remove one team or every team, with their answers and challenges.
#[utoipa::path(
    post,
    path = "/admin/kick",
    tag = "admin",
    security(("bearer" = [])),
    request_body = KickRequest,
    responses(
        (status = 200, description = "Teams removed", body = KickResponse),
        (status = 404, description = "Team not found", body = ErrorBody)
    )
)]
pub async fn kick(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<KickRequest>,
) -> Result<Json<KickResponse>, AppError> {
    Ok(Json(scoring_service::kick(&state, request).await?))
}

#[utoipa::path(
    get,
    path = "/admin/check-score",
    tag = "admin",
    security(("bearer" = [])),
    params(CheckScoreQuery),
    responses((status = 200, description = "Groups of tied teams", body = CheckScoreResponse))
)]
pub async fn check_score(
    State(state): State<SharedState>,
    Query(query): Query<CheckScoreQuery>,
) -> Result<Json<CheckScoreResponse>, AppError> {
    let division = query
        .division
        .as_deref()
        .map(str::trim)
        .filter(|division| !division.is_empty());
    Ok(Json(admin_service::check_score(&state, division).await?))
}

#[utoipa::path(
    get,
    path = "/admin/division-ties",
    tag = "admin",
    security(("bearer" = [])),
    responses((status = 200, description = "Tie groups per division", body = DivisionTiesResponse))
)]
pub async fn division_ties(
    State(state): State<SharedState>,
) -> Result<Json<DivisionTiesResponse>, AppError> {
    Ok(Json(admin_service::division_ties(&state).await?))
}

/// Show a question of a round, or hide the current one with a null `questionId`.
#[utoipa::path(
    post,
    path = "/admin/push-question",
    tag = "admin",
    security(("bearer" = [])),
    request_body = PushQuestionRequest,
    responses(
        (status = 200, description = "Transition result", body = TransitionResponse),
        (status = 404, description = "Round or question not found", body = ErrorBody),
        (status = 409, description = "Question cannot be shown now", body = ErrorBody)
    )
)]
pub async fn push_question(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<PushQuestionRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = game_service::push_question(
        &state,
        &request.round_id,
        request.question_id.as_deref(),
    )
    .await?;
    Ok(Json(game_service::transition_response(&state, outcome).await?))
}

#[utoipa::path(
    post,
    path = "/admin/stop",
    tag = "admin",
    security(("bearer" = [])),
    responses((status = 200, description = "Game returned to idle", body = TransitionResponse))
)]
pub async fn stop(State(state): State<SharedState>) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = game_service::stop(&state).await?;
    Ok(Json(game_service::transition_response(&state, outcome).await?))
}

/// Freeze the answer timer until an explicit resume.
#[utoipa::path(
    post,
    path = "/admin/pause-grading",
    tag = "admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Timer frozen", body = TransitionResponse),
        (status = 409, description = "No question is running", body = ErrorBody)
    )
)]
pub async fn pause_grading(
    State(state): State<SharedState>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = game_service::pause_for_grading(&state).await?;
    Ok(Json(game_service::transition_response(&state, outcome).await?))
}

#[utoipa::path(
    post,
    path = "/admin/resume",
    tag = "admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Timer resumed", body = TransitionResponse),
        (status = 409, description = "Game is not paused", body = ErrorBody)
    )
)]
pub async fn resume(State(state): State<SharedState>) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = game_service::resume(&state).await?;
    Ok(Json(game_service::transition_response(&state, outcome).await?))
}

/// Grade a pending answer; a second grade is refused.
#[utoipa::path(
    post,
    path = "/admin/answers/{id}/grade",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Answer identifier")),
    request_body = GradeAnswerRequest,
    responses(
        (status = 200, description = "Answer graded", body = GradeAnswerResponse),
        (status = 404, description = "Answer not found", body = ErrorBody),
        (status = 409, description = "Answer already graded", body = ErrorBody)
    )
)]
pub async fn grade_answer(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<GradeAnswerRequest>,
) -> Result<Json<GradeAnswerResponse>, AppError> {
    Ok(Json(
        scoring_service::grade_answer(&state, &id, request.is_correct).await?,
    ))
}

/// Preview the cut after a round; nothing is written.
#[utoipa::path(
    get,
    path = "/admin/elimination",
    tag = "admin",
    security(("bearer" = [])),
    params(EliminationQuery),
    responses(
        (status = 200, description = "Elimination report", body = EliminationReportView),
        (status = 404, description = "Round not found", body = ErrorBody)
    )
)]
pub async fn elimination(
    State(state): State<SharedState>,
    Query(query): Query<EliminationQuery>,
) -> Result<Json<EliminationReportView>, AppError> {
    query.validate()?;
    Ok(Json(admin_service::elimination(&state, &query).await?))
}

#[utoipa::path(
    post,
    path = "/admin/eliminate",
    tag = "admin",
    security(("bearer" = [])),
    request_body = ApplyEliminationRequest,
    responses((status = 200, description = "Teams marked eliminated", body = ApplyEliminationResponse))
)]
pub async fn eliminate(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<ApplyEliminationRequest>,
) -> Result<Json<ApplyEliminationResponse>, AppError> {
    Ok(Json(admin_service::apply_elimination(&state, request).await?))
}

#[utoipa::path(
    put,
    path = "/admin/config",
    tag = "admin",
    security(("bearer" = [])),
    request_body = GameConfigView,
    responses((status = 200, description = "Configuration stored", body = GameConfigView))
)]
pub async fn update_config(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<GameConfigView>,
) -> Result<Json<GameConfigView>, AppError> {
    Ok(Json(admin_service::update_config(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/admin/rounds",
    tag = "admin",
    security(("bearer" = [])),
    request_body = CreateRoundRequest,
    responses(
        (status = 200, description = "Round created", body = RoundView),
        (status = 409, description = "Round id already used", body = ErrorBody)
    )
)]
pub async fn create_round(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<CreateRoundRequest>,
) -> Result<Json<RoundView>, AppError> {
    Ok(Json(admin_service::create_round(&state, request).await?))
}

/// Change a round's status; activating one completes the previously active round.
#[utoipa::path(
    post,
    path = "/admin/rounds/{id}/status",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Round identifier")),
    request_body = RoundStatusRequest,
    responses(
        (status = 200, description = "Round updated", body = RoundView),
        (status = 404, description = "Round not found", body = ErrorBody)
    )
)]
pub async fn set_round_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<RoundStatusRequest>,
) -> Result<Json<RoundView>, AppError> {
    Ok(Json(
        admin_service::set_round_status(&state, &id, request.status).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/admin/questions",
    tag = "admin",
    security(("bearer" = [])),
    request_body = CreateQuestionRequest,
    responses(
        (status = 200, description = "Question created", body = QuestionView),
        (status = 400, description = "Key does not fit the question type", body = ErrorBody),
        (status = 409, description = "Id or order already used", body = ErrorBody)
    )
)]
pub async fn create_question(
    State(state): State<SharedState>,
    ValidJson(request): ValidJson<CreateQuestionRequest>,
) -> Result<Json<QuestionView>, AppError> {
    Ok(Json(admin_service::create_question(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/admin/challenges/{id}/resolve",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Challenge identifier")),
    request_body = ResolveChallengeRequest,
    responses(
        (status = 200, description = "Challenge resolved", body = ChallengeView),
        (status = 409, description = "Challenge already resolved", body = ErrorBody)
    )
)]
pub async fn resolve_challenge(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<ResolveChallengeRequest>,
) -> Result<Json<ChallengeView>, AppError> {
    Ok(Json(
        admin_service::resolve_challenge(&state, id, request.status).await?,
    ))
}

/// Reject the request with a uniform 401 unless it carries an allow-listed bearer token.
pub(crate) async fn require_admin(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let claims = auth_service::authorize_admin(state.config(), authorization)?;
    info!(email = %claims.email, method = %req.method(), path = %req.uri().path(), "admin request");
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
