use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        game::GameRepository,
        game_store::{Fields, WriteMode, WriteOp, WriteOutcome},
        models::{
            ChallengeStatus, GameConfigEntity, GamePhase, QuestionEntity, RoundEntity,
            RoundStatus, fields, paths,
        },
        storage::StorageError,
    },
    dto::{
        admin::{
            AdminSnapshot, AnswerView, ApplyEliminationRequest, ApplyEliminationResponse,
            ChallengeView, CheckScoreResponse, CreateQuestionRequest, CreateRoundRequest,
            DivisionTiesResponse, EliminationQuery, EliminationReportView, GameConfigView,
        },
        common::{Audience, QuestionView, RoundView, StandingsView, TeamView},
        phase::PhaseSnapshot,
    },
    error::ServiceError,
    services::{sync_service, tie_analyzer},
    state::{SharedState, game::validate_payload},
};

// ---------------------------------------------------------------------------
// Read-only projections
// ---------------------------------------------------------------------------

/// Everything the admin console needs in one read.
pub async fn snapshot(state: &SharedState) -> Result<AdminSnapshot, ServiceError> {
    let repository = state.repository().await?;
    let teams = repository.teams().await?;
    let answers = repository.answers().await?;
    let game_state = repository.game_state().await?.unwrap_or_default();
    let config = repository.game_config().await?;

    Ok(AdminSnapshot {
        teams: tie_analyzer::rank_teams(&teams)
            .iter()
            .map(|entry| TeamView::new(&entry.team, entry.rank))
            .collect(),
        rounds: repository.rounds().await?.iter().map(RoundView::from).collect(),
        questions: repository
            .questions()
            .await?
            .iter()
            .map(QuestionView::with_key)
            .collect(),
        pending_answers: answers
            .iter()
            .filter(|answer| answer.is_pending())
            .map(AnswerView::from)
            .collect(),
        answers: answers.iter().map(AnswerView::from).collect(),
        challenges: repository
            .challenges()
            .await?
            .iter()
            .map(ChallengeView::from)
            .collect(),
        game_state: PhaseSnapshot::from(&game_state),
        config: GameConfigView::from(&config),
    })
}

/// Projection with answer keys and the pending-grading count.
pub async fn standings(state: &SharedState) -> Result<StandingsView, ServiceError> {
    sync_service::current_view(state, Audience::Admin, None).await
}

/// Tie groups across all teams, or inside one division.
pub async fn check_score(
    state: &SharedState,
    division: Option<&str>,
) -> Result<CheckScoreResponse, ServiceError> {
    let teams = state.repository().await?.teams().await?;
    let ties = tie_analyzer::find_ties(&teams, division);
    Ok(CheckScoreResponse::from(ties.as_slice()))
}

/// Tie groups computed per division.
pub async fn division_ties(state: &SharedState) -> Result<DivisionTiesResponse, ServiceError> {
    let teams = state.repository().await?.teams().await?;
    let divisions = tie_analyzer::find_division_ties(&teams)
        .iter()
        .map(|(division, ties)| (division.clone(), CheckScoreResponse::from(ties.as_slice())))
        .collect();
    Ok(DivisionTiesResponse { divisions })
}

/// Report who would fall below the cut after `query.round`. Writes nothing.
pub async fn elimination(
    state: &SharedState,
    query: &EliminationQuery,
) -> Result<EliminationReportView, ServiceError> {
    let repository = state.repository().await?;
    ensure_round_exists(&repository, &query.round).await?;
    let teams = repository.teams().await?;
    let report = tie_analyzer::run_elimination(&teams, &query.round, query.keep);
    Ok(EliminationReportView::from(&report))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Mark the confirmed teams eliminated after `request.round_id`.
pub async fn apply_elimination(
    state: &SharedState,
    request: ApplyEliminationRequest,
) -> Result<ApplyEliminationResponse, ServiceError> {
    let repository = state.repository().await?;
    ensure_round_exists(&repository, &request.round_id).await?;

    let mut eliminated = Vec::new();
    let mut skipped = Vec::new();
    let mut ops = Vec::new();
    for team_id in request.team_ids {
        if eliminated.contains(&team_id) || skipped.contains(&team_id) {
            continue;
        }
        match repository.team(team_id).await? {
            Some(team) if !team.eliminated => {
                let path = paths::team(team_id);
                ops.push(WriteOp::Expect {
                    path: path.clone(),
                    fields: Fields::new(),
                });
                ops.push(WriteOp::Set {
                    path,
                    fields: Fields::from_iter([
                        ("eliminated".to_owned(), Value::from(true)),
                        (
                            "eliminated_after_round".to_owned(),
                            Value::from(request.round_id.as_str()),
                        ),
                    ]),
                    mode: WriteMode::Merge,
                });
                eliminated.push(team_id);
            }
            _ => skipped.push(team_id),
        }
    }

    if !ops.is_empty() {
        if let WriteOutcome::Conflict { path, .. } = repository.batch(ops).await? {
            return Err(ServiceError::InvalidState(format!(
                "`{path}` was removed while applying the elimination"
            )));
        }
    }
    info!(
        round = %request.round_id,
        eliminated = eliminated.len(),
        skipped = skipped.len(),
        "elimination applied"
    );
    Ok(ApplyEliminationResponse {
        eliminated,
        skipped,
    })
}

/// Replace the game configuration.
pub async fn update_config(
    state: &SharedState,
    view: GameConfigView,
) -> Result<GameConfigView, ServiceError> {
    let repository = state.repository().await?;
    let config = GameConfigEntity::from(view);
    repository.save_game_config(&config).await?;
    info!(
        question_timer_seconds = config.question_timer_seconds,
        allow_rejoin = config.allow_rejoin,
        max_teams_per_division = config.max_teams_per_division,
        "game configuration updated"
    );
    Ok(GameConfigView::from(&config))
}

pub async fn create_round(
    state: &SharedState,
    request: CreateRoundRequest,
) -> Result<RoundView, ServiceError> {
    let repository = state.repository().await?;
    let round = RoundEntity {
        id: request.id,
        title: request.title.trim().to_owned(),
        status: RoundStatus::Pending,
        position: request.position,
        countdown_seconds: request.countdown_seconds.filter(|seconds| *seconds > 0),
    };
    match repository.create_round(&round).await? {
        WriteOutcome::Committed => {
            info!(round = %round.id, "round created");
            Ok(RoundView::from(&round))
        }
        WriteOutcome::Conflict { .. } => Err(ServiceError::InvalidState(format!(
            "round `{}` already exists",
            round.id
        ))),
    }
}

/// Create a question; its key must fit its type, and `order` must be free in the round.
pub async fn create_question(
    state: &SharedState,
    request: CreateQuestionRequest,
) -> Result<QuestionView, ServiceError> {
    let repository = state.repository().await?;
    ensure_round_exists(&repository, &request.round_id).await?;

    let question = QuestionEntity {
        id: request.id,
        round_id: request.round_id,
        order: request.order,
        kind: request.kind,
        prompt: request.prompt.trim().to_owned(),
        choices: request.choices,
        statements: request.statements,
        key: request.key,
        difficulty: request.difficulty,
    };
    validate_payload(&question, &question.key)
        .map_err(|reason| ServiceError::InvalidInput(format!("invalid key: {reason}")))?;

    let order_taken = repository
        .questions_for_round(&question.round_id)
        .await?
        .iter()
        .any(|existing| existing.order == question.order);
    if order_taken {
        return Err(ServiceError::InvalidState(format!(
            "order {} is already used in round `{}`",
            question.order, question.round_id
        )));
    }

    match repository.create_question(&question).await? {
        WriteOutcome::Committed => {
            info!(question = %question.id, round = %question.round_id, "question created");
            Ok(QuestionView::with_key(&question))
        }
        WriteOutcome::Conflict { .. } => Err(ServiceError::InvalidState(format!(
            "question `{}` already exists",
            question.id
        ))),
    }
}

/// Change a round's status, completing any other active round so only one stays active.
///
/// The round of the question on screen must stay active until the game is stopped.
pub async fn set_round_status(
    state: &SharedState,
    round_id: &str,
    status: RoundStatus,
) -> Result<RoundView, ServiceError> {
    let repository = state.repository().await?;
    let rounds = repository.rounds().await?;
    let Some(mut target) = rounds.iter().find(|round| round.id == round_id).cloned() else {
        return Err(ServiceError::NotFound(format!("round `{round_id}` not found")));
    };

    let game_state = repository.game_state().await?.unwrap_or_default();
    if game_state.phase != GamePhase::Idle {
        if let Some(shown) = game_state.current_round_id.as_deref() {
            let stays_active = if shown == round_id {
                status == RoundStatus::Active
            } else {
                status != RoundStatus::Active
            };
            if !stays_active {
                return Err(ServiceError::InvalidState(format!(
                    "round `{shown}` has a question on screen; stop the game first"
                )));
            }
        }
    }

    let mut ops = vec![WriteOp::Expect {
        path: paths::GAME_STATE.to_owned(),
        fields: Fields::from_iter([
            (
                fields::PHASE.to_owned(),
                Value::from(game_state.phase.as_str()),
            ),
            (fields::VERSION.to_owned(), Value::from(game_state.version)),
        ]),
    }];
    if status == RoundStatus::Active {
        for other in rounds
            .iter()
            .filter(|round| round.id != round_id && round.status == RoundStatus::Active)
        {
            ops.push(status_op(&other.id, RoundStatus::Completed)?);
        }
    }
    ops.push(status_op(round_id, status)?);

    if let WriteOutcome::Conflict { path, .. } = repository.batch(ops).await? {
        return Err(ServiceError::InvalidState(format!(
            "`{path}` changed while updating round status"
        )));
    }
    target.status = status;
    info!(round = round_id, status = ?status, "round status changed");
    Ok(RoundView::from(&target))
}

fn status_op(round_id: &str, status: RoundStatus) -> Result<WriteOp, ServiceError> {
    let path = paths::round(round_id);
    let status =
        serde_json::to_value(status).map_err(|err| StorageError::malformed(&path, err))?;
    Ok(WriteOp::Set {
        path,
        fields: Fields::from_iter([("status".to_owned(), status)]),
        mode: WriteMode::Merge,
    })
}

/// Accept or reject an open challenge. Score corrections go through score modification.
pub async fn resolve_challenge(
    state: &SharedState,
    challenge_id: Uuid,
    status: ChallengeStatus,
) -> Result<ChallengeView, ServiceError> {
    if status == ChallengeStatus::Open {
        return Err(ServiceError::InvalidInput(
            "a challenge can only be resolved as `accepted` or `rejected`".into(),
        ));
    }
    let repository = state.repository().await?;
    let mut challenge = repository
        .challenge(challenge_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("challenge `{challenge_id}` not found")))?;
    if challenge.status != ChallengeStatus::Open {
        return Err(ServiceError::InvalidState(format!(
            "challenge `{challenge_id}` is already resolved"
        )));
    }

    challenge.status = status;
    challenge.resolved_at = Some(state.now_ms());
    repository.save_challenge(&challenge).await?;
    info!(%challenge_id, status = ?status, "challenge resolved");
    Ok(ChallengeView::from(&challenge))
}

async fn ensure_round_exists(
    repository: &GameRepository,
    round_id: &str,
) -> Result<(), ServiceError> {
    match repository.round(round_id).await? {
        Some(_) => Ok(()),
        None => Err(ServiceError::NotFound(format!("round `{round_id}` not found"))),
    }
}
