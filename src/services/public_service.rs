//! Team-facing operations: the active round, joining, answering, challenges and standings.

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        game::{GameRepository, to_fields},
        game_store::{WriteOp, WriteOutcome},
        models::{ChallengeEntity, ChallengeStatus, RoundStatus, TeamEntity, fields, paths},
    },
    dto::{
        admin::ChallengeView,
        common::{Audience, QuestionView, RoundView, StandingsView, TeamView},
        public::{
            ChallengeRequest, JoinTeamRequest, RoundResponse, StandingsQuery, SubmitAnswerRequest,
            SubmitAnswerResponse,
        },
    },
    error::ServiceError,
    services::{
        scoring_service::{self, MAX_GUARDED_ATTEMPTS, fields_of},
        sse_events, sync_service,
    },
    state::SharedState,
};

/// The active round with its questions, without answer keys.
///
/// Never fails: when storage is unavailable or the data is unreadable the
/// client is told no round is active.
pub async fn active_round(state: &SharedState) -> RoundResponse {
    let repository = match state.repository().await {
        Ok(repository) => repository,
        Err(_) => {
            warn!("active round requested while degraded");
            return RoundResponse::none();
        }
    };
    match load_active_round(&repository).await {
        Ok(Some(response)) => response,
        Ok(None) => RoundResponse::none(),
        Err(err) => {
            warn!(error = %err, "failed to load the active round");
            RoundResponse::none()
        }
    }
}

async fn load_active_round(
    repository: &GameRepository,
) -> Result<Option<RoundResponse>, ServiceError> {
    let Some(round) = repository
        .rounds()
        .await?
        .into_iter()
        .find(|round| round.status == RoundStatus::Active)
    else {
        return Ok(None);
    };
    let questions = repository
        .questions_for_round(&round.id)
        .await?
        .iter()
        .map(QuestionView::client_safe)
        .collect();
    Ok(Some(RoundResponse {
        has_active_round: true,
        round: Some(RoundView::from(&round)),
        questions: Some(questions),
    }))
}

/// Join the game, or rejoin under an existing name when the configuration allows it.
///
/// The new team is written together with a claim on its name and a bump of
/// its division's join counter, so racing joins cannot share a name or
/// overfill a division.
pub async fn join_team(
    state: &SharedState,
    request: JoinTeamRequest,
) -> Result<TeamView, ServiceError> {
    let repository = state.repository().await?;
    let config = repository.game_config().await?;
    let name = request.name.trim().to_owned();
    let division = request
        .division
        .map(|division| division.trim().to_owned())
        .filter(|division| !division.is_empty());

    for attempt in 1..=MAX_GUARDED_ATTEMPTS {
        // Counter first: a join committed after this read fails the guard below.
        let joins = match &division {
            Some(division) => repository.division_joins(division).await?,
            None => None,
        };
        let teams = repository.teams().await?;

        if let Some(existing) = teams
            .iter()
            .find(|team| team.name.eq_ignore_ascii_case(&name))
        {
            if !config.allow_rejoin {
                return Err(ServiceError::InvalidState(format!(
                    "team name `{name}` is already taken"
                )));
            }
            info!(team_id = %existing.id, name, "team rejoined");
            sse_events::broadcast_team_joined(state, existing);
            return Ok(TeamView::new(existing, 0));
        }

        if let Some(division) = &division {
            let members = teams
                .iter()
                .filter(|team| team.division.as_deref() == Some(division.as_str()))
                .count();
            let capacity = config.max_teams_per_division as usize;
            if capacity > 0 && members >= capacity {
                return Err(ServiceError::InvalidState(format!(
                    "division `{division}` is full ({capacity} teams)"
                )));
            }
        }

        let team = TeamEntity {
            id: Uuid::new_v4(),
            name: name.clone(),
            score: 0,
            streak: 0,
            division: division.clone(),
            eliminated: false,
            eliminated_after_round: None,
            joined_at: state.now_ms(),
        };
        let team_path = paths::team(team.id);
        let mut ops = vec![
            WriteOp::Create {
                path: paths::team_name(&team.name),
                fields: fields_of([(fields::TEAM_ID, Value::from(team.id.to_string()))]),
            },
            WriteOp::Create {
                fields: to_fields(&team_path, &team)?,
                path: team_path,
            },
        ];
        if let Some(division) = &team.division {
            ops.extend(division_guard(division, joins));
        }

        match repository.batch(ops).await? {
            WriteOutcome::Committed => {
                info!(
                    team_id = %team.id,
                    name = %team.name,
                    division = ?team.division,
                    "team joined"
                );
                sse_events::broadcast_team_joined(state, &team);
                return Ok(TeamView::new(&team, 0));
            }
            WriteOutcome::Conflict { path, .. } => {
                debug!(attempt, %path, name, "roster changed while joining; retrying");
            }
        }
    }

    Err(ServiceError::InvalidState(format!(
        "could not join as `{name}`: the roster kept changing"
    )))
}

/// Writes recording one more join in `division`, valid only if `joins` is still current.
fn division_guard(division: &str, joins: Option<i64>) -> Vec<WriteOp> {
    let path = paths::division(division);
    match joins {
        None => vec![WriteOp::Create {
            path,
            fields: fields_of([(fields::JOINS, Value::from(1))]),
        }],
        Some(joins) => vec![
            WriteOp::Expect {
                path: path.clone(),
                fields: fields_of([(fields::JOINS, Value::from(joins))]),
            },
            WriteOp::Increment {
                path,
                field: fields::JOINS.to_owned(),
                delta: 1,
                floor: None,
            },
        ],
    }
}

/// Submit an answer on behalf of a team.
pub async fn submit_answer(
    state: &SharedState,
    request: SubmitAnswerRequest,
) -> Result<SubmitAnswerResponse, ServiceError> {
    let answer = scoring_service::submit_answer(
        state,
        request.team_id,
        &request.question_id,
        request.payload,
    )
    .await?;
    Ok(SubmitAnswerResponse {
        pending_grading: answer.is_pending(),
        answer_id: answer.id,
    })
}

/// Dispute the grading of a team's answer.
pub async fn create_challenge(
    state: &SharedState,
    request: ChallengeRequest,
) -> Result<ChallengeView, ServiceError> {
    let repository = state.repository().await?;
    repository
        .team(request.team_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("team `{}` not found", request.team_id)))?;

    let answer_id = paths::answer_id(&request.question_id, request.team_id);
    let answer = repository.answer(&answer_id).await?.ok_or_else(|| {
        ServiceError::NotFound(format!(
            "no answer from this team on question `{}`",
            request.question_id
        ))
    })?;
    if answer.is_pending() {
        return Err(ServiceError::InvalidState(
            "answer has not been graded yet".into(),
        ));
    }
    let already_open = repository.challenges().await?.into_iter().any(|challenge| {
        challenge.answer_id == answer_id && challenge.status == ChallengeStatus::Open
    });
    if already_open {
        return Err(ServiceError::InvalidState(
            "a challenge for this answer is already open".into(),
        ));
    }

    let challenge = ChallengeEntity {
        id: Uuid::new_v4(),
        team_id: request.team_id,
        question_id: request.question_id,
        answer_id,
        reason: request.reason.trim().to_owned(),
        status: ChallengeStatus::Open,
        created_at: state.now_ms(),
        resolved_at: None,
    };
    repository.save_challenge(&challenge).await?;
    info!(challenge_id = %challenge.id, team_id = %challenge.team_id, "challenge raised");
    sse_events::broadcast_challenge_raised(state, &challenge);
    Ok(ChallengeView::from(&challenge))
}

/// Standings for the arena display or a single team.
pub async fn standings(
    state: &SharedState,
    query: StandingsQuery,
) -> Result<StandingsView, ServiceError> {
    let audience = query.audience.unwrap_or_default();
    match (audience, query.team_id) {
        (Audience::Admin, _) => Err(ServiceError::InvalidInput(
            "the admin audience is served by /admin/standings".into(),
        )),
        (Audience::Team, None) => Err(ServiceError::InvalidInput(
            "`teamId` is required for the team audience".into(),
        )),
        (Audience::Team, Some(team_id)) => {
            let view = sync_service::current_view(state, audience, Some(team_id)).await?;
            if view.own_team.is_none() {
                return Err(ServiceError::NotFound(format!("team `{team_id}` not found")));
            }
            Ok(view)
        }
        (Audience::Arena, _) => sync_service::current_view(state, audience, None).await,
    }
}
