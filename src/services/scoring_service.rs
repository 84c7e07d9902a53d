//! Answer submission, grading and the explicit score operations.
//!
//! Every score change is a store-side increment or a write guarded by the
//! value it was computed from, so concurrent writers never lose updates.

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        game::to_fields,
        game_store::{ConflictKind, Fields, WriteMode, WriteOp, WriteOutcome},
        models::{
            AnswerEntity, AnswerValue, GamePhase, QuestionEntity, TeamEntity, fields, paths,
        },
    },
    dto::admin::{
        GradeAnswerResponse, KickRequest, KickResponse, ModifyScoresRequest, ModifyScoresResponse,
        ResetScoresResponse, ScoreChange, ScoreMode,
    },
    error::{RejectReason, ServiceError},
    services::{game_service, sse_events},
    state::{
        SharedState, TransitionOutcome,
        game::{auto_grade, points_for, validate_payload},
    },
};

/// Attempts for score writes guarded by the values they were computed from.
pub(crate) const MAX_GUARDED_ATTEMPTS: usize = 3;

/// Accept an answer for the question currently open.
///
/// Auto-gradable answers are graded on the spot and scored in the same batch
/// that records them; the others wait for an admin.
pub async fn submit_answer(
    state: &SharedState,
    team_id: Uuid,
    question_id: &str,
    payload: AnswerValue,
) -> Result<AnswerEntity, ServiceError> {
    let repository = state.repository().await?;
    let game_state = repository.game_state().await?.unwrap_or_default();
    let now = state.now_ms();

    let team = repository
        .team(team_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("team `{team_id}` not found")))?;

    let reject = |reason: RejectReason| {
        debug!(%team_id, question_id, reason = reason.code(), "answer rejected");
        Err(ServiceError::AnswerRejected(reason))
    };
    if game_state.phase != GamePhase::Active {
        return reject(RejectReason::WrongPhase);
    }
    if game_state.current_question_id.as_deref() != Some(question_id) {
        return reject(RejectReason::QuestionMismatch);
    }
    if game_state.deadline_ms.is_some_and(|deadline| deadline <= now) {
        return reject(RejectReason::WrongPhase);
    }
    if team.eliminated {
        return reject(RejectReason::TeamEliminated);
    }

    let answer_id = paths::answer_id(question_id, team_id);
    if repository.answer(&answer_id).await?.is_some() {
        return reject(RejectReason::Duplicate);
    }

    let question = repository
        .question(question_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}` not found")))?;
    validate_payload(&question, &payload).map_err(ServiceError::InvalidInput)?;

    let is_correct = auto_grade(&question, &payload);
    let answer = AnswerEntity {
        id: answer_id,
        team_id,
        question_id: question_id.to_owned(),
        payload,
        is_correct,
        points_awarded: is_correct.map_or(0, |correct| points_for(&question, correct)),
        submitted_at: now,
        graded_at: is_correct.map(|_| now),
    };

    let answer_path = paths::answer(&answer.id);
    let mut ops = vec![
        WriteOp::Expect {
            path: paths::GAME_STATE.to_owned(),
            fields: fields_of([
                (fields::PHASE, Value::from(GamePhase::Active.as_str())),
                (fields::CURRENT_QUESTION_ID, Value::from(question_id)),
            ]),
        },
        WriteOp::Create {
            fields: to_fields(&answer_path, &answer)?,
            path: answer_path.clone(),
        },
    ];
    if let Some(correct) = is_correct {
        ops.extend(score_ops(team_id, answer.points_awarded, correct));
    }

    match repository.batch(ops).await? {
        WriteOutcome::Committed => {}
        WriteOutcome::Conflict { path, kind } => {
            return Err(submit_conflict(&path, kind, &answer_path, team_id));
        }
    }

    info!(
        %team_id,
        question_id,
        answer_id = %answer.id,
        is_correct = ?answer.is_correct,
        points = answer.points_awarded,
        "answer recorded"
    );
    if answer.is_pending() {
        sse_events::broadcast_answer_pending(state, &answer);
    }
    Ok(answer)
}

fn submit_conflict(
    path: &str,
    kind: ConflictKind,
    answer_path: &str,
    team_id: Uuid,
) -> ServiceError {
    match kind {
        ConflictKind::AlreadyExists if path == answer_path => {
            ServiceError::AnswerRejected(RejectReason::Duplicate)
        }
        _ if path == paths::GAME_STATE => ServiceError::AnswerRejected(RejectReason::WrongPhase),
        _ => {
            warn!(%team_id, path, ?kind, "answer batch conflicted on team document");
            ServiceError::NotFound(format!("team `{team_id}` not found"))
        }
    }
}

/// Record an admin's verdict on a manually graded answer.
///
/// The write only applies while the answer is still ungraded, so a verdict is
/// never scored twice. Grading the last pending answer of a question the timer
/// stopped for resumes the question.
pub async fn grade_answer(
    state: &SharedState,
    answer_id: &str,
    is_correct: bool,
) -> Result<GradeAnswerResponse, ServiceError> {
    let repository = state.repository().await?;
    let answer = repository
        .answer(answer_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("answer `{answer_id}` not found")))?;
    if !answer.is_pending() {
        return Err(ServiceError::AlreadyGraded(answer_id.to_owned()));
    }
    let question: QuestionEntity = repository
        .question(&answer.question_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("question `{}` not found", answer.question_id))
        })?;

    let points = points_for(&question, is_correct);
    let answer_path = paths::answer(answer_id);
    let mut ops = vec![
        WriteOp::Expect {
            path: answer_path.clone(),
            fields: fields_of([(fields::IS_CORRECT, Value::Null)]),
        },
        WriteOp::Set {
            path: answer_path.clone(),
            fields: fields_of([
                (fields::IS_CORRECT, Value::from(is_correct)),
                ("points_awarded", Value::from(points)),
                ("graded_at", Value::from(state.now_ms())),
            ]),
            mode: WriteMode::Merge,
        },
    ];
    ops.extend(score_ops(answer.team_id, points, is_correct));

    match repository.batch(ops).await? {
        WriteOutcome::Committed => {}
        WriteOutcome::Conflict { path, kind } if path == answer_path => {
            return Err(match kind {
                ConflictKind::Missing => {
                    ServiceError::NotFound(format!("answer `{answer_id}` not found"))
                }
                _ => ServiceError::AlreadyGraded(answer_id.to_owned()),
            });
        }
        WriteOutcome::Conflict { .. } => {
            return Err(ServiceError::NotFound(format!(
                "team `{}` not found",
                answer.team_id
            )));
        }
    }
    info!(answer_id, team_id = %answer.team_id, is_correct, points, "answer graded");

    let resumed = resume_if_graded(state, &answer.question_id).await?;
    Ok(GradeAnswerResponse {
        answer_id: answer_id.to_owned(),
        is_correct,
        points_awarded: points,
        resumed,
    })
}

/// Run the expiry check when the grading pause on `question_id` may be over.
async fn resume_if_graded(state: &SharedState, question_id: &str) -> Result<bool, ServiceError> {
    let current = game_service::current_state(state).await?;
    if current.phase != GamePhase::GradingPaused
        || current.current_question_id.as_deref() != Some(question_id)
    {
        return Ok(false);
    }
    let outcome = game_service::check_expiry(state).await?;
    Ok(matches!(
        outcome,
        TransitionOutcome::Applied(next) if next.phase == GamePhase::Active
    ))
}

/// Score and streak writes for a graded answer.
fn score_ops(team_id: Uuid, points: i64, is_correct: bool) -> Vec<WriteOp> {
    let path = paths::team(team_id);
    let streak = if is_correct {
        WriteOp::Increment {
            path: path.clone(),
            field: fields::STREAK.to_owned(),
            delta: 1,
            floor: Some(0),
        }
    } else {
        WriteOp::Set {
            path: path.clone(),
            fields: fields_of([(fields::STREAK, Value::from(0))]),
            mode: WriteMode::Merge,
        }
    };
    vec![
        WriteOp::Increment {
            path,
            field: fields::SCORE.to_owned(),
            delta: points,
            floor: Some(0),
        },
        streak,
    ]
}

/// Set, add or subtract points for several teams in one batch, never below zero.
pub async fn modify_scores(
    state: &SharedState,
    request: ModifyScoresRequest,
) -> Result<ModifyScoresResponse, ServiceError> {
    let repository = state.repository().await?;
    let mut team_ids = request.team_ids;
    let mut seen = std::collections::HashSet::new();
    team_ids.retain(|id| seen.insert(*id));

    for attempt in 1..=MAX_GUARDED_ATTEMPTS {
        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        let mut ops = Vec::new();

        for team_id in &team_ids {
            let Some(team) = repository.team(*team_id).await? else {
                skipped.push(*team_id);
                continue;
            };
            let new_score = apply_mode(team.score, request.mode, request.value);
            let path = paths::team(team.id);
            ops.push(WriteOp::Expect {
                path: path.clone(),
                fields: fields_of([(fields::SCORE, Value::from(team.score))]),
            });
            ops.push(WriteOp::Set {
                path,
                fields: fields_of([(fields::SCORE, Value::from(new_score))]),
                mode: WriteMode::Merge,
            });
            updated.push(ScoreChange {
                team_id: team.id,
                old_score: team.score,
                new_score,
            });
        }

        if ops.is_empty() {
            return Ok(ModifyScoresResponse { updated, skipped });
        }
        match repository.batch(ops).await? {
            WriteOutcome::Committed => {
                info!(
                    mode = ?request.mode,
                    value = request.value,
                    teams = updated.len(),
                    skipped = skipped.len(),
                    "scores modified"
                );
                return Ok(ModifyScoresResponse { updated, skipped });
            }
            WriteOutcome::Conflict { path, .. } => {
                debug!(attempt, %path, "scores changed while modifying; retrying");
            }
        }
    }

    Err(ServiceError::InvalidState(
        "scores kept changing concurrently; nothing was modified".into(),
    ))
}

fn apply_mode(current: i64, mode: ScoreMode, value: i64) -> i64 {
    let next = match mode {
        ScoreMode::Set => value,
        ScoreMode::Add => current.saturating_add(value),
        ScoreMode::Subtract => current.saturating_sub(value),
    };
    next.max(0)
}

/// Zero every team's score and streak.
pub async fn reset_scores(state: &SharedState) -> Result<ResetScoresResponse, ServiceError> {
    let repository = state.repository().await?;

    for attempt in 1..=MAX_GUARDED_ATTEMPTS {
        let teams = repository.teams().await?;
        if teams.is_empty() {
            return Ok(ResetScoresResponse { count: 0 });
        }

        let mut ops = Vec::with_capacity(teams.len() * 2);
        for team in &teams {
            let path = paths::team(team.id);
            // Guards against recreating a team kicked meanwhile.
            ops.push(WriteOp::Expect {
                path: path.clone(),
                fields: Fields::new(),
            });
            ops.push(WriteOp::Set {
                path,
                fields: fields_of([
                    (fields::SCORE, Value::from(0)),
                    (fields::STREAK, Value::from(0)),
                ]),
                mode: WriteMode::Merge,
            });
        }

        match repository.batch(ops).await? {
            WriteOutcome::Committed => {
                info!(count = teams.len(), "scores reset");
                return Ok(ResetScoresResponse { count: teams.len() });
            }
            WriteOutcome::Conflict { path, .. } => {
                debug!(attempt, %path, "team removed while resetting; retrying");
            }
        }
    }

    Err(ServiceError::InvalidState(
        "teams kept changing concurrently; nothing was reset".into(),
    ))
}

/// Remove one team, or every team, with their answers and challenges.
pub async fn kick(state: &SharedState, request: KickRequest) -> Result<KickResponse, ServiceError> {
    let repository = state.repository().await?;

    let kicked: Vec<TeamEntity> = match request.team_id {
        Some(team_id) if !request.kick_all => {
            let team = repository
                .team(team_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("team `{team_id}` not found")))?;
            vec![team]
        }
        _ => repository.teams().await?,
    };
    let targets: Vec<Uuid> = kicked.iter().map(|team| team.id).collect();

    let answers: Vec<String> = repository
        .answers()
        .await?
        .into_iter()
        .filter(|answer| targets.contains(&answer.team_id))
        .map(|answer| paths::answer(&answer.id))
        .collect();
    let challenges: Vec<String> = repository
        .challenges()
        .await?
        .into_iter()
        .filter(|challenge| targets.contains(&challenge.team_id))
        .map(|challenge| paths::challenge(challenge.id))
        .collect();

    let ops: Vec<WriteOp> = kicked
        .iter()
        .flat_map(|team| [paths::team(team.id), paths::team_name(&team.name)])
        .chain(answers.iter().cloned())
        .chain(challenges.iter().cloned())
        .map(|path| WriteOp::Delete { path })
        .collect();
    if !ops.is_empty() {
        repository.batch(ops).await?;
    }

    info!(
        teams = targets.len(),
        answers = answers.len(),
        challenges = challenges.len(),
        "teams kicked"
    );
    if !targets.is_empty() {
        sse_events::broadcast_teams_kicked(state, &targets);
    }
    Ok(KickResponse {
        removed_teams: targets,
        removed_answers: answers.len(),
        removed_challenges: challenges.len(),
    })
}

pub(crate) fn fields_of<const N: usize>(entries: [(&str, Value); N]) -> Fields {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::{Difficulty, QuestionKind},
        services::{
            game_service::{check_expiry, pause_for_grading, push_question},
            testing::{Harness, harness},
            tie_analyzer::find_ties,
        },
    };

    async fn open_question(h: &Harness, kind: QuestionKind, difficulty: Difficulty) {
        h.round("R1", None).await;
        h.question("q1", "R1", kind, difficulty).await;
        push_question(&h.state, "R1", Some("q1")).await.unwrap();
    }

    fn rejected(result: Result<AnswerEntity, ServiceError>) -> RejectReason {
        match result {
            Err(ServiceError::AnswerRejected(reason)) => reason,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn correct_mcq_scores_immediately() {
        let h = harness().await;
        let team = h.team("owls", 4).await;
        open_question(&h, QuestionKind::Mcq, Difficulty::Difficult).await;
        let before = game_service::current_state(&h.state).await.unwrap();

        let answer = submit_answer(&h.state, team.id, "q1", AnswerValue::Choice(2))
            .await
            .unwrap();
        assert_eq!(answer.is_correct, Some(true));
        assert_eq!(answer.points_awarded, 3);

        let stored = h.repo.team(team.id).await.unwrap().unwrap();
        assert_eq!(stored.score, 7);
        assert_eq!(stored.streak, 1);
        assert_eq!(game_service::current_state(&h.state).await.unwrap(), before);
    }

    #[tokio::test]
    async fn wrong_mtf_breaks_the_streak() {
        let h = harness().await;
        let mut team = h.team("owls", 4).await;
        team.streak = 3;
        h.repo.save_team(&team).await.unwrap();
        open_question(&h, QuestionKind::Mtf, Difficulty::Medium).await;

        let answer = submit_answer(
            &h.state,
            team.id,
            "q1",
            AnswerValue::Statements(vec![true, true]),
        )
        .await
        .unwrap();
        assert_eq!(answer.is_correct, Some(false));

        let stored = h.repo.team(team.id).await.unwrap().unwrap();
        assert_eq!((stored.score, stored.streak), (4, 0));
    }

    #[tokio::test]
    async fn submissions_are_rejected_outside_the_open_question() {
        let h = harness().await;
        let team = h.team("owls", 0).await;
        h.round("R1", None).await;
        h.question("q1", "R1", QuestionKind::Mcq, Difficulty::Easy).await;

        let idle = submit_answer(&h.state, team.id, "q1", AnswerValue::Choice(0)).await;
        assert_eq!(rejected(idle), RejectReason::WrongPhase);

        push_question(&h.state, "R1", Some("q1")).await.unwrap();
        let other = submit_answer(&h.state, team.id, "q9", AnswerValue::Choice(0)).await;
        assert_eq!(rejected(other), RejectReason::QuestionMismatch);

        submit_answer(&h.state, team.id, "q1", AnswerValue::Choice(0))
            .await
            .unwrap();
        let again = submit_answer(&h.state, team.id, "q1", AnswerValue::Choice(2)).await;
        assert_eq!(rejected(again), RejectReason::Duplicate);

        let late_team = h.team("late", 0).await;
        h.clock.advance(30_000);
        let late = submit_answer(&h.state, late_team.id, "q1", AnswerValue::Choice(2)).await;
        assert_eq!(rejected(late), RejectReason::WrongPhase);
    }

    #[tokio::test]
    async fn eliminated_and_unknown_teams_cannot_answer() {
        let h = harness().await;
        let mut out = h.team("out", 0).await;
        out.eliminated = true;
        h.repo.save_team(&out).await.unwrap();
        open_question(&h, QuestionKind::Mcq, Difficulty::Easy).await;

        let eliminated = submit_answer(&h.state, out.id, "q1", AnswerValue::Choice(2)).await;
        assert_eq!(rejected(eliminated), RejectReason::TeamEliminated);

        let unknown = submit_answer(&h.state, Uuid::new_v4(), "q1", AnswerValue::Choice(2)).await;
        assert!(matches!(unknown, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn payload_must_match_question_type() {
        let h = harness().await;
        let team = h.team("owls", 0).await;
        open_question(&h, QuestionKind::Mcq, Difficulty::Easy).await;

        let err = submit_answer(&h.state, team.id, "q1", AnswerValue::Text("b".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(h.repo.answers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saq_expiry_waits_for_every_pending_answer() {
        let h = harness().await;
        let first = h.team("first", 0).await;
        let second = h.team("second", 0).await;
        open_question(&h, QuestionKind::Saq, Difficulty::Medium).await;

        for team in [&first, &second] {
            let answer = submit_answer(&h.state, team.id, "q1", AnswerValue::Text("Paris".into()))
                .await
                .unwrap();
            assert!(answer.is_pending());
        }

        h.clock.advance(31_000);
        let TransitionOutcome::Applied(paused) = check_expiry(&h.state).await.unwrap() else {
            panic!("expiry did not pause");
        };
        assert_eq!(paused.phase, GamePhase::GradingPaused);
        assert_eq!(paused.remaining_ms_at_pause, Some(0));

        let first_answer = paths::answer_id("q1", first.id);
        let graded = grade_answer(&h.state, &first_answer, true).await.unwrap();
        assert!(!graded.resumed);
        assert_eq!(graded.points_awarded, 2);
        h.clock.advance(120_000);
        check_expiry(&h.state).await.unwrap();
        assert_eq!(
            game_service::current_state(&h.state).await.unwrap().phase,
            GamePhase::GradingPaused
        );

        let second_answer = paths::answer_id("q1", second.id);
        let graded = grade_answer(&h.state, &second_answer, false).await.unwrap();
        assert!(graded.resumed);
        assert_eq!(
            game_service::current_state(&h.state).await.unwrap().phase,
            GamePhase::Active
        );
        assert_eq!(h.repo.team(first.id).await.unwrap().unwrap().score, 2);
        assert_eq!(h.repo.team(second.id).await.unwrap().unwrap().score, 0);
    }

    #[tokio::test]
    async fn grading_twice_awards_once() {
        let h = harness().await;
        let team = h.team("owls", 0).await;
        open_question(&h, QuestionKind::Spot, Difficulty::Difficult).await;
        let answer = submit_answer(&h.state, team.id, "q1", AnswerValue::Text("here".into()))
            .await
            .unwrap();

        grade_answer(&h.state, &answer.id, true).await.unwrap();
        let err = grade_answer(&h.state, &answer.id, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyGraded(_)));
        assert_eq!(h.repo.team(team.id).await.unwrap().unwrap().score, 3);

        let missing = grade_answer(&h.state, "q1__nobody", true).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn held_pause_is_not_resumed_by_grading() {
        let h = harness().await;
        let team = h.team("owls", 0).await;
        open_question(&h, QuestionKind::Saq, Difficulty::Easy).await;
        let answer = submit_answer(&h.state, team.id, "q1", AnswerValue::Text("x".into()))
            .await
            .unwrap();
        pause_for_grading(&h.state).await.unwrap();

        let graded = grade_answer(&h.state, &answer.id, true).await.unwrap();
        assert!(!graded.resumed);
        assert_eq!(
            game_service::current_state(&h.state).await.unwrap().phase,
            GamePhase::GradingPaused
        );
    }

    #[tokio::test]
    async fn set_add_subtract_clamps_at_zero() {
        let h = harness().await;
        let team = h.team("owls", 12).await;
        let missing = Uuid::new_v4();

        let mut last = None;
        for (mode, value) in [
            (ScoreMode::Set, 5),
            (ScoreMode::Add, 3),
            (ScoreMode::Subtract, 100),
        ] {
            let response = modify_scores(
                &h.state,
                ModifyScoresRequest {
                    team_ids: vec![team.id, missing, team.id],
                    mode,
                    value,
                },
            )
            .await
            .unwrap();
            assert_eq!(response.skipped, [missing]);
            assert_eq!(response.updated.len(), 1);
            last = Some(response.updated[0].clone());
        }

        let last = last.unwrap();
        assert_eq!((last.old_score, last.new_score), (8, 0));
        assert_eq!(h.repo.team(team.id).await.unwrap().unwrap().score, 0);
    }

    #[tokio::test]
    async fn reset_zeroes_everyone() {
        let h = harness().await;
        let a = h.team("a", 5).await;
        let b = h.team("b", 9).await;

        assert_eq!(reset_scores(&h.state).await.unwrap().count, 2);
        assert_eq!(reset_scores(&h.state).await.unwrap().count, 2);
        for id in [a.id, b.id] {
            let team = h.repo.team(id).await.unwrap().unwrap();
            assert_eq!((team.score, team.streak), (0, 0));
        }
    }

    #[tokio::test]
    async fn kick_removes_team_answers_and_ties() {
        let h = harness().await;
        let kicked = h.team("kicked", 10).await;
        let stays = h.team("stays", 10).await;
        h.team("other", 7).await;
        open_question(&h, QuestionKind::Saq, Difficulty::Easy).await;
        submit_answer(&h.state, kicked.id, "q1", AnswerValue::Text("a".into()))
            .await
            .unwrap();
        submit_answer(&h.state, stays.id, "q1", AnswerValue::Text("b".into()))
            .await
            .unwrap();
        assert_eq!(find_ties(&h.repo.teams().await.unwrap(), None).len(), 1);

        let response = kick(
            &h.state,
            KickRequest {
                team_id: Some(kicked.id),
                kick_all: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(response.removed_teams, [kicked.id]);
        assert_eq!(response.removed_answers, 1);

        assert!(h.repo.team(kicked.id).await.unwrap().is_none());
        let answers = h.repo.answers().await.unwrap();
        assert!(answers.iter().all(|answer| answer.team_id != kicked.id));
        assert!(find_ties(&h.repo.teams().await.unwrap(), None).is_empty());

        let again = kick(
            &h.state,
            KickRequest {
                team_id: Some(kicked.id),
                kick_all: false,
            },
        )
        .await;
        assert!(matches!(again, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn kick_all_empties_the_game() {
        let h = harness().await;
        h.team("a", 1).await;
        h.team("b", 2).await;
        let response = kick(
            &h.state,
            KickRequest {
                team_id: None,
                kick_all: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(response.removed_teams.len(), 2);
        assert!(h.repo.teams().await.unwrap().is_empty());
    }
}
