use tracing::info;

use crate::{
    dao::{
        game::{GameRepository, to_fields},
        game_store::{WriteMode, WriteOp},
        models::{GameStateEntity, RoundStatus, paths},
    },
    dto::phase::{PhaseSnapshot, TransitionResponse},
    error::ServiceError,
    state::{
        SharedState, TransitionOutcome,
        state_machine::{GameEvent, PushedQuestion},
        transitions::{run_due_transition_with_broadcast, run_transition_with_broadcast},
    },
};

/// Create the singleton game documents when they are missing.
pub async fn init(state: &SharedState) -> Result<(), ServiceError> {
    let repository = state.repository().await?;
    repository.init_defaults().await?;
    Ok(())
}

/// Show `question_id` of `round_id`, or hide the current question when `None`.
///
/// Showing a question also makes its round the single active round, in the
/// same batch as the state change.
pub async fn push_question(
    state: &SharedState,
    round_id: &str,
    question_id: Option<&str>,
) -> Result<TransitionOutcome, ServiceError> {
    let Some(question_id) = question_id else {
        let event = GameEvent::PushQuestion {
            round_id: round_id.to_owned(),
            question: None,
        };
        return run_transition_with_broadcast(state, event, Vec::new()).await;
    };

    let repository = state.repository().await?;
    let round = repository
        .round(round_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("round `{round_id}` not found")))?;
    let question = repository
        .question(question_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}` not found")))?;
    if question.round_id != round.id {
        return Err(ServiceError::InvalidInput(format!(
            "question `{question_id}` does not belong to round `{round_id}`"
        )));
    }

    let activation = round_activation_ops(&repository, round_id).await?;
    let event = GameEvent::PushQuestion {
        round_id: round.id.clone(),
        question: Some(PushedQuestion {
            id: question.id.clone(),
            kind: question.kind,
            countdown_ms: round
                .countdown_seconds
                .map(|seconds| i64::from(seconds) * 1_000),
        }),
    };
    run_transition_with_broadcast(state, event, activation).await
}

/// Writes making `round_id` the only active round; the previous one completes.
async fn round_activation_ops(
    repository: &GameRepository,
    round_id: &str,
) -> Result<Vec<WriteOp>, ServiceError> {
    let mut ops = Vec::new();
    for mut round in repository.rounds().await? {
        let status = if round.id == round_id {
            RoundStatus::Active
        } else if round.status == RoundStatus::Active {
            RoundStatus::Completed
        } else {
            continue;
        };
        if round.status == status {
            continue;
        }
        round.status = status;
        let path = paths::round(&round.id);
        ops.push(WriteOp::Set {
            fields: to_fields(&path, &round)?,
            path,
            mode: WriteMode::Replace,
        });
    }
    Ok(ops)
}

/// Force the game back to idle; stopping an idle game does nothing.
pub async fn stop(state: &SharedState) -> Result<TransitionOutcome, ServiceError> {
    run_transition_with_broadcast(state, GameEvent::Stop, Vec::new()).await
}

/// Suspend the running question timer until an admin resumes it.
pub async fn pause_for_grading(state: &SharedState) -> Result<TransitionOutcome, ServiceError> {
    run_transition_with_broadcast(state, GameEvent::PauseForGrading, Vec::new()).await
}

/// Restart the timer of a paused question with its preserved remaining time.
pub async fn resume(state: &SharedState) -> Result<TransitionOutcome, ServiceError> {
    run_transition_with_broadcast(state, GameEvent::Resume, Vec::new()).await
}

/// Apply whatever deadline has passed. Safe to call from any client at any time.
///
/// Callers racing on the same deadline see one `Applied` and the rest `Unchanged`.
pub async fn check_expiry(state: &SharedState) -> Result<TransitionOutcome, ServiceError> {
    let outcome = run_due_transition_with_broadcast(state).await?;
    if let TransitionOutcome::Applied(next) = &outcome {
        info!(
            to = next.phase.as_str(),
            version = next.version,
            "expiry transition applied"
        );
    }
    Ok(outcome)
}

/// Response body for a transition request, re-reading the state when another writer won.
pub async fn transition_response(
    state: &SharedState,
    outcome: TransitionOutcome,
) -> Result<TransitionResponse, ServiceError> {
    let (applied, game_state) = match outcome {
        TransitionOutcome::Applied(next) => (true, next),
        TransitionOutcome::Unchanged(current) => (false, current),
        TransitionOutcome::Superseded => (false, current_state(state).await?),
    };
    Ok(TransitionResponse {
        applied,
        state: PhaseSnapshot::from(&game_state),
    })
}

/// Stored game state, defaulting to idle before initialisation.
pub async fn current_state(state: &SharedState) -> Result<GameStateEntity, ServiceError> {
    let repository = state.repository().await?;
    Ok(repository.game_state().await?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::{Difficulty, GamePhase, QuestionKind},
        services::testing::{START_MS, harness},
        state::state_machine::is_consistent,
    };
    use std::sync::Arc;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn push_activates_round_and_completes_previous() {
        let h = harness().await;
        h.round("R1", None).await;
        h.round("R2", Some(3)).await;
        h.question("q1", "R1", QuestionKind::Mcq, Difficulty::Easy).await;
        h.question("q2", "R2", QuestionKind::Mcq, Difficulty::Easy).await;

        let outcome = push_question(&h.state, "R1", Some("q1")).await.unwrap();
        assert!(outcome.is_applied());
        assert_eq!(
            h.repo.round("R1").await.unwrap().unwrap().status,
            RoundStatus::Active
        );

        stop(&h.state).await.unwrap();
        let TransitionOutcome::Applied(next) =
            push_question(&h.state, "R2", Some("q2")).await.unwrap()
        else {
            panic!("push was not applied");
        };
        assert_eq!(next.phase, GamePhase::Countdown);
        assert_eq!(next.phase_ends_at_ms, Some(START_MS + 3_000));

        let statuses: Vec<RoundStatus> = h
            .repo
            .rounds()
            .await
            .unwrap()
            .iter()
            .map(|round| round.status)
            .collect();
        assert_eq!(statuses, [RoundStatus::Completed, RoundStatus::Active]);
    }

    #[tokio::test]
    async fn question_must_belong_to_round() {
        let h = harness().await;
        h.round("R1", None).await;
        h.round("R2", None).await;
        h.question("q2", "R2", QuestionKind::Mcq, Difficulty::Easy).await;

        let err = push_question(&h.state, "R1", Some("q2")).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let missing = push_question(&h.state, "R9", Some("q2")).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
        assert_eq!(current_state(&h.state).await.unwrap().phase, GamePhase::Idle);
    }

    #[tokio::test]
    async fn hide_is_idempotent() {
        let h = harness().await;
        h.round("R1", None).await;
        h.question("q1", "R1", QuestionKind::Mcq, Difficulty::Easy).await;
        push_question(&h.state, "R1", Some("q1")).await.unwrap();

        let first = push_question(&h.state, "R1", None).await.unwrap();
        assert!(first.is_applied());
        let second = push_question(&h.state, "R1", None).await.unwrap();
        assert!(matches!(second, TransitionOutcome::Unchanged(_)));

        let idle = current_state(&h.state).await.unwrap();
        assert_eq!(idle.phase, GamePhase::Idle);
        assert_eq!(idle.current_question_id, None);
    }

    #[tokio::test]
    async fn expiry_walks_countdown_active_reveal_idle() {
        let h = harness().await;
        h.round("R1", Some(2)).await;
        h.question("q1", "R1", QuestionKind::Mtf, Difficulty::Medium).await;
        push_question(&h.state, "R1", Some("q1")).await.unwrap();

        assert!(!check_expiry(&h.state).await.unwrap().is_applied());

        let mut phases = Vec::new();
        for step in [2_000, 30_000, 5_000] {
            h.clock.advance(step);
            let TransitionOutcome::Applied(next) = check_expiry(&h.state).await.unwrap() else {
                panic!("nothing was due after {step}ms");
            };
            assert!(is_consistent(&next));
            phases.push(next.phase);
        }
        assert_eq!(
            phases,
            [GamePhase::Active, GamePhase::Reveal, GamePhase::Idle]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_expiry_checks_apply_each_deadline_once() {
        let h = harness().await;
        h.round("R1", Some(2)).await;
        h.question("q1", "R1", QuestionKind::Mcq, Difficulty::Easy).await;

        for _ in 0..25 {
            push_question(&h.state, "R1", Some("q1")).await.unwrap();
            h.clock.advance(2_000);

            let barrier = Arc::new(Barrier::new(16));
            let tasks: Vec<_> = (0..16)
                .map(|_| {
                    let state = h.state.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        check_expiry(&state).await
                    })
                })
                .collect();

            let mut applied = 0;
            for task in tasks {
                if task.await.unwrap().unwrap().is_applied() {
                    applied += 1;
                }
            }
            assert_eq!(applied, 1);
            assert_eq!(current_state(&h.state).await.unwrap().phase, GamePhase::Active);
            stop(&h.state).await.unwrap();
        }
    }

    #[tokio::test]
    async fn explicit_pause_and_resume_keep_remaining_time() {
        let h = harness().await;
        h.round("R1", None).await;
        h.question("q1", "R1", QuestionKind::Mcq, Difficulty::Easy).await;
        push_question(&h.state, "R1", Some("q1")).await.unwrap();

        h.clock.advance(10_000);
        pause_for_grading(&h.state).await.unwrap();
        h.clock.advance(60_000);
        assert!(!check_expiry(&h.state).await.unwrap().is_applied());

        let TransitionOutcome::Applied(resumed) = resume(&h.state).await.unwrap() else {
            panic!("resume was not applied");
        };
        assert_eq!(resumed.deadline_ms, Some(h.now_ms() + 20_000));
    }

    #[tokio::test]
    async fn transitions_fail_in_degraded_mode() {
        let h = harness().await;
        h.state.clear_game_store().await;
        assert!(matches!(
            stop(&h.state).await.unwrap_err(),
            ServiceError::Degraded
        ));
    }
}
