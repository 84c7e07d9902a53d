use crate::{
    dao::game_store::WriteOp,
    error::ServiceError,
    services::sse_events::broadcast_phase_changed,
    state::{SharedState, TransitionOutcome, state_machine::GameEvent},
};

/// Execute a planned state-machine transition, then broadcast the resulting phase change.
pub async fn run_transition_with_broadcast(
    state: &SharedState,
    event: GameEvent,
    extra_ops: Vec<WriteOp>,
) -> Result<TransitionOutcome, ServiceError> {
    let outcome = state.run_transition(event, extra_ops).await?;
    if let TransitionOutcome::Applied(next) = &outcome {
        broadcast_phase_changed(state, next);
    }
    Ok(outcome)
}

/// Apply the deadline due under the gate, then broadcast the resulting phase change.
pub async fn run_due_transition_with_broadcast(
    state: &SharedState,
) -> Result<TransitionOutcome, ServiceError> {
    let outcome = state.run_due_transition().await?;
    if let TransitionOutcome::Applied(next) = &outcome {
        broadcast_phase_changed(state, next);
    }
    Ok(outcome)
}
