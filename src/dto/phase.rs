use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::dao::models::{GamePhase, GameStateEntity, QuestionKind};

/// Raw view of the stored game state, as broadcast on phase changes.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSnapshot {
    pub phase: GamePhase,
    pub version: u64,
    pub round_id: Option<String>,
    pub question_id: Option<String>,
    pub question_type: Option<QuestionKind>,
    pub deadline_ms: Option<i64>,
    pub phase_ends_at_ms: Option<i64>,
    pub paused_for_grading: bool,
    pub remaining_ms_at_pause: Option<i64>,
}

impl From<&GameStateEntity> for PhaseSnapshot {
    fn from(state: &GameStateEntity) -> Self {
        Self {
            phase: state.phase,
            version: state.version,
            round_id: state.current_round_id.clone(),
            question_id: state.current_question_id.clone(),
            question_type: state.current_question_kind,
            deadline_ms: state.deadline_ms,
            phase_ends_at_ms: state.phase_ends_at_ms,
            paused_for_grading: state.paused_for_grading,
            remaining_ms_at_pause: state.remaining_ms_at_pause,
        }
    }
}

/// Result of an admin or expiry-driven transition request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    /// False when nothing was due or another writer got there first.
    pub applied: bool,
    pub state: PhaseSnapshot,
}
