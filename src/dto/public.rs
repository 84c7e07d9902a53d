use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::AnswerValue,
    dto::{
        common::{Audience, QuestionView, RoundView},
        validation::{validate_document_id, validate_not_blank},
    },
};

/// Minimal payload for game clients: the active round and its client-safe questions.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub has_active_round: bool,
    pub round: Option<RoundView>,
    pub questions: Option<Vec<QuestionView>>,
}

impl RoundResponse {
    /// Payload shown when no round is active or it cannot be determined.
    pub fn none() -> Self {
        Self {
            has_active_round: false,
            round: None,
            questions: None,
        }
    }
}

/// Request to join the game as a team.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinTeamRequest {
    #[validate(length(min = 1, max = 40), custom(function = "validate_not_blank"))]
    pub name: String,
    #[validate(length(min = 1, max = 40))]
    pub division: Option<String>,
}

/// Answer submitted by a team for the open question.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub team_id: Uuid,
    #[validate(custom(function = "validate_document_id"))]
    pub question_id: String,
    /// Choice index (mcq), booleans (mtf) or text (saq, spot).
    pub payload: AnswerValue,
}

/// Acknowledgement of an accepted answer.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub answer_id: String,
    /// True when the answer waits for an admin to grade it.
    pub pending_grading: bool,
}

/// Request to dispute the grading of an answer.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub team_id: Uuid,
    #[validate(custom(function = "validate_document_id"))]
    pub question_id: String,
    #[validate(length(min = 1, max = 500), custom(function = "validate_not_blank"))]
    pub reason: String,
}

/// Audience and team selecting which standings view to return.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct StandingsQuery {
    /// `arena` (default) or `team`.
    pub audience: Option<Audience>,
    /// Required for the team audience.
    pub team_id: Option<Uuid>,
}
