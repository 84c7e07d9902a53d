use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        AnswerEntity, AnswerValue, ChallengeEntity, ChallengeStatus, Difficulty,
        GameConfigEntity, QuestionKind, RoundStatus,
    },
    dto::{
        common::{QuestionView, RoundView, TeamView},
        format_epoch_ms,
        phase::PhaseSnapshot,
        validation::{validate_document_id, validate_not_blank},
    },
};

/// How a score modification combines with the current score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Replace the score.
    Set,
    /// Add to the score.
    Add,
    /// Subtract from the score, clamped at zero.
    Subtract,
}

/// Request to set, add or subtract points for several teams at once.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModifyScoresRequest {
    #[validate(length(min = 1, message = "at least one team id is required"))]
    pub team_ids: Vec<Uuid>,
    pub mode: ScoreMode,
    #[validate(range(min = 0, message = "value must not be negative"))]
    pub value: i64,
}

/// Score of one team before and after a modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreChange {
    pub team_id: Uuid,
    pub old_score: i64,
    pub new_score: i64,
}

/// Result of a score modification batch.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModifyScoresResponse {
    pub updated: Vec<ScoreChange>,
    /// Requested teams that do not exist.
    pub skipped: Vec<Uuid>,
}

/// Number of teams whose score and streak were reset.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetScoresResponse {
    pub count: usize,
}

/// Either a single team or every team.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KickRequest {
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub kick_all: bool,
}

impl Validate for KickRequest {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();
        if self.team_id.is_some() == self.kick_all {
            let mut err = validator::ValidationError::new("kick_target");
            err.message = Some("provide exactly one of `teamId` or `kickAll: true`".into());
            errors.add("teamId", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Teams removed by a kick, with the answers and challenges removed alongside.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KickResponse {
    pub removed_teams: Vec<Uuid>,
    pub removed_answers: usize,
    pub removed_challenges: usize,
}

/// Optional division filter for the tie check.
#[derive(Debug, Deserialize, IntoParams)]
pub struct CheckScoreQuery {
    /// Restrict the analysis to a division.
    pub division: Option<String>,
}

/// Team taking part in a tie.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TieMember {
    pub id: Uuid,
    pub name: String,
}

/// Teams sharing the same score.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TieGroupView {
    pub score: i64,
    pub teams: Vec<TieMember>,
}

/// Tie groups among the teams still in play.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckScoreResponse {
    pub has_ties: bool,
    /// Number of tie groups.
    pub count: usize,
    pub ties: Vec<TieGroupView>,
}

/// Tie check run separately for each division.
#[derive(Debug, Serialize, ToSchema)]
pub struct DivisionTiesResponse {
    /// Ties keyed by division, divisions in name order.
    pub divisions: IndexMap<String, CheckScoreResponse>,
}

/// Request to show a question of a round, or hide the current one.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushQuestionRequest {
    #[validate(custom(function = "validate_document_id"))]
    pub round_id: String,
    /// Question to show; null hides the current question.
    #[validate(custom(function = "validate_document_id"))]
    pub question_id: Option<String>,
}

/// Manual grading decision for a pending answer.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GradeAnswerRequest {
    pub is_correct: bool,
}

/// Outcome of grading an answer.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GradeAnswerResponse {
    pub answer_id: String,
    pub is_correct: bool,
    pub points_awarded: i64,
    /// Whether grading this answer resumed the suspended timer.
    pub resumed: bool,
}

/// Parameters of the elimination report.
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct EliminationQuery {
    /// Round at whose end the cut applies.
    #[validate(custom(function = "validate_document_id"))]
    pub round: String,
    /// Number of places kept.
    #[validate(range(min = 1))]
    pub keep: usize,
}

/// Team with its competition rank.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RankedTeamView {
    pub rank: u32,
    pub id: Uuid,
    pub name: String,
    pub score: i64,
}

/// Elimination proposal; nothing is applied until the admin confirms.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EliminationReportView {
    pub cutoff_round: String,
    pub keep: usize,
    /// Score of the last kept place.
    pub threshold_score: Option<i64>,
    pub ranked: Vec<RankedTeamView>,
    /// Teams strictly below the threshold.
    pub candidates: Vec<RankedTeamView>,
    /// Teams sharing the threshold score across the cut; needs a human decision.
    pub boundary_tie: Option<TieGroupView>,
}

/// Teams confirmed for elimination at the end of a round.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEliminationRequest {
    #[validate(custom(function = "validate_document_id"))]
    pub round_id: String,
    #[validate(length(min = 1))]
    pub team_ids: Vec<Uuid>,
}

/// Teams eliminated, and requested teams that were missing or already out.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEliminationResponse {
    pub eliminated: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

/// Game settings editable by the admin.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameConfigView {
    #[validate(range(min = 1, max = 3600))]
    pub question_timer_seconds: u32,
    pub allow_rejoin: bool,
    /// 0 means unlimited.
    pub max_teams_per_division: u32,
}

impl From<&GameConfigEntity> for GameConfigView {
    fn from(config: &GameConfigEntity) -> Self {
        Self {
            question_timer_seconds: config.question_timer_seconds,
            allow_rejoin: config.allow_rejoin,
            max_teams_per_division: config.max_teams_per_division,
        }
    }
}

impl From<GameConfigView> for GameConfigEntity {
    fn from(view: GameConfigView) -> Self {
        Self {
            question_timer_seconds: view.question_timer_seconds,
            allow_rejoin: view.allow_rejoin,
            max_teams_per_division: view.max_teams_per_division,
        }
    }
}

/// Payload creating a round.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoundRequest {
    #[validate(custom(function = "validate_document_id"))]
    pub id: String,
    #[validate(length(min = 1, max = 120), custom(function = "validate_not_blank"))]
    pub title: String,
    #[serde(default)]
    pub position: i64,
    #[validate(range(max = 600))]
    pub countdown_seconds: Option<u32>,
}

/// Payload creating a question with its answer key.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionRequest {
    #[validate(custom(function = "validate_document_id"))]
    pub id: String,
    #[validate(custom(function = "validate_document_id"))]
    pub round_id: String,
    pub order: u32,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub statements: Vec<String>,
    /// Choice index (mcq), booleans (mtf) or reference text (saq, spot).
    pub key: AnswerValue,
    pub difficulty: Difficulty,
}

/// Request to move a round to another status.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RoundStatusRequest {
    pub status: RoundStatus,
}

/// Decision closing an open challenge.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResolveChallengeRequest {
    /// `accepted` or `rejected`.
    pub status: ChallengeStatus,
}

/// Submitted answer as shown to administrators.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerView {
    pub id: String,
    pub team_id: Uuid,
    pub question_id: String,
    pub payload: AnswerValue,
    pub is_correct: Option<bool>,
    pub points_awarded: i64,
    pub submitted_at: String,
    pub graded_at: Option<String>,
}

impl From<&AnswerEntity> for AnswerView {
    fn from(answer: &AnswerEntity) -> Self {
        Self {
            id: answer.id.clone(),
            team_id: answer.team_id,
            question_id: answer.question_id.clone(),
            payload: answer.payload.clone(),
            is_correct: answer.is_correct,
            points_awarded: answer.points_awarded,
            submitted_at: format_epoch_ms(answer.submitted_at),
            graded_at: answer.graded_at.map(format_epoch_ms),
        }
    }
}

/// Dispute raised by a team about a graded answer.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub id: Uuid,
    pub team_id: Uuid,
    pub question_id: String,
    pub answer_id: String,
    pub reason: String,
    pub status: ChallengeStatus,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl From<&ChallengeEntity> for ChallengeView {
    fn from(challenge: &ChallengeEntity) -> Self {
        Self {
            id: challenge.id,
            team_id: challenge.team_id,
            question_id: challenge.question_id.clone(),
            answer_id: challenge.answer_id.clone(),
            reason: challenge.reason.clone(),
            status: challenge.status,
            created_at: format_epoch_ms(challenge.created_at),
            resolved_at: challenge.resolved_at.map(format_epoch_ms),
        }
    }
}

/// Everything the admin console shows.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminSnapshot {
    pub teams: Vec<TeamView>,
    pub rounds: Vec<RoundView>,
    /// Questions including their answer keys.
    pub questions: Vec<QuestionView>,
    pub pending_answers: Vec<AnswerView>,
    pub answers: Vec<AnswerView>,
    pub challenges: Vec<ChallengeView>,
    pub game_state: PhaseSnapshot,
    pub config: GameConfigView,
}
