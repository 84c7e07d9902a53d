use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{
    AnswerValue, Difficulty, GamePhase, QuestionEntity, QuestionKind, RoundEntity, RoundStatus,
    TeamEntity,
};

/// Who a standings view is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Public arena display.
    #[default]
    Arena,
    /// A single team client.
    Team,
    /// Administrator display.
    Admin,
}

/// Team as shown on standings.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    pub id: Uuid,
    pub name: String,
    pub score: i64,
    pub streak: i64,
    pub division: Option<String>,
    pub eliminated: bool,
    /// Competition rank (1 = best, ties share a rank).
    pub rank: u32,
}

impl TeamView {
    pub fn new(team: &TeamEntity, rank: u32) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            score: team.score,
            streak: team.streak,
            division: team.division.clone(),
            eliminated: team.eliminated,
            rank,
        }
    }
}

/// Round summary shared by the public and admin views.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub id: String,
    pub title: String,
    pub status: RoundStatus,
    pub position: i64,
    pub countdown_seconds: Option<u32>,
}

impl From<&RoundEntity> for RoundView {
    fn from(round: &RoundEntity) -> Self {
        Self {
            id: round.id.clone(),
            title: round.title.clone(),
            status: round.status,
            position: round.position,
            countdown_seconds: round.countdown_seconds,
        }
    }
}

/// Question as sent to clients; the key is only present when explicitly allowed.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub round_id: String,
    pub order: u32,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
    pub difficulty: Difficulty,
    pub points: i64,
    pub correct_answer: Option<AnswerValue>,
}

impl QuestionView {
    /// View without the answer key.
    pub fn client_safe(question: &QuestionEntity) -> Self {
        Self {
            id: question.id.clone(),
            round_id: question.round_id.clone(),
            order: question.order,
            kind: question.kind,
            prompt: question.prompt.clone(),
            choices: question.choices.clone(),
            statements: question.statements.clone(),
            difficulty: question.difficulty,
            points: question.difficulty.points(),
            correct_answer: None,
        }
    }

    /// View including the answer key.
    pub fn with_key(question: &QuestionEntity) -> Self {
        Self {
            correct_answer: Some(question.key.clone()),
            ..Self::client_safe(question)
        }
    }
}

/// Display-ready tuple derived from the shared documents.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandingsView {
    pub audience: Audience,
    pub phase: GamePhase,
    pub version: u64,
    pub round_id: Option<String>,
    pub round: Option<RoundView>,
    pub question: Option<QuestionView>,
    /// Seconds left to answer (active phase).
    pub time_left_seconds: Option<u64>,
    /// Seconds left before the question shows (countdown phase).
    pub countdown_seconds: Option<u64>,
    /// Seconds left on the reveal (reveal phase).
    pub reveal_seconds: Option<u64>,
    /// Answer time preserved while grading (grading-paused phase).
    pub remaining_seconds_at_pause: Option<u64>,
    /// Teams ranked by score.
    pub teams: Vec<TeamView>,
    /// Answers of the current question awaiting grading (admin only).
    pub pending_grading: Option<usize>,
    /// The requesting team (team audience only).
    pub own_team: Option<TeamView>,
}
