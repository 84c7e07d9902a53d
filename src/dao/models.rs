use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Document paths and collection names shared by every backend.
pub mod paths {
    use uuid::Uuid;

    /// Singleton live game state document.
    pub const GAME_STATE: &str = "game/state";
    /// Singleton game configuration document.
    pub const GAME_CONFIG: &str = "config/game";
    /// Collection holding teams.
    pub const TEAMS: &str = "teams";
    /// Collection holding rounds.
    pub const ROUNDS: &str = "rounds";
    /// Collection holding questions.
    pub const QUESTIONS: &str = "questions";
    /// Collection holding submitted answers.
    pub const ANSWERS: &str = "answers";
    /// Collection holding answer challenges.
    pub const CHALLENGES: &str = "challenges";
    /// Claims on team names, keyed by the case-folded name.
    pub const TEAM_NAMES: &str = "team_names";
    /// Join counters guarding division capacity.
    pub const DIVISIONS: &str = "divisions";

    /// Path of a team document.
    pub fn team(id: Uuid) -> String {
        format!("{TEAMS}/{id}")
    }

    /// Path of a round document.
    pub fn round(id: &str) -> String {
        format!("{ROUNDS}/{id}")
    }

    /// Path of a question document.
    pub fn question(id: &str) -> String {
        format!("{QUESTIONS}/{id}")
    }

    /// Path of an answer document.
    pub fn answer(id: &str) -> String {
        format!("{ANSWERS}/{id}")
    }

    /// Path of a challenge document.
    pub fn challenge(id: Uuid) -> String {
        format!("{CHALLENGES}/{id}")
    }

    /// Path of the claim on a team name; names differing only in ASCII case share it.
    pub fn team_name(name: &str) -> String {
        format!("{TEAM_NAMES}/{}", name.trim().to_ascii_lowercase())
    }

    pub fn division(name: &str) -> String {
        format!("{DIVISIONS}/{name}")
    }

    /// Deterministic answer identifier, unique per (question, team).
    pub fn answer_id(question_id: &str, team_id: Uuid) -> String {
        format!("{question_id}__{team_id}")
    }
}

/// Stored field names targeted by store-side increments.
pub mod fields {
    /// Team score.
    pub const SCORE: &str = "score";
    /// Consecutive correct answers.
    pub const STREAK: &str = "streak";
    /// Grading result of an answer (null while pending).
    pub const IS_CORRECT: &str = "is_correct";
    /// Phase of the game state.
    pub const PHASE: &str = "phase";
    /// Optimistic concurrency counter of the game state.
    pub const VERSION: &str = "version";
    /// Question currently displayed.
    pub const CURRENT_QUESTION_ID: &str = "current_question_id";
    /// Team holding a name claim.
    pub const TEAM_ID: &str = "team_id";
    /// Number of joins recorded for a division.
    pub const JOINS: &str = "joins";
}

/// Phase of question presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum GamePhase {
    /// No question displayed.
    #[default]
    Idle,
    /// Pre-question countdown before the question is shown.
    Countdown,
    /// Question open for answers until its deadline.
    Active,
    /// Timer suspended until manual grading completes.
    GradingPaused,
    /// Correct answer shown before returning to idle.
    Reveal,
}

impl GamePhase {
    /// Every phase, in lifecycle order.
    pub const ALL: [GamePhase; 5] = [
        GamePhase::Idle,
        GamePhase::Countdown,
        GamePhase::Active,
        GamePhase::GradingPaused,
        GamePhase::Reveal,
    ];

    /// Wire name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::Idle => "idle",
            GamePhase::Countdown => "countdown",
            GamePhase::Active => "active",
            GamePhase::GradingPaused => "grading-paused",
            GamePhase::Reveal => "reveal",
        }
    }

    /// Phases that always carry a current question.
    pub fn requires_question(self) -> bool {
        matches!(self, GamePhase::Active | GamePhase::GradingPaused)
    }
}

/// Question types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    /// Multiple choice, one correct choice index.
    Mcq,
    /// Multiple true/false statements.
    Mtf,
    /// Short answer, graded by an admin.
    Saq,
    /// Spot question, graded by an admin.
    Spot,
}

impl QuestionKind {
    /// Whether correctness follows from the payload and the stored key alone.
    pub fn is_auto_gradable(self) -> bool {
        matches!(self, QuestionKind::Mcq | QuestionKind::Mtf)
    }
}

/// Difficulty of a question, mapped to its point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// One point.
    Easy,
    /// Two points.
    Medium,
    /// Three points.
    Difficult,
}

impl Difficulty {
    /// Points awarded for a correct answer.
    pub fn points(self) -> i64 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Difficult => 3,
        }
    }
}

/// Answer shape shared by question keys and submitted payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AnswerValue {
    /// Choice index (mcq).
    Choice(u32),
    /// One boolean per statement (mtf).
    Statements(Vec<bool>),
    /// Free text (saq, spot).
    Text(String),
}

/// Lifecycle status of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently played; at most one round at a time.
    Active,
    /// Finished.
    Completed,
}

/// Status of an answer challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Waiting for an admin decision.
    #[default]
    Open,
    /// Accepted by an admin.
    Accepted,
    /// Rejected by an admin.
    Rejected,
}

/// Team document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamEntity {
    /// Stable identifier for the team.
    pub id: Uuid,
    /// Display name chosen for the team.
    pub name: String,
    /// Current score, never negative.
    #[serde(default)]
    pub score: i64,
    /// Consecutive correct answers.
    #[serde(default)]
    pub streak: i64,
    /// Optional division/group tag.
    #[serde(default)]
    pub division: Option<String>,
    /// Whether the team has been eliminated.
    #[serde(default)]
    pub eliminated: bool,
    /// Round after which the team was eliminated.
    #[serde(default)]
    pub eliminated_after_round: Option<String>,
    /// Join timestamp (epoch milliseconds).
    #[serde(default)]
    pub joined_at: i64,
}

/// Round document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntity {
    /// Stable identifier, ordered numerically aware ("R2" < "R10").
    pub id: String,
    /// Display title.
    pub title: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: RoundStatus,
    /// Explicit ordering position.
    #[serde(default)]
    pub position: i64,
    /// Optional countdown shown before each question of the round.
    #[serde(default)]
    pub countdown_seconds: Option<u32>,
}

/// Question document; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEntity {
    /// Stable identifier.
    pub id: String,
    /// Owning round.
    pub round_id: String,
    /// Position within the round, unique per round.
    pub order: u32,
    /// Question type.
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    /// Prompt shown to teams.
    pub prompt: String,
    /// Choices (mcq).
    #[serde(default)]
    pub choices: Vec<String>,
    /// Statements (mtf).
    #[serde(default)]
    pub statements: Vec<String>,
    /// Correct answer key.
    pub key: AnswerValue,
    /// Point value bucket.
    pub difficulty: Difficulty,
}

/// Answer document, one per (team, question).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntity {
    /// Deterministic identifier, see [`paths::answer_id`].
    pub id: String,
    /// Answering team.
    pub team_id: Uuid,
    /// Answered question.
    pub question_id: String,
    /// Submitted payload.
    pub payload: AnswerValue,
    /// Grading result; `None` while awaiting manual grading.
    pub is_correct: Option<bool>,
    /// Points awarded by grading.
    #[serde(default)]
    pub points_awarded: i64,
    /// Submission timestamp (epoch milliseconds).
    pub submitted_at: i64,
    /// Grading timestamp (epoch milliseconds).
    #[serde(default)]
    pub graded_at: Option<i64>,
}

impl AnswerEntity {
    /// Whether the answer still awaits manual grading.
    pub fn is_pending(&self) -> bool {
        self.is_correct.is_none()
    }
}

/// Challenge document raised by a team against a graded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Challenging team.
    pub team_id: Uuid,
    /// Challenged question.
    pub question_id: String,
    /// Challenged answer.
    pub answer_id: String,
    /// Free-text justification.
    pub reason: String,
    /// Resolution status.
    #[serde(default)]
    pub status: ChallengeStatus,
    /// Creation timestamp (epoch milliseconds).
    pub created_at: i64,
    /// Resolution timestamp (epoch milliseconds).
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

/// Singleton game state document, written only by the transition runner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameStateEntity {
    /// Round the current question belongs to.
    pub current_round_id: Option<String>,
    /// Question displayed; `None` means nothing is shown.
    pub current_question_id: Option<String>,
    /// Type of the current question, captured at push time.
    pub current_question_kind: Option<QuestionKind>,
    /// Current phase.
    pub phase: GamePhase,
    /// Answer deadline of the current question.
    pub deadline_ms: Option<i64>,
    /// End of the countdown or reveal phase.
    pub phase_ends_at_ms: Option<i64>,
    /// Question timer captured when the question was pushed.
    pub question_timer_ms: Option<i64>,
    /// Whether the timer is suspended for grading.
    #[serde(default)]
    pub paused_for_grading: bool,
    /// Set when an admin paused explicitly; such pauses never auto-resume.
    #[serde(default)]
    pub pause_held: bool,
    /// Time left on the question when the timer was suspended.
    pub remaining_ms_at_pause: Option<i64>,
    /// Incremented by every applied transition.
    #[serde(default)]
    pub version: u64,
    /// Last transition timestamp (epoch milliseconds).
    #[serde(default)]
    pub updated_at_ms: i64,
}

/// Singleton game configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfigEntity {
    /// Answer window of a question, in seconds.
    #[serde(default = "default_question_timer_seconds")]
    pub question_timer_seconds: u32,
    /// Whether a team may join again under an existing name.
    #[serde(default = "default_allow_rejoin")]
    pub allow_rejoin: bool,
    /// Maximum number of teams per division (0 means unlimited).
    #[serde(default)]
    pub max_teams_per_division: u32,
}

fn default_question_timer_seconds() -> u32 {
    30
}

fn default_allow_rejoin() -> bool {
    true
}

impl Default for GameConfigEntity {
    fn default() -> Self {
        Self {
            question_timer_seconds: default_question_timer_seconds(),
            allow_rejoin: default_allow_rejoin(),
            max_teams_per_division: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn phase_uses_kebab_case() {
        assert_eq!(
            serde_json::to_value(GamePhase::GradingPaused).unwrap(),
            json!("grading-paused")
        );
        for phase in GamePhase::ALL {
            assert_eq!(serde_json::to_value(phase).unwrap(), json!(phase.as_str()));
        }
    }

    #[test]
    fn answer_values_are_untagged() {
        let choice: AnswerValue = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(choice, AnswerValue::Choice(2));
        let statements: AnswerValue = serde_json::from_value(json!([true, false])).unwrap();
        assert_eq!(statements, AnswerValue::Statements(vec![true, false]));
        let text: AnswerValue = serde_json::from_value(json!("Paris")).unwrap();
        assert_eq!(text, AnswerValue::Text("Paris".into()));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: GameConfigEntity = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, GameConfigEntity::default());
        assert_eq!(config.question_timer_seconds, 30);
    }

    #[test]
    fn difficulty_points() {
        assert_eq!(Difficulty::Easy.points(), 1);
        assert_eq!(Difficulty::Medium.points(), 2);
        assert_eq!(Difficulty::Difficult.points(), 3);
    }
}
