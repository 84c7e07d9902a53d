//! Fixtures shared by the service unit tests.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        game::GameRepository,
        game_store::{DocumentStore, memory::MemoryStore},
        models::{
            AnswerValue, Difficulty, QuestionEntity, QuestionKind, RoundEntity, RoundStatus,
            TeamEntity,
        },
    },
    state::{AppState, SharedState, clock::ManualClock},
};

pub const START_MS: i64 = 1_000_000;

pub struct Harness {
    pub state: SharedState,
    pub clock: Arc<ManualClock>,
    pub repo: GameRepository,
}

/// App state backed by a fresh in-memory store with defaults initialised.
pub async fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(START_MS));
    let config = AppConfig::new(vec!["admin@example.org".into()], "test-secret");
    let state = AppState::new(config, clock.clone());
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let repo = GameRepository::new(store.clone());
    repo.init_defaults().await.unwrap();
    state.set_game_store(store).await;
    Harness { state, clock, repo }
}

impl Harness {
    pub fn now_ms(&self) -> i64 {
        self.state.now_ms()
    }

    pub async fn team(&self, name: &str, score: i64) -> TeamEntity {
        let team = TeamEntity {
            id: Uuid::new_v4(),
            name: name.into(),
            score,
            streak: 0,
            division: None,
            eliminated: false,
            eliminated_after_round: None,
            joined_at: START_MS,
        };
        self.repo.save_team(&team).await.unwrap();
        team
    }

    pub async fn round(&self, id: &str, countdown_seconds: Option<u32>) -> RoundEntity {
        let round = RoundEntity {
            id: id.into(),
            title: format!("Round {id}"),
            status: RoundStatus::Pending,
            position: 0,
            countdown_seconds,
        };
        self.repo.save_round(&round).await.unwrap();
        round
    }

    pub async fn question(
        &self,
        id: &str,
        round_id: &str,
        kind: QuestionKind,
        difficulty: Difficulty,
    ) -> QuestionEntity {
        let (choices, statements, key) = match kind {
            QuestionKind::Mcq => (
                vec!["a".into(), "b".into(), "c".into()],
                vec![],
                AnswerValue::Choice(2),
            ),
            QuestionKind::Mtf => (
                vec![],
                vec!["x".into(), "y".into()],
                AnswerValue::Statements(vec![true, false]),
            ),
            QuestionKind::Saq | QuestionKind::Spot => {
                (vec![], vec![], AnswerValue::Text("Paris".into()))
            }
        };
        let question = QuestionEntity {
            id: id.into(),
            round_id: round_id.into(),
            order: 1,
            kind,
            prompt: format!("Question {id}"),
            choices,
            statements,
            key,
            difficulty,
        };
        assert!(self.repo.create_question(&question).await.unwrap().is_committed());
        question
    }
}
