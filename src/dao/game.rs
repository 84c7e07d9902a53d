use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::{DocumentStore, Fields, WriteMode, WriteOp, WriteOutcome},
        models::{
            AnswerEntity, ChallengeEntity, GameConfigEntity, GameStateEntity, QuestionEntity,
            RoundEntity, TeamEntity, fields, paths,
        },
        storage::{StorageError, StorageResult},
    },
    state::game::natural_cmp,
};

/// Typed access to the documents of a game, on top of any [`DocumentStore`].
#[derive(Clone)]
pub struct GameRepository {
    store: Arc<dyn DocumentStore>,
}

impl GameRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Underlying document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Create the singleton game state and config documents when absent.
    pub async fn init_defaults(&self) -> StorageResult<()> {
        for (path, fields) in [
            (paths::GAME_STATE, to_fields(paths::GAME_STATE, &GameStateEntity::default())?),
            (paths::GAME_CONFIG, to_fields(paths::GAME_CONFIG, &GameConfigEntity::default())?),
        ] {
            let outcome = self
                .store
                .batch_write(vec![WriteOp::Create {
                    path: path.to_owned(),
                    fields,
                }])
                .await?;
            if outcome.is_committed() {
                info!(path, "initialised default document");
            }
        }
        Ok(())
    }

    async fn find<T: DeserializeOwned>(&self, path: &str) -> StorageResult<Option<T>> {
        match self.store.get(path).await? {
            Some(fields) => from_fields(path, fields).map(Some),
            None => Ok(None),
        }
    }

    async fn list<T: DeserializeOwned>(&self, collection: &str) -> StorageResult<Vec<T>> {
        self.store
            .list(collection)
            .await?
            .into_iter()
            .map(|(id, fields)| from_fields(&format!("{collection}/{id}"), fields))
            .collect()
    }

    async fn replace<T: Serialize>(&self, path: &str, value: &T) -> StorageResult<()> {
        self.store
            .write(path, to_fields(path, value)?, WriteMode::Replace)
            .await
    }

    /// Live game state, `None` before initialisation.
    pub async fn game_state(&self) -> StorageResult<Option<GameStateEntity>> {
        self.find(paths::GAME_STATE).await
    }

    /// Game configuration with defaults applied when absent.
    pub async fn game_config(&self) -> StorageResult<GameConfigEntity> {
        Ok(self.find(paths::GAME_CONFIG).await?.unwrap_or_default())
    }

    pub async fn save_game_config(&self, config: &GameConfigEntity) -> StorageResult<()> {
        self.replace(paths::GAME_CONFIG, config).await
    }

    pub async fn team(&self, id: Uuid) -> StorageResult<Option<TeamEntity>> {
        self.find(&paths::team(id)).await
    }

    pub async fn teams(&self) -> StorageResult<Vec<TeamEntity>> {
        self.list(paths::TEAMS).await
    }

    pub async fn save_team(&self, team: &TeamEntity) -> StorageResult<()> {
        self.replace(&paths::team(team.id), team).await
    }

    /// Joins recorded for `division`, `None` before the first one.
    pub async fn division_joins(&self, division: &str) -> StorageResult<Option<i64>> {
        Ok(self
            .store
            .get(&paths::division(division))
            .await?
            .and_then(|document| document.get(fields::JOINS).and_then(Value::as_i64)))
    }

    pub async fn round(&self, id: &str) -> StorageResult<Option<RoundEntity>> {
        self.find(&paths::round(id)).await
    }

    /// Rounds ordered by position, then by numeric-aware id.
    pub async fn rounds(&self) -> StorageResult<Vec<RoundEntity>> {
        let mut rounds: Vec<RoundEntity> = self.list(paths::ROUNDS).await?;
        rounds.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| natural_cmp(&a.id, &b.id))
        });
        Ok(rounds)
    }

    pub async fn save_round(&self, round: &RoundEntity) -> StorageResult<()> {
        self.replace(&paths::round(&round.id), round).await
    }

    /// Create a round; fails with a conflict when the id is taken.
    pub async fn create_round(&self, round: &RoundEntity) -> StorageResult<WriteOutcome> {
        let path = paths::round(&round.id);
        let fields = to_fields(&path, round)?;
        self.store
            .batch_write(vec![WriteOp::Create { path, fields }])
            .await
    }

    pub async fn question(&self, id: &str) -> StorageResult<Option<QuestionEntity>> {
        self.find(&paths::question(id)).await
    }

    /// Questions ordered by round, then by their order inside the round.
    pub async fn questions(&self) -> StorageResult<Vec<QuestionEntity>> {
        let mut questions: Vec<QuestionEntity> = self.list(paths::QUESTIONS).await?;
        questions.sort_by(|a, b| {
            natural_cmp(&a.round_id, &b.round_id).then_with(|| a.order.cmp(&b.order))
        });
        Ok(questions)
    }

    pub async fn questions_for_round(&self, round_id: &str) -> StorageResult<Vec<QuestionEntity>> {
        let mut questions = self.questions().await?;
        questions.retain(|question| question.round_id == round_id);
        Ok(questions)
    }

    /// Create a question; fails with a conflict when the id is taken.
    pub async fn create_question(&self, question: &QuestionEntity) -> StorageResult<WriteOutcome> {
        let path = paths::question(&question.id);
        let fields = to_fields(&path, question)?;
        self.store
            .batch_write(vec![WriteOp::Create { path, fields }])
            .await
    }

    pub async fn answer(&self, id: &str) -> StorageResult<Option<AnswerEntity>> {
        self.find(&paths::answer(id)).await
    }

    pub async fn answers(&self) -> StorageResult<Vec<AnswerEntity>> {
        self.list(paths::ANSWERS).await
    }

    pub async fn answers_for_question(&self, question_id: &str) -> StorageResult<Vec<AnswerEntity>> {
        let mut answers = self.answers().await?;
        answers.retain(|answer| answer.question_id == question_id);
        Ok(answers)
    }

    /// Number of answers on `question_id` still awaiting manual grading.
    pub async fn pending_count(&self, question_id: &str) -> StorageResult<usize> {
        Ok(self
            .answers_for_question(question_id)
            .await?
            .iter()
            .filter(|answer| answer.is_pending())
            .count())
    }

    pub async fn challenge(&self, id: Uuid) -> StorageResult<Option<ChallengeEntity>> {
        self.find(&paths::challenge(id)).await
    }

    pub async fn challenges(&self) -> StorageResult<Vec<ChallengeEntity>> {
        self.list(paths::CHALLENGES).await
    }

    pub async fn save_challenge(&self, challenge: &ChallengeEntity) -> StorageResult<()> {
        self.replace(&paths::challenge(challenge.id), challenge)
            .await
    }

    /// Commit `ops` atomically.
    pub async fn batch(&self, ops: Vec<WriteOp>) -> StorageResult<WriteOutcome> {
        self.store.batch_write(ops).await
    }
}

/// Encode a model as document fields.
pub fn to_fields<T: Serialize>(path: &str, value: &T) -> StorageResult<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(StorageError::malformed(
            path,
            serde::ser::Error::custom(format!("expected an object, got {other}")),
        )),
        Err(err) => Err(StorageError::malformed(path, err)),
    }
}

/// Decode document fields into a model.
pub fn from_fields<T: DeserializeOwned>(path: &str, fields: Fields) -> StorageResult<T> {
    serde_json::from_value(Value::Object(fields)).map_err(|err| StorageError::malformed(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        game_store::memory::MemoryStore,
        models::{GamePhase, RoundStatus},
    };

    fn repository() -> GameRepository {
        GameRepository::new(Arc::new(MemoryStore::new()))
    }

    fn round(id: &str, position: i64) -> RoundEntity {
        RoundEntity {
            id: id.into(),
            title: id.into(),
            status: RoundStatus::Pending,
            position,
            countdown_seconds: None,
        }
    }

    #[tokio::test]
    async fn init_defaults_is_idempotent() {
        let repo = repository();
        repo.init_defaults().await.unwrap();
        let mut config = repo.game_config().await.unwrap();
        config.question_timer_seconds = 12;
        repo.save_game_config(&config).await.unwrap();

        repo.init_defaults().await.unwrap();
        assert_eq!(repo.game_config().await.unwrap().question_timer_seconds, 12);
        assert_eq!(
            repo.game_state().await.unwrap().unwrap().phase,
            GamePhase::Idle
        );
    }

    #[tokio::test]
    async fn rounds_sort_numerically() {
        let repo = repository();
        for id in ["R10", "R2", "R1"] {
            repo.save_round(&round(id, 0)).await.unwrap();
        }
        let ids: Vec<String> = repo
            .rounds()
            .await
            .unwrap()
            .into_iter()
            .map(|round| round.id)
            .collect();
        assert_eq!(ids, ["R1", "R2", "R10"]);
    }

    #[tokio::test]
    async fn malformed_documents_surface_their_path() {
        let repo = repository();
        let mut fields = Fields::new();
        fields.insert("name".into(), Value::from(3));
        repo.store()
            .write("teams/broken", fields, WriteMode::Replace)
            .await
            .unwrap();

        match repo.teams().await {
            Err(StorageError::Malformed { path, .. }) => assert_eq!(path, "teams/broken"),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }
}
