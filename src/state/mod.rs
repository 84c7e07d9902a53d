pub mod clock;
pub mod game;
mod sse;
pub mod state_machine;
pub mod transitions;

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    dao::{
        game::{GameRepository, to_fields},
        game_store::{DocumentStore, Fields, WriteMode, WriteOp, WriteOutcome},
        models::{GameConfigEntity, GameStateEntity, fields, paths},
    },
    error::ServiceError,
    state::{
        clock::Clock,
        state_machine::{GameEvent, GameStateMachine, Timing},
    },
};

pub use self::sse::SseHub;
use self::sse::SseState;

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// What a gated transition applies: a requested event, or whichever deadline is due.
#[derive(Debug)]
enum Trigger {
    Event(GameEvent),
    Due,
}

/// Result of asking for a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was written; carries the new state.
    Applied(GameStateEntity),
    /// The event was valid but changed nothing (e.g. stopping while idle).
    Unchanged(GameStateEntity),
    /// Another writer changed the state first; nothing was written.
    Superseded,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Central application state: storage handle, SSE hubs, configuration and the transition gate.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn DocumentStore>>>,
    store_generation: watch::Sender<u64>,
    sse: SseState,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    degraded: watch::Sender<bool>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (generation_tx, _rx) = watch::channel(0);
        Arc::new(Self {
            game_store: RwLock::new(None),
            store_generation: generation_tx,
            sse: SseState::new(64, 64),
            config,
            clock,
            degraded: degraded_tx,
            transition_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn DocumentStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current game store or [`ServiceError::Degraded`].
    pub async fn require_game_store(&self) -> Result<Arc<dyn DocumentStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Typed repository over the current game store.
    pub async fn repository(&self) -> Result<GameRepository, ServiceError> {
        Ok(GameRepository::new(self.require_game_store().await?))
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn DocumentStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.store_generation.send_modify(|generation| *generation += 1);
        self.update_degraded(false);
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Bumped whenever a store is installed, so subscribers can re-attach.
    pub fn store_watcher(&self) -> watch::Receiver<u64> {
        self.store_generation.subscribe()
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time in epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// State machine scheduling with the stored game configuration.
    pub fn state_machine(&self, game_config: &GameConfigEntity) -> GameStateMachine {
        GameStateMachine::new(Timing {
            question_timer_ms: i64::from(game_config.question_timer_seconds) * 1_000,
            reveal_ms: self.config.answer_reveal().as_millis() as i64,
        })
    }

    /// Plan `event` against the stored game state and write it conditionally.
    ///
    /// `extra_ops` are committed in the same batch as the state document.
    /// Transitions of this process are serialised; concurrent writers from
    /// other processes are detected by the `{phase, version}` precondition and
    /// reported as [`TransitionOutcome::Superseded`].
    pub async fn run_transition(
        &self,
        event: GameEvent,
        extra_ops: Vec<WriteOp>,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.run_gated(Trigger::Event(event), extra_ops).await
    }

    /// Apply whatever deadline has passed, judged from the state read under the gate.
    ///
    /// Nothing due, or a deadline already handled by another caller, yields
    /// [`TransitionOutcome::Unchanged`].
    pub async fn run_due_transition(&self) -> Result<TransitionOutcome, ServiceError> {
        self.run_gated(Trigger::Due, Vec::new()).await
    }

    async fn run_gated(
        &self,
        trigger: Trigger,
        extra_ops: Vec<WriteOp>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let gate = self.transition_gate.lock().await;

        let label = format!("{trigger:?}");
        let work = self.transition_once(trigger, extra_ops);
        let outcome = match self.transition_timeout {
            Some(limit) => match timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(trigger = %label, "transition timed out");
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            },
            None => work.await,
        };

        drop(gate);
        outcome
    }

    async fn transition_once(
        &self,
        trigger: Trigger,
        extra_ops: Vec<WriteOp>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let repository = self.repository().await?;
        let current = repository.game_state().await?.unwrap_or_default();
        let game_config = repository.game_config().await?;
        let machine = self.state_machine(&game_config);
        let now_ms = self.now_ms();

        let event = match trigger {
            Trigger::Event(event) => event,
            Trigger::Due => {
                let pending = match &current.current_question_id {
                    Some(question_id) => repository.pending_count(question_id).await?,
                    None => 0,
                };
                match machine.due_event(&current, now_ms, pending) {
                    Some(event) => {
                        debug!(?event, phase = current.phase.as_str(), "deadline reached");
                        event
                    }
                    None => return Ok(TransitionOutcome::Unchanged(current)),
                }
            }
        };

        let plan = machine.plan(&current, event, now_ms)?;

        if !plan.changes_state(&current) {
            debug!(event = ?plan.event, phase = current.phase.as_str(), "transition changes nothing");
            return Ok(TransitionOutcome::Unchanged(current));
        }

        let mut ops = vec![
            WriteOp::Expect {
                path: paths::GAME_STATE.to_owned(),
                fields: expected_state(&current),
            },
            WriteOp::Set {
                path: paths::GAME_STATE.to_owned(),
                fields: to_fields(paths::GAME_STATE, &plan.next)?,
                mode: WriteMode::Replace,
            },
        ];
        ops.extend(extra_ops);

        match repository.batch(ops).await? {
            WriteOutcome::Committed => {
                info!(
                    plan_id = %plan.id,
                    from = plan.from.as_str(),
                    to = plan.to.as_str(),
                    version = plan.next.version,
                    question = ?plan.next.current_question_id,
                    "game transition applied"
                );
                Ok(TransitionOutcome::Applied(plan.next))
            }
            WriteOutcome::Conflict { path, kind } => {
                debug!(
                    plan_id = %plan.id,
                    from = plan.from.as_str(),
                    version = plan.version_from,
                    %path,
                    ?kind,
                    "game transition superseded by another writer"
                );
                Ok(TransitionOutcome::Superseded)
            }
        }
    }
}

/// Precondition on the stored state: still in the phase and version the plan was made from.
fn expected_state(current: &GameStateEntity) -> Fields {
    let mut expected = Fields::new();
    expected.insert(
        fields::PHASE.to_owned(),
        Value::from(current.phase.as_str()),
    );
    expected.insert(fields::VERSION.to_owned(), Value::from(current.version));
    expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{game_store::memory::MemoryStore, models::QuestionKind},
        state::{clock::ManualClock, state_machine::PushedQuestion},
    };

    async fn state_with_store() -> (SharedState, Arc<ManualClock>, GameRepository) {
        let clock = Arc::new(ManualClock::new(1_000));
        let state = AppState::new(AppConfig::default(), clock.clone());
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let repository = GameRepository::new(store.clone());
        repository.init_defaults().await.unwrap();
        state.set_game_store(store).await;
        (state, clock, repository)
    }

    fn push() -> GameEvent {
        GameEvent::PushQuestion {
            round_id: "R1".into(),
            question: Some(PushedQuestion {
                id: "q1".into(),
                kind: QuestionKind::Mcq,
                countdown_ms: None,
            }),
        }
    }

    #[tokio::test]
    async fn starts_degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default(), Arc::new(ManualClock::new(0)));
        assert!(state.is_degraded());
        assert!(matches!(
            state.run_transition(GameEvent::Stop, vec![]).await,
            Err(ServiceError::Degraded)
        ));

        let (state, _, _) = state_with_store().await;
        assert!(!state.is_degraded());
    }

    #[tokio::test]
    async fn applied_transition_is_persisted() {
        let (state, _, repository) = state_with_store().await;
        let outcome = state.run_transition(push(), vec![]).await.unwrap();
        assert!(outcome.is_applied());

        let stored = repository.game_state().await.unwrap().unwrap();
        assert_eq!(stored.phase, crate::dao::models::GamePhase::Active);
        assert_eq!(stored.deadline_ms, Some(31_000));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn stale_precondition_blocks_the_batch() {
        let (state, clock, repository) = state_with_store().await;
        let before = repository.game_state().await.unwrap().unwrap();
        state.run_transition(push(), vec![]).await.unwrap();

        let outcome = repository
            .batch(vec![
                WriteOp::Expect {
                    path: paths::GAME_STATE.into(),
                    fields: expected_state(&before),
                },
                WriteOp::Delete {
                    path: paths::GAME_STATE.into(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Conflict {
                path: paths::GAME_STATE.into(),
                kind: crate::dao::game_store::ConflictKind::Mismatch,
            }
        );

        clock.advance(40_000);
        let applied = state
            .run_transition(GameEvent::TimerElapsed { pending_answers: 0 }, vec![])
            .await
            .unwrap();
        assert!(applied.is_applied());
        assert_eq!(repository.game_state().await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn due_transition_reads_the_deadline_under_the_gate() {
        let (state, clock, repository) = state_with_store().await;
        assert!(matches!(
            state.run_due_transition().await.unwrap(),
            TransitionOutcome::Unchanged(_)
        ));

        state.run_transition(push(), vec![]).await.unwrap();
        clock.advance(30_000);
        let TransitionOutcome::Applied(next) = state.run_due_transition().await.unwrap() else {
            panic!("timer deadline was not applied");
        };
        assert_eq!(next.phase, crate::dao::models::GamePhase::Reveal);
        assert!(matches!(
            state.run_due_transition().await.unwrap(),
            TransitionOutcome::Unchanged(_)
        ));
        assert_eq!(repository.game_state().await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn stop_while_idle_is_unchanged() {
        let (state, _, repository) = state_with_store().await;
        let outcome = state.run_transition(GameEvent::Stop, vec![]).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Unchanged(_)));
        assert_eq!(repository.game_state().await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn invalid_event_is_a_state_conflict() {
        let (state, _, _) = state_with_store().await;
        let err = state
            .run_transition(GameEvent::RevealElapsed, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }
}
