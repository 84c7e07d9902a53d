use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{GameStateEntity, QuestionKind};

pub use crate::dao::models::GamePhase;

/// Question being pushed, with what the machine needs to schedule it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedQuestion {
    /// Question identifier.
    pub id: String,
    /// Question type, decides how expiry is handled.
    pub kind: QuestionKind,
    /// Optional pre-question countdown of the owning round.
    pub countdown_ms: Option<i64>,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Admin shows a question of a round, or hides the current one with `None`.
    PushQuestion {
        /// Round the question belongs to.
        round_id: String,
        /// Question to show; `None` hides whatever is displayed.
        question: Option<PushedQuestion>,
    },
    /// Admin force-reset to idle.
    Stop,
    /// Countdown deadline reached.
    CountdownElapsed,
    /// Answer deadline reached; carries the manual answers still awaiting grading.
    TimerElapsed {
        /// Pending answers on the current question.
        pending_answers: usize,
    },
    /// Admin suspends the timer to grade.
    PauseForGrading,
    /// Grading completed or admin forced the timer to run again.
    Resume,
    /// Reveal duration over.
    RevealElapsed,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A validated transition, ready to be written conditionally on `from` and `version_from`.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the stored state was in when the plan was made.
    pub from: GamePhase,
    /// Version the stored state had when the plan was made.
    pub version_from: u64,
    /// Phase after the transition.
    pub to: GamePhase,
    /// Event that triggered this transition.
    pub event: GameEvent,
    /// Full state document to write.
    pub next: GameStateEntity,
}

impl Plan {
    /// Whether applying the plan changes anything besides bookkeeping.
    pub fn changes_state(&self, current: &GameStateEntity) -> bool {
        let mut unchanged = self.next.clone();
        unchanged.version = current.version;
        unchanged.updated_at_ms = current.updated_at_ms;
        &unchanged != current
    }
}

/// Durations the machine schedules with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Answer window of a question.
    pub question_timer_ms: i64,
    /// How long the answer stays revealed.
    pub reveal_ms: i64,
}

/// Round/question lifecycle rules over the stored [`GameStateEntity`].
///
/// The machine holds no state of its own: every plan is computed from the
/// document that was read, so any process can drive the game.
#[derive(Debug, Clone, Copy)]
pub struct GameStateMachine {
    timing: Timing,
}

impl GameStateMachine {
    pub fn new(timing: Timing) -> Self {
        Self { timing }
    }

    /// Validate `event` against `current` and compute the next state.
    pub fn plan(
        &self,
        current: &GameStateEntity,
        event: GameEvent,
        now_ms: i64,
    ) -> Result<Plan, InvalidTransition> {
        let next = self.compute_transition(current, &event, now_ms)?;

        Ok(Plan {
            id: Uuid::new_v4(),
            from: current.phase,
            version_from: current.version,
            to: next.phase,
            event,
            next,
        })
    }

    /// Event due at `now_ms`, if any deadline of the current phase has passed.
    ///
    /// `pending_answers` counts manual answers on the current question still
    /// awaiting grading.
    pub fn due_event(
        &self,
        current: &GameStateEntity,
        now_ms: i64,
        pending_answers: usize,
    ) -> Option<GameEvent> {
        let reached = |deadline: Option<i64>| deadline.is_some_and(|at| at <= now_ms);
        match current.phase {
            GamePhase::Countdown if reached(current.phase_ends_at_ms) => {
                Some(GameEvent::CountdownElapsed)
            }
            GamePhase::Active if reached(current.deadline_ms) => {
                Some(GameEvent::TimerElapsed { pending_answers })
            }
            GamePhase::GradingPaused if !current.pause_held && pending_answers == 0 => {
                Some(GameEvent::Resume)
            }
            GamePhase::Reveal if reached(current.phase_ends_at_ms) => {
                Some(GameEvent::RevealElapsed)
            }
            _ => None,
        }
    }

    fn compute_transition(
        &self,
        current: &GameStateEntity,
        event: &GameEvent,
        now_ms: i64,
    ) -> Result<GameStateEntity, InvalidTransition> {
        let invalid = || InvalidTransition {
            from: current.phase,
            event: event.clone(),
        };

        let mut next = match (current.phase, event) {
            (_, GameEvent::Stop)
            | (
                _,
                GameEvent::PushQuestion {
                    question: None, ..
                },
            ) => GameStateEntity::default(),
            (
                GamePhase::Idle | GamePhase::Reveal,
                GameEvent::PushQuestion {
                    round_id,
                    question: Some(question),
                },
            ) => self.pushed(round_id, question, now_ms),
            (GamePhase::Countdown, GameEvent::CountdownElapsed) => {
                let timer = current
                    .question_timer_ms
                    .unwrap_or(self.timing.question_timer_ms);
                GameStateEntity {
                    phase: GamePhase::Active,
                    deadline_ms: Some(now_ms + timer),
                    phase_ends_at_ms: None,
                    ..current.clone()
                }
            }
            (GamePhase::Active, GameEvent::TimerElapsed { pending_answers }) => {
                let manual = current
                    .current_question_kind
                    .is_some_and(|kind| !kind.is_auto_gradable());
                if manual && *pending_answers > 0 {
                    self.paused(current, now_ms, false)
                } else {
                    GameStateEntity {
                        phase: GamePhase::Reveal,
                        phase_ends_at_ms: Some(now_ms + self.timing.reveal_ms),
                        ..current.clone()
                    }
                }
            }
            (GamePhase::Active, GameEvent::PauseForGrading) => self.paused(current, now_ms, true),
            (GamePhase::GradingPaused, GameEvent::Resume) => {
                let remaining = current.remaining_ms_at_pause.unwrap_or(0).max(0);
                GameStateEntity {
                    phase: GamePhase::Active,
                    deadline_ms: Some(now_ms + remaining),
                    paused_for_grading: false,
                    pause_held: false,
                    remaining_ms_at_pause: None,
                    ..current.clone()
                }
            }
            (GamePhase::Reveal, GameEvent::RevealElapsed) => GameStateEntity::default(),
            _ => return Err(invalid()),
        };

        next.version = current.version + 1;
        next.updated_at_ms = now_ms;
        Ok(next)
    }

    fn pushed(&self, round_id: &str, question: &PushedQuestion, now_ms: i64) -> GameStateEntity {
        let timer = self.timing.question_timer_ms;
        let base = GameStateEntity {
            current_round_id: Some(round_id.to_owned()),
            current_question_id: Some(question.id.clone()),
            current_question_kind: Some(question.kind),
            question_timer_ms: Some(timer),
            ..GameStateEntity::default()
        };

        match question.countdown_ms.filter(|countdown| *countdown > 0) {
            Some(countdown) => GameStateEntity {
                phase: GamePhase::Countdown,
                phase_ends_at_ms: Some(now_ms + countdown),
                ..base
            },
            None => GameStateEntity {
                phase: GamePhase::Active,
                deadline_ms: Some(now_ms + timer),
                ..base
            },
        }
    }

    fn paused(&self, current: &GameStateEntity, now_ms: i64, held: bool) -> GameStateEntity {
        let remaining = current
            .deadline_ms
            .map(|deadline| (deadline - now_ms).max(0))
            .unwrap_or(0);
        GameStateEntity {
            phase: GamePhase::GradingPaused,
            paused_for_grading: true,
            pause_held: held,
            remaining_ms_at_pause: Some(remaining),
            ..current.clone()
        }
    }
}

/// Structural invariants every stored game state satisfies.
pub fn is_consistent(state: &GameStateEntity) -> bool {
    let has_question = state.current_question_id.is_some();
    let question_ok = !state.phase.requires_question() || has_question;
    let idle_ok = state.phase != GamePhase::Idle || !has_question;
    let pause_ok = (state.phase == GamePhase::GradingPaused)
        == (state.paused_for_grading && state.remaining_ms_at_pause.is_some());
    question_ok && idle_ok && pause_ok
}
