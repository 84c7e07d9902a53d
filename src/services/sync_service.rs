//! Keeps every connected display converged on the shared documents.
//!
//! The loop re-attaches to whichever store is installed, recomputes the
//! projections on each document notification or clock tick, drives the
//! scheduled expiry check and publishes views that changed.

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        game::GameRepository,
        models::{GameStateEntity, QuestionEntity, RoundEntity, TeamEntity, paths},
    },
    dto::common::{Audience, StandingsView},
    error::ServiceError,
    services::{
        game_service,
        projection::{ProjectionInput, project},
        sse_events,
    },
    state::SharedState,
};

/// Documents a projection is computed from.
struct Snapshot {
    state: GameStateEntity,
    round: Option<RoundEntity>,
    question: Option<QuestionEntity>,
    teams: Vec<TeamEntity>,
    pending: usize,
}

impl Snapshot {
    async fn load(repository: &GameRepository) -> Result<Self, ServiceError> {
        let state = repository.game_state().await?.unwrap_or_default();
        let round = match &state.current_round_id {
            Some(id) => repository.round(id).await?,
            None => None,
        };
        let (question, pending) = match &state.current_question_id {
            Some(id) => (
                repository.question(id).await?,
                repository.pending_count(id).await?,
            ),
            None => (None, 0),
        };
        let teams = repository.teams().await?;
        Ok(Self {
            state,
            round,
            question,
            teams,
            pending,
        })
    }

    fn view(&self, audience: Audience, team_id: Option<Uuid>, now_ms: i64) -> StandingsView {
        project(&ProjectionInput {
            state: &self.state,
            round: self.round.as_ref(),
            question: self.question.as_ref(),
            teams: &self.teams,
            pending: self.pending,
            now_ms,
            audience,
            team_id,
        })
    }
}

/// Projection for one audience, computed from the current documents.
pub async fn current_view(
    state: &SharedState,
    audience: Audience,
    team_id: Option<Uuid>,
) -> Result<StandingsView, ServiceError> {
    let repository = state.repository().await?;
    let snapshot = Snapshot::load(&repository).await?;
    Ok(snapshot.view(audience, team_id, state.now_ms()))
}

#[derive(Default)]
struct Published {
    arena: Option<StandingsView>,
    admin: Option<StandingsView>,
}

/// Run the sync loop until the application state is dropped.
pub async fn run(state: SharedState) {
    let mut store_rx = state.store_watcher();
    let mut degraded_rx = state.degraded_watcher();
    let mut ticker = interval(state.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut published = Published::default();

    loop {
        let Some(store) = state.game_store().await else {
            debug!("sync loop waiting for a storage backend");
            if store_rx.changed().await.is_err() {
                return;
            }
            continue;
        };
        info!("sync loop attached to storage");
        store_rx.borrow_and_update();

        let mut game_rx = store.subscribe(paths::GAME_STATE);
        let mut teams_rx = store.subscribe_collection(paths::TEAMS);
        let mut answers_rx = store.subscribe_collection(paths::ANSWERS);
        let mut rounds_rx = store.subscribe_collection(paths::ROUNDS);

        loop {
            refresh(&state, &mut published).await;

            tokio::select! {
                changed = store_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                changed = degraded_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let degraded = *degraded_rx.borrow_and_update();
                    sse_events::broadcast_system_status(&state, degraded);
                    if degraded {
                        break;
                    }
                }
                changed = game_rx.changed() => if changed.is_err() { break },
                changed = teams_rx.changed() => if changed.is_err() { break },
                changed = answers_rx.changed() => if changed.is_err() { break },
                changed = rounds_rx.changed() => if changed.is_err() { break },
                _ = ticker.tick() => {}
            }
        }
    }
}

async fn refresh(state: &SharedState, published: &mut Published) {
    if let Err(err) = game_service::check_expiry(state).await {
        log_failure("scheduled expiry check", &err);
        return;
    }

    let snapshot = match state.repository().await {
        Ok(repository) => Snapshot::load(&repository).await,
        Err(err) => Err(err),
    };
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(err) => {
            log_failure("projection refresh", &err);
            return;
        }
    };

    let now = state.now_ms();
    let arena = snapshot.view(Audience::Arena, None, now);
    if published.arena.as_ref() != Some(&arena) {
        sse_events::broadcast_public_standings(state, &arena);
        published.arena = Some(arena);
    }
    let admin = snapshot.view(Audience::Admin, None, now);
    if published.admin.as_ref() != Some(&admin) {
        sse_events::broadcast_admin_standings(state, &admin);
        published.admin = Some(admin);
    }
}

fn log_failure(step: &str, err: &ServiceError) {
    match err {
        ServiceError::Degraded => debug!(step, "skipped while degraded"),
        other => warn!(step, error = %other, "sync step failed"),
    }
}
