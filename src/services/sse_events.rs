use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, ChallengeEntity, GameStateEntity, TeamEntity},
    dto::{
        common::{StandingsView, TeamView},
        phase::PhaseSnapshot,
        sse::{
            AnswerPendingEvent, ChallengeRaisedEvent, PhaseChangedEvent, ServerEvent,
            SystemStatus, TeamJoinedEvent, TeamsKickedEvent,
        },
    },
    state::SharedState,
};

const EVENT_PHASE_CHANGED: &str = "phase_changed";
const EVENT_STANDINGS: &str = "standings";
const EVENT_TEAM_JOINED: &str = "team.joined";
const EVENT_TEAMS_KICKED: &str = "teams.kicked";
const EVENT_ANSWER_PENDING: &str = "answer.pending";
const EVENT_CHALLENGE_RAISED: &str = "challenge.raised";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast a gameplay phase change notification.
pub fn broadcast_phase_changed(state: &SharedState, game_state: &GameStateEntity) {
    let payload = PhaseChangedEvent(PhaseSnapshot::from(game_state));
    send_public_event(state, EVENT_PHASE_CHANGED, &payload);
    send_admin_event(state, EVENT_PHASE_CHANGED, &payload);
}

/// Publish the arena projection on the public stream.
pub fn broadcast_public_standings(state: &SharedState, view: &StandingsView) {
    send_public_event(state, EVENT_STANDINGS, view);
}

/// Publish the admin projection on the admin stream.
pub fn broadcast_admin_standings(state: &SharedState, view: &StandingsView) {
    send_admin_event(state, EVENT_STANDINGS, view);
}

/// Announce a newly joined (or rejoined) team.
pub fn broadcast_team_joined(state: &SharedState, team: &TeamEntity) {
    let payload = TeamJoinedEvent {
        team: TeamView::new(team, 0),
    };
    send_public_event(state, EVENT_TEAM_JOINED, &payload);
    send_admin_event(state, EVENT_TEAM_JOINED, &payload);
}

/// Announce removed teams.
pub fn broadcast_teams_kicked(state: &SharedState, team_ids: &[Uuid]) {
    let payload = TeamsKickedEvent {
        team_ids: team_ids.to_vec(),
    };
    send_public_event(state, EVENT_TEAMS_KICKED, &payload);
    send_admin_event(state, EVENT_TEAMS_KICKED, &payload);
}

/// Tell admins an answer waits for manual grading.
pub fn broadcast_answer_pending(state: &SharedState, answer: &AnswerEntity) {
    let payload = AnswerPendingEvent {
        answer_id: answer.id.clone(),
        team_id: answer.team_id,
        question_id: answer.question_id.clone(),
    };
    send_admin_event(state, EVENT_ANSWER_PENDING, &payload);
}

/// Tell admins a team disputes a graded answer.
pub fn broadcast_challenge_raised(state: &SharedState, challenge: &ChallengeEntity) {
    let payload = ChallengeRaisedEvent {
        challenge_id: challenge.id,
        team_id: challenge.team_id,
        question_id: challenge.question_id.clone(),
    };
    send_admin_event(state, EVENT_CHALLENGE_RAISED, &payload);
}

/// Broadcast the degraded flag to every stream.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    let payload = SystemStatus { degraded };
    send_public_event(state, EVENT_SYSTEM_STATUS, &payload);
    send_admin_event(state, EVENT_SYSTEM_STATUS, &payload);
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}

fn send_admin_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.admin_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize admin SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, state::{AppState, clock::ManualClock}};

    #[tokio::test]
    async fn phase_changes_reach_both_streams() {
        let state = AppState::new(AppConfig::default(), Arc::new(ManualClock::new(0)));
        let mut public = state.public_sse().subscribe();
        let mut admin = state.admin_sse().subscribe();

        broadcast_phase_changed(&state, &GameStateEntity::default());

        let event = public.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_PHASE_CHANGED));
        assert!(event.data.contains("\"phase\":\"idle\""));
        assert_eq!(
            admin.recv().await.unwrap().event.as_deref(),
            Some(EVENT_PHASE_CHANGED)
        );
    }

    #[tokio::test]
    async fn pending_answers_stay_on_the_admin_stream() {
        let state = AppState::new(AppConfig::default(), Arc::new(ManualClock::new(0)));
        let mut public = state.public_sse().subscribe();
        let mut admin = state.admin_sse().subscribe();

        let answer = AnswerEntity {
            id: "q1__x".into(),
            team_id: Uuid::nil(),
            question_id: "q1".into(),
            payload: crate::dao::models::AnswerValue::Text("Paris".into()),
            is_correct: None,
            points_awarded: 0,
            submitted_at: 0,
            graded_at: None,
        };
        broadcast_answer_pending(&state, &answer);

        assert_eq!(
            admin.recv().await.unwrap().event.as_deref(),
            Some(EVENT_ANSWER_PENDING)
        );
        assert!(public.try_recv().is_err());
    }
}
