//! Display projections: the view every client renders, computed from the shared documents.

use uuid::Uuid;

use crate::{
    dao::models::{GamePhase, GameStateEntity, QuestionEntity, RoundEntity, TeamEntity},
    dto::common::{Audience, QuestionView, RoundView, StandingsView, TeamView},
    services::tie_analyzer::rank_teams,
    state::clock::{ms_to_display_seconds, seconds_left},
};

/// Everything a projection is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInput<'a> {
    pub state: &'a GameStateEntity,
    pub round: Option<&'a RoundEntity>,
    pub question: Option<&'a QuestionEntity>,
    pub teams: &'a [TeamEntity],
    /// Answers of the current question awaiting grading.
    pub pending: usize,
    pub now_ms: i64,
    pub audience: Audience,
    /// Requesting team, for the team audience.
    pub team_id: Option<Uuid>,
}

/// Compute the standings view for one audience.
///
/// Documents may be observed out of order, so a round or question that does
/// not match the game state is ignored rather than shown.
pub fn project(input: &ProjectionInput<'_>) -> StandingsView {
    let state = input.state;
    let is_admin = input.audience == Audience::Admin;

    let round = input
        .round
        .filter(|round| state.current_round_id.as_deref() == Some(round.id.as_str()));
    let question = input
        .question
        .filter(|question| state.current_question_id.as_deref() == Some(question.id.as_str()))
        .and_then(|question| question_view(state.phase, question, is_admin));

    let remaining = |deadline: Option<i64>| deadline.map(|at| seconds_left(at, input.now_ms));
    let (time_left_seconds, countdown_seconds, reveal_seconds, remaining_seconds_at_pause) =
        match state.phase {
            GamePhase::Idle => (None, None, None, None),
            GamePhase::Countdown => (None, remaining(state.phase_ends_at_ms), None, None),
            GamePhase::Active => (remaining(state.deadline_ms), None, None, None),
            GamePhase::GradingPaused => (
                None,
                None,
                None,
                state.remaining_ms_at_pause.map(ms_to_display_seconds),
            ),
            GamePhase::Reveal => (None, None, remaining(state.phase_ends_at_ms), None),
        };

    let teams: Vec<TeamView> = rank_teams(input.teams)
        .iter()
        .map(|entry| TeamView::new(&entry.team, entry.rank))
        .collect();
    let own_team = match (input.audience, input.team_id) {
        (Audience::Team, Some(team_id)) => teams.iter().find(|team| team.id == team_id).cloned(),
        _ => None,
    };

    StandingsView {
        audience: input.audience,
        phase: state.phase,
        version: state.version,
        round_id: state.current_round_id.clone(),
        round: round.map(RoundView::from),
        question,
        time_left_seconds,
        countdown_seconds,
        reveal_seconds,
        remaining_seconds_at_pause,
        teams,
        pending_grading: is_admin.then_some(input.pending),
        own_team,
    }
}

fn question_view(phase: GamePhase, question: &QuestionEntity, is_admin: bool) -> Option<QuestionView> {
    match phase {
        _ if is_admin => Some(QuestionView::with_key(question)),
        GamePhase::Idle | GamePhase::Countdown => None,
        GamePhase::Reveal => Some(QuestionView::with_key(question)),
        GamePhase::Active | GamePhase::GradingPaused => Some(QuestionView::client_safe(question)),
    }
}
