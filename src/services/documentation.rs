use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz arena backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::public::get_round,
        crate::routes::public::get_standings,
        crate::routes::public::join_team,
        crate::routes::public::submit_answer,
        crate::routes::public::create_challenge,
        crate::routes::public::expire,
        crate::routes::admin::snapshot,
        crate::routes::admin::standings,
        crate::routes::admin::modify_scores,
        crate::routes::admin::reset_scores,
        crate::routes::admin::kick,
        crate::routes::admin::check_score,
        crate::routes::admin::division_ties,
        crate::routes::admin::push_question,
        crate::routes::admin::stop,
        crate::routes::admin::pause_grading,
        crate::routes::admin::resume,
        crate::routes::admin::grade_answer,
        crate::routes::admin::elimination,
        crate::routes::admin::eliminate,
        crate::routes::admin::update_config,
        crate::routes::admin::create_round,
        crate::routes::admin::set_round_status,
        crate::routes::admin::create_question,
        crate::routes::admin::resolve_challenge,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::PhaseChangedEvent,
            crate::dto::sse::TeamJoinedEvent,
            crate::dto::sse::TeamsKickedEvent,
            crate::dto::sse::AnswerPendingEvent,
            crate::dto::sse::ChallengeRaisedEvent,
            crate::dto::phase::PhaseSnapshot,
            crate::dto::common::StandingsView,
            crate::dao::models::GamePhase,
            crate::dao::models::AnswerValue,
            crate::error::ErrorBody,
            crate::error::RejectReason,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "public", description = "Team clients and arena display"),
        (name = "admin", description = "Quizmaster operations (bearer token, allow-listed email)"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` security scheme referenced by admin paths.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_admin_security() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/admin/push-question"));
        assert!(doc.paths.paths.contains_key("/game/expire"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
