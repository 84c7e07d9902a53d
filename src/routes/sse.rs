use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    error::{AppError, ErrorBody},
    services::{
        auth_service,
        sse_service::{self, StreamKind},
    },
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/public",
    tag = "sse",
    responses((status = 200, description = "Public SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream arena standings and public game events.
pub async fn public_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (receiver, initial) = sse_service::subscribe(&state, StreamKind::Public).await;
    info!("new public SSE connection");
    sse_service::to_sse_stream(receiver, initial, StreamKind::Public)
}

#[utoipa::path(
    get,
    path = "/sse/admin",
    tag = "sse",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Admin SSE stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody)
    )
)]
/// Stream admin standings, pending answers and challenges.
pub async fn admin_stream(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let claims = auth_service::authorize_admin(state.config(), authorization)?;
    let (receiver, initial) = sse_service::subscribe(&state, StreamKind::Admin).await;
    info!(email = %claims.email, "new admin SSE connection");
    Ok(sse_service::to_sse_stream(
        receiver,
        initial,
        StreamKind::Admin,
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/public", get(public_stream))
        .route("/sse/admin", get(admin_stream))
}
