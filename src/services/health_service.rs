use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the server can currently serve game traffic.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let reachable = match state.game_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        None => {
            warn!("storage unavailable (degraded mode)");
            false
        }
    };

    if reachable && !state.is_degraded() {
        HealthResponse::ok()
    } else {
        HealthResponse::degraded(reachable)
    }
}
