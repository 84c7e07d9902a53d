use serde::Serialize;
use utoipa::ToSchema;

/// Payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    /// "connected" or "unavailable".
    pub storage: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
            storage: "connected".into(),
        }
    }

    pub fn degraded(storage_reachable: bool) -> Self {
        Self {
            status: "degraded".into(),
            storage: if storage_reachable {
                "connected".into()
            } else {
                "unavailable".into()
            },
        }
    }
}
