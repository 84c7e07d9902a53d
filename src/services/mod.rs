/// Quizmaster content, analysis and elimination operations.
pub mod admin_service;
/// Bearer token verification against the admin allow-list.
pub mod auth_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Game flow: pushing questions, stopping, pausing and the expiry check.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Audience-specific views computed from the shared documents.
pub mod projection;
/// Team-facing operations.
pub mod public_service;
/// Answer submission, grading and score changes.
pub mod scoring_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming to clients.
pub mod sse_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// Loop converging every display on the shared documents.
pub mod sync_service;
/// Tie detection, ranking and elimination reports.
pub mod tie_analyzer;

#[cfg(test)]
mod testing;
