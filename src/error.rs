use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::state_machine::InvalidTransition};

/// Why an answer submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// No question is open for answers.
    WrongPhase,
    /// The team already answered this question.
    Duplicate,
    /// The answer targets another question than the one displayed.
    QuestionMismatch,
    /// The team was eliminated.
    TeamEliminated,
}

impl RejectReason {
    /// Wire code of the reason.
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::WrongPhase => "wrong-phase",
            RejectReason::Duplicate => "duplicate",
            RejectReason::QuestionMismatch => "question-mismatch",
            RejectReason::TeamEliminated => "team-eliminated",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend failed while serving the request.
    #[error("storage failure")]
    Storage(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Missing, invalid or non allow-listed credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The answer already carries a grading result.
    #[error("answer `{0}` is already graded")]
    AlreadyGraded(String),
    /// Answer submission refused.
    #[error("answer rejected: {}", .0.code())]
    AnswerRejected(RejectReason),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err)
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(format!(
            "cannot apply {:?} while {}",
            err.event,
            err.from.as_str()
        ))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt; the response never says which check failed.
    #[error("unauthorized")]
    Unauthorized,
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state, with a machine-readable code.
    #[error("conflict: {message}")]
    Conflict {
        /// Human readable explanation.
        message: String,
        /// Stable reason code.
        code: &'static str,
    },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Storage(source) => {
                error!(error = %source, "storage failure while serving request");
                AppError::Internal("storage failure".into())
            }
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(_) => AppError::Unauthorized,
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict {
                message,
                code: "state-conflict",
            },
            err @ ServiceError::AlreadyGraded(_) => AppError::Conflict {
                message: err.to_string(),
                code: "already-graded",
            },
            ServiceError::AnswerRejected(reason) => AppError::Conflict {
                message: format!("answer rejected: {}", reason.code()),
                code: reason.code(),
            },
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

/// JSON body of every error response.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human readable explanation.
    pub message: String,
    /// Stable reason code for conflicts.
    pub code: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let code = match &self {
            AppError::Conflict { code, .. } => Some(*code),
            _ => None,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
            code,
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_conflicts_with_codes() {
        let app: AppError = ServiceError::AnswerRejected(RejectReason::Duplicate).into();
        match app {
            AppError::Conflict { code, .. } => assert_eq!(code, "duplicate"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unauthorized_hides_details() {
        let app: AppError = ServiceError::Unauthorized("email not allowed".into()).into();
        assert_eq!(app.to_string(), "unauthorized");
        assert_eq!(app.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn storage_failures_are_internal() {
        let err = StorageError::malformed(
            "teams/x",
            serde_json::from_str::<u8>("x").unwrap_err(),
        );
        let app: AppError = ServiceError::Storage(err).into();
        assert_eq!(
            app.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
