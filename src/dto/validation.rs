//! Validation helpers for DTOs and the JSON extractor that applies them.

use axum::{
    Json,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use tracing::debug;
use validator::{Validate, ValidationError};

use crate::error::AppError;

/// Maximum length of a round or question identifier.
const MAX_ID_LENGTH: usize = 64;

/// JSON body extractor that runs `validator` rules and reports every failure as 400.
pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                debug!(error = %rejection.body_text(), "rejected malformed JSON body");
                AppError::BadRequest(rejection.body_text())
            })?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Validates identifiers that become part of a document path.
///
/// ```ignore
/// validate_document_id("R10")     // Ok
/// validate_document_id("q-3.b")   // Ok
/// validate_document_id("a/b")     // Err - path separator
/// ```
pub fn validate_document_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        let mut err = ValidationError::new("document_id_length");
        err.message = Some(
            format!("identifier must be 1 to {MAX_ID_LENGTH} characters (got {})", id.len())
                .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || id.contains("__")
    {
        let mut err = ValidationError::new("document_id_format");
        err.message = Some(
            "identifier may only contain ASCII letters, digits, '-', '_' and '.' (no '__')".into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name has visible characters.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_document_id_valid() {
        assert!(validate_document_id("R10").is_ok());
        assert!(validate_document_id("q-3.b").is_ok());
        assert!(validate_document_id("final_round").is_ok());
    }

    #[test]
    fn test_validate_document_id_invalid() {
        assert!(validate_document_id("").is_err());
        assert!(validate_document_id("a/b").is_err());
        assert!(validate_document_id("q__1").is_err());
        assert!(validate_document_id("with space").is_err());
        assert!(validate_document_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_not_blank() {
        assert!(validate_not_blank("Owls").is_ok());
        assert!(validate_not_blank("   ").is_err());
    }
}
