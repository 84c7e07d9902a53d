use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    get_current_timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{config::AppConfig, error::ServiceError};

const BEARER_PREFIX: &str = "Bearer ";

/// Identity claims carried by an admin bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Verified email of the caller.
    pub email: String,
    /// Expiry (seconds since the epoch).
    pub exp: u64,
}

/// Verify an `Authorization` header value and check the email against the allow-list.
///
/// Every failure yields [`ServiceError::Unauthorized`]; the reason is only logged.
pub fn authorize_admin(
    config: &AppConfig,
    authorization: Option<&str>,
) -> Result<AdminClaims, ServiceError> {
    let token = authorization
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized("missing bearer token"))?;

    if config.jwt_secret().is_empty() {
        return Err(unauthorized("no token secret configured"));
    }

    let claims = decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret().as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|err| unauthorized(&format!("token rejected: {err}")))?;

    if !config.is_admin(&claims.email) {
        return Err(unauthorized("email is not on the admin allow-list"));
    }

    debug!(email = %claims.email, "admin authenticated");
    Ok(claims)
}

/// Mint a signed admin token valid for `ttl_seconds`.
pub fn issue_token(secret: &str, email: &str, ttl_seconds: u64) -> Result<String, ServiceError> {
    let claims = AdminClaims {
        email: email.to_owned(),
        exp: get_current_timestamp() + ttl_seconds,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| ServiceError::InvalidInput(format!("cannot sign token: {err}")))
}

fn unauthorized(reason: &str) -> ServiceError {
    warn!(reason, "admin authentication failed");
    ServiceError::Unauthorized(reason.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn config() -> AppConfig {
        AppConfig::new(vec!["quizmaster@example.org".into()], SECRET)
    }

    fn header(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[test]
    fn allow_listed_email_is_accepted() {
        let token = issue_token(SECRET, "QuizMaster@example.org", 60).unwrap();
        let claims = authorize_admin(&config(), Some(&header(&token))).unwrap();
        assert_eq!(claims.email, "QuizMaster@example.org");
    }

    #[test]
    fn every_failure_is_unauthorized() {
        let stranger = issue_token(SECRET, "team@example.org", 60).unwrap();
        let forged = issue_token("other-secret", "quizmaster@example.org", 60).unwrap();
        let valid = issue_token(SECRET, "quizmaster@example.org", 60).unwrap();

        for header_value in [
            None,
            Some("Basic abc".to_owned()),
            Some("Bearer ".to_owned()),
            Some(header("not-a-jwt")),
            Some(header(&stranger)),
            Some(header(&forged)),
        ] {
            let result = authorize_admin(&config(), header_value.as_deref());
            assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
        }

        let no_secret = AppConfig::new(vec!["quizmaster@example.org".into()], "");
        assert!(authorize_admin(&no_secret, Some(&header(&valid))).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = AdminClaims {
            email: "quizmaster@example.org".into(),
            exp: get_current_timestamp() - 3_600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(authorize_admin(&config(), Some(&header(&token))).is_err());
    }
}
