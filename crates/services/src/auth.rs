use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SESSION_TIMEOUT: i64 = 24 * 60 * 60;
pub const DEFAULT_ADMIN_SESSION_TIMEOUT: i64 = 60 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("the claims expect 'id' and 'table' params")]
    MissingClaims,
    #[error("token encoding failed: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: String,
    table: String,
    iat: i64,
    exp: i64,
}

/// Outcome of a token verification. `error` carries a human-readable
/// reason whenever `verified` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCheck {
    pub verified: bool,
    pub id: String,
    pub table: String,
    pub error: String,
}

impl TokenCheck {
    fn failed(reason: impl Into<String>) -> Self {
        TokenCheck {
            verified: false,
            id: String::new(),
            table: String::new(),
            error: reason.into(),
        }
    }
}

/// HS256 token issue and verification. Claims carry the record id and the
/// auth table the record lives in.
#[derive(Clone)]
pub struct JwtService {
    secret: String,
}

impl JwtService {
    pub fn new(secret: impl Into<String>) -> Self {
        JwtService { secret: secret.into() }
    }

    pub fn create_token(&self, id: &str, table: &str, ttl_seconds: i64) -> Result<String, AuthError> {
        if id.is_empty() || table.is_empty() {
            return Err(AuthError::MissingClaims);
        }
        let iat = Utc::now().timestamp();
        let claims = Claims {
            id: id.to_string(),
            table: table.to_string(),
            iat,
            exp: iat + ttl_seconds,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(AuthError::Encode)
    }

    /// Decodes and validates a token. Every failure mode maps to a
    /// specific reason instead of a generic "invalid token".
    pub fn verify_token(&self, token: &str) -> TokenCheck {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

        let data = match decode::<Value>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => data,
            Err(err) => {
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "JWT token has expired",
                    ErrorKind::InvalidSignature => {
                        "JWT signature verification failed - token may be tampered with"
                    }
                    ErrorKind::InvalidToken => "Invalid JWT structure - malformed token",
                    ErrorKind::Base64(_) => "Invalid JWT structure - base64 decoding failed",
                    ErrorKind::Json(_) => "Invalid JWT structure - malformed claims",
                    ErrorKind::ImmatureSignature => "JWT token is not yet valid (nbf claim)",
                    ErrorKind::MissingRequiredClaim(_) => "Required claim 'exp' is missing from token",
                    ErrorKind::InvalidAlgorithm => "JWT algorithm mismatch",
                    _ => "JWT validation failed",
                };
                return TokenCheck::failed(reason);
            }
        };

        let claims = data.claims;
        let id = match claims.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) | None => {
                return TokenCheck::failed("Required claim 'id' is missing from token");
            }
            Some(_) => {
                return TokenCheck::failed("Required claim 'id' is missing, empty, or not a string");
            }
        };
        let table = match claims.get("table") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) | None => {
                return TokenCheck::failed("Required claim 'table' is missing from token");
            }
            Some(_) => {
                return TokenCheck::failed(
                    "Required claim 'table' is missing, empty, or not a string",
                );
            }
        };

        TokenCheck {
            verified: true,
            id,
            table,
            error: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret")
    }

    #[test]
    fn round_trip_preserves_claims() {
        let jwt = service();
        let token = jwt.create_token("rec123", "users", 3600).unwrap();
        let check = jwt.verify_token(&token);
        assert!(check.verified, "unexpected failure: {}", check.error);
        assert_eq!(check.id, "rec123");
        assert_eq!(check.table, "users");
        assert!(check.error.is_empty());
    }

    #[test]
    fn expired_token_names_the_reason() {
        let jwt = service();
        let token = jwt.create_token("rec123", "users", -10).unwrap();
        let check = jwt.verify_token(&token);
        assert!(!check.verified);
        assert!(check.error.contains("expired"), "got: {}", check.error);
    }

    #[test]
    fn wrong_secret_fails_signature_check() {
        let token = service().create_token("rec123", "users", 3600).unwrap();
        let check = JwtService::new("other-secret").verify_token(&token);
        assert!(!check.verified);
        assert!(check.error.contains("signature"), "got: {}", check.error);
    }

    #[test]
    fn garbage_is_malformed() {
        let check = service().verify_token("not.a.jwt");
        assert!(!check.verified);
        assert!(!check.error.is_empty());
    }

    #[test]
    fn token_without_table_claim_is_rejected() {
        // Hand-roll a token with only an id claim.
        let iat = Utc::now().timestamp();
        let claims = serde_json::json!({"id": "x", "iat": iat, "exp": iat + 600});
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        let check = service().verify_token(&token);
        assert!(!check.verified);
        assert!(check.error.contains("'table'"), "got: {}", check.error);
    }

    #[test]
    fn empty_claims_refuse_to_encode() {
        assert!(service().create_token("", "users", 60).is_err());
        assert!(service().create_token("x", "", 60).is_err());
    }
}
