//! Stateless HS256 session tokens.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use jsonwebtoken::errors::ErrorKind;
use thiserror::Error;

use crate::claims::{SessionClaims, TokenValidationError, validate_claims};
use crate::principal::Principal;

/// Default session validity.
pub const DEFAULT_SESSION_DAYS: i64 = 90;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign session token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Why a presented token was not accepted. Every variant means
/// "unauthenticated" to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("missing session token")]
    Missing,

    #[error("malformed session token")]
    Malformed,

    #[error("invalid session token signature")]
    InvalidSignature,

    #[error("session token has expired")]
    Expired,

    #[error("session token not yet valid")]
    NotYetValid,
}

impl From<TokenValidationError> for AuthenticationError {
    fn from(value: TokenValidationError) -> Self {
        match value {
            TokenValidationError::Expired => AuthenticationError::Expired,
            TokenValidationError::NotYetValid => AuthenticationError::NotYetValid,
            TokenValidationError::InvalidTimeWindow => AuthenticationError::Malformed,
        }
    }
}

/// Token verification seam used by the HTTP middleware.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AuthenticationError>;
}

/// Issues and verifies HS256-signed session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validity: Duration,
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validity: Duration::days(DEFAULT_SESSION_DAYS),
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn issue(&self, principal: &Principal, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = SessionClaims::for_principal(principal, now, self.validity);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(token)
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AuthenticationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthenticationError::Missing);
        }

        // Expiry is checked against the caller's clock below.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => AuthenticationError::InvalidSignature,
                _ => AuthenticationError::Malformed,
            }
        })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl JwtValidator for TokenService {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AuthenticationError> {
        self.verify(token, now)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"<redacted>")
            .field("validity_days", &self.validity.num_days())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleKind;
    use escrowdesk_core::{CompanyId, UserId};

    const SECRET: &str = "test-secret-key-minimum-32-characters-long";

    fn principal() -> Principal {
        Principal::new(UserId::new(), "USR-000042", vec![RoleKind::Seller])
            .with_company(CompanyId::new())
    }

    #[test]
    fn issued_token_verifies_to_same_claims() {
        let svc = TokenService::new(SECRET);
        let p = principal();
        let now = Utc::now();

        let token = svc.issue(&p, now).unwrap();
        let claims = svc.verify(&token, now).unwrap();

        assert_eq!(claims.sub, p.user_id);
        assert_eq!(claims.display_id, "USR-000042");
        assert_eq!(claims.roles, vec![RoleKind::Seller]);
        assert_eq!(claims.company_id, p.company_id);
        assert_eq!(claims.exp - claims.iat, 90 * 24 * 60 * 60);
    }

    #[test]
    fn token_expires_after_validity_window() {
        let svc = TokenService::new(SECRET).with_validity(Duration::minutes(10));
        let now = Utc::now();
        let token = svc.issue(&principal(), now).unwrap();

        assert_eq!(
            svc.verify(&token, now + Duration::minutes(11)),
            Err(AuthenticationError::Expired)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = TokenService::new(SECRET).issue(&principal(), Utc::now()).unwrap();
        let other = TokenService::new("another-secret-key-minimum-32-characters");
        assert_eq!(
            other.verify(&token, Utc::now()),
            Err(AuthenticationError::InvalidSignature)
        );
    }

    #[test]
    fn missing_and_garbage_tokens_are_rejected() {
        let svc = TokenService::new(SECRET);
        assert_eq!(svc.verify("", Utc::now()), Err(AuthenticationError::Missing));
        assert_eq!(
            svc.verify("not.a.token", Utc::now()),
            Err(AuthenticationError::Malformed)
        );
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", TokenService::new(SECRET));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(SECRET));
    }
}
