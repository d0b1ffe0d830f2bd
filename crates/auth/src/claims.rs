use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use escrowdesk_core::{CompanyId, UserId};

use crate::principal::Principal;
use crate::roles::RoleKind;

/// Verified session claims.
///
/// `roles` is informational (display, client hints). Authorization decisions
/// re-resolve roles from the privilege store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the acting user.
    pub sub: UserId,

    /// Human-facing user identifier (e.g. `USR-000123`).
    pub display_id: String,

    #[serde(default)]
    pub roles: Vec<RoleKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<CompanyId>,

    /// Issued-at (unix seconds).
    pub iat: i64,

    /// Expiry (unix seconds).
    pub exp: i64,
}

impl SessionClaims {
    pub fn for_principal(principal: &Principal, now: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = now.timestamp();
        Self {
            sub: principal.user_id,
            display_id: principal.display_id.clone(),
            roles: principal.roles.clone(),
            company_id: principal.company_id,
            iat,
            exp: iat + ttl.num_seconds(),
        }
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the claims' time window against `now`.
///
/// Signature checks happen in [`crate::token::TokenService`]; this only looks
/// at the decoded values.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(now: DateTime<Utc>, ttl: Duration) -> SessionClaims {
        let p = Principal::new(UserId::new(), "USR-7", vec![RoleKind::Buyer]);
        SessionClaims::for_principal(&p, now, ttl)
    }

    #[test]
    fn fresh_claims_are_valid() {
        let now = Utc::now();
        assert_eq!(validate_claims(&claims(now, Duration::days(90)), now), Ok(()));
    }

    #[test]
    fn time_window_is_enforced() {
        let now = Utc::now();
        let c = claims(now, Duration::hours(1));

        assert_eq!(
            validate_claims(&c, now + Duration::hours(2)),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&c, now - Duration::minutes(5)),
            Err(TokenValidationError::NotYetValid)
        );
        assert_eq!(
            validate_claims(&claims(now, Duration::zero()), now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
