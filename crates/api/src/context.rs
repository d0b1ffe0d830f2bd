use chrono::Utc;

use escrowdesk_auth::SessionClaims;
use escrowdesk_infra::workflow::RequestContext;

/// Verified session for a request.
///
/// Inserted by the auth middleware; the roles inside are informational only,
/// authorization always re-resolves them from the privilege store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    claims: SessionClaims,
}

impl Session {
    pub fn new(claims: SessionClaims) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &SessionClaims {
        &self.claims
    }

    /// Immutable per-request context with the clock read once.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(Some(self.claims.clone()), Utc::now())
    }
}
