//! Authorize → transition.
//!
//! Every state-changing action goes through [`ActionWorkflow::run`]: one
//! authorization decision against a consistent privilege view, then the
//! transition. The outcome is reported in the caller-facing [`ActionError`]
//! taxonomy, which keeps "could not authenticate", "not allowed", "guard not
//! met" and "could not determine" apart.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use escrowdesk_auth::{AuthorizationEngine, AuthzError, PrivilegeStore, SessionClaims, StoreError};
use escrowdesk_core::{DomainError, UserId};

use crate::command_dispatcher::DispatchError;

/// Immutable per-request values handed to every core call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Verified session, if the request carried a valid token.
    pub claims: Option<SessionClaims>,
    /// Clock reading taken once per request; used as `occurred_at`.
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(claims: Option<SessionClaims>, now: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            claims,
            now,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.claims.as_ref().map(|c| c.sub)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: missing privilege '{action}'")]
    Forbidden { action: String },

    #[error("guard '{guard}' not satisfied: {message}")]
    Guard { guard: String, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate creation, or a write that kept losing optimistic races.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store unavailable or unreadable; the caller may retry.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ActionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::Unauthenticated => "unauthenticated",
            ActionError::Forbidden { .. } => "forbidden",
            ActionError::Guard { .. } => "guard_violation",
            ActionError::Validation(_) => "validation",
            ActionError::NotFound(_) => "not_found",
            ActionError::Conflict(_) => "conflict",
            ActionError::Infrastructure(_) => "infrastructure",
        }
    }
}

impl From<DomainError> for ActionError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ActionError::Validation(msg),
            DomainError::GuardViolation { guard, message } => ActionError::Guard { guard, message },
            DomainError::NotFound(what) => ActionError::NotFound(what),
            DomainError::Conflict(msg) => ActionError::Conflict(msg),
        }
    }
}

impl From<DispatchError> for ActionError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => e.into(),
            DispatchError::Concurrency(msg) => ActionError::Conflict(msg),
            other => ActionError::Infrastructure(other.to_string()),
        }
    }
}

impl From<AuthzError> for ActionError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Unauthenticated => ActionError::Unauthenticated,
            AuthzError::MissingAction => ActionError::Validation("no action name supplied".to_string()),
            AuthzError::Forbidden(action) => ActionError::Forbidden { action },
            AuthzError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ActionError {
    fn from(value: StoreError) -> Self {
        ActionError::Infrastructure(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionWorkflow {
    engine: AuthorizationEngine,
}

impl ActionWorkflow {
    pub fn new(engine: AuthorizationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    /// Authorize `action` for the request's user; returns the verified claims.
    pub fn authorize<'a, P>(
        &self,
        ctx: &'a RequestContext,
        privileges: &P,
        action: &str,
    ) -> Result<&'a SessionClaims, ActionError>
    where
        P: PrivilegeStore + ?Sized,
    {
        self.engine.authorize(privileges, ctx.claims.as_ref(), action)?;
        ctx.claims.as_ref().ok_or(ActionError::Unauthenticated)
    }

    /// Authorize, then run `transition` with the verified claims.
    ///
    /// `transition` is not invoked unless the decision is a grant.
    #[instrument(
        skip(self, ctx, privileges, transition),
        fields(request_id = %ctx.request_id, user_id = ?ctx.user_id()),
        err(Display)
    )]
    pub fn run<P, T>(
        &self,
        ctx: &RequestContext,
        privileges: &P,
        action: &str,
        transition: impl FnOnce(&SessionClaims) -> Result<T, ActionError>,
    ) -> Result<T, ActionError>
    where
        P: PrivilegeStore + ?Sized,
    {
        let claims = self.authorize(ctx, privileges, action)?;
        match transition(claims) {
            Ok(out) => {
                info!(action, "action completed");
                Ok(out)
            }
            Err(err @ ActionError::Infrastructure(_)) => {
                warn!(action, error = %err, "action failed on infrastructure");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use escrowdesk_auth::{PrivilegeCatalog, RoleKind, actions, default_catalog};

    use super::*;

    fn claims(user_id: UserId) -> SessionClaims {
        SessionClaims {
            sub: user_id,
            display_id: "USR-7".to_string(),
            roles: vec![],
            company_id: None,
            iat: 0,
            exp: 1,
        }
    }

    fn catalog_with(user_id: UserId, role: RoleKind) -> PrivilegeCatalog {
        let mut catalog = default_catalog().unwrap();
        catalog.assign_role(user_id, role);
        catalog
    }

    #[test]
    fn transition_runs_only_after_grant() {
        let user = UserId::new();
        let catalog = catalog_with(user, RoleKind::BasicUser);
        let workflow = ActionWorkflow::default();
        let ctx = RequestContext::new(Some(claims(user)), Utc::now());
        let ran = Cell::new(false);

        let err = workflow
            .run(&ctx, &catalog, actions::CONTRACT_CREATE.as_str(), |_| {
                ran.set(true);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::Forbidden {
                action: "contract.create".to_string()
            }
        );
        assert!(!ran.get());

        let out = workflow
            .run(&ctx, &catalog, actions::CONTRACT_READ.as_str(), |c| Ok(c.sub))
            .unwrap();
        assert_eq!(out, user);
    }

    #[test]
    fn missing_session_is_unauthenticated_not_forbidden() {
        let workflow = ActionWorkflow::default();
        let ctx = RequestContext::new(None, Utc::now());
        let err = workflow
            .run(&ctx, &PrivilegeCatalog::new(), "contract.create", |_| Ok(()))
            .unwrap_err();
        assert_eq!(err, ActionError::Unauthenticated);
    }

    #[test]
    fn domain_and_dispatch_errors_keep_their_class() {
        let guard: ActionError = DomainError::guard("buyer_paid_escrow_amount", "escrow not paid").into();
        assert_eq!(guard.code(), "guard_violation");

        let raced: ActionError = DispatchError::Concurrency("stale".to_string()).into();
        assert_eq!(raced.code(), "conflict");

        let down: ActionError = StoreError::Unavailable("pool closed".to_string()).into();
        assert_eq!(down.code(), "infrastructure");

        let missing: ActionError = DomainError::not_found("contract 42").into();
        assert_eq!(missing, ActionError::NotFound("contract 42".to_string()));
    }
}
