//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// lifecycle guards, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lifecycle transition was attempted while one of its preconditions
    /// does not hold. `guard` is a stable, machine-readable name for the
    /// unmet condition (e.g. `buyer_paid_escrow_amount`).
    #[error("guard '{guard}' not satisfied: {message}")]
    GuardViolation { guard: String, message: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found or is no longer active.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn guard(guard: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::GuardViolation {
            guard: guard.into(),
            message: msg.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Name of the failed guard, if this is a guard violation.
    pub fn guard_name(&self) -> Option<&str> {
        match self {
            DomainError::GuardViolation { guard, .. } => Some(guard),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_violation_names_the_condition() {
        let err = DomainError::guard("buyer_agreed", "buyer has not agreed");
        assert_eq!(err.guard_name(), Some("buyer_agreed"));
        assert_eq!(
            err.to_string(),
            "guard 'buyer_agreed' not satisfied: buyer has not agreed"
        );
    }

    #[test]
    fn non_guard_errors_have_no_guard_name() {
        assert_eq!(DomainError::validation("x").guard_name(), None);
        assert_eq!(DomainError::not_found("contract").guard_name(), None);
    }
}
