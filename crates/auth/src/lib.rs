//! `escrowdesk-auth`: authentication and authorization boundary.
//!
//! Decoupled from HTTP and storage: privilege data is read through
//! [`PrivilegeStore`], sessions are verified through [`JwtValidator`].

pub mod authorize;
pub mod claims;
pub mod principal;
pub mod privilege;
pub mod roles;
pub mod seed;
pub mod store;
pub mod token;
pub mod user;

pub use authorize::{
    AuthorizationEngine, AuthorizationExplanation, AuthzError, Decision, DenialKind, DenialReason,
    GrantReason, UndeclaredActionPolicy,
};
pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use principal::Principal;
pub use privilege::{Privilege, PrivilegeName, RolePrivilege, UserRole};
pub use roles::{Role, RoleKind};
pub use seed::{actions, default_catalog, default_grants};
pub use store::{PrivilegeCatalog, PrivilegeStore, StoreError};
pub use token::{AuthenticationError, JwtValidator, TokenError, TokenService};
pub use user::{Credential, User, UserCommand, UserEvent};
