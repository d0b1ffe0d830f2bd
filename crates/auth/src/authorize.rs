use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use escrowdesk_core::{PrivilegeId, UserId};

use crate::claims::SessionClaims;
use crate::store::{PrivilegeStore, StoreError};

/// What to do with an action name that has no registered privilege.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeclaredActionPolicy {
    /// Undeclared actions are implicitly public.
    #[default]
    Allow,
    /// Undeclared actions are refused like any missing privilege.
    Deny,
}

impl UndeclaredActionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("no action name supplied")]
    MissingAction,

    #[error("forbidden: missing privilege '{0}'")]
    Forbidden(String),

    /// Could not determine: never treat as a denial.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantReason {
    /// No privilege is registered for the action and the policy allows it.
    Undeclared,
    /// One of the user's active roles holds the active privilege.
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NoUser,
    MissingAction,
    Undeclared,
    PrivilegeInactive,
    MissingPrivilege,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "why", rename_all = "snake_case")]
pub enum Decision {
    Granted(GrantReason),
    Denied(DenialKind),
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted(_))
    }
}

/// Resolves `user -> roles -> role privileges -> privilege` for one action.
///
/// Pure read: the engine holds only its policy. Role membership always comes
/// from the store, never from the roles echoed in the session claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationEngine {
    policy: UndeclaredActionPolicy,
}

impl AuthorizationEngine {
    pub fn new(policy: UndeclaredActionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UndeclaredActionPolicy {
        self.policy
    }

    pub fn decide<S>(
        &self,
        store: &S,
        user: Option<&SessionClaims>,
        action: &str,
    ) -> Result<Decision, StoreError>
    where
        S: PrivilegeStore + ?Sized,
    {
        let decision = self.resolve(store, user, action)?;

        let user_id = user.map(|u| u.sub.to_string()).unwrap_or_default();
        match decision {
            Decision::Granted(reason) => {
                tracing::debug!(user_id = %user_id, action, ?reason, "authorization granted");
            }
            Decision::Denied(kind) => {
                tracing::info!(user_id = %user_id, action, ?kind, "authorization denied");
            }
        }
        Ok(decision)
    }

    pub fn is_authorized<S>(
        &self,
        store: &S,
        user: Option<&SessionClaims>,
        action: &str,
    ) -> Result<bool, StoreError>
    where
        S: PrivilegeStore + ?Sized,
    {
        Ok(self.decide(store, user, action)?.is_granted())
    }

    /// Like [`decide`](Self::decide), but as a typed outcome for callers that
    /// short-circuit with `?`.
    pub fn authorize<S>(
        &self,
        store: &S,
        user: Option<&SessionClaims>,
        action: &str,
    ) -> Result<(), AuthzError>
    where
        S: PrivilegeStore + ?Sized,
    {
        match self.decide(store, user, action)? {
            Decision::Granted(_) => Ok(()),
            Decision::Denied(DenialKind::NoUser) => Err(AuthzError::Unauthenticated),
            Decision::Denied(DenialKind::MissingAction) => Err(AuthzError::MissingAction),
            Decision::Denied(_) => Err(AuthzError::Forbidden(action.to_string())),
        }
    }

    fn resolve<S>(
        &self,
        store: &S,
        user: Option<&SessionClaims>,
        action: &str,
    ) -> Result<Decision, StoreError>
    where
        S: PrivilegeStore + ?Sized,
    {
        let action = action.trim();
        if action.is_empty() {
            return Ok(Decision::Denied(DenialKind::MissingAction));
        }
        let Some(user) = user else {
            return Ok(Decision::Denied(DenialKind::NoUser));
        };

        let Some(privilege) = store.find_privilege_by_name(action)? else {
            return Ok(match self.policy {
                UndeclaredActionPolicy::Allow => Decision::Granted(GrantReason::Undeclared),
                UndeclaredActionPolicy::Deny => Decision::Denied(DenialKind::Undeclared),
            });
        };
        if !privilege.status.is_active() {
            return Ok(Decision::Denied(DenialKind::PrivilegeInactive));
        }

        let held = effective_privileges(store, user.sub)?;
        if held.ids.contains(&privilege.id) {
            Ok(Decision::Granted(GrantReason::Held))
        } else {
            Ok(Decision::Denied(DenialKind::MissingPrivilege))
        }
    }

    /// Audit view of a decision: which roles and privileges the store resolved
    /// for the user and why the outcome was reached.
    pub fn explain_authorization<S>(
        &self,
        store: &S,
        user: Option<&SessionClaims>,
        action: &str,
    ) -> Result<AuthorizationExplanation, StoreError>
    where
        S: PrivilegeStore + ?Sized,
    {
        let decision = self.resolve(store, user, action)?;

        let (roles, effective) = match user {
            Some(u) => {
                let held = effective_privileges(store, u.sub)?;
                (held.roles, held.names)
            }
            None => (Vec::new(), Vec::new()),
        };

        let (reason, denial) = match decision {
            Decision::Granted(GrantReason::Undeclared) => (
                format!("no privilege is registered for '{action}'; undeclared actions are allowed"),
                None,
            ),
            Decision::Granted(GrantReason::Held) => (
                format!("an active role grants '{action}'"),
                None,
            ),
            Decision::Denied(kind) => {
                let (message, suggestions) = denial_details(kind, action);
                (
                    message.clone(),
                    Some(DenialReason {
                        kind,
                        message,
                        suggestions,
                    }),
                )
            }
        };

        Ok(AuthorizationExplanation {
            action: action.to_string(),
            granted: decision.is_granted(),
            reason,
            user_id: user.map(|u| u.sub),
            roles,
            effective_privileges: effective,
            denial_reason: denial,
        })
    }
}

struct EffectivePrivileges {
    ids: HashSet<PrivilegeId>,
    names: Vec<String>,
    roles: Vec<String>,
}

/// Union of active privileges across every active role the user holds.
fn effective_privileges<S>(store: &S, user_id: UserId) -> Result<EffectivePrivileges, StoreError>
where
    S: PrivilegeStore + ?Sized,
{
    let roles = store.find_roles_for_user(user_id)?;

    let mut ids = HashSet::new();
    let mut names = BTreeSet::new();
    for role in &roles {
        for link in store.find_active_role_privileges(role.id)? {
            ids.insert(link.privilege_id);
            names.insert(link.privilege_name.as_str().to_string());
        }
    }

    Ok(EffectivePrivileges {
        ids,
        names: names.into_iter().collect(),
        roles: roles.iter().map(|r| r.name().to_string()).collect(),
    })
}

fn denial_details(kind: DenialKind, action: &str) -> (String, Vec<String>) {
    match kind {
        DenialKind::NoUser => (
            "no authenticated user".to_string(),
            vec!["Send a valid session token in the Authorization header".to_string()],
        ),
        DenialKind::MissingAction => (
            "no action name was supplied".to_string(),
            vec!["Name the action being performed, e.g. 'contract.create'".to_string()],
        ),
        DenialKind::Undeclared => (
            format!("no privilege is registered for '{action}' and undeclared actions are denied"),
            vec![format!("Register the '{action}' privilege and grant it to a role")],
        ),
        DenialKind::PrivilegeInactive => (
            format!("privilege '{action}' is inactive"),
            vec![format!("Reinstate the '{action}' privilege")],
        ),
        DenialKind::MissingPrivilege => (
            format!("none of the user's active roles grants '{action}'"),
            vec![
                format!("Assign a role that grants '{action}'"),
                format!("Check whether '{action}' was revoked from the user's role"),
            ],
        ),
    }
}

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub action: String,
    pub granted: bool,
    pub reason: String,
    pub user_id: Option<UserId>,
    /// Active roles resolved from the store (sorted by role code).
    pub roles: Vec<String>,
    /// Union of active privileges across those roles (sorted).
    pub effective_privileges: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::privilege::PrivilegeName;
    use crate::roles::{Role, RoleKind};
    use crate::store::PrivilegeCatalog;
    use crate::Principal;

    fn claims(user: UserId) -> SessionClaims {
        let principal = Principal::new(user, "USR-1", vec![]);
        SessionClaims::for_principal(&principal, Utc::now(), chrono::Duration::days(1))
    }

    fn catalog() -> PrivilegeCatalog {
        let mut c = PrivilegeCatalog::new();
        for kind in RoleKind::ALL {
            c.insert_role(Role::seeded(kind));
        }
        c.register_privilege(PrivilegeName::from_static("contract.create"));
        c.register_privilege(PrivilegeName::from_static("contract.close"));
        c.grant(RoleKind::Buyer, "contract.create").unwrap();
        c.grant(RoleKind::Seller, "contract.close").unwrap();
        c
    }

    struct FailingStore;

    impl PrivilegeStore for FailingStore {
        fn find_privilege_by_name(&self, _: &str) -> Result<Option<crate::Privilege>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn find_roles_for_user(&self, _: UserId) -> Result<Vec<Role>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn find_active_role_privileges(
            &self,
            _: escrowdesk_core::RoleId,
        ) -> Result<Vec<crate::RolePrivilege>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn unregistered_action_is_granted_by_default() {
        let engine = AuthorizationEngine::default();
        let user = UserId::new();
        let granted = engine
            .is_authorized(&catalog(), Some(&claims(user)), "report.export")
            .unwrap();
        assert!(granted);
    }

    #[test]
    fn unregistered_action_is_denied_under_deny_policy() {
        let engine = AuthorizationEngine::new(UndeclaredActionPolicy::Deny);
        let decision = engine
            .decide(&catalog(), Some(&claims(UserId::new())), "report.export")
            .unwrap();
        assert_eq!(decision, Decision::Denied(DenialKind::Undeclared));
    }

    #[test]
    fn user_without_roles_is_denied_registered_action() {
        let engine = AuthorizationEngine::default();
        let decision = engine
            .decide(&catalog(), Some(&claims(UserId::new())), "contract.create")
            .unwrap();
        assert_eq!(decision, Decision::Denied(DenialKind::MissingPrivilege));
    }

    #[test]
    fn missing_user_or_action_fails_closed() {
        let engine = AuthorizationEngine::default();
        let c = catalog();
        assert_eq!(
            engine.authorize(&c, None, "contract.create"),
            Err(AuthzError::Unauthenticated)
        );
        assert_eq!(
            engine.authorize(&c, Some(&claims(UserId::new())), "  "),
            Err(AuthzError::MissingAction)
        );
        // Even undeclared actions need a user.
        assert!(!engine.is_authorized(&c, None, "report.export").unwrap());
    }

    #[test]
    fn privileges_union_across_roles() {
        let engine = AuthorizationEngine::default();
        let mut c = catalog();
        let user = UserId::new();
        c.assign_role(user, RoleKind::Buyer);
        c.assign_role(user, RoleKind::Seller);

        let who = claims(user);
        assert!(engine.is_authorized(&c, Some(&who), "contract.create").unwrap());
        assert!(engine.is_authorized(&c, Some(&who), "contract.close").unwrap());
    }

    #[test]
    fn revoking_role_privilege_removes_access_but_keeps_row() {
        let engine = AuthorizationEngine::default();
        let mut c = catalog();
        let user = UserId::new();
        c.assign_role(user, RoleKind::Buyer);
        let who = claims(user);

        assert!(engine.is_authorized(&c, Some(&who), "contract.create").unwrap());

        c.revoke(RoleKind::Buyer, "contract.create").unwrap();
        assert_eq!(
            engine.authorize(&c, Some(&who), "contract.create"),
            Err(AuthzError::Forbidden("contract.create".into()))
        );
        assert!(
            c.role_privileges()
                .iter()
                .any(|rp| rp.privilege_name.as_str() == "contract.create" && !rp.status.is_active())
        );
    }

    #[test]
    fn inactive_privilege_denies_everyone() {
        let engine = AuthorizationEngine::default();
        let mut c = catalog();
        let user = UserId::new();
        c.assign_role(user, RoleKind::Buyer);
        c.set_privilege_status("contract.create", escrowdesk_core::RecordStatus::Inactive)
            .unwrap();

        let decision = engine
            .decide(&c, Some(&claims(user)), "contract.create")
            .unwrap();
        assert_eq!(decision, Decision::Denied(DenialKind::PrivilegeInactive));
    }

    #[test]
    fn claimed_roles_are_not_trusted() {
        let engine = AuthorizationEngine::default();
        let user = UserId::new();
        let principal = Principal::new(user, "USR-2", vec![RoleKind::Admin, RoleKind::Buyer]);
        let who = SessionClaims::for_principal(&principal, Utc::now(), chrono::Duration::days(1));

        assert!(!engine.is_authorized(&catalog(), Some(&who), "contract.create").unwrap());
    }

    #[test]
    fn store_failure_is_not_a_denial() {
        let engine = AuthorizationEngine::default();
        let result = engine.authorize(&FailingStore, Some(&claims(UserId::new())), "contract.create");
        assert!(matches!(result, Err(AuthzError::Store(StoreError::Unavailable(_)))));
    }

    #[test]
    fn explanation_lists_roles_and_effective_privileges() {
        let engine = AuthorizationEngine::default();
        let mut c = catalog();
        let user = UserId::new();
        c.assign_role(user, RoleKind::Seller);

        let explanation = engine
            .explain_authorization(&c, Some(&claims(user)), "contract.create")
            .unwrap();
        assert!(!explanation.granted);
        assert_eq!(explanation.roles, vec!["seller".to_string()]);
        assert_eq!(explanation.effective_privileges, vec!["contract.close".to_string()]);
        let denial = explanation.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::MissingPrivilege);
        assert!(!denial.suggestions.is_empty());
    }

    #[test]
    fn decisions_serialize_with_outcome_tag() {
        let json = serde_json::to_value(Decision::Denied(DenialKind::PrivilegeInactive)).unwrap();
        assert_eq!(json["outcome"], "denied");
        assert_eq!(json["why"], "privilege_inactive");
    }

    proptest::proptest! {
        #[test]
        fn any_unregistered_action_is_granted(resource in "[a-z]{1,12}", verb in "[a-z_]{1,12}") {
            let action = format!("zz{resource}.{verb}");
            let engine = AuthorizationEngine::default();
            let granted = engine
                .is_authorized(&catalog(), Some(&claims(UserId::new())), &action)
                .unwrap();
            proptest::prop_assert!(granted);
        }
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!(UndeclaredActionPolicy::parse("Deny"), Some(UndeclaredActionPolicy::Deny));
        assert_eq!(UndeclaredActionPolicy::parse("allow"), Some(UndeclaredActionPolicy::Allow));
        assert_eq!(UndeclaredActionPolicy::parse("maybe"), None);
    }
}
