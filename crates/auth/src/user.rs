//! User aggregate (event-sourced).
//!
//! Covers registration, role membership, company affiliation and soft
//! deletion. Role membership events are what the infra layer projects into the
//! privilege store's user-role links.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_core::{Aggregate, AggregateRoot, CompanyId, DomainError, RecordStatus, UserId};
use escrowdesk_events::{Event, StatusTransition};

use crate::roles::RoleKind;

/// How a user authenticates. Verification itself happens outside the core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    PasswordHash { hash: String },
    OneTimePasscode { challenge_hash: String, expires_at: DateTime<Utc> },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::PasswordHash { .. } => f
                .debug_struct("PasswordHash")
                .field("hash", &"<redacted>")
                .finish(),
            Credential::OneTimePasscode { expires_at, .. } => f
                .debug_struct("OneTimePasscode")
                .field("challenge_hash", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
        }
    }
}

/// # Invariants
/// - Inactive users cannot gain roles or company affiliations.
/// - Actors cannot grant a role they do not hold themselves, unless admin.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub display_id: String,
    pub email: String,
    pub credential: Option<Credential>,
    pub roles: Vec<RoleKind>,
    pub company_id: Option<CompanyId>,
    pub status: RecordStatus,
    pub version: u64,
    pub created: bool,
}

impl User {
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            display_id: String::new(),
            email: String::new(),
            credential: None,
            roles: Vec::new(),
            company_id: None,
            status: RecordStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn has_role(&self, role: RoleKind) -> bool {
        self.roles.contains(&role)
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("user {}", self.id)));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(DomainError::guard("user_active", "user is inactive"));
        }
        Ok(())
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// Commands

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUser {
    pub user_id: UserId,
    pub display_id: String,
    pub email: String,
    pub credential: Credential,
    pub initial_roles: Vec<RoleKind>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRole {
    pub user_id: UserId,
    pub role: RoleKind,
    /// Roles of the actor performing the grant (escalation check).
    pub actor_roles: Vec<RoleKind>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRole {
    pub user_id: UserId,
    pub role: RoleKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateCompany {
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateUser {
    pub user_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactivateUser {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserCommand {
    Register(RegisterUser),
    AssignRole(AssignRole),
    RevokeRole(RevokeRole),
    AffiliateCompany(AffiliateCompany),
    Deactivate(DeactivateUser),
    Reactivate(ReactivateUser),
}

// Events

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: UserId,
    pub display_id: String,
    pub email: String,
    pub credential: Credential,
    pub initial_roles: Vec<RoleKind>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssigned {
    pub user_id: UserId,
    pub role: RoleKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRevoked {
    pub user_id: UserId,
    pub role: RoleKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyAffiliated {
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDeactivated {
    pub user_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReactivated {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserEvent {
    Registered(UserRegistered),
    RoleAssigned(RoleAssigned),
    RoleRevoked(RoleRevoked),
    CompanyAffiliated(CompanyAffiliated),
    Deactivated(UserDeactivated),
    Reactivated(UserReactivated),
}

impl UserEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            UserEvent::Registered(e) => e.user_id,
            UserEvent::RoleAssigned(e) => e.user_id,
            UserEvent::RoleRevoked(e) => e.user_id,
            UserEvent::CompanyAffiliated(e) => e.user_id,
            UserEvent::Deactivated(e) => e.user_id,
            UserEvent::Reactivated(e) => e.user_id,
        }
    }
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Registered(_) => "user.registered",
            UserEvent::RoleAssigned(_) => "user.role_assigned",
            UserEvent::RoleRevoked(_) => "user.role_revoked",
            UserEvent::CompanyAffiliated(_) => "user.company_affiliated",
            UserEvent::Deactivated(_) => "user.deactivated",
            UserEvent::Reactivated(_) => "user.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Registered(e) => e.occurred_at,
            UserEvent::RoleAssigned(e) => e.occurred_at,
            UserEvent::RoleRevoked(e) => e.occurred_at,
            UserEvent::CompanyAffiliated(e) => e.occurred_at,
            UserEvent::Deactivated(e) => e.occurred_at,
            UserEvent::Reactivated(e) => e.occurred_at,
        }
    }

    fn status_transition(&self) -> Option<StatusTransition> {
        match self {
            UserEvent::Deactivated(_) => Some(StatusTransition::new("active", "inactive")),
            UserEvent::Reactivated(_) => Some(StatusTransition::new("inactive", "active")),
            _ => None,
        }
    }
}

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::Registered(e) => {
                self.id = e.user_id;
                self.display_id = e.display_id.clone();
                self.email = e.email.clone();
                self.credential = Some(e.credential.clone());
                self.roles = e.initial_roles.clone();
                self.status = RecordStatus::Active;
                self.created = true;
            }
            UserEvent::RoleAssigned(e) => {
                if !self.roles.contains(&e.role) {
                    self.roles.push(e.role);
                }
            }
            UserEvent::RoleRevoked(e) => self.roles.retain(|r| *r != e.role),
            UserEvent::CompanyAffiliated(e) => self.company_id = Some(e.company_id),
            UserEvent::Deactivated(_) => self.status = RecordStatus::Inactive,
            UserEvent::Reactivated(_) => self.status = RecordStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Register(cmd) => self.handle_register(cmd),
            UserCommand::AssignRole(cmd) => self.handle_assign_role(cmd),
            UserCommand::RevokeRole(cmd) => self.handle_revoke_role(cmd),
            UserCommand::AffiliateCompany(cmd) => self.handle_affiliate(cmd),
            UserCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
            UserCommand::Reactivate(cmd) => self.handle_reactivate(cmd),
        }
    }
}

impl User {
    fn handle_register(&self, cmd: &RegisterUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user already exists"));
        }

        let email = cmd.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if cmd.display_id.trim().is_empty() {
            return Err(DomainError::validation("display id cannot be empty"));
        }

        let mut roles = cmd.initial_roles.clone();
        roles.sort();
        roles.dedup();

        Ok(vec![UserEvent::Registered(UserRegistered {
            user_id: cmd.user_id,
            display_id: cmd.display_id.trim().to_string(),
            email,
            credential: cmd.credential.clone(),
            initial_roles: roles,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_role(&self, cmd: &AssignRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_active()?;

        if self.has_role(cmd.role) {
            return Ok(vec![]);
        }

        let actor_is_admin = cmd.actor_roles.contains(&RoleKind::Admin);
        if !actor_is_admin && !cmd.actor_roles.contains(&cmd.role) {
            return Err(DomainError::guard(
                "role_escalation",
                format!("actor cannot grant role '{}' they do not hold", cmd.role),
            ));
        }

        Ok(vec![UserEvent::RoleAssigned(RoleAssigned {
            user_id: self.id,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revoke_role(&self, cmd: &RevokeRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;

        if !self.has_role(cmd.role) {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::RoleRevoked(RoleRevoked {
            user_id: self.id,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_affiliate(&self, cmd: &AffiliateCompany) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_active()?;

        if self.company_id == Some(cmd.company_id) {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::CompanyAffiliated(CompanyAffiliated {
            user_id: self.id,
            company_id: cmd.company_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;

        if !self.status.is_active() {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::Deactivated(UserDeactivated {
            user_id: self.id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;

        if self.status.is_active() {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::Reactivated(UserReactivated {
            user_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered(roles: Vec<RoleKind>) -> User {
        let user_id = UserId::new();
        let mut user = User::empty(user_id);
        let cmd = UserCommand::Register(RegisterUser {
            user_id,
            display_id: "USR-000001".to_string(),
            email: "Alice@Example.com".to_string(),
            credential: Credential::PasswordHash {
                hash: "$argon2id$v=19$stub".to_string(),
            },
            initial_roles: roles,
            occurred_at: now(),
        });
        for event in user.handle(&cmd).unwrap() {
            user.apply(&event);
        }
        user
    }

    fn run(user: &mut User, cmd: UserCommand) -> Result<usize, DomainError> {
        let events = user.handle(&cmd)?;
        let n = events.len();
        for e in &events {
            user.apply(e);
        }
        Ok(n)
    }

    #[test]
    fn register_normalizes_email_and_roles() {
        let user = registered(vec![RoleKind::Buyer, RoleKind::Buyer]);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.roles, vec![RoleKind::Buyer]);
        assert_eq!(user.version, 1);
    }

    #[test]
    fn register_rejects_invalid_email() {
        let user_id = UserId::new();
        let cmd = UserCommand::Register(RegisterUser {
            user_id,
            display_id: "USR-2".to_string(),
            email: "invalid-email".to_string(),
            credential: Credential::PasswordHash { hash: "x".into() },
            initial_roles: vec![],
            occurred_at: now(),
        });
        assert!(matches!(
            User::empty(user_id).handle(&cmd),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn admin_can_assign_any_role() {
        let mut user = registered(vec![]);
        let id = user.id;
        let n = run(
            &mut user,
            UserCommand::AssignRole(AssignRole {
                user_id: id,
                role: RoleKind::Seller,
                actor_roles: vec![RoleKind::Admin],
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(n, 1);
        assert!(user.has_role(RoleKind::Seller));
    }

    #[test]
    fn role_escalation_is_blocked() {
        let user = registered(vec![]);
        let err = user
            .handle(&UserCommand::AssignRole(AssignRole {
                user_id: user.id,
                role: RoleKind::Admin,
                actor_roles: vec![RoleKind::Buyer],
                occurred_at: now(),
            }))
            .unwrap_err();
        assert_eq!(err.guard_name(), Some("role_escalation"));
    }

    #[test]
    fn repeated_assignment_is_a_no_op() {
        let mut user = registered(vec![RoleKind::Buyer]);
        let id = user.id;
        let n = run(
            &mut user,
            UserCommand::AssignRole(AssignRole {
                user_id: id,
                role: RoleKind::Buyer,
                actor_roles: vec![RoleKind::Admin],
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(n, 0);
        assert_eq!(user.roles, vec![RoleKind::Buyer]);
    }

    #[test]
    fn inactive_user_cannot_gain_roles_or_companies() {
        let mut user = registered(vec![]);
        let id = user.id;
        run(
            &mut user,
            UserCommand::Deactivate(DeactivateUser {
                user_id: id,
                reason: "left the firm".into(),
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(user.status, RecordStatus::Inactive);

        let assign = user.handle(&UserCommand::AssignRole(AssignRole {
            user_id: id,
            role: RoleKind::Buyer,
            actor_roles: vec![RoleKind::Admin],
            occurred_at: now(),
        }));
        assert_eq!(assign.unwrap_err().guard_name(), Some("user_active"));

        let affiliate = user.handle(&UserCommand::AffiliateCompany(AffiliateCompany {
            user_id: id,
            company_id: CompanyId::new(),
            occurred_at: now(),
        }));
        assert!(affiliate.is_err());
    }

    #[test]
    fn deactivate_then_reactivate_reports_status_changes() {
        let mut user = registered(vec![]);
        let id = user.id;
        let events = user
            .handle(&UserCommand::Deactivate(DeactivateUser {
                user_id: id,
                reason: "audit".into(),
                occurred_at: now(),
            }))
            .unwrap();
        assert_eq!(
            events[0].status_transition(),
            Some(StatusTransition::new("active", "inactive"))
        );
        for e in &events {
            user.apply(e);
        }

        run(
            &mut user,
            UserCommand::Reactivate(ReactivateUser {
                user_id: id,
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert!(user.status.is_active());
    }

    #[test]
    fn revoke_role_removes_membership() {
        let mut user = registered(vec![RoleKind::Buyer, RoleKind::Seller]);
        let id = user.id;
        run(
            &mut user,
            UserCommand::RevokeRole(RevokeRole {
                user_id: id,
                role: RoleKind::Seller,
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(user.roles, vec![RoleKind::Buyer]);
    }

    #[test]
    fn commands_against_unknown_user_are_not_found() {
        let user = User::empty(UserId::new());
        let result = user.handle(&UserCommand::RevokeRole(RevokeRole {
            user_id: user.id,
            role: RoleKind::Buyer,
            occurred_at: now(),
        }));
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::PasswordHash {
            hash: "super-secret-hash".into(),
        };
        assert!(!format!("{c:?}").contains("super-secret-hash"));
    }
}
