//! Privilege store boundary and the in-memory catalog.
//!
//! The authorization engine only reads through [`PrivilegeStore`]. Backends
//! that cannot answer all three lookups from one consistent view (e.g. SQL over
//! several statements) load a per-check [`PrivilegeCatalog`] slice inside a
//! single read transaction and hand that to the engine instead.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use escrowdesk_core::{DomainError, Entity, PrivilegeId, RecordStatus, RoleId, UserId};

use crate::privilege::{Privilege, PrivilegeName, RolePrivilege, UserRole};
use crate::roles::{Role, RoleKind};

/// Infrastructure failure while reading authorization data.
///
/// Never to be confused with a denial: callers must surface it as
/// "could not determine", not "forbidden".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("privilege store unavailable: {0}")]
    Unavailable(String),

    #[error("privilege store returned corrupt data: {0}")]
    Corrupt(String),
}

/// Read-only lookups used by privilege resolution.
pub trait PrivilegeStore: Send + Sync {
    /// Privilege row by name, active or not. `None` when never registered.
    fn find_privilege_by_name(&self, name: &str) -> Result<Option<Privilege>, StoreError>;

    /// Active roles held by the user through active user-role links.
    fn find_roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, StoreError>;

    /// Active privilege links of a role.
    fn find_active_role_privileges(&self, role_id: RoleId) -> Result<Vec<RolePrivilege>, StoreError>;
}

impl<S> PrivilegeStore for Arc<S>
where
    S: PrivilegeStore + ?Sized,
{
    fn find_privilege_by_name(&self, name: &str) -> Result<Option<Privilege>, StoreError> {
        (**self).find_privilege_by_name(name)
    }

    fn find_roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, StoreError> {
        (**self).find_roles_for_user(user_id)
    }

    fn find_active_role_privileges(&self, role_id: RoleId) -> Result<Vec<RolePrivilege>, StoreError> {
        (**self).find_active_role_privileges(role_id)
    }
}

/// Owned, immutable-by-default set of authorization reference data.
///
/// Used as seed data, as the state behind the in-memory store, and as the
/// consistent per-check snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeCatalog {
    privileges: HashMap<PrivilegeId, Privilege>,
    by_name: HashMap<String, PrivilegeId>,
    roles: HashMap<RoleId, Role>,
    role_privileges: Vec<RolePrivilege>,
    user_roles: Vec<UserRole>,
}

impl PrivilegeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn privilege_count(&self) -> usize {
        self.privileges.len()
    }

    pub fn privileges(&self) -> impl Iterator<Item = &Privilege> {
        self.privileges.values()
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn role_privileges(&self) -> &[RolePrivilege] {
        &self.role_privileges
    }

    pub fn user_roles(&self) -> &[UserRole] {
        &self.user_roles
    }

    /// Register a privilege (idempotent by name).
    pub fn register_privilege(&mut self, name: PrivilegeName) -> PrivilegeId {
        if let Some(id) = self.by_name.get(name.as_str()) {
            return *id;
        }
        let id = PrivilegeId::new();
        self.by_name.insert(name.as_str().to_string(), id);
        self.privileges.insert(
            id,
            Privilege {
                id,
                name,
                status: RecordStatus::Active,
            },
        );
        id
    }

    /// Insert a fully-specified privilege row (used when loading from storage).
    pub fn insert_privilege(&mut self, privilege: Privilege) {
        self.by_name
            .insert(privilege.name.as_str().to_string(), privilege.id);
        self.privileges.insert(privilege.id, privilege);
    }

    pub fn insert_role(&mut self, role: Role) {
        self.roles.insert(role.id, role);
    }

    pub fn insert_role_privilege(&mut self, link: RolePrivilege) {
        self.role_privileges.retain(|rp| {
            !(rp.role_id == link.role_id && rp.privilege_id == link.privilege_id)
        });
        self.role_privileges.push(link);
    }

    pub fn insert_user_role(&mut self, link: UserRole) {
        self.user_roles
            .retain(|ur| !(ur.user_id == link.user_id && ur.role_id == link.role_id));
        self.user_roles.push(link);
    }

    pub fn set_privilege_status(&mut self, name: &str, status: RecordStatus) -> Result<(), DomainError> {
        let id = self
            .by_name
            .get(name)
            .ok_or_else(|| DomainError::not_found(format!("privilege '{name}'")))?;
        if let Some(p) = self.privileges.get_mut(id) {
            p.status = status;
        }
        Ok(())
    }

    /// Grant (or reinstate) a privilege to a role.
    pub fn grant(&mut self, role: RoleKind, name: &str) -> Result<(), DomainError> {
        self.set_link_status(role, name, RecordStatus::Active)
    }

    /// Soft-revoke a privilege from a role; the link row is retained.
    pub fn revoke(&mut self, role: RoleKind, name: &str) -> Result<(), DomainError> {
        self.set_link_status(role, name, RecordStatus::Inactive)
    }

    fn set_link_status(&mut self, role: RoleKind, name: &str, status: RecordStatus) -> Result<(), DomainError> {
        let privilege = self
            .by_name
            .get(name)
            .and_then(|id| self.privileges.get(id))
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("privilege '{name}'")))?;
        let role_id = role.role_id();
        if !self.roles.contains_key(&role_id) {
            return Err(DomainError::not_found(format!("role '{role}'")));
        }

        match self
            .role_privileges
            .iter_mut()
            .find(|rp| rp.role_id == role_id && rp.privilege_id == privilege.id)
        {
            Some(link) => link.status = status,
            None => self.role_privileges.push(RolePrivilege {
                role_id,
                privilege_id: privilege.id,
                privilege_name: privilege.name,
                status,
            }),
        }
        Ok(())
    }

    pub fn assign_role(&mut self, user_id: UserId, role: RoleKind) {
        self.set_user_role_status(user_id, role, RecordStatus::Active);
    }

    /// Soft-revoke a role from a user; the link row is retained.
    pub fn unassign_role(&mut self, user_id: UserId, role: RoleKind) {
        self.set_user_role_status(user_id, role, RecordStatus::Inactive);
    }

    fn set_user_role_status(&mut self, user_id: UserId, role: RoleKind, status: RecordStatus) {
        let role_id = role.role_id();
        match self
            .user_roles
            .iter_mut()
            .find(|ur| ur.user_id == user_id && ur.role_id == role_id)
        {
            Some(link) => link.status = status,
            None => self.user_roles.push(UserRole {
                user_id,
                role_id,
                status,
            }),
        }
    }

    /// The minimal sub-catalog needed to decide `(user, action)`: the target
    /// privilege, the user's links and roles, and those roles' privilege links.
    pub fn slice_for(&self, user_id: UserId, action: &str) -> PrivilegeCatalog {
        let mut slice = PrivilegeCatalog::new();

        if let Some(p) = self.by_name.get(action).and_then(|id| self.privileges.get(id)) {
            slice.insert_privilege(p.clone());
        }

        for ur in self.user_roles.iter().filter(|ur| ur.user_id == user_id) {
            slice.user_roles.push(ur.clone());
            if let Some(role) = self.roles.get(&ur.role_id) {
                slice.insert_role(role.clone());
            }
            slice.role_privileges.extend(
                self.role_privileges
                    .iter()
                    .filter(|rp| rp.role_id == ur.role_id)
                    .cloned(),
            );
        }

        slice
    }
}

impl PrivilegeStore for PrivilegeCatalog {
    fn find_privilege_by_name(&self, name: &str) -> Result<Option<Privilege>, StoreError> {
        Ok(self
            .by_name
            .get(name)
            .and_then(|id| self.privileges.get(id))
            .cloned())
    }

    fn find_roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, StoreError> {
        let mut roles: Vec<Role> = self
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id && ur.status.is_active())
            .filter_map(|ur| self.roles.get(&ur.role_id))
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.kind);
        roles.dedup_by_key(|r| r.id);
        Ok(roles)
    }

    fn find_active_role_privileges(&self, role_id: RoleId) -> Result<Vec<RolePrivilege>, StoreError> {
        Ok(self
            .role_privileges
            .iter()
            .filter(|rp| rp.role_id == role_id && rp.status.is_active())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PrivilegeCatalog {
        let mut c = PrivilegeCatalog::new();
        c.insert_role(Role::seeded(RoleKind::Buyer));
        c.insert_role(Role::seeded(RoleKind::Seller));
        c.register_privilege(PrivilegeName::from_static("contract.create"));
        c.register_privilege(PrivilegeName::from_static("contract.close"));
        c.grant(RoleKind::Buyer, "contract.create").unwrap();
        c.grant(RoleKind::Seller, "contract.close").unwrap();
        c
    }

    #[test]
    fn register_privilege_is_idempotent() {
        let mut c = catalog();
        let a = c.register_privilege(PrivilegeName::from_static("contract.create"));
        let b = c.register_privilege(PrivilegeName::from_static("contract.create"));
        assert_eq!(a, b);
        assert_eq!(c.privilege_count(), 2);
    }

    #[test]
    fn revoked_links_are_kept_but_not_returned() {
        let mut c = catalog();
        c.revoke(RoleKind::Buyer, "contract.create").unwrap();

        assert_eq!(c.role_privileges().len(), 2);
        assert!(
            c.find_active_role_privileges(RoleKind::Buyer.role_id())
                .unwrap()
                .is_empty()
        );

        c.grant(RoleKind::Buyer, "contract.create").unwrap();
        assert_eq!(c.role_privileges().len(), 2);
        assert_eq!(
            c.find_active_role_privileges(RoleKind::Buyer.role_id()).unwrap().len(),
            1
        );
    }

    #[test]
    fn inactive_user_roles_are_excluded() {
        let mut c = catalog();
        let user = UserId::new();
        c.assign_role(user, RoleKind::Buyer);
        c.assign_role(user, RoleKind::Seller);
        c.unassign_role(user, RoleKind::Seller);

        let roles = c.find_roles_for_user(user).unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].kind, RoleKind::Buyer);
        assert_eq!(c.user_roles().len(), 2);
    }

    #[test]
    fn slice_contains_only_what_the_check_needs() {
        let mut c = catalog();
        let user = UserId::new();
        let other = UserId::new();
        c.assign_role(user, RoleKind::Buyer);
        c.assign_role(other, RoleKind::Seller);

        let slice = c.slice_for(user, "contract.create");
        assert_eq!(slice.privilege_count(), 1);
        assert_eq!(slice.user_roles().len(), 1);
        assert_eq!(slice.role_privileges().len(), 1);
        assert!(slice.find_roles_for_user(other).unwrap().is_empty());
    }

    #[test]
    fn grant_unknown_privilege_is_not_found() {
        let mut c = catalog();
        assert!(matches!(
            c.grant(RoleKind::Buyer, "contract.teleport"),
            Err(DomainError::NotFound(_))
        ));
    }
}
