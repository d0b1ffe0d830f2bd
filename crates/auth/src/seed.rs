//! Default role/privilege reference data.

use escrowdesk_core::DomainError;

use crate::privilege::PrivilegeName;
use crate::roles::{Role, RoleKind};
use crate::store::PrivilegeCatalog;

/// Registered action names.
pub mod actions {
    use crate::privilege::PrivilegeName;

    pub const COMPANY_CREATE: PrivilegeName = PrivilegeName::from_static("company.create");
    pub const COMPANY_READ: PrivilegeName = PrivilegeName::from_static("company.read");
    pub const COMPANY_UPDATE: PrivilegeName = PrivilegeName::from_static("company.update");
    pub const COMPANY_DELETE: PrivilegeName = PrivilegeName::from_static("company.delete");

    pub const CONTRACT_CREATE: PrivilegeName = PrivilegeName::from_static("contract.create");
    pub const CONTRACT_READ: PrivilegeName = PrivilegeName::from_static("contract.read");
    pub const CONTRACT_UPDATE: PrivilegeName = PrivilegeName::from_static("contract.update");
    pub const CONTRACT_AGREE: PrivilegeName = PrivilegeName::from_static("contract.agree");
    pub const CONTRACT_REJECT: PrivilegeName = PrivilegeName::from_static("contract.reject");
    pub const CONTRACT_DEPOSIT_ESCROW: PrivilegeName =
        PrivilegeName::from_static("contract.deposit_escrow");
    pub const CONTRACT_FREEZE: PrivilegeName = PrivilegeName::from_static("contract.freeze");
    pub const CONTRACT_START_EXECUTION: PrivilegeName =
        PrivilegeName::from_static("contract.start_execution");
    pub const CONTRACT_CLOSE: PrivilegeName = PrivilegeName::from_static("contract.close");
    pub const CONTRACT_CANCEL: PrivilegeName = PrivilegeName::from_static("contract.cancel");

    pub const MILESTONE_CREATE: PrivilegeName = PrivilegeName::from_static("milestone.create");
    pub const MILESTONE_START: PrivilegeName = PrivilegeName::from_static("milestone.start");
    pub const MILESTONE_CLOSE: PrivilegeName = PrivilegeName::from_static("milestone.close");

    pub const TRANSACTION_CREATE: PrivilegeName = PrivilegeName::from_static("transaction.create");
    pub const TRANSACTION_APPROVE: PrivilegeName =
        PrivilegeName::from_static("transaction.approve");
    pub const TRANSACTION_REJECT: PrivilegeName = PrivilegeName::from_static("transaction.reject");
    pub const TRANSACTION_COMPLETE: PrivilegeName =
        PrivilegeName::from_static("transaction.complete");

    pub const DISPUTE_RAISE: PrivilegeName = PrivilegeName::from_static("dispute.raise");
    pub const DISPUTE_RESOLVE: PrivilegeName = PrivilegeName::from_static("dispute.resolve");
    pub const DISPUTE_ASSIGN_ARBITRATOR: PrivilegeName =
        PrivilegeName::from_static("dispute.assign_arbitrator");

    pub const USER_ASSIGN_ROLE: PrivilegeName = PrivilegeName::from_static("user.assign_role");

    pub const ALL: &[PrivilegeName] = &[
        COMPANY_CREATE,
        COMPANY_READ,
        COMPANY_UPDATE,
        COMPANY_DELETE,
        CONTRACT_CREATE,
        CONTRACT_READ,
        CONTRACT_UPDATE,
        CONTRACT_AGREE,
        CONTRACT_REJECT,
        CONTRACT_DEPOSIT_ESCROW,
        CONTRACT_FREEZE,
        CONTRACT_START_EXECUTION,
        CONTRACT_CLOSE,
        CONTRACT_CANCEL,
        MILESTONE_CREATE,
        MILESTONE_START,
        MILESTONE_CLOSE,
        TRANSACTION_CREATE,
        TRANSACTION_APPROVE,
        TRANSACTION_REJECT,
        TRANSACTION_COMPLETE,
        DISPUTE_RAISE,
        DISPUTE_RESOLVE,
        DISPUTE_ASSIGN_ARBITRATOR,
        USER_ASSIGN_ROLE,
    ];
}

/// Privileges each role holds in the default catalog.
pub fn default_grants(role: RoleKind) -> Vec<PrivilegeName> {
    use actions::*;

    match role {
        RoleKind::Admin => ALL.to_vec(),
        RoleKind::Buyer | RoleKind::Seller => vec![
            COMPANY_CREATE,
            COMPANY_READ,
            COMPANY_UPDATE,
            CONTRACT_CREATE,
            CONTRACT_READ,
            CONTRACT_UPDATE,
            CONTRACT_AGREE,
            CONTRACT_REJECT,
            CONTRACT_DEPOSIT_ESCROW,
            CONTRACT_FREEZE,
            CONTRACT_START_EXECUTION,
            CONTRACT_CLOSE,
            MILESTONE_CREATE,
            MILESTONE_START,
            MILESTONE_CLOSE,
            TRANSACTION_CREATE,
            DISPUTE_RAISE,
        ],
        RoleKind::BasicUser => vec![COMPANY_CREATE, COMPANY_READ, CONTRACT_READ],
    }
}

/// Build the default catalog: every role, every registered action, and the
/// default grants.
pub fn default_catalog() -> Result<PrivilegeCatalog, DomainError> {
    let mut catalog = PrivilegeCatalog::new();

    for kind in RoleKind::ALL {
        catalog.insert_role(Role::seeded(kind));
    }
    for name in actions::ALL {
        catalog.register_privilege(name.clone());
    }
    for kind in RoleKind::ALL {
        for name in default_grants(kind) {
            catalog.grant(kind, name.as_str())?;
        }
    }

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PrivilegeStore;

    #[test]
    fn every_action_name_is_well_formed() {
        for name in actions::ALL {
            assert!(PrivilegeName::parse(name.as_str().to_string()).is_ok(), "{name}");
        }
    }

    #[test]
    fn admin_holds_everything_and_basic_user_is_read_mostly() {
        let catalog = default_catalog().unwrap();
        assert_eq!(catalog.privilege_count(), actions::ALL.len());

        let admin = catalog
            .find_active_role_privileges(RoleKind::Admin.role_id())
            .unwrap();
        assert_eq!(admin.len(), actions::ALL.len());

        let basic = catalog
            .find_active_role_privileges(RoleKind::BasicUser.role_id())
            .unwrap();
        assert!(
            basic
                .iter()
                .all(|rp| rp.privilege_name.action() == "read" || rp.privilege_name.as_str() == "company.create")
        );
    }

    #[test]
    fn only_admin_can_cancel_or_resolve() {
        for kind in [RoleKind::Buyer, RoleKind::Seller, RoleKind::BasicUser] {
            let grants = default_grants(kind);
            assert!(!grants.contains(&actions::CONTRACT_CANCEL));
            assert!(!grants.contains(&actions::DISPUTE_RESOLVE));
        }
    }
}
