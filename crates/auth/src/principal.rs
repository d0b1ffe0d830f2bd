use serde::{Deserialize, Serialize};

use escrowdesk_core::{CompanyId, UserId};

use crate::roles::RoleKind;

/// Identity a session is issued for.
///
/// Built by the caller from an active user record once credentials have been
/// checked elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub display_id: String,
    pub roles: Vec<RoleKind>,
    pub company_id: Option<CompanyId>,
}

impl Principal {
    pub fn new(user_id: UserId, display_id: impl Into<String>, roles: Vec<RoleKind>) -> Self {
        Self {
            user_id,
            display_id: display_id.into(),
            roles,
            company_id: None,
        }
    }

    pub fn with_company(mut self, company_id: CompanyId) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn has_role(&self, role: RoleKind) -> bool {
        self.roles.contains(&role)
    }
}
