use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use escrowdesk_core::{DomainError, Entity, PrivilegeId, RecordStatus, RoleId, UserId};

/// Privilege (capability) name in dotted `resource.action` form, e.g.
/// `contract.create`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivilegeName(Cow<'static, str>);

impl PrivilegeName {
    /// Compile-time constant names (catalog entries).
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Parse a runtime name, enforcing the `resource.action` shape.
    pub fn parse(name: impl Into<Cow<'static, str>>) -> Result<Self, DomainError> {
        let name = name.into();
        let mut parts = name.split('.');
        let well_formed = parts.clone().count() >= 2
            && parts.all(|p| {
                !p.is_empty()
                    && p.chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            });
        if !well_formed {
            return Err(DomainError::validation(format!(
                "privilege name '{name}' must look like 'resource.action'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `resource` part (everything before the last dot).
    pub fn resource(&self) -> &str {
        self.0.rsplit_once('.').map(|(r, _)| r).unwrap_or(&self.0)
    }

    /// The `action` part (after the last dot).
    pub fn action(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, a)| a).unwrap_or(&self.0)
    }
}

impl core::fmt::Display for PrivilegeName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Privilege reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub id: PrivilegeId,
    pub name: PrivilegeName,
    pub status: RecordStatus,
}

impl Entity for Privilege {
    type Id = PrivilegeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn record_status(&self) -> RecordStatus {
        self.status
    }
}

/// Role ↔ privilege link. Revocation flips `status`; the row is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePrivilege {
    pub role_id: RoleId,
    pub privilege_id: PrivilegeId,
    /// Denormalized for audit output.
    pub privilege_name: PrivilegeName,
    pub status: RecordStatus,
}

/// User ↔ role link. Revocation flips `status`; the row is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub status: RecordStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_dotted_names() {
        let name = PrivilegeName::parse("contract.deposit_escrow").unwrap();
        assert_eq!(name.resource(), "contract");
        assert_eq!(name.action(), "deposit_escrow");
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for bad in ["", "contract", "contract.", ".create", "Contract.Create", "a..b"] {
            assert!(PrivilegeName::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
