use serde::{Deserialize, Serialize};
use uuid::Uuid;

use escrowdesk_core::{Entity, RecordStatus, RoleId};

/// The closed catalog of roles.
///
/// Discriminants are the stable numeric codes used by the reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Admin = 1,
    Buyer = 2,
    Seller = 3,
    BasicUser = 4,
}

impl RoleKind {
    pub const ALL: [RoleKind; 4] = [
        RoleKind::Admin,
        RoleKind::Buyer,
        RoleKind::Seller,
        RoleKind::BasicUser,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::Admin => "admin",
            RoleKind::Buyer => "buyer",
            RoleKind::Seller => "seller",
            RoleKind::BasicUser => "basic_user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Fixed identifier of the seeded role row.
    pub fn role_id(self) -> RoleId {
        RoleId::from_uuid(Uuid::from_u128(0x0001_0000_0000_0000_0000_0000_0000_0000 | self.code() as u128))
    }

    /// Whether this role may originate contracts (one side of a trade).
    pub fn is_trading_party(self) -> bool {
        matches!(self, RoleKind::Buyer | RoleKind::Seller)
    }
}

impl core::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub kind: RoleKind,
    pub status: RecordStatus,
}

impl Role {
    pub fn seeded(kind: RoleKind) -> Self {
        Self {
            id: kind.role_id(),
            kind,
            status: RecordStatus::Active,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn record_status(&self) -> RecordStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_names_round_trip() {
        for kind in RoleKind::ALL {
            assert_eq!(RoleKind::from_code(kind.code()), Some(kind));
            assert_eq!(RoleKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RoleKind::parse("Seller"), Some(RoleKind::Seller));
        assert_eq!(RoleKind::parse("auditor"), None);
    }

    #[test]
    fn seeded_role_ids_are_stable_and_distinct() {
        assert_eq!(RoleKind::Buyer.role_id(), RoleKind::Buyer.role_id());
        assert_ne!(RoleKind::Buyer.role_id(), RoleKind::Seller.role_id());
    }
}
