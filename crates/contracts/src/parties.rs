//! Buyer/seller resolution at contract creation.
//!
//! The creator's side comes from their role; each side's company comes either
//! directly (a company id) or indirectly (the other party's user, looked up
//! through a [`CompanyDirectory`]).

use serde::{Deserialize, Serialize};

use escrowdesk_auth::RoleKind;
use escrowdesk_core::{CompanyId, DomainError, UserId};

use crate::status::Party;

/// One resolved side of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParty {
    pub company_id: CompanyId,
    /// The acting user for this side, when known.
    pub user_id: Option<UserId>,
}

/// Read-only company lookups needed to resolve contract parties.
pub trait CompanyDirectory: Send + Sync {
    /// The company a user acts for (contact person or explicit affiliation).
    fn company_of_user(&self, user_id: UserId) -> Option<CompanyId>;

    /// Whether the company exists and is active.
    fn company_is_active(&self, company_id: CompanyId) -> bool;
}

impl<D> CompanyDirectory for std::sync::Arc<D>
where
    D: CompanyDirectory + ?Sized,
{
    fn company_of_user(&self, user_id: UserId) -> Option<CompanyId> {
        (**self).company_of_user(user_id)
    }

    fn company_is_active(&self, company_id: CompanyId) -> bool {
        (**self).company_is_active(company_id)
    }
}

/// Who is creating the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCreator {
    pub user_id: UserId,
    /// Roles held by the creator (as resolved by the caller).
    pub roles: Vec<RoleKind>,
    /// Company from the session, if any.
    pub company_id: Option<CompanyId>,
    /// Needed only when the creator holds both buyer and seller roles.
    pub acting_as: Option<Party>,
}

/// How the other side of the contract is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Counterparty {
    Company(CompanyId),
    /// Resolve through the user's company.
    User(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedParties {
    pub creator_party: Party,
    pub buyer: ContractParty,
    pub seller: ContractParty,
}

pub fn resolve_parties<D>(
    directory: &D,
    creator: &ContractCreator,
    counterparty: Counterparty,
) -> Result<ResolvedParties, DomainError>
where
    D: CompanyDirectory + ?Sized,
{
    let creator_party = creator_side(creator)?;

    let creator_company = creator
        .company_id
        .or_else(|| directory.company_of_user(creator.user_id))
        .ok_or_else(|| {
            DomainError::guard("creator_company", "the creator is not affiliated with a company")
        })?;
    if !directory.company_is_active(creator_company) {
        return Err(DomainError::not_found(format!("company {creator_company}")));
    }

    let other = match counterparty {
        Counterparty::Company(company_id) => {
            if !directory.company_is_active(company_id) {
                return Err(DomainError::not_found(format!("company {company_id}")));
            }
            ContractParty {
                company_id,
                user_id: None,
            }
        }
        Counterparty::User(user_id) => {
            let company_id = directory.company_of_user(user_id).ok_or_else(|| {
                DomainError::guard(
                    "counterparty_company",
                    format!("user {user_id} is not affiliated with a company"),
                )
            })?;
            if !directory.company_is_active(company_id) {
                return Err(DomainError::not_found(format!("company {company_id}")));
            }
            ContractParty {
                company_id,
                user_id: Some(user_id),
            }
        }
    };

    if other.company_id == creator_company {
        return Err(DomainError::guard(
            "distinct_parties",
            "buyer and seller must be different companies",
        ));
    }

    let mine = ContractParty {
        company_id: creator_company,
        user_id: Some(creator.user_id),
    };
    let (buyer, seller) = match creator_party {
        Party::Buyer => (mine, other),
        Party::Seller => (other, mine),
    };

    Ok(ResolvedParties {
        creator_party,
        buyer,
        seller,
    })
}

fn creator_side(creator: &ContractCreator) -> Result<Party, DomainError> {
    let is_buyer = creator.roles.contains(&RoleKind::Buyer);
    let is_seller = creator.roles.contains(&RoleKind::Seller);

    match (is_buyer, is_seller, creator.acting_as) {
        (true, false, None | Some(Party::Buyer)) => Ok(Party::Buyer),
        (false, true, None | Some(Party::Seller)) => Ok(Party::Seller),
        (true, true, Some(side)) => Ok(side),
        (true, true, None) => Err(DomainError::validation(
            "creator holds both buyer and seller roles; specify which side they act for",
        )),
        _ => Err(DomainError::guard(
            "creator_role",
            "only buyers or sellers can create contracts",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;

    #[derive(Default)]
    struct Directory {
        users: HashMap<UserId, CompanyId>,
        active: HashSet<CompanyId>,
    }

    impl CompanyDirectory for Directory {
        fn company_of_user(&self, user_id: UserId) -> Option<CompanyId> {
            self.users.get(&user_id).copied()
        }

        fn company_is_active(&self, company_id: CompanyId) -> bool {
            self.active.contains(&company_id)
        }
    }

    fn setup() -> (Directory, UserId, CompanyId, UserId, CompanyId) {
        let mut dir = Directory::default();
        let (buyer, buyer_co) = (UserId::new(), CompanyId::new());
        let (seller, seller_co) = (UserId::new(), CompanyId::new());
        dir.users.insert(buyer, buyer_co);
        dir.users.insert(seller, seller_co);
        dir.active.insert(buyer_co);
        dir.active.insert(seller_co);
        (dir, buyer, buyer_co, seller, seller_co)
    }

    fn creator(user_id: UserId, roles: Vec<RoleKind>) -> ContractCreator {
        ContractCreator {
            user_id,
            roles,
            company_id: None,
            acting_as: None,
        }
    }

    #[test]
    fn buyer_creator_resolves_seller_through_other_party_user() {
        let (dir, buyer, buyer_co, seller, seller_co) = setup();
        let resolved =
            resolve_parties(&dir, &creator(buyer, vec![RoleKind::Buyer]), Counterparty::User(seller))
                .unwrap();

        assert_eq!(resolved.creator_party, Party::Buyer);
        assert_eq!(resolved.buyer.company_id, buyer_co);
        assert_eq!(resolved.seller.company_id, seller_co);
        assert_eq!(resolved.seller.user_id, Some(seller));
    }

    #[test]
    fn seller_creator_with_direct_company() {
        let (dir, buyer, buyer_co, seller, seller_co) = setup();
        let _ = buyer;
        let resolved = resolve_parties(
            &dir,
            &creator(seller, vec![RoleKind::Seller]),
            Counterparty::Company(buyer_co),
        )
        .unwrap();

        assert_eq!(resolved.creator_party, Party::Seller);
        assert_eq!(resolved.seller.company_id, seller_co);
        assert_eq!(resolved.buyer.user_id, None);
    }

    #[test]
    fn non_trading_roles_cannot_create() {
        let (dir, buyer, _, seller, _) = setup();
        let err = resolve_parties(
            &dir,
            &creator(buyer, vec![RoleKind::BasicUser, RoleKind::Admin]),
            Counterparty::User(seller),
        )
        .unwrap_err();
        assert_eq!(err.guard_name(), Some("creator_role"));
    }

    #[test]
    fn unresolvable_counterparty_is_a_guard_violation() {
        let (dir, buyer, _, _, _) = setup();
        let err = resolve_parties(
            &dir,
            &creator(buyer, vec![RoleKind::Buyer]),
            Counterparty::User(UserId::new()),
        )
        .unwrap_err();
        assert_eq!(err.guard_name(), Some("counterparty_company"));
    }

    #[test]
    fn same_company_on_both_sides_is_rejected() {
        let (dir, buyer, buyer_co, _, _) = setup();
        let err = resolve_parties(
            &dir,
            &creator(buyer, vec![RoleKind::Buyer]),
            Counterparty::Company(buyer_co),
        )
        .unwrap_err();
        assert_eq!(err.guard_name(), Some("distinct_parties"));
    }

    #[test]
    fn dual_role_creator_must_pick_a_side() {
        let (dir, buyer, _, seller, _) = setup();
        let mut c = creator(buyer, vec![RoleKind::Buyer, RoleKind::Seller]);
        assert!(matches!(
            resolve_parties(&dir, &c, Counterparty::User(seller)),
            Err(DomainError::Validation(_))
        ));

        c.acting_as = Some(Party::Seller);
        let resolved = resolve_parties(&dir, &c, Counterparty::User(seller)).unwrap();
        assert_eq!(resolved.creator_party, Party::Seller);
    }
}
