use serde::{Deserialize, Serialize};

use escrowdesk_core::DomainError;

use crate::status::{AgreementMode, Party};

/// Snapshot of the lifecycle gate conditions of one contract.
///
/// Always derived from contract state, never stored independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractChecklist {
    pub buyer_agreed: bool,
    pub seller_agreed: bool,
    pub buyer_paid_escrow_amount: bool,
    pub execution_started: bool,
    pub execution_ended: bool,
    pub full_payment_released: bool,
    pub closed: bool,
}

impl ContractChecklist {
    pub fn has_agreed(&self, party: Party) -> bool {
        match party {
            Party::Buyer => self.buyer_agreed,
            Party::Seller => self.seller_agreed,
        }
    }

    /// Parties whose agreement is required under `mode`.
    pub fn required_agreements(mode: AgreementMode, creator: Party) -> &'static [Party] {
        match (mode, creator) {
            (AgreementMode::Bilateral, _) => &[Party::Buyer, Party::Seller],
            (AgreementMode::CounterpartyOnly, Party::Buyer) => &[Party::Seller],
            (AgreementMode::CounterpartyOnly, Party::Seller) => &[Party::Buyer],
        }
    }

    pub fn agreements_satisfied(&self, mode: AgreementMode, creator: Party) -> bool {
        Self::required_agreements(mode, creator)
            .iter()
            .all(|p| self.has_agreed(*p))
    }

    /// First unmet pre-execution gate, in evaluation order: required
    /// agreements, then buyer escrow.
    pub fn ensure_pre_execution(&self, mode: AgreementMode, creator: Party) -> Result<(), DomainError> {
        for party in Self::required_agreements(mode, creator) {
            if !self.has_agreed(*party) {
                return Err(DomainError::guard(
                    format!("{party}_agreed"),
                    format!("the {party} has not agreed to the contract"),
                ));
            }
        }
        if !self.buyer_paid_escrow_amount {
            return Err(DomainError::guard(
                "buyer_paid_escrow_amount",
                "the buyer has not funded escrow",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilateral_requires_both_parties_in_order() {
        let mut c = ContractChecklist::default();
        let err = c
            .ensure_pre_execution(AgreementMode::Bilateral, Party::Buyer)
            .unwrap_err();
        assert_eq!(err.guard_name(), Some("buyer_agreed"));

        c.buyer_agreed = true;
        let err = c
            .ensure_pre_execution(AgreementMode::Bilateral, Party::Buyer)
            .unwrap_err();
        assert_eq!(err.guard_name(), Some("seller_agreed"));

        c.seller_agreed = true;
        let err = c
            .ensure_pre_execution(AgreementMode::Bilateral, Party::Buyer)
            .unwrap_err();
        assert_eq!(err.guard_name(), Some("buyer_paid_escrow_amount"));

        c.buyer_paid_escrow_amount = true;
        assert!(c.ensure_pre_execution(AgreementMode::Bilateral, Party::Buyer).is_ok());
    }

    #[test]
    fn counterparty_only_skips_the_creator() {
        let c = ContractChecklist {
            seller_agreed: true,
            ..Default::default()
        };
        assert!(c.agreements_satisfied(AgreementMode::CounterpartyOnly, Party::Buyer));
        assert!(!c.agreements_satisfied(AgreementMode::CounterpartyOnly, Party::Seller));
        assert!(!c.agreements_satisfied(AgreementMode::Bilateral, Party::Buyer));
    }
}
