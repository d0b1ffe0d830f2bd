//! Tax and brokerage derivation.
//!
//! Amounts are integer minor units; each percentage is applied independently
//! to the base amount and rounded half-to-even to the minor unit.

use serde::{Deserialize, Serialize};

use escrowdesk_core::{BasisPoints, DomainError, Money, ValueObject};

pub const TAX_RATE: BasisPoints = BasisPoints::from_percent(5);
pub const BUYER_BROKERAGE_RATE: BasisPoints = BasisPoints::from_percent(2);
pub const SELLER_BROKERAGE_RATE: BasisPoints = BasisPoints::from_percent(2);

/// Derived amounts for a contract. Never set independently of `base_amount`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Financials {
    pub base_amount: Money,
    pub tax_amount: Money,
    pub buyer_brokerage_amount: Money,
    pub seller_brokerage_amount: Money,
}

impl ValueObject for Financials {}

impl Financials {
    /// What the buyer deposits into escrow under full payment:
    /// base + tax + buyer brokerage.
    pub fn buyer_escrow_due(&self) -> Result<Money, DomainError> {
        self.base_amount
            .checked_add(self.tax_amount)
            .and_then(|m| m.checked_add(self.buyer_brokerage_amount))
            .ok_or_else(|| DomainError::validation("escrow amount overflows"))
    }
}

pub fn compute_financials(base_amount: Money) -> Result<Financials, DomainError> {
    if base_amount.is_negative() {
        return Err(DomainError::validation("base contract amount cannot be negative"));
    }

    Ok(Financials {
        base_amount,
        tax_amount: base_amount.percent(TAX_RATE),
        buyer_brokerage_amount: base_amount.percent(BUYER_BROKERAGE_RATE),
        seller_brokerage_amount: base_amount.percent(SELLER_BROKERAGE_RATE),
    })
}
