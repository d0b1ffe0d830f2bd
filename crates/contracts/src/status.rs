//! Status and mode catalogs shared by contracts, milestones and transactions.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a contract or milestone.
///
/// `Created -> InProgress -> Closed`, with `Cancelled` reachable from either
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Created = 1,
    InProgress = 2,
    Closed = 3,
    Cancelled = 4,
}

impl StatusType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Created),
            2 => Some(Self::InProgress),
            3 => Some(Self::Closed),
            4 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusType::Created => "created",
            StatusType::InProgress => "in_progress",
            StatusType::Closed => "closed",
            StatusType::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StatusType::Closed | StatusType::Cancelled)
    }

    pub fn can_transition_to(self, next: StatusType) -> bool {
        use StatusType::*;
        matches!(
            (self, next),
            (Created, InProgress) | (Created, Cancelled) | (InProgress, Closed) | (InProgress, Cancelled)
        )
    }
}

impl core::fmt::Display for StatusType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a financial transaction.
///
/// `Created -> Queued -> PendingApproval -> Approved -> Successful`, with
/// `Rejected` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created = 1,
    Queued = 2,
    PendingApproval = 3,
    Approved = 4,
    Successful = 5,
    Rejected = 6,
}

impl TransactionStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Queued => "queued",
            TransactionStatus::PendingApproval => "pending_approval",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Successful => "successful",
            TransactionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Successful | TransactionStatus::Rejected)
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match next {
            Rejected => !self.is_terminal(),
            Queued => self == Created,
            PendingApproval => self == Queued,
            Approved => self == PendingApproval,
            Successful => self == Approved,
            Created => false,
        }
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// The whole escrow amount is deposited before execution and released once.
    FullPayment,
    /// Escrow is funded and released per milestone.
    PartPayment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementMode {
    /// Buyer and seller must both agree.
    #[default]
    Bilateral,
    /// Only the party that did not create the contract must agree.
    CounterpartyOnly,
}

/// One side of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Buyer,
    Seller,
}

impl Party {
    pub fn other(self) -> Party {
        match self {
            Party::Buyer => Party::Seller,
            Party::Seller => Party::Buyer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Party::Buyer => "buyer",
            Party::Seller => "seller",
        }
    }
}

impl core::fmt::Display for Party {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
