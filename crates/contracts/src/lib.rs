//! Escrow contracts: parties, financials, lifecycle, milestones, disputes and
//! the transactions that move money for them.

pub mod checklist;
pub mod contract;
pub mod financials;
pub mod milestone;
pub mod parties;
pub mod status;
pub mod transaction;

pub use checklist::ContractChecklist;
pub use contract::{
    AddMilestone, AgreeToContract, ArbitratorAssigned, AssignArbitrator, CancelContract,
    CloseMilestone, Contract, ContractCancelled, ContractCommand, ContractCreated,
    ContractDetailsUpdated, ContractEvent, ContractMarker, ContractRejected, CreateContract,
    DepositEscrow, DisputeRaised, DisputeResolved, EscrowDeposited, FullPaymentReleased,
    MilestoneAdded, MilestoneCancelled, MilestoneClosed, MilestoneFunded, MilestoneStarted,
    PartyAgreed, RaiseDispute, RejectContract, ReleaseFullPayment, ResolveDispute,
    StartMilestone, UpdateContractDetails,
};
pub use financials::{
    BUYER_BROKERAGE_RATE, Financials, SELLER_BROKERAGE_RATE, TAX_RATE, compute_financials,
};
pub use milestone::{Dispute, Milestone};
pub use parties::{
    CompanyDirectory, ContractCreator, ContractParty, Counterparty, ResolvedParties,
    resolve_parties,
};
pub use status::{AgreementMode, Party, PaymentMode, StatusType, TransactionStatus};
pub use transaction::{
    CreateTransaction, Settlement, Transaction, TransactionCommand, TransactionCreated,
    TransactionEvent, TransactionKind, TransactionStatusChanged,
};
