//! Contract aggregate: agreement, escrow, execution and closure.
//!
//! Every transition is decided in `handle` against current state; a command
//! that fails a guard emits nothing. Commands whose effect is already in place
//! (a repeated agreement, a second deposit) emit no events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_core::{
    Aggregate, AggregateRoot, ContractId, DisputeId, DomainError, Money, TransactionId, UserId,
};
use escrowdesk_events::{Event, StatusTransition};

use crate::checklist::ContractChecklist;
use crate::financials::{Financials, compute_financials};
use crate::milestone::{Dispute, Milestone};
use crate::parties::ContractParty;
use crate::status::{AgreementMode, Party, PaymentMode, StatusType, TransactionStatus};
use crate::transaction::{Settlement, TransactionKind};

/// Aggregate root: Contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    id: ContractId,
    name: String,
    created_by: Option<UserId>,
    creator_party: Party,
    buyer: Option<ContractParty>,
    seller: Option<ContractParty>,
    payment_mode: PaymentMode,
    agreement_mode: AgreementMode,
    financials: Financials,
    planned_start: Option<DateTime<Utc>>,
    planned_end: Option<DateTime<Utc>>,
    execution_actual_start: Option<DateTime<Utc>>,
    execution_actual_end: Option<DateTime<Utc>>,
    buyer_agreed_at: Option<DateTime<Utc>>,
    seller_agreed_at: Option<DateTime<Utc>>,
    has_buyer_deposited_amount: bool,
    has_seller_deposited_amount: bool,
    full_payment_released: bool,
    details_frozen: bool,
    status: StatusType,
    cancellation_reason: Option<String>,
    arbitrator: Option<UserId>,
    milestones: Vec<Milestone>,
    disputes: Vec<Dispute>,
    version: u64,
    created: bool,
}

impl Contract {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ContractId) -> Self {
        Self {
            id,
            name: String::new(),
            created_by: None,
            creator_party: Party::Buyer,
            buyer: None,
            seller: None,
            payment_mode: PaymentMode::FullPayment,
            agreement_mode: AgreementMode::Bilateral,
            financials: Financials::default(),
            planned_start: None,
            planned_end: None,
            execution_actual_start: None,
            execution_actual_end: None,
            buyer_agreed_at: None,
            seller_agreed_at: None,
            has_buyer_deposited_amount: false,
            has_seller_deposited_amount: false,
            full_payment_released: false,
            details_frozen: false,
            status: StatusType::Created,
            cancellation_reason: None,
            arbitrator: None,
            milestones: Vec::new(),
            disputes: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn creator_party(&self) -> Party {
        self.creator_party
    }

    pub fn buyer(&self) -> Option<ContractParty> {
        self.buyer
    }

    pub fn seller(&self) -> Option<ContractParty> {
        self.seller
    }

    pub fn party(&self, party: Party) -> Option<ContractParty> {
        match party {
            Party::Buyer => self.buyer,
            Party::Seller => self.seller,
        }
    }

    pub fn payment_mode(&self) -> PaymentMode {
        self.payment_mode
    }

    pub fn agreement_mode(&self) -> AgreementMode {
        self.agreement_mode
    }

    pub fn financials(&self) -> &Financials {
        &self.financials
    }

    pub fn planned_start(&self) -> Option<DateTime<Utc>> {
        self.planned_start
    }

    pub fn planned_end(&self) -> Option<DateTime<Utc>> {
        self.planned_end
    }

    pub fn execution_actual_start(&self) -> Option<DateTime<Utc>> {
        self.execution_actual_start
    }

    pub fn execution_actual_end(&self) -> Option<DateTime<Utc>> {
        self.execution_actual_end
    }

    pub fn agreed_at(&self, party: Party) -> Option<DateTime<Utc>> {
        match party {
            Party::Buyer => self.buyer_agreed_at,
            Party::Seller => self.seller_agreed_at,
        }
    }

    pub fn has_buyer_deposited_amount(&self) -> bool {
        self.has_buyer_deposited_amount
    }

    pub fn has_seller_deposited_amount(&self) -> bool {
        self.has_seller_deposited_amount
    }

    pub fn details_frozen(&self) -> bool {
        self.details_frozen
    }

    pub fn status(&self) -> StatusType {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StatusType::Cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.status == StatusType::Closed
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn arbitrator(&self) -> Option<UserId> {
        self.arbitrator
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn disputes(&self) -> &[Dispute] {
        &self.disputes
    }

    pub fn checklist(&self) -> ContractChecklist {
        let buyer_paid_escrow_amount = match self.payment_mode {
            PaymentMode::FullPayment => self.has_buyer_deposited_amount,
            PaymentMode::PartPayment => self.milestones.first().is_some_and(|m| m.funded),
        };
        ContractChecklist {
            buyer_agreed: self.buyer_agreed_at.is_some(),
            seller_agreed: self.seller_agreed_at.is_some(),
            buyer_paid_escrow_amount,
            execution_started: self.execution_actual_start.is_some(),
            execution_ended: self.execution_actual_end.is_some(),
            full_payment_released: self.full_payment_released,
            closed: self.is_closed(),
        }
    }

    /// Sum of all milestone amounts, `None` on overflow.
    pub fn milestone_total(&self) -> Option<Money> {
        self.milestones
            .iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m.amount))
    }

    fn execution_complete(&self) -> bool {
        match self.payment_mode {
            PaymentMode::FullPayment => self.full_payment_released,
            PaymentMode::PartPayment => {
                !self.milestones.is_empty() && self.milestones.iter().all(Milestone::is_closed)
            }
        }
    }
}

impl AggregateRoot for Contract {
    type Id = ContractId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// Commands

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContract {
    pub contract_id: ContractId,
    pub name: String,
    pub created_by: UserId,
    pub creator_party: Party,
    pub buyer: ContractParty,
    pub seller: ContractParty,
    pub base_amount: Money,
    pub payment_mode: PaymentMode,
    pub agreement_mode: AgreementMode,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreeToContract {
    pub party: Party,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectContract {
    pub party: Party,
    pub user_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEscrow {
    pub party: Party,
    /// Required for part-payment buyer deposits; must be absent otherwise.
    pub milestone_index: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateContractDetails {
    pub name: Option<String>,
    pub base_amount: Option<Money>,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMilestone {
    pub name: String,
    pub amount: Money,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMilestone {
    pub index: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseMilestone {
    pub index: u32,
    /// The release transaction as loaded by the caller.
    pub settlement: Settlement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFullPayment {
    pub settlement: Settlement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelContract {
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseDispute {
    pub dispute_id: DisputeId,
    pub raised_by: UserId,
    pub milestone_index: Option<u32>,
    pub reason: String,
    pub is_blocking: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignArbitrator {
    pub dispute_id: DisputeId,
    pub arbitrator: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveDispute {
    pub dispute_id: DisputeId,
    pub resolved_by: UserId,
    pub resolution: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCommand {
    Create(CreateContract),
    Agree(AgreeToContract),
    Reject(RejectContract),
    DepositEscrow(DepositEscrow),
    UpdateDetails(UpdateContractDetails),
    FreezeDetails { occurred_at: DateTime<Utc> },
    StartExecution { occurred_at: DateTime<Utc> },
    AddMilestone(AddMilestone),
    StartMilestone(StartMilestone),
    CloseMilestone(CloseMilestone),
    ReleaseFullPayment(ReleaseFullPayment),
    Close { occurred_at: DateTime<Utc> },
    Cancel(CancelContract),
    RaiseDispute(RaiseDispute),
    AssignArbitrator(AssignArbitrator),
    ResolveDispute(ResolveDispute),
}

// Events

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCreated {
    pub contract_id: ContractId,
    pub name: String,
    pub created_by: UserId,
    pub creator_party: Party,
    pub buyer: ContractParty,
    pub seller: ContractParty,
    pub payment_mode: PaymentMode,
    pub agreement_mode: AgreementMode,
    pub financials: Financials,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAgreed {
    pub contract_id: ContractId,
    pub party: Party,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRejected {
    pub contract_id: ContractId,
    pub party: Party,
    pub user_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDeposited {
    pub contract_id: ContractId,
    pub party: Party,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneFunded {
    pub contract_id: ContractId,
    pub index: u32,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDetailsUpdated {
    pub contract_id: ContractId,
    pub name: String,
    pub financials: Financials,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMarker {
    pub contract_id: ContractId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneAdded {
    pub contract_id: ContractId,
    pub index: u32,
    pub name: String,
    pub amount: Money,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneStarted {
    pub contract_id: ContractId,
    pub index: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneClosed {
    pub contract_id: ContractId,
    pub index: u32,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// A milestone swept to `cancelled` along with its contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneCancelled {
    pub contract_id: ContractId,
    pub index: u32,
    pub from: StatusType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullPaymentReleased {
    pub contract_id: ContractId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCancelled {
    pub contract_id: ContractId,
    pub from: StatusType,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRaised {
    pub contract_id: ContractId,
    pub dispute_id: DisputeId,
    pub raised_by: UserId,
    pub milestone_index: Option<u32>,
    pub reason: String,
    pub is_blocking: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitratorAssigned {
    pub contract_id: ContractId,
    pub dispute_id: DisputeId,
    pub arbitrator: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolved {
    pub contract_id: ContractId,
    pub dispute_id: DisputeId,
    pub resolved_by: UserId,
    pub resolution: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    Created(ContractCreated),
    PartyAgreed(PartyAgreed),
    Rejected(ContractRejected),
    EscrowDeposited(EscrowDeposited),
    MilestoneFunded(MilestoneFunded),
    DetailsUpdated(ContractDetailsUpdated),
    DetailsFrozen(ContractMarker),
    ExecutionStarted(ContractMarker),
    MilestoneAdded(MilestoneAdded),
    MilestoneStarted(MilestoneStarted),
    MilestoneClosed(MilestoneClosed),
    MilestoneCancelled(MilestoneCancelled),
    FullPaymentReleased(FullPaymentReleased),
    Closed(ContractMarker),
    Cancelled(ContractCancelled),
    DisputeRaised(DisputeRaised),
    ArbitratorAssigned(ArbitratorAssigned),
    DisputeResolved(DisputeResolved),
}

impl ContractEvent {
    pub fn contract_id(&self) -> ContractId {
        match self {
            ContractEvent::Created(e) => e.contract_id,
            ContractEvent::PartyAgreed(e) => e.contract_id,
            ContractEvent::Rejected(e) => e.contract_id,
            ContractEvent::EscrowDeposited(e) => e.contract_id,
            ContractEvent::MilestoneFunded(e) => e.contract_id,
            ContractEvent::DetailsUpdated(e) => e.contract_id,
            ContractEvent::DetailsFrozen(e) => e.contract_id,
            ContractEvent::ExecutionStarted(e) => e.contract_id,
            ContractEvent::MilestoneAdded(e) => e.contract_id,
            ContractEvent::MilestoneStarted(e) => e.contract_id,
            ContractEvent::MilestoneClosed(e) => e.contract_id,
            ContractEvent::MilestoneCancelled(e) => e.contract_id,
            ContractEvent::FullPaymentReleased(e) => e.contract_id,
            ContractEvent::Closed(e) => e.contract_id,
            ContractEvent::Cancelled(e) => e.contract_id,
            ContractEvent::DisputeRaised(e) => e.contract_id,
            ContractEvent::ArbitratorAssigned(e) => e.contract_id,
            ContractEvent::DisputeResolved(e) => e.contract_id,
        }
    }
}

impl Event for ContractEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContractEvent::Created(_) => "contract.created",
            ContractEvent::PartyAgreed(_) => "contract.party_agreed",
            ContractEvent::Rejected(_) => "contract.rejected",
            ContractEvent::EscrowDeposited(_) => "contract.escrow_deposited",
            ContractEvent::MilestoneFunded(_) => "contract.milestone_funded",
            ContractEvent::DetailsUpdated(_) => "contract.details_updated",
            ContractEvent::DetailsFrozen(_) => "contract.details_frozen",
            ContractEvent::ExecutionStarted(_) => "contract.execution_started",
            ContractEvent::MilestoneAdded(_) => "contract.milestone_added",
            ContractEvent::MilestoneStarted(_) => "contract.milestone_started",
            ContractEvent::MilestoneClosed(_) => "contract.milestone_closed",
            ContractEvent::MilestoneCancelled(_) => "contract.milestone_cancelled",
            ContractEvent::FullPaymentReleased(_) => "contract.full_payment_released",
            ContractEvent::Closed(_) => "contract.closed",
            ContractEvent::Cancelled(_) => "contract.cancelled",
            ContractEvent::DisputeRaised(_) => "contract.dispute_raised",
            ContractEvent::ArbitratorAssigned(_) => "contract.arbitrator_assigned",
            ContractEvent::DisputeResolved(_) => "contract.dispute_resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContractEvent::Created(e) => e.occurred_at,
            ContractEvent::PartyAgreed(e) => e.occurred_at,
            ContractEvent::Rejected(e) => e.occurred_at,
            ContractEvent::EscrowDeposited(e) => e.occurred_at,
            ContractEvent::MilestoneFunded(e) => e.occurred_at,
            ContractEvent::DetailsUpdated(e) => e.occurred_at,
            ContractEvent::DetailsFrozen(e) => e.occurred_at,
            ContractEvent::ExecutionStarted(e) => e.occurred_at,
            ContractEvent::MilestoneAdded(e) => e.occurred_at,
            ContractEvent::MilestoneStarted(e) => e.occurred_at,
            ContractEvent::MilestoneClosed(e) => e.occurred_at,
            ContractEvent::MilestoneCancelled(e) => e.occurred_at,
            ContractEvent::FullPaymentReleased(e) => e.occurred_at,
            ContractEvent::Closed(e) => e.occurred_at,
            ContractEvent::Cancelled(e) => e.occurred_at,
            ContractEvent::DisputeRaised(e) => e.occurred_at,
            ContractEvent::ArbitratorAssigned(e) => e.occurred_at,
            ContractEvent::DisputeResolved(e) => e.occurred_at,
        }
    }

    fn status_transition(&self) -> Option<StatusTransition> {
        let contract = |from: StatusType, to: StatusType| StatusTransition::new(from.as_str(), to.as_str());
        let milestone = |index: u32, from: StatusType, to: StatusType| {
            contract(from, to).with_subject(format!("milestone:{index}"))
        };
        match self {
            ContractEvent::Rejected(_) => Some(contract(StatusType::Created, StatusType::Cancelled)),
            ContractEvent::ExecutionStarted(_) => Some(contract(StatusType::Created, StatusType::InProgress)),
            ContractEvent::Closed(_) => Some(contract(StatusType::InProgress, StatusType::Closed)),
            ContractEvent::Cancelled(e) => Some(contract(e.from, StatusType::Cancelled)),
            ContractEvent::MilestoneStarted(e) => {
                Some(milestone(e.index, StatusType::Created, StatusType::InProgress))
            }
            ContractEvent::MilestoneClosed(e) => {
                Some(milestone(e.index, StatusType::InProgress, StatusType::Closed))
            }
            ContractEvent::MilestoneCancelled(e) => Some(milestone(e.index, e.from, StatusType::Cancelled)),
            _ => None,
        }
    }
}

impl Aggregate for Contract {
    type Command = ContractCommand;
    type Event = ContractEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ContractEvent::Created(e) => {
                self.id = e.contract_id;
                self.name = e.name.clone();
                self.created_by = Some(e.created_by);
                self.creator_party = e.creator_party;
                self.buyer = Some(e.buyer);
                self.seller = Some(e.seller);
                self.payment_mode = e.payment_mode;
                self.agreement_mode = e.agreement_mode;
                self.financials = e.financials;
                self.planned_start = Some(e.planned_start);
                self.planned_end = Some(e.planned_end);
                self.status = StatusType::Created;
                self.created = true;
            }
            ContractEvent::PartyAgreed(e) => match e.party {
                Party::Buyer => self.buyer_agreed_at = Some(e.occurred_at),
                Party::Seller => self.seller_agreed_at = Some(e.occurred_at),
            },
            ContractEvent::Rejected(_) => self.status = StatusType::Cancelled,
            ContractEvent::EscrowDeposited(e) => match e.party {
                Party::Buyer => self.has_buyer_deposited_amount = true,
                Party::Seller => self.has_seller_deposited_amount = true,
            },
            ContractEvent::MilestoneFunded(e) => {
                if let Some(m) = self.milestone_mut(e.index) {
                    m.funded = true;
                }
                self.has_buyer_deposited_amount = true;
            }
            ContractEvent::DetailsUpdated(e) => {
                self.name = e.name.clone();
                self.financials = e.financials;
                self.planned_start = Some(e.planned_start);
                self.planned_end = Some(e.planned_end);
            }
            ContractEvent::DetailsFrozen(_) => self.details_frozen = true,
            ContractEvent::ExecutionStarted(e) => {
                self.status = StatusType::InProgress;
                self.execution_actual_start = Some(e.occurred_at);
                self.details_frozen = true;
            }
            ContractEvent::MilestoneAdded(e) => self.milestones.push(Milestone {
                index: e.index,
                name: e.name.clone(),
                amount: e.amount,
                planned_start: e.planned_start,
                planned_end: e.planned_end,
                actual_start: None,
                actual_end: None,
                status: StatusType::Created,
                funded: false,
                transaction_id: None,
            }),
            ContractEvent::MilestoneStarted(e) => {
                if let Some(m) = self.milestone_mut(e.index) {
                    m.status = StatusType::InProgress;
                    m.actual_start = Some(e.occurred_at);
                }
            }
            ContractEvent::MilestoneClosed(e) => {
                if let Some(m) = self.milestone_mut(e.index) {
                    m.status = StatusType::Closed;
                    m.actual_end = Some(e.occurred_at);
                    m.transaction_id = Some(e.transaction_id);
                }
                if self.milestones.iter().all(Milestone::is_closed) {
                    self.execution_actual_end = Some(e.occurred_at);
                }
            }
            ContractEvent::MilestoneCancelled(e) => {
                if let Some(m) = self.milestone_mut(e.index) {
                    m.status = StatusType::Cancelled;
                }
            }
            ContractEvent::FullPaymentReleased(e) => {
                self.full_payment_released = true;
                self.execution_actual_end = Some(e.occurred_at);
            }
            ContractEvent::Closed(_) => self.status = StatusType::Closed,
            ContractEvent::Cancelled(e) => {
                self.status = StatusType::Cancelled;
                self.cancellation_reason = Some(e.reason.clone());
                for m in self.milestones.iter_mut().filter(|m| !m.status.is_terminal()) {
                    m.status = StatusType::Cancelled;
                }
            }
            ContractEvent::DisputeRaised(e) => self.disputes.push(Dispute {
                id: e.dispute_id,
                raised_by: e.raised_by,
                milestone_index: e.milestone_index,
                reason: e.reason.clone(),
                is_blocking: e.is_blocking,
                is_resolved: false,
                arbitrator: None,
                resolution: None,
                raised_at: e.occurred_at,
            }),
            ContractEvent::ArbitratorAssigned(e) => {
                if let Some(d) = self.disputes.iter_mut().find(|d| d.id == e.dispute_id) {
                    d.arbitrator = Some(e.arbitrator);
                }
                self.arbitrator.get_or_insert(e.arbitrator);
            }
            ContractEvent::DisputeResolved(e) => {
                if let Some(d) = self.disputes.iter_mut().find(|d| d.id == e.dispute_id) {
                    d.is_resolved = true;
                    d.resolution = Some(e.resolution.clone());
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ContractCommand::Create(cmd) => self.handle_create(cmd),
            ContractCommand::Agree(cmd) => self.handle_agree(cmd),
            ContractCommand::Reject(cmd) => self.handle_reject(cmd),
            ContractCommand::DepositEscrow(cmd) => self.handle_deposit(cmd),
            ContractCommand::UpdateDetails(cmd) => self.handle_update_details(cmd),
            ContractCommand::FreezeDetails { occurred_at } => self.handle_freeze(*occurred_at),
            ContractCommand::StartExecution { occurred_at } => self.handle_start(*occurred_at),
            ContractCommand::AddMilestone(cmd) => self.handle_add_milestone(cmd),
            ContractCommand::StartMilestone(cmd) => self.handle_start_milestone(cmd),
            ContractCommand::CloseMilestone(cmd) => self.handle_close_milestone(cmd),
            ContractCommand::ReleaseFullPayment(cmd) => self.handle_release_full_payment(cmd),
            ContractCommand::Close { occurred_at } => self.handle_close(*occurred_at),
            ContractCommand::Cancel(cmd) => self.handle_cancel(cmd),
            ContractCommand::RaiseDispute(cmd) => self.handle_raise_dispute(cmd),
            ContractCommand::AssignArbitrator(cmd) => self.handle_assign_arbitrator(cmd),
            ContractCommand::ResolveDispute(cmd) => self.handle_resolve_dispute(cmd),
        }
    }
}

impl Contract {
    fn milestone_mut(&mut self, index: u32) -> Option<&mut Milestone> {
        self.milestones.iter_mut().find(|m| m.index == index)
    }

    fn milestone(&self, index: u32) -> Result<&Milestone, DomainError> {
        self.milestones
            .iter()
            .find(|m| m.index == index)
            .ok_or_else(|| DomainError::not_found(format!("milestone {index} of contract {}", self.id)))
    }

    fn dispute(&self, id: DisputeId) -> Result<&Dispute, DomainError> {
        self.disputes
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| DomainError::not_found(format!("dispute {id}")))
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("contract {}", self.id)));
        }
        Ok(())
    }

    fn ensure_not_cancelled(&self) -> Result<(), DomainError> {
        if self.is_cancelled() {
            return Err(DomainError::guard("contract_not_cancelled", "contract is cancelled"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: StatusType) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::guard(
                format!("contract_{}", expected.as_str()),
                format!("contract is {} (expected {expected})", self.status),
            ));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::guard(
                "contract_open",
                format!("contract is {}", self.status),
            ));
        }
        Ok(())
    }

    /// Name, amounts and dates may change only while Created and unfrozen.
    fn ensure_details_editable(&self) -> Result<(), DomainError> {
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::Created)?;
        if self.details_frozen {
            return Err(DomainError::guard("details_not_frozen", "contract details are frozen"));
        }
        Ok(())
    }

    fn ensure_no_blocking_dispute(&self, milestone: Option<u32>) -> Result<(), DomainError> {
        if let Some(d) = self.disputes.iter().find(|d| d.blocks(milestone)) {
            return Err(DomainError::guard(
                "no_blocking_dispute",
                format!("dispute {} is unresolved and blocking", d.id),
            ));
        }
        Ok(())
    }

    fn ensure_agreed(&self, party: Party) -> Result<(), DomainError> {
        if self.agreed_at(party).is_none() {
            return Err(DomainError::guard(
                format!("{party}_agreed"),
                format!("the {party} has not agreed to the contract"),
            ));
        }
        Ok(())
    }

    /// `settlement` must be a successful release of exactly `amount` for this
    /// contract (and `milestone`, when given).
    fn ensure_settles(
        &self,
        settlement: &Settlement,
        kind: TransactionKind,
        milestone: Option<u32>,
        amount: Money,
    ) -> Result<(), DomainError> {
        let id = settlement.transaction_id;
        if settlement.contract_id != self.id {
            return Err(DomainError::guard(
                "transaction_contract",
                format!("transaction {id} belongs to another contract"),
            ));
        }
        if settlement.kind != kind {
            return Err(DomainError::guard(
                "transaction_kind",
                format!(
                    "transaction {id} is a {}, expected {}",
                    settlement.kind.as_str(),
                    kind.as_str()
                ),
            ));
        }
        if settlement.milestone_index != milestone {
            let describe =
                |m: Option<u32>| m.map_or("the whole contract".to_string(), |i| format!("milestone {i}"));
            return Err(DomainError::guard(
                "transaction_milestone",
                format!(
                    "transaction {id} settles {}, not {}",
                    describe(settlement.milestone_index),
                    describe(milestone)
                ),
            ));
        }
        if settlement.amount != amount {
            return Err(DomainError::guard(
                "transaction_amount",
                format!("transaction {id} moves {}, expected {amount}", settlement.amount),
            ));
        }
        if settlement.status != TransactionStatus::Successful {
            return Err(DomainError::guard(
                "transaction_successful",
                format!("transaction {id} is {}", settlement.status),
            ));
        }
        Ok(())
    }

    fn cancel_open_milestones(&self, occurred_at: DateTime<Utc>) -> Vec<ContractEvent> {
        self.milestones
            .iter()
            .filter(|m| !m.status.is_terminal())
            .map(|m| {
                ContractEvent::MilestoneCancelled(MilestoneCancelled {
                    contract_id: self.id,
                    index: m.index,
                    from: m.status,
                    occurred_at,
                })
            })
            .collect()
    }

    fn ensure_milestones_defined(&self) -> Result<(), DomainError> {
        if self.payment_mode == PaymentMode::PartPayment && self.milestones.is_empty() {
            return Err(DomainError::guard(
                "milestones_defined",
                "part-payment contracts need at least one milestone",
            ));
        }
        Ok(())
    }

    fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), DomainError> {
        if end < start {
            return Err(DomainError::validation("planned end date precedes start date"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateContract) -> Result<Vec<ContractEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("contract already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if !cmd.base_amount.is_positive() {
            return Err(DomainError::validation("base contract amount must be positive"));
        }
        if cmd.buyer.company_id == cmd.seller.company_id {
            return Err(DomainError::guard(
                "distinct_parties",
                "buyer and seller must be different companies",
            ));
        }
        Self::validate_window(cmd.planned_start, cmd.planned_end)?;

        Ok(vec![ContractEvent::Created(ContractCreated {
            contract_id: cmd.contract_id,
            name: cmd.name.trim().to_string(),
            created_by: cmd.created_by,
            creator_party: cmd.creator_party,
            buyer: cmd.buyer,
            seller: cmd.seller,
            payment_mode: cmd.payment_mode,
            agreement_mode: cmd.agreement_mode,
            financials: compute_financials(cmd.base_amount)?,
            planned_start: cmd.planned_start,
            planned_end: cmd.planned_end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_agree(&self, cmd: &AgreeToContract) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::Created)?;

        if self.agreed_at(cmd.party).is_some() {
            return Ok(vec![]);
        }

        Ok(vec![ContractEvent::PartyAgreed(PartyAgreed {
            contract_id: self.id,
            party: cmd.party,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectContract) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.is_cancelled() {
            return Ok(vec![]);
        }
        self.ensure_details_editable()?;

        let mut events = self.cancel_open_milestones(cmd.occurred_at);
        events.push(ContractEvent::Rejected(ContractRejected {
            contract_id: self.id,
            party: cmd.party,
            user_id: cmd.user_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_deposit(&self, cmd: &DepositEscrow) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_open()?;
        self.ensure_agreed(cmd.party)?;

        match (cmd.party, self.payment_mode, cmd.milestone_index) {
            (Party::Seller, _, Some(_)) | (Party::Buyer, PaymentMode::FullPayment, Some(_)) => {
                Err(DomainError::validation(
                    "milestone index only applies to buyer deposits on part-payment contracts",
                ))
            }
            (Party::Buyer, PaymentMode::PartPayment, None) => Err(DomainError::validation(
                "part-payment deposits must name a milestone",
            )),
            (Party::Buyer, PaymentMode::PartPayment, Some(index)) => {
                let milestone = self.milestone(index)?;
                if milestone.funded {
                    return Ok(vec![]);
                }
                Ok(vec![ContractEvent::MilestoneFunded(MilestoneFunded {
                    contract_id: self.id,
                    index,
                    amount: milestone.amount,
                    occurred_at: cmd.occurred_at,
                })])
            }
            (Party::Buyer, PaymentMode::FullPayment, None) => {
                if self.has_buyer_deposited_amount {
                    return Ok(vec![]);
                }
                Ok(vec![ContractEvent::EscrowDeposited(EscrowDeposited {
                    contract_id: self.id,
                    party: Party::Buyer,
                    amount: self.financials.buyer_escrow_due()?,
                    occurred_at: cmd.occurred_at,
                })])
            }
            (Party::Seller, _, None) => {
                if self.has_seller_deposited_amount {
                    return Ok(vec![]);
                }
                Ok(vec![ContractEvent::EscrowDeposited(EscrowDeposited {
                    contract_id: self.id,
                    party: Party::Seller,
                    amount: self.financials.seller_brokerage_amount,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }

    fn handle_update_details(
        &self,
        cmd: &UpdateContractDetails,
    ) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_details_editable()?;

        let name = cmd.name.as_deref().unwrap_or(&self.name).trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let base = cmd.base_amount.unwrap_or(self.financials.base_amount);
        if !base.is_positive() {
            return Err(DomainError::validation("base contract amount must be positive"));
        }
        let total = self
            .milestone_total()
            .ok_or_else(|| DomainError::validation("milestone total overflows"))?;
        if total > base {
            return Err(DomainError::guard(
                "milestone_total",
                "milestone amounts would exceed the base contract amount",
            ));
        }

        let (Some(current_start), Some(current_end)) = (self.planned_start, self.planned_end) else {
            return Err(DomainError::not_found(format!("contract {}", self.id)));
        };
        let planned_start = cmd.planned_start.unwrap_or(current_start);
        let planned_end = cmd.planned_end.unwrap_or(current_end);
        Self::validate_window(planned_start, planned_end)?;

        let financials = compute_financials(base)?;
        if name == self.name
            && financials == self.financials
            && planned_start == current_start
            && planned_end == current_end
        {
            return Ok(vec![]);
        }

        Ok(vec![ContractEvent::DetailsUpdated(ContractDetailsUpdated {
            contract_id: self.id,
            name,
            financials,
            planned_start,
            planned_end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_freeze(&self, occurred_at: DateTime<Utc>) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.details_frozen {
            return Ok(vec![]);
        }
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::Created)?;
        self.ensure_milestones_defined()?;
        self.checklist()
            .ensure_pre_execution(self.agreement_mode, self.creator_party)?;

        Ok(vec![ContractEvent::DetailsFrozen(ContractMarker {
            contract_id: self.id,
            occurred_at,
        })])
    }

    fn handle_start(&self, occurred_at: DateTime<Utc>) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.status == StatusType::InProgress {
            return Ok(vec![]);
        }
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::Created)?;
        self.ensure_milestones_defined()?;
        self.checklist()
            .ensure_pre_execution(self.agreement_mode, self.creator_party)?;

        Ok(vec![ContractEvent::ExecutionStarted(ContractMarker {
            contract_id: self.id,
            occurred_at,
        })])
    }

    fn handle_add_milestone(&self, cmd: &AddMilestone) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_details_editable()?;

        if self.payment_mode != PaymentMode::PartPayment {
            return Err(DomainError::guard(
                "part_payment",
                "milestones apply only to part-payment contracts",
            ));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("milestone name cannot be empty"));
        }
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation("milestone amount must be positive"));
        }
        Self::validate_window(cmd.planned_start, cmd.planned_end)?;

        let total = self
            .milestone_total()
            .and_then(|total| total.checked_add(cmd.amount))
            .ok_or_else(|| DomainError::validation("milestone total overflows"))?;
        if total > self.financials.base_amount {
            return Err(DomainError::guard(
                "milestone_total",
                format!(
                    "milestones would total {total}, above the base amount {}",
                    self.financials.base_amount
                ),
            ));
        }

        let index = u32::try_from(self.milestones.len())
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| DomainError::validation("too many milestones"))?;

        Ok(vec![ContractEvent::MilestoneAdded(MilestoneAdded {
            contract_id: self.id,
            index,
            name: cmd.name.trim().to_string(),
            amount: cmd.amount,
            planned_start: cmd.planned_start,
            planned_end: cmd.planned_end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_milestone(&self, cmd: &StartMilestone) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::InProgress)?;

        let milestone = self.milestone(cmd.index)?;
        match milestone.status {
            StatusType::InProgress => return Ok(vec![]),
            StatusType::Created => {}
            other => {
                return Err(DomainError::guard(
                    "milestone_created",
                    format!("milestone {} is {other}", cmd.index),
                ));
            }
        }
        if !milestone.funded {
            return Err(DomainError::guard(
                "milestone_funded",
                format!("milestone {} has no escrow deposit", cmd.index),
            ));
        }
        if let Some(previous) = cmd.index.checked_sub(1).filter(|i| *i > 0) {
            if !self.milestone(previous)?.is_closed() {
                return Err(DomainError::guard(
                    "previous_milestone_closed",
                    format!("milestone {previous} is not closed"),
                ));
            }
        }
        self.ensure_no_blocking_dispute(Some(cmd.index))?;

        Ok(vec![ContractEvent::MilestoneStarted(MilestoneStarted {
            contract_id: self.id,
            index: cmd.index,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close_milestone(&self, cmd: &CloseMilestone) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        let milestone = self.milestone(cmd.index)?;
        if milestone.is_closed() {
            return Ok(vec![]);
        }
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::InProgress)?;

        if milestone.status != StatusType::InProgress {
            return Err(DomainError::guard(
                "milestone_in_progress",
                format!("milestone {} is {}", cmd.index, milestone.status),
            ));
        }
        self.ensure_settles(
            &cmd.settlement,
            TransactionKind::MilestoneRelease,
            Some(cmd.index),
            milestone.amount,
        )?;
        self.ensure_no_blocking_dispute(Some(cmd.index))?;

        Ok(vec![ContractEvent::MilestoneClosed(MilestoneClosed {
            contract_id: self.id,
            index: cmd.index,
            transaction_id: cmd.settlement.transaction_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release_full_payment(
        &self,
        cmd: &ReleaseFullPayment,
    ) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.full_payment_released {
            return Ok(vec![]);
        }
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::InProgress)?;

        if self.payment_mode != PaymentMode::FullPayment {
            return Err(DomainError::guard(
                "full_payment",
                "part-payment contracts release per milestone",
            ));
        }
        self.ensure_settles(
            &cmd.settlement,
            TransactionKind::FullRelease,
            None,
            self.financials.base_amount,
        )?;
        self.ensure_no_blocking_dispute(None)?;

        Ok(vec![ContractEvent::FullPaymentReleased(FullPaymentReleased {
            contract_id: self.id,
            transaction_id: cmd.settlement.transaction_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, occurred_at: DateTime<Utc>) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.is_closed() {
            return Ok(vec![]);
        }
        self.ensure_not_cancelled()?;
        self.ensure_status(StatusType::InProgress)?;

        if !self.execution_complete() {
            let message = match self.payment_mode {
                PaymentMode::FullPayment => "full payment has not been released",
                PaymentMode::PartPayment => "not every milestone is closed",
            };
            return Err(DomainError::guard("execution_complete", message));
        }
        self.ensure_no_blocking_dispute(None)?;

        Ok(vec![ContractEvent::Closed(ContractMarker {
            contract_id: self.id,
            occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelContract) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.is_cancelled() {
            return Ok(vec![]);
        }
        if self.is_closed() {
            return Err(DomainError::guard("contract_not_closed", "contract is closed"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason cannot be empty"));
        }

        let mut events = self.cancel_open_milestones(cmd.occurred_at);
        events.push(ContractEvent::Cancelled(ContractCancelled {
            contract_id: self.id,
            from: self.status,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_raise_dispute(&self, cmd: &RaiseDispute) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.disputes.iter().any(|d| d.id == cmd.dispute_id) {
            return Ok(vec![]);
        }
        self.ensure_open()?;

        if let Some(index) = cmd.milestone_index {
            self.milestone(index)?;
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("dispute reason cannot be empty"));
        }

        Ok(vec![ContractEvent::DisputeRaised(DisputeRaised {
            contract_id: self.id,
            dispute_id: cmd.dispute_id,
            raised_by: cmd.raised_by,
            milestone_index: cmd.milestone_index,
            reason: cmd.reason.trim().to_string(),
            is_blocking: cmd.is_blocking,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_arbitrator(
        &self,
        cmd: &AssignArbitrator,
    ) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        let dispute = self.dispute(cmd.dispute_id)?;
        if dispute.arbitrator == Some(cmd.arbitrator) {
            return Ok(vec![]);
        }
        if dispute.is_resolved {
            return Err(DomainError::guard("dispute_open", "dispute is already resolved"));
        }

        Ok(vec![ContractEvent::ArbitratorAssigned(ArbitratorAssigned {
            contract_id: self.id,
            dispute_id: cmd.dispute_id,
            arbitrator: cmd.arbitrator,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve_dispute(&self, cmd: &ResolveDispute) -> Result<Vec<ContractEvent>, DomainError> {
        self.ensure_exists()?;
        if self.dispute(cmd.dispute_id)?.is_resolved {
            return Ok(vec![]);
        }
        if cmd.resolution.trim().is_empty() {
            return Err(DomainError::validation("resolution cannot be empty"));
        }

        Ok(vec![ContractEvent::DisputeResolved(DisputeResolved {
            contract_id: self.id,
            dispute_id: cmd.dispute_id,
            resolved_by: cmd.resolved_by,
            resolution: cmd.resolution.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
