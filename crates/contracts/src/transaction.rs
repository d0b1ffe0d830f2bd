//! Financial transaction aggregate.
//!
//! A transaction moves escrow money for one contract (optionally one
//! milestone) through `Created -> Queued -> PendingApproval -> Approved ->
//! Successful`, or to `Rejected` from any non-terminal step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_core::{
    Aggregate, AggregateRoot, ContractId, DomainError, Money, TransactionId, UserId,
};
use escrowdesk_events::{Event, StatusTransition};

use crate::status::TransactionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    EscrowDeposit,
    MilestoneRelease,
    FullRelease,
    Refund,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::EscrowDeposit => "escrow_deposit",
            TransactionKind::MilestoneRelease => "milestone_release",
            TransactionKind::FullRelease => "full_release",
            TransactionKind::Refund => "refund",
        }
    }
}

/// Aggregate root: Transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    contract_id: Option<ContractId>,
    milestone_index: Option<u32>,
    kind: TransactionKind,
    amount: Money,
    status: TransactionStatus,
    created_by: Option<UserId>,
    approved_by: Option<UserId>,
    reference: Option<String>,
    rejection_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Transaction {
    pub fn empty(id: TransactionId) -> Self {
        Self {
            id,
            contract_id: None,
            milestone_index: None,
            kind: TransactionKind::EscrowDeposit,
            amount: Money::ZERO,
            status: TransactionStatus::Created,
            created_by: None,
            approved_by: None,
            reference: None,
            rejection_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn contract_id(&self) -> Option<ContractId> {
        self.contract_id
    }

    pub fn milestone_index(&self) -> Option<u32> {
        self.milestone_index
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// What this transaction proves when presented to release a payment.
    /// `None` until the transaction exists.
    pub fn settlement(&self) -> Option<Settlement> {
        let contract_id = self.contract_id?;
        Some(Settlement {
            transaction_id: self.id,
            contract_id,
            milestone_index: self.milestone_index,
            kind: self.kind,
            amount: self.amount,
            status: self.status,
        })
    }
}

/// A transaction as seen by the contract it is meant to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub transaction_id: TransactionId,
    pub contract_id: ContractId,
    pub milestone_index: Option<u32>,
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
}

impl AggregateRoot for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransaction {
    pub transaction_id: TransactionId,
    pub contract_id: ContractId,
    pub milestone_index: Option<u32>,
    pub kind: TransactionKind,
    pub amount: Money,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionCommand {
    Create(CreateTransaction),
    Queue { occurred_at: DateTime<Utc> },
    SubmitForApproval { occurred_at: DateTime<Utc> },
    Approve { approved_by: UserId, occurred_at: DateTime<Utc> },
    Complete { reference: String, occurred_at: DateTime<Utc> },
    Reject { reason: String, occurred_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCreated {
    pub transaction_id: TransactionId,
    pub contract_id: ContractId,
    pub milestone_index: Option<u32>,
    pub kind: TransactionKind,
    pub amount: Money,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A status step. `detail` carries the approver, settlement reference or
/// rejection reason depending on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatusChanged {
    pub transaction_id: TransactionId,
    pub contract_id: ContractId,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub actor: Option<UserId>,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEvent {
    Created(TransactionCreated),
    StatusChanged(TransactionStatusChanged),
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionEvent::Created(e) => e.transaction_id,
            TransactionEvent::StatusChanged(e) => e.transaction_id,
        }
    }

    pub fn contract_id(&self) -> ContractId {
        match self {
            TransactionEvent::Created(e) => e.contract_id,
            TransactionEvent::StatusChanged(e) => e.contract_id,
        }
    }
}

impl Event for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::Created(_) => "transaction.created",
            TransactionEvent::StatusChanged(e) => match e.to {
                TransactionStatus::Created => "transaction.created",
                TransactionStatus::Queued => "transaction.queued",
                TransactionStatus::PendingApproval => "transaction.submitted_for_approval",
                TransactionStatus::Approved => "transaction.approved",
                TransactionStatus::Successful => "transaction.completed",
                TransactionStatus::Rejected => "transaction.rejected",
            },
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransactionEvent::Created(e) => e.occurred_at,
            TransactionEvent::StatusChanged(e) => e.occurred_at,
        }
    }

    fn status_transition(&self) -> Option<StatusTransition> {
        match self {
            TransactionEvent::Created(_) => None,
            TransactionEvent::StatusChanged(e) => {
                Some(StatusTransition::new(e.from.as_str(), e.to.as_str()))
            }
        }
    }
}

impl Aggregate for Transaction {
    type Command = TransactionCommand;
    type Event = TransactionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransactionEvent::Created(e) => {
                self.id = e.transaction_id;
                self.contract_id = Some(e.contract_id);
                self.milestone_index = e.milestone_index;
                self.kind = e.kind;
                self.amount = e.amount;
                self.created_by = Some(e.created_by);
                self.status = TransactionStatus::Created;
                self.created = true;
            }
            TransactionEvent::StatusChanged(e) => {
                self.status = e.to;
                match e.to {
                    TransactionStatus::Approved => self.approved_by = e.actor,
                    TransactionStatus::Successful => self.reference = e.detail.clone(),
                    TransactionStatus::Rejected => self.rejection_reason = e.detail.clone(),
                    _ => {}
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransactionCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("transaction already exists"));
                }
                if !cmd.amount.is_positive() {
                    return Err(DomainError::validation("transaction amount must be positive"));
                }
                match (cmd.kind, cmd.milestone_index) {
                    (TransactionKind::MilestoneRelease, None) => {
                        return Err(DomainError::validation(
                            "milestone releases must name a milestone",
                        ));
                    }
                    (TransactionKind::FullRelease, Some(_)) => {
                        return Err(DomainError::validation(
                            "full releases cannot name a milestone",
                        ));
                    }
                    (_, Some(0)) => {
                        return Err(DomainError::validation("milestone indices start at 1"));
                    }
                    _ => {}
                }

                Ok(vec![TransactionEvent::Created(TransactionCreated {
                    transaction_id: cmd.transaction_id,
                    contract_id: cmd.contract_id,
                    milestone_index: cmd.milestone_index,
                    kind: cmd.kind,
                    amount: cmd.amount,
                    created_by: cmd.created_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TransactionCommand::Queue { occurred_at } => {
                self.step(TransactionStatus::Queued, None, None, *occurred_at)
            }
            TransactionCommand::SubmitForApproval { occurred_at } => {
                self.step(TransactionStatus::PendingApproval, None, None, *occurred_at)
            }
            TransactionCommand::Approve {
                approved_by,
                occurred_at,
            } => self.step(TransactionStatus::Approved, Some(*approved_by), None, *occurred_at),
            TransactionCommand::Complete {
                reference,
                occurred_at,
            } => {
                if reference.trim().is_empty() {
                    return Err(DomainError::validation("settlement reference cannot be empty"));
                }
                self.step(
                    TransactionStatus::Successful,
                    None,
                    Some(reference.trim().to_string()),
                    *occurred_at,
                )
            }
            TransactionCommand::Reject {
                reason,
                occurred_at,
            } => {
                if reason.trim().is_empty() {
                    return Err(DomainError::validation("rejection reason cannot be empty"));
                }
                self.step(
                    TransactionStatus::Rejected,
                    None,
                    Some(reason.trim().to_string()),
                    *occurred_at,
                )
            }
        }
    }
}

impl Transaction {
    fn step(
        &self,
        to: TransactionStatus,
        actor: Option<UserId>,
        detail: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<TransactionEvent>, DomainError> {
        let contract_id = self
            .contract_id
            .filter(|_| self.created)
            .ok_or_else(|| DomainError::not_found(format!("transaction {}", self.id)))?;

        if self.status == to {
            return Ok(vec![]);
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::guard(
                "transaction_status",
                format!("cannot move transaction from {} to {to}", self.status),
            ));
        }

        Ok(vec![TransactionEvent::StatusChanged(TransactionStatusChanged {
            transaction_id: self.id,
            contract_id,
            from: self.status,
            to,
            actor,
            detail,
            occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created(kind: TransactionKind, milestone_index: Option<u32>) -> Transaction {
        let id = TransactionId::new();
        let mut tx = Transaction::empty(id);
        let events = tx
            .handle(&TransactionCommand::Create(CreateTransaction {
                transaction_id: id,
                contract_id: ContractId::new(),
                milestone_index,
                kind,
                amount: Money::from_minor(50_000),
                created_by: UserId::new(),
                occurred_at: now(),
            }))
            .unwrap();
        for e in &events {
            tx.apply(e);
        }
        tx
    }

    fn run(tx: &mut Transaction, cmd: TransactionCommand) -> Result<Vec<TransactionEvent>, DomainError> {
        let events = tx.handle(&cmd)?;
        for e in &events {
            tx.apply(e);
        }
        Ok(events)
    }

    #[test]
    fn walks_to_successful() {
        let mut tx = created(TransactionKind::FullRelease, None);
        let approver = UserId::new();
        run(&mut tx, TransactionCommand::Queue { occurred_at: now() }).unwrap();
        run(&mut tx, TransactionCommand::SubmitForApproval { occurred_at: now() }).unwrap();
        run(
            &mut tx,
            TransactionCommand::Approve {
                approved_by: approver,
                occurred_at: now(),
            },
        )
        .unwrap();
        let events = run(
            &mut tx,
            TransactionCommand::Complete {
                reference: "UTR-0042".to_string(),
                occurred_at: now(),
            },
        )
        .unwrap();

        assert_eq!(events[0].event_type(), "transaction.completed");
        assert_eq!(
            events[0].status_transition(),
            Some(StatusTransition::new("approved", "successful"))
        );
        assert_eq!(tx.status(), TransactionStatus::Successful);
        assert_eq!(tx.approved_by(), Some(approver));
        assert_eq!(tx.reference(), Some("UTR-0042"));
        assert_eq!(tx.version(), 5);
    }

    #[test]
    fn skipping_a_step_is_a_guard_violation() {
        let mut tx = created(TransactionKind::EscrowDeposit, None);
        let err = run(
            &mut tx,
            TransactionCommand::Approve {
                approved_by: UserId::new(),
                occurred_at: now(),
            },
        )
        .unwrap_err();
        assert_eq!(err.guard_name(), Some("transaction_status"));
        assert_eq!(tx.status(), TransactionStatus::Created);
    }

    #[test]
    fn rejection_is_terminal() {
        let mut tx = created(TransactionKind::Refund, None);
        run(&mut tx, TransactionCommand::Queue { occurred_at: now() }).unwrap();
        run(
            &mut tx,
            TransactionCommand::Reject {
                reason: "bank returned funds".to_string(),
                occurred_at: now(),
            },
        )
        .unwrap();
        assert_eq!(tx.rejection_reason(), Some("bank returned funds"));

        let err = run(&mut tx, TransactionCommand::SubmitForApproval { occurred_at: now() })
            .unwrap_err();
        assert_eq!(err.guard_name(), Some("transaction_status"));
    }

    #[test]
    fn repeating_the_current_step_is_a_no_op() {
        let mut tx = created(TransactionKind::EscrowDeposit, None);
        run(&mut tx, TransactionCommand::Queue { occurred_at: now() }).unwrap();
        let version = tx.version();
        assert!(
            run(&mut tx, TransactionCommand::Queue { occurred_at: now() })
                .unwrap()
                .is_empty()
        );
        assert_eq!(tx.version(), version);
    }

    #[test]
    fn milestone_index_must_match_kind() {
        let id = TransactionId::new();
        let create = |kind, milestone_index, amount| {
            Transaction::empty(id).handle(&TransactionCommand::Create(CreateTransaction {
                transaction_id: id,
                contract_id: ContractId::new(),
                milestone_index,
                kind,
                amount: Money::from_minor(amount),
                created_by: UserId::new(),
                occurred_at: now(),
            }))
        };

        assert!(create(TransactionKind::MilestoneRelease, None, 10).is_err());
        assert!(create(TransactionKind::FullRelease, Some(1), 10).is_err());
        assert!(create(TransactionKind::MilestoneRelease, Some(0), 10).is_err());
        assert!(create(TransactionKind::EscrowDeposit, None, 0).is_err());
        assert!(create(TransactionKind::MilestoneRelease, Some(2), 10).is_ok());
    }

    #[test]
    fn steps_on_a_missing_transaction_are_not_found() {
        let tx = Transaction::empty(TransactionId::new());
        assert!(matches!(
            tx.handle(&TransactionCommand::Queue { occurred_at: now() }),
            Err(DomainError::NotFound(_))
        ));
    }
}
