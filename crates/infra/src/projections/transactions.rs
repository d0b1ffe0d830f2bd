//! Transactions projection: one row per money movement, queryable by contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use escrowdesk_contracts::{TransactionEvent, TransactionKind, TransactionStatus};
use escrowdesk_core::{ContractId, Money, TransactionId, UserId};
use escrowdesk_events::EventEnvelope;

use super::{Admit, ProjectionError, admit};
use crate::read_model::ReadModelStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReadModel {
    pub transaction_id: TransactionId,
    pub contract_id: ContractId,
    pub milestone_index: Option<u32>,
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    pub created_by: UserId,
    pub approved_by: Option<UserId>,
    /// External payment reference, set on completion.
    pub reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

pub struct TransactionsProjection<S> {
    store: S,
}

impl<S> TransactionsProjection<S>
where
    S: ReadModelStore<TransactionId, TransactionReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "transaction" {
            return Ok(());
        }

        let transaction_id = TransactionId::from(envelope.aggregate_id());
        let seq = envelope.sequence_number();
        let existing = self.store.get(&transaction_id);
        let last = existing.as_ref().map(|m| m.version).unwrap_or(0);
        if admit(last, seq)? == Admit::AlreadySeen {
            return Ok(());
        }

        let event: TransactionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match event {
            TransactionEvent::Created(e) => {
                self.store.upsert(
                    transaction_id,
                    TransactionReadModel {
                        transaction_id: e.transaction_id,
                        contract_id: e.contract_id,
                        milestone_index: e.milestone_index,
                        kind: e.kind,
                        amount: e.amount,
                        status: TransactionStatus::Created,
                        created_by: e.created_by,
                        approved_by: None,
                        reference: None,
                        rejection_reason: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        version: seq,
                    },
                );
            }
            TransactionEvent::StatusChanged(e) => {
                let Some(mut model) = existing else {
                    return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
                };
                model.status = e.to;
                match e.to {
                    TransactionStatus::Approved => model.approved_by = e.actor,
                    TransactionStatus::Successful => model.reference = e.detail,
                    TransactionStatus::Rejected => model.rejection_reason = e.detail,
                    _ => {}
                }
                model.updated_at = e.occurred_at;
                model.version = seq;
                self.store.upsert(transaction_id, model);
            }
        }
        Ok(())
    }

    pub fn get(&self, transaction_id: &TransactionId) -> Option<TransactionReadModel> {
        self.store.get(transaction_id)
    }

    /// Oldest first.
    pub fn find_by_contract(&self, contract_id: ContractId) -> Vec<TransactionReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|t| t.contract_id == contract_id)
            .collect();
        rows.sort_by_key(|t| t.created_at);
        rows
    }

    pub fn reset(&self) {
        self.store.clear();
    }
}
