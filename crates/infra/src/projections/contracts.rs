//! Contracts projection.
//!
//! Keeps a rehydrated [`Contract`] per stream and writes a flattened
//! [`ContractSummary`] after every applied event, so reads never replay.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use escrowdesk_contracts::{
    AgreementMode, Contract, ContractChecklist, ContractEvent, ContractParty, Dispute, Financials,
    Milestone, Party, PaymentMode, StatusType,
};
use escrowdesk_core::{Aggregate, AggregateRoot, CompanyId, ContractId, UserId};
use escrowdesk_events::EventEnvelope;

use super::{Admit, ProjectionError, admit};
use crate::read_model::ReadModelStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub contract_id: ContractId,
    pub name: String,
    pub status: StatusType,
    pub created_by: Option<UserId>,
    pub creator_party: Party,
    pub buyer: Option<ContractParty>,
    pub seller: Option<ContractParty>,
    pub payment_mode: PaymentMode,
    pub agreement_mode: AgreementMode,
    pub financials: Financials,
    pub checklist: ContractChecklist,
    pub details_frozen: bool,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,
    pub execution_actual_start: Option<DateTime<Utc>>,
    pub execution_actual_end: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub milestones: Vec<Milestone>,
    pub disputes: Vec<Dispute>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ContractSummary {
    pub fn of(contract: &Contract, updated_at: DateTime<Utc>) -> Self {
        Self {
            contract_id: *contract.id(),
            name: contract.name().to_string(),
            status: contract.status(),
            created_by: contract.created_by(),
            creator_party: contract.creator_party(),
            buyer: contract.buyer(),
            seller: contract.seller(),
            payment_mode: contract.payment_mode(),
            agreement_mode: contract.agreement_mode(),
            financials: *contract.financials(),
            checklist: contract.checklist(),
            details_frozen: contract.details_frozen(),
            planned_start: contract.planned_start(),
            planned_end: contract.planned_end(),
            execution_actual_start: contract.execution_actual_start(),
            execution_actual_end: contract.execution_actual_end(),
            cancellation_reason: contract.cancellation_reason().map(str::to_string),
            milestones: contract.milestones().to_vec(),
            disputes: contract.disputes().to_vec(),
            version: contract.version(),
            updated_at,
        }
    }

    /// Whether `company_id` is the buyer or seller side.
    pub fn involves(&self, company_id: CompanyId) -> bool {
        [self.buyer, self.seller]
            .into_iter()
            .flatten()
            .any(|p| p.company_id == company_id)
    }
}

pub struct ContractsProjection<S> {
    store: S,
    states: RwLock<HashMap<ContractId, Contract>>,
}

impl<S> ContractsProjection<S>
where
    S: ReadModelStore<ContractId, ContractSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "contract" {
            return Ok(());
        }

        let contract_id = ContractId::from(envelope.aggregate_id());
        let seq = envelope.sequence_number();

        let mut states = self
            .states
            .write()
            .map_err(|_| ProjectionError::Poisoned("contracts"))?;
        let contract = states
            .entry(contract_id)
            .or_insert_with(|| Contract::empty(contract_id));

        // The rehydrated version doubles as the stream cursor.
        if admit(contract.version(), seq)? == Admit::AlreadySeen {
            debug!(%contract_id, seq, "contract envelope already applied");
            return Ok(());
        }

        let event: ContractEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        contract.apply(&event);

        self.store
            .upsert(contract_id, ContractSummary::of(contract, envelope.occurred_at()));
        Ok(())
    }

    pub fn get(&self, contract_id: &ContractId) -> Option<ContractSummary> {
        self.store.get(contract_id)
    }

    pub fn list(&self) -> Vec<ContractSummary> {
        self.store.list()
    }

    /// Contracts where `company_id` is the buyer or seller.
    pub fn list_for_company(&self, company_id: CompanyId) -> Vec<ContractSummary> {
        self.store
            .list()
            .into_iter()
            .filter(|c| c.involves(company_id))
            .collect()
    }

    pub fn reset(&self) {
        self.store.clear();
        if let Ok(mut states) = self.states.write() {
            states.clear();
        }
    }
}
