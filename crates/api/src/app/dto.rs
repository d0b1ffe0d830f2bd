use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_auth::{RoleKind, User};
use escrowdesk_companies::{Address, Company, TaxIdentifiers};
use escrowdesk_contracts::{
    AgreementMode, Counterparty, Party, PaymentMode, Transaction, TransactionKind, TransactionStatus,
};
use escrowdesk_core::{AggregateRoot, CompanyId, ContractId, Money, RecordStatus, TransactionId, UserId};

// -------------------------
// Request DTOs
// -------------------------

/// Sign-in by display id or email; exactly one is required.
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub display_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub display_id: String,
    pub email: String,
    /// Hash produced by the credential service; plaintext never reaches us.
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<RoleKind>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role: RoleKind,
}

#[derive(Debug, Deserialize)]
pub struct AffiliateRequest {
    pub company_id: CompanyId,
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub gstn: Option<String>,
    pub pan: Option<String>,
    pub tan: Option<String>,
    pub address: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContractRequest {
    pub name: String,
    pub counterparty: Counterparty,
    pub base_amount: Money,
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub agreement_mode: AgreementMode,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    /// Needed only when the creator holds both buyer and seller roles.
    pub acting_as: Option<Party>,
}

/// Body for agree; `party` is optional when the caller acts for one side only.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PartyRequest {
    pub party: Option<Party>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RejectContractRequest {
    pub party: Option<Party>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DepositRequest {
    pub party: Option<Party>,
    pub milestone_index: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateDetailsRequest {
    pub name: Option<String>,
    pub base_amount: Option<Money>,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CancelContractRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
pub struct AddMilestoneRequest {
    pub name: String,
    pub amount: Money,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CloseMilestoneRequest {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
pub struct RaiseDisputeRequest {
    pub milestone_index: Option<u32>,
    pub reason: String,
    #[serde(default)]
    pub is_blocking: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignArbitratorRequest {
    pub arbitrator: UserId,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDisputeRequest {
    pub resolution: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub contract_id: ContractId,
    pub milestone_index: Option<u32>,
    pub kind: TransactionKind,
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct CompleteTransactionRequest {
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectTransactionRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub action: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: UserId,
    pub display_id: String,
}

/// User as seen from the write side. Credentials are never returned.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub user_id: UserId,
    pub display_id: String,
    pub email: String,
    pub roles: Vec<RoleKind>,
    pub company_id: Option<CompanyId>,
    pub status: RecordStatus,
    pub version: u64,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            display_id: user.display_id.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            company_id: user.company_id,
            status: user.status,
            version: user.version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompanyView {
    pub company_id: CompanyId,
    pub name: String,
    pub contact_person: Option<UserId>,
    pub tax: TaxIdentifiers,
    pub address: Option<Address>,
    pub status: RecordStatus,
    pub version: u64,
}

impl From<&Company> for CompanyView {
    fn from(company: &Company) -> Self {
        Self {
            company_id: *company.id(),
            name: company.name().to_string(),
            contact_person: company.contact_person(),
            tax: company.tax_identifiers().clone(),
            address: company.address().cloned(),
            status: company.status(),
            version: company.version(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub transaction_id: TransactionId,
    pub contract_id: Option<ContractId>,
    pub milestone_index: Option<u32>,
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    pub created_by: Option<UserId>,
    pub approved_by: Option<UserId>,
    pub reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub version: u64,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: *tx.id(),
            contract_id: tx.contract_id(),
            milestone_index: tx.milestone_index(),
            kind: tx.kind(),
            amount: tx.amount(),
            status: tx.status(),
            created_by: tx.created_by(),
            approved_by: tx.approved_by(),
            reference: tx.reference().map(str::to_string),
            rejection_reason: tx.rejection_reason().map(str::to_string),
            version: tx.version(),
        }
    }
}
