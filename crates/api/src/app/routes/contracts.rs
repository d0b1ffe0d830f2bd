use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};

use escrowdesk_auth::{SessionClaims, actions};
use escrowdesk_contracts::{
    AgreeToContract, CancelContract, Contract, ContractCommand, ContractCreator, CreateContract,
    DepositEscrow, RejectContract, ReleaseFullPayment, Settlement, UpdateContractDetails,
    resolve_parties,
};
use escrowdesk_core::{ContractId, TransactionId};
use escrowdesk_infra::projections::{ContractSummary, TransactionReadModel};
use escrowdesk_infra::workflow::ActionError;

use super::{disputes, milestones};
use crate::app::dto;
use crate::app::errors::{ApiError, parse_id};
use crate::app::services::AppServices;
use crate::context::Session;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_contract).get(list_contracts))
        .route("/:id", get(get_contract))
        .route("/:id/agree", post(agree))
        .route("/:id/reject", post(reject))
        .route("/:id/deposit", post(deposit))
        .route("/:id/details", post(update_details))
        .route("/:id/freeze", post(freeze))
        .route("/:id/start", post(start_execution))
        .route("/:id/release", post(release_full_payment))
        .route("/:id/close", post(close))
        .route("/:id/cancel", post(cancel))
        .route("/:id/transactions", get(list_transactions))
        .route("/:id/milestones", post(milestones::add_milestone))
        .route("/:id/milestones/:index/start", post(milestones::start_milestone))
        .route("/:id/milestones/:index/close", post(milestones::close_milestone))
        .route("/:id/disputes", post(disputes::raise_dispute))
        .route("/:id/disputes/:dispute/arbitrator", post(disputes::assign_arbitrator))
        .route("/:id/disputes/:dispute/resolve", post(disputes::resolve_dispute))
}

/// Dispatch against a contract stream and return the committed state.
pub(super) fn apply(
    svc: &AppServices,
    contract_id: ContractId,
    command: ContractCommand,
    now: DateTime<Utc>,
) -> Result<ContractSummary, ActionError> {
    svc.dispatch(contract_id, "contract", &command, |id| Contract::empty(id.into()))?;
    let contract = svc.load_contract(contract_id)?;
    Ok(ContractSummary::of(&contract, now))
}

/// Load a contract the caller is a party to (or administers).
pub(super) fn involved(
    svc: &AppServices,
    claims: &SessionClaims,
    contract_id: ContractId,
) -> Result<Contract, ActionError> {
    let contract = svc.load_contract(contract_id)?;
    svc.ensure_involved(&contract, claims)?;
    Ok(contract)
}

/// The transaction presented as a release, as recorded in its own stream.
pub(super) fn settlement(
    svc: &AppServices,
    transaction_id: TransactionId,
) -> Result<Settlement, ActionError> {
    svc.load_transaction(transaction_id)?
        .settlement()
        .ok_or_else(|| ActionError::NotFound(format!("transaction {transaction_id}")))
}

pub async fn create_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Json(body): Json<dto::CreateContractRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let contract_id = ContractId::new();
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_CREATE, move |svc, claims, ctx| {
            let creator = ContractCreator {
                user_id: claims.sub,
                roles: svc.roles_of(claims.sub)?,
                company_id: svc.company_of(claims.sub)?,
                acting_as: body.acting_as,
            };
            let parties = resolve_parties(&svc.read.directory, &creator, body.counterparty)?;

            let command = ContractCommand::Create(CreateContract {
                contract_id,
                name: body.name,
                created_by: claims.sub,
                creator_party: parties.creator_party,
                buyer: parties.buyer,
                seller: parties.seller,
                base_amount: body.base_amount,
                payment_mode: body.payment_mode,
                agreement_mode: body.agreement_mode,
                planned_start: body.planned_start,
                planned_end: body.planned_end,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Contracts of the caller's company; admins see every contract.
pub async fn list_contracts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<ContractSummary>>, ApiError> {
    let items = services
        .execute(session.request_context(), actions::CONTRACT_READ, |svc, claims, _ctx| {
            if svc.is_admin(claims.sub)? {
                return Ok(svc.read.contracts.list());
            }
            Ok(svc
                .company_of(claims.sub)?
                .map(|company| svc.read.contracts.list_for_company(company))
                .unwrap_or_default())
        })
        .await?;
    Ok(Json(items))
}

pub async fn get_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_READ, move |svc, claims, ctx| {
            let contract = involved(svc, claims, contract_id)?;
            Ok(ContractSummary::of(&contract, ctx.now))
        })
        .await?;
    Ok(Json(summary))
}

pub async fn agree(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::PartyRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_AGREE, move |svc, claims, ctx| {
            let contract = svc.load_contract(contract_id)?;
            let party = svc.acting_party(&contract, claims, body.party)?;
            let command = ContractCommand::Agree(AgreeToContract {
                party,
                user_id: claims.sub,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectContractRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_REJECT, move |svc, claims, ctx| {
            let contract = svc.load_contract(contract_id)?;
            let party = svc.acting_party(&contract, claims, body.party)?;
            let command = ContractCommand::Reject(RejectContract {
                party,
                user_id: claims.sub,
                reason: body.reason,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::DepositRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(
            session.request_context(),
            actions::CONTRACT_DEPOSIT_ESCROW,
            move |svc, claims, ctx| {
                let contract = svc.load_contract(contract_id)?;
                let party = svc.acting_party(&contract, claims, body.party)?;
                let command = ContractCommand::DepositEscrow(DepositEscrow {
                    party,
                    milestone_index: body.milestone_index,
                    occurred_at: ctx.now,
                });
                apply(svc, contract_id, command, ctx.now)
            },
        )
        .await?;
    Ok(Json(summary))
}

pub async fn update_details(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateDetailsRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_UPDATE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            let command = ContractCommand::UpdateDetails(UpdateContractDetails {
                name: body.name,
                base_amount: body.base_amount,
                planned_start: body.planned_start,
                planned_end: body.planned_end,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

pub async fn freeze(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_FREEZE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            apply(svc, contract_id, ContractCommand::FreezeDetails { occurred_at: ctx.now }, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

pub async fn start_execution(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(
            session.request_context(),
            actions::CONTRACT_START_EXECUTION,
            move |svc, claims, ctx| {
                involved(svc, claims, contract_id)?;
                apply(svc, contract_id, ContractCommand::StartExecution { occurred_at: ctx.now }, ctx.now)
            },
        )
        .await?;
    Ok(Json(summary))
}

/// Record the full-payment release. The transaction's kind, amount and status
/// are read from its own stream, not taken from the request.
pub async fn release_full_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReleaseRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_CLOSE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            let command = ContractCommand::ReleaseFullPayment(ReleaseFullPayment {
                settlement: settlement(svc, body.transaction_id)?,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

pub async fn close(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_CLOSE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            apply(svc, contract_id, ContractCommand::Close { occurred_at: ctx.now }, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelContractRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::CONTRACT_CANCEL, move |svc, claims, ctx| {
            let command = ContractCommand::Cancel(CancelContract {
                cancelled_by: claims.sub,
                reason: body.reason,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

/// Transactions recorded against a contract (read model, eventually consistent).
pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransactionReadModel>>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let items = services
        .execute(session.request_context(), actions::CONTRACT_READ, move |svc, claims, _ctx| {
            involved(svc, claims, contract_id)?;
            Ok(svc.read.transactions.find_by_contract(contract_id))
        })
        .await?;
    Ok(Json(items))
}
