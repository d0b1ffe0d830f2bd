use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use escrowdesk_auth::{SessionClaims, actions};
use escrowdesk_contracts::{CreateTransaction, Transaction, TransactionCommand};
use escrowdesk_core::TransactionId;
use escrowdesk_infra::workflow::ActionError;

use super::contracts::involved;
use crate::app::dto;
use crate::app::errors::{ApiError, parse_id};
use crate::app::services::AppServices;
use crate::context::Session;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_transaction))
        .route("/:id", get(get_transaction))
        .route("/:id/queue", post(queue))
        .route("/:id/submit", post(submit))
        .route("/:id/approve", post(approve))
        .route("/:id/complete", post(complete))
        .route("/:id/reject", post(reject))
}

fn apply(
    svc: &AppServices,
    transaction_id: TransactionId,
    command: TransactionCommand,
) -> Result<dto::TransactionView, ActionError> {
    svc.dispatch(transaction_id, "transaction", &command, |id| Transaction::empty(id.into()))?;
    Ok(dto::TransactionView::from(&svc.load_transaction(transaction_id)?))
}

/// The transaction, provided the caller is involved in its contract.
fn involved_transaction(
    svc: &AppServices,
    claims: &SessionClaims,
    transaction_id: TransactionId,
) -> Result<Transaction, ActionError> {
    let tx = svc.load_transaction(transaction_id)?;
    let contract_id = tx
        .contract_id()
        .ok_or_else(|| ActionError::NotFound(format!("contract of transaction {transaction_id}")))?;
    involved(svc, claims, contract_id)?;
    Ok(tx)
}

pub async fn create_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Json(body): Json<dto::CreateTransactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction_id = TransactionId::new();
    let view = services
        .execute(session.request_context(), actions::TRANSACTION_CREATE, move |svc, claims, ctx| {
            let contract = involved(svc, claims, body.contract_id)?;
            if let Some(index) = body.milestone_index {
                if !contract.milestones().iter().any(|m| m.index == index) {
                    return Err(ActionError::NotFound(format!(
                        "milestone {index} of contract {}",
                        body.contract_id
                    )));
                }
            }

            let command = TransactionCommand::Create(CreateTransaction {
                transaction_id,
                contract_id: body.contract_id,
                milestone_index: body.milestone_index,
                kind: body.kind,
                amount: body.amount,
                created_by: claims.sub,
                occurred_at: ctx.now,
            });
            apply(svc, transaction_id, command)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<dto::TransactionView>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let view = services
        .execute(session.request_context(), actions::CONTRACT_READ, move |svc, claims, _ctx| {
            Ok(dto::TransactionView::from(&involved_transaction(svc, claims, transaction_id)?))
        })
        .await?;
    Ok(Json(view))
}

pub async fn queue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<dto::TransactionView>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let view = services
        .execute(session.request_context(), actions::TRANSACTION_CREATE, move |svc, claims, ctx| {
            involved_transaction(svc, claims, transaction_id)?;
            apply(svc, transaction_id, TransactionCommand::Queue { occurred_at: ctx.now })
        })
        .await?;
    Ok(Json(view))
}

pub async fn submit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<dto::TransactionView>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let view = services
        .execute(session.request_context(), actions::TRANSACTION_CREATE, move |svc, claims, ctx| {
            involved_transaction(svc, claims, transaction_id)?;
            apply(
                svc,
                transaction_id,
                TransactionCommand::SubmitForApproval { occurred_at: ctx.now },
            )
        })
        .await?;
    Ok(Json(view))
}

pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<dto::TransactionView>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let view = services
        .execute(session.request_context(), actions::TRANSACTION_APPROVE, move |svc, claims, ctx| {
            let command = TransactionCommand::Approve {
                approved_by: claims.sub,
                occurred_at: ctx.now,
            };
            apply(svc, transaction_id, command)
        })
        .await?;
    Ok(Json(view))
}

pub async fn complete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::CompleteTransactionRequest>,
) -> Result<Json<dto::TransactionView>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let view = services
        .execute(session.request_context(), actions::TRANSACTION_COMPLETE, move |svc, _claims, ctx| {
            let command = TransactionCommand::Complete {
                reference: body.reference,
                occurred_at: ctx.now,
            };
            apply(svc, transaction_id, command)
        })
        .await?;
    Ok(Json(view))
}

pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectTransactionRequest>,
) -> Result<Json<dto::TransactionView>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let view = services
        .execute(session.request_context(), actions::TRANSACTION_REJECT, move |svc, _claims, ctx| {
            let command = TransactionCommand::Reject {
                reason: body.reason,
                occurred_at: ctx.now,
            };
            apply(svc, transaction_id, command)
        })
        .await?;
    Ok(Json(view))
}
