use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use escrowdesk_auth::actions;
use escrowdesk_contracts::{AddMilestone, CloseMilestone, ContractCommand, StartMilestone};
use escrowdesk_core::ContractId;
use escrowdesk_infra::projections::ContractSummary;

use super::contracts::{apply, involved, settlement};
use crate::app::dto;
use crate::app::errors::{ApiError, parse_id};
use crate::app::services::AppServices;
use crate::context::Session;

pub async fn add_milestone(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddMilestoneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::MILESTONE_CREATE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            let command = ContractCommand::AddMilestone(AddMilestone {
                name: body.name,
                amount: body.amount,
                planned_start: body.planned_start,
                planned_end: body.planned_end,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn start_milestone(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path((id, index)): Path<(String, u32)>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::MILESTONE_START, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            let command = ContractCommand::StartMilestone(StartMilestone {
                index,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}

/// Close a milestone against the transaction that released its funds.
pub async fn close_milestone(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path((id, index)): Path<(String, u32)>,
    Json(body): Json<dto::CloseMilestoneRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let summary = services
        .execute(session.request_context(), actions::MILESTONE_CLOSE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            let command = ContractCommand::CloseMilestone(CloseMilestone {
                index,
                settlement: settlement(svc, body.transaction_id)?,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}
