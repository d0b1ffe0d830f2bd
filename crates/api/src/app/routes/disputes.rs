use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use escrowdesk_auth::actions;
use escrowdesk_contracts::{AssignArbitrator, ContractCommand, RaiseDispute, ResolveDispute};
use escrowdesk_core::{ContractId, DisputeId};
use escrowdesk_infra::projections::ContractSummary;

use super::contracts::{apply, involved};
use crate::app::dto;
use crate::app::errors::{ApiError, parse_id};
use crate::app::services::AppServices;
use crate::context::Session;

pub async fn raise_dispute(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::RaiseDisputeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let dispute_id = DisputeId::new();
    let summary = services
        .execute(session.request_context(), actions::DISPUTE_RAISE, move |svc, claims, ctx| {
            involved(svc, claims, contract_id)?;
            let command = ContractCommand::RaiseDispute(RaiseDispute {
                dispute_id,
                raised_by: claims.sub,
                milestone_index: body.milestone_index,
                reason: body.reason,
                is_blocking: body.is_blocking,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn assign_arbitrator(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path((id, dispute)): Path<(String, String)>,
    Json(body): Json<dto::AssignArbitratorRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let dispute_id: DisputeId = parse_id(&dispute, "dispute")?;
    let summary = services
        .execute(
            session.request_context(),
            actions::DISPUTE_ASSIGN_ARBITRATOR,
            move |svc, _claims, ctx| {
                let command = ContractCommand::AssignArbitrator(AssignArbitrator {
                    dispute_id,
                    arbitrator: body.arbitrator,
                    occurred_at: ctx.now,
                });
                apply(svc, contract_id, command, ctx.now)
            },
        )
        .await?;
    Ok(Json(summary))
}

pub async fn resolve_dispute(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path((id, dispute)): Path<(String, String)>,
    Json(body): Json<dto::ResolveDisputeRequest>,
) -> Result<Json<ContractSummary>, ApiError> {
    let contract_id: ContractId = parse_id(&id, "contract")?;
    let dispute_id: DisputeId = parse_id(&dispute, "dispute")?;
    let summary = services
        .execute(session.request_context(), actions::DISPUTE_RESOLVE, move |svc, claims, ctx| {
            let command = ContractCommand::ResolveDispute(ResolveDispute {
                dispute_id,
                resolved_by: claims.sub,
                resolution: body.resolution,
                occurred_at: ctx.now,
            });
            apply(svc, contract_id, command, ctx.now)
        })
        .await?;
    Ok(Json(summary))
}
