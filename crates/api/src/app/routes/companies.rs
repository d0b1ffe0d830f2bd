use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use escrowdesk_auth::actions;
use escrowdesk_companies::{Company, CompanyCommand, RegisterCompany};
use escrowdesk_core::CompanyId;
use escrowdesk_infra::projections::CompanyReadModel;

use crate::app::dto;
use crate::app::errors::{ApiError, parse_id};
use crate::app::services::AppServices;
use crate::context::Session;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_company).get(list_companies))
        .route("/:id", get(get_company))
}

/// Register a company with the caller as its contact person.
pub async fn register_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Json(body): Json<dto::CreateCompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let company_id = CompanyId::new();
    let view = services
        .execute(session.request_context(), actions::COMPANY_CREATE, move |svc, claims, ctx| {
            let command = CompanyCommand::Register(RegisterCompany {
                company_id,
                name: body.name,
                contact_person: claims.sub,
                gstn: body.gstn,
                pan: body.pan,
                tan: body.tan,
                address: body.address,
                occurred_at: ctx.now,
            });
            svc.dispatch(company_id, "company", &command, |id| Company::empty(id.into()))?;
            Ok(dto::CompanyView::from(&svc.load_company(company_id)?))
        })
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<dto::CompanyView>, ApiError> {
    let company_id: CompanyId = parse_id(&id, "company")?;
    let view = services
        .execute(session.request_context(), actions::COMPANY_READ, move |svc, _claims, _ctx| {
            Ok(dto::CompanyView::from(&svc.load_company(company_id)?))
        })
        .await?;
    Ok(Json(view))
}

/// Active companies from the directory projection.
pub async fn list_companies(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<CompanyReadModel>>, ApiError> {
    let items = services
        .execute(session.request_context(), actions::COMPANY_READ, |svc, _claims, _ctx| {
            Ok(svc.read.directory.list())
        })
        .await?;
    Ok(Json(items))
}
