use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    routing::get,
};

use escrowdesk_auth::AuthorizationExplanation;
use escrowdesk_infra::privilege_store::PrivilegeSnapshots;
use escrowdesk_infra::workflow::ActionError;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::Session;

pub fn router() -> Router {
    Router::new().route("/explain", get(explain))
}

/// Audit view: would the caller be allowed `action`, and why.
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Query(query): Query<dto::ExplainQuery>,
) -> Result<Json<AuthorizationExplanation>, ApiError> {
    let action = query.action.trim();
    if action.is_empty() {
        return Err(ApiError::bad_request("action cannot be empty"));
    }

    let claims = session.claims();
    let snapshot = services
        .privileges
        .snapshot(claims.sub, action)
        .await
        .map_err(ActionError::from)?;
    let explanation = services
        .workflow
        .engine()
        .explain_authorization(&snapshot, Some(claims), action)
        .map_err(ActionError::from)?;
    Ok(Json(explanation))
}
