use std::sync::Arc;

use axum::{Json, extract::Extension};
use chrono::Utc;
use tracing::info;

use escrowdesk_auth::Principal;
use escrowdesk_contracts::CompanyDirectory;
use escrowdesk_infra::workflow::ActionError;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// Issue a session token for a registered, active user.
///
/// Credential verification happens upstream; this endpoint only maps an
/// identity onto signed claims.
pub async fn issue(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SessionRequest>,
) -> Result<Json<dto::SessionResponse>, ApiError> {
    let found = match (body.display_id.as_deref(), body.email.as_deref()) {
        (Some(display_id), None) => services.read.users.get_by_display_id(display_id),
        (None, Some(email)) => services.read.users.get_by_email(email),
        _ => return Err(ApiError::bad_request("supply exactly one of display_id or email")),
    };
    let user_id = found.map(|u| u.user_id).ok_or(ActionError::Unauthenticated)?;

    let response = services
        .blocking(move |svc| {
            let user = svc.load_user(user_id)?;
            if !user.status.is_active() {
                return Err(ActionError::Unauthenticated);
            }

            let mut principal = Principal::new(user.id, user.display_id.clone(), user.roles.clone());
            if let Some(company_id) = user.company_id.or_else(|| svc.read.directory.company_of_user(user.id)) {
                principal = principal.with_company(company_id);
            }

            let now = Utc::now();
            let token = svc
                .tokens
                .issue(&principal, now)
                .map_err(|e| ActionError::Infrastructure(e.to_string()))?;
            info!(user_id = %user.id, "session issued");

            Ok(dto::SessionResponse {
                token,
                expires_at: now + svc.tokens.validity(),
                user_id: user.id,
                display_id: user.display_id,
            })
        })
        .await?;

    Ok(Json(response))
}
