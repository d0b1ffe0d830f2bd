use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::context::Session;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Echo the verified session. Roles here are what the token carried.
pub async fn whoami(Extension(session): Extension<Session>) -> impl IntoResponse {
    let claims = session.claims();
    Json(json!({
        "user_id": claims.sub.to_string(),
        "display_id": claims.display_id,
        "company_id": claims.company_id.map(|c| c.to_string()),
        "roles": claims.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "expires_at": claims.exp,
    }))
}
