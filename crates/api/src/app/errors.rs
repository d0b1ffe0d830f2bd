use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use escrowdesk_infra::workflow::ActionError;

/// Handler error: an [`ActionError`] rendered as `{error, message}`.
#[derive(Debug)]
pub struct ApiError(pub ActionError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(ActionError::Validation(message.into()))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self(ActionError::NotFound(what.into()))
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

impl From<ActionError> for ApiError {
    fn from(value: ActionError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(error = %self.0, "request failed on infrastructure");
        }
        let message = match &self.0 {
            ActionError::Guard { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let mut body = json!({
            "error": self.0.code(),
            "message": message,
        });
        if let ActionError::Guard { guard, .. } = &self.0 {
            body["guard"] = json!(guard);
        }
        (status, axum::Json(body)).into_response()
    }
}

pub fn status_for(err: &ActionError) -> StatusCode {
    match err {
        ActionError::Unauthenticated => StatusCode::UNAUTHORIZED,
        ActionError::Forbidden { .. } => StatusCode::FORBIDDEN,
        ActionError::Guard { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ActionError::Validation(_) => StatusCode::BAD_REQUEST,
        ActionError::NotFound(_) => StatusCode::NOT_FOUND,
        ActionError::Conflict(_) => StatusCode::CONFLICT,
        ActionError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path segment into a typed id.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid {what} id '{raw}'")))
}
