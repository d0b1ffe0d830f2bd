use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::debug;

use escrowdesk_auth::{AuthenticationError, JwtValidator};

use crate::app::errors::json_error;
use crate::context::Session;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let claims = match extract_bearer(req.headers()).and_then(|token| state.jwt.validate(token, Utc::now())) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(reason = %e, "rejected session token");
            return json_error(StatusCode::UNAUTHORIZED, "unauthenticated", e.to_string()).into_response();
        }
    };

    req.extensions_mut().insert(Session::new(claims));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthenticationError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthenticationError::Missing)?;

    let header = header.to_str().map_err(|_| AuthenticationError::Malformed)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthenticationError::Malformed)?
        .trim();
    if token.is_empty() {
        return Err(AuthenticationError::Missing);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_scheme_is_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), Err(AuthenticationError::Missing));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), Err(AuthenticationError::Malformed));

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), Err(AuthenticationError::Missing));

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer(&headers), Ok("abc.def.ghi"));
    }
}
