//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: event store, bus, privilege store, projections, workers
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request bodies and response views
//! - `errors.rs`: error → status/JSON mapping

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use escrowdesk_auth::TokenService;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, ServiceError};

/// Build the full HTTP router.
pub async fn build_app(config: &ApiConfig) -> Result<Router, ServiceError> {
    let services = Arc::new(services::build_services(config).await?);
    Ok(router_for(services, config))
}

/// Router over already-built services (tests keep a handle for shutdown).
pub fn router_for(services: Arc<AppServices>, config: &ApiConfig) -> Router {
    let jwt = Arc::new(TokenService::new(config.jwt_secret.as_bytes()).with_validity(config.session_ttl));
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
