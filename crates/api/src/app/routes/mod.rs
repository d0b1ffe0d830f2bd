use axum::{
    Router,
    routing::{get, post},
};

pub mod authz;
pub mod companies;
pub mod contracts;
pub mod disputes;
pub mod milestones;
pub mod session;
pub mod system;
pub mod transactions;
pub mod users;

/// Endpoints reachable without a session.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/session", post(session::issue))
        .route("/users", post(users::sign_up))
}

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/users", users::router())
        .nest("/companies", companies::router())
        .nest("/contracts", contracts::router())
        .nest("/transactions", transactions::router())
        .nest("/authz", authz::router())
}
