use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use escrowdesk_auth::user::{AffiliateCompany, AssignRole, RegisterUser};
use escrowdesk_auth::{Credential, RoleKind, User, UserCommand, actions};
use escrowdesk_core::UserId;
use escrowdesk_infra::workflow::ActionError;

use crate::app::dto;
use crate::app::errors::{ApiError, parse_id};
use crate::app::services::AppServices;
use crate::context::Session;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_user))
        .route("/:id/roles", post(assign_role))
        .route("/:id/company", post(affiliate_company))
}

/// Public registration. Admin is only granted to the configured bootstrap
/// email; everyone else picks from buyer, seller and basic user.
pub async fn sign_up(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.password_hash.trim().is_empty() {
        return Err(ApiError::bad_request("password_hash cannot be empty"));
    }

    let mut roles = body.roles;
    if services.is_bootstrap_admin(&body.email) {
        if !roles.contains(&RoleKind::Admin) {
            roles.push(RoleKind::Admin);
        }
    } else if roles.contains(&RoleKind::Admin) {
        return Err(ActionError::Forbidden {
            action: actions::USER_ASSIGN_ROLE.as_str().to_string(),
        }
        .into());
    }
    if roles.is_empty() {
        roles.push(RoleKind::BasicUser);
    }

    if services.read.users.get_by_email(&body.email).is_some()
        || services.read.users.get_by_display_id(&body.display_id).is_some()
    {
        return Err(ActionError::Conflict("display id or email already registered".to_string()).into());
    }

    let user_id = UserId::new();
    let command = UserCommand::Register(RegisterUser {
        user_id,
        display_id: body.display_id,
        email: body.email,
        credential: Credential::PasswordHash { hash: body.password_hash },
        initial_roles: roles,
        occurred_at: Utc::now(),
    });

    let view = services
        .blocking(move |svc| {
            svc.dispatch(user_id, "user", &command, |id| User::empty(id.into()))?;
            Ok(dto::UserView::from(&svc.load_user(user_id)?))
        })
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<dto::UserView>, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let view = services
        .execute(session.request_context(), actions::COMPANY_READ, move |svc, claims, _ctx| {
            ensure_self_or_admin(svc, claims.sub, user_id)?;
            Ok(dto::UserView::from(&svc.load_user(user_id)?))
        })
        .await?;
    Ok(Json(view))
}

pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignRoleRequest>,
) -> Result<Json<dto::UserView>, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let view = services
        .execute(session.request_context(), actions::USER_ASSIGN_ROLE, move |svc, claims, ctx| {
            let actor_roles = svc.roles_of(claims.sub)?;
            let command = UserCommand::AssignRole(AssignRole {
                user_id,
                role: body.role,
                actor_roles,
                occurred_at: ctx.now,
            });
            svc.dispatch(user_id, "user", &command, |id| User::empty(id.into()))?;
            Ok(dto::UserView::from(&svc.load_user(user_id)?))
        })
        .await?;
    Ok(Json(view))
}

/// Attach a user to a company. Users may affiliate themselves; admins may
/// affiliate anyone.
pub async fn affiliate_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(body): Json<dto::AffiliateRequest>,
) -> Result<Json<dto::UserView>, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let view = services
        .execute(session.request_context(), actions::COMPANY_READ, move |svc, claims, ctx| {
            ensure_self_or_admin(svc, claims.sub, user_id)?;
            let company = svc.load_company(body.company_id)?;
            if !company.status().is_active() {
                return Err(ActionError::Guard {
                    guard: "company_active".to_string(),
                    message: format!("company {} is inactive", body.company_id),
                });
            }

            let command = UserCommand::AffiliateCompany(AffiliateCompany {
                user_id,
                company_id: body.company_id,
                occurred_at: ctx.now,
            });
            svc.dispatch(user_id, "user", &command, |id| User::empty(id.into()))?;
            Ok(dto::UserView::from(&svc.load_user(user_id)?))
        })
        .await?;
    Ok(Json(view))
}

fn ensure_self_or_admin(svc: &AppServices, caller: UserId, target: UserId) -> Result<(), ActionError> {
    if caller == target || svc.is_admin(caller)? {
        return Ok(());
    }
    Err(ActionError::Guard {
        guard: "self_or_admin".to_string(),
        message: "only the user or an admin may do this".to_string(),
    })
}
