//! Users projection.
//!
//! Builds the user directory from `user` streams and keeps the privilege
//! store's user-role links in step with role and status events. A deactivated
//! user keeps their roles in the read model but every link goes inactive, so
//! the authorization engine stops granting them anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use escrowdesk_auth::{RoleKind, UserEvent};
use escrowdesk_core::{CompanyId, RecordStatus, UserId};
use escrowdesk_events::EventEnvelope;

use super::{Admit, ProjectionError, admit};
use crate::privilege_store::UserRoleLinks;
use crate::read_model::ReadModelStore;

/// User read model for queries. Credentials are never projected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReadModel {
    pub user_id: UserId,
    pub display_id: String,
    pub email: String,
    pub roles: Vec<RoleKind>,
    pub company_id: Option<CompanyId>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

pub struct UsersProjection<S, L> {
    store: S,
    links: L,
}

impl<S, L> UsersProjection<S, L>
where
    S: ReadModelStore<UserId, UserReadModel>,
    L: UserRoleLinks,
{
    pub fn new(store: S, links: L) -> Self {
        Self { store, links }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "user" {
            return Ok(());
        }

        let user_id = UserId::from(envelope.aggregate_id());
        let seq = envelope.sequence_number();
        let existing = self.store.get(&user_id);
        let last = existing.as_ref().map(|m| m.version).unwrap_or(0);
        if admit(last, seq)? == Admit::AlreadySeen {
            return Ok(());
        }

        let event: UserEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        if let UserEvent::Registered(e) = event {
            for role in &e.initial_roles {
                self.links.set_user_role(e.user_id, *role, RecordStatus::Active)?;
            }
            self.store.upsert(
                e.user_id,
                UserReadModel {
                    user_id: e.user_id,
                    display_id: e.display_id,
                    email: e.email,
                    roles: e.initial_roles,
                    company_id: None,
                    status: RecordStatus::Active,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                    version: seq,
                },
            );
            return Ok(());
        }

        let Some(mut model) = existing else {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        };

        // Links first: if the store write fails the envelope is retried.
        match &event {
            UserEvent::Registered(_) => {}
            UserEvent::RoleAssigned(e) => {
                let status = if model.status.is_active() {
                    RecordStatus::Active
                } else {
                    RecordStatus::Inactive
                };
                self.links.set_user_role(e.user_id, e.role, status)?;
                if !model.roles.contains(&e.role) {
                    model.roles.push(e.role);
                }
            }
            UserEvent::RoleRevoked(e) => {
                self.links.set_user_role(e.user_id, e.role, RecordStatus::Inactive)?;
                model.roles.retain(|r| *r != e.role);
            }
            UserEvent::CompanyAffiliated(e) => model.company_id = Some(e.company_id),
            UserEvent::Deactivated(e) => {
                for role in &model.roles {
                    self.links.set_user_role(e.user_id, *role, RecordStatus::Inactive)?;
                }
                model.status = RecordStatus::Inactive;
            }
            UserEvent::Reactivated(e) => {
                for role in &model.roles {
                    self.links.set_user_role(e.user_id, *role, RecordStatus::Active)?;
                }
                model.status = RecordStatus::Active;
            }
        }

        model.updated_at = escrowdesk_events::Event::occurred_at(&event);
        model.version = seq;
        self.store.upsert(user_id, model);
        Ok(())
    }

    pub fn get(&self, user_id: &UserId) -> Option<UserReadModel> {
        self.store.get(user_id)
    }

    pub fn list(&self) -> Vec<UserReadModel> {
        self.store.list()
    }

    /// Lookup by display id (linear scan).
    pub fn get_by_display_id(&self, display_id: &str) -> Option<UserReadModel> {
        let wanted = display_id.trim();
        self.store
            .list()
            .into_iter()
            .find(|u| u.display_id.eq_ignore_ascii_case(wanted))
    }

    /// Lookup by email (linear scan).
    pub fn get_by_email(&self, email: &str) -> Option<UserReadModel> {
        let normalized = email.trim().to_lowercase();
        self.store.list().into_iter().find(|u| u.email == normalized)
    }

    pub fn reset(&self) {
        self.store.clear();
    }
}
