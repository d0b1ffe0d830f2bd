//! Company directory projection.
//!
//! Builds company read models from `company` streams and tracks explicit
//! user→company affiliations from `user` streams. Implements
//! [`CompanyDirectory`] so contract creation can resolve parties from it.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use escrowdesk_auth::UserEvent;
use escrowdesk_companies::{Address, CompanyEvent, TaxIdentifiers};
use escrowdesk_contracts::CompanyDirectory;
use escrowdesk_core::{CompanyId, RecordStatus, UserId};
use escrowdesk_events::EventEnvelope;

use super::{Admit, ProjectionError, StreamCursors};
use crate::read_model::ReadModelStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyReadModel {
    pub company_id: CompanyId,
    pub name: String,
    pub contact_person: UserId,
    pub tax: TaxIdentifiers,
    pub address: Option<Address>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct DirectoryProjection<S> {
    store: S,
    affiliations: RwLock<HashMap<UserId, CompanyId>>,
    cursors: StreamCursors,
}

impl<S> DirectoryProjection<S>
where
    S: ReadModelStore<CompanyId, CompanyReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            affiliations: RwLock::new(HashMap::new()),
            cursors: StreamCursors::default(),
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let aggregate_type = envelope.aggregate_type();
        if aggregate_type != "company" && aggregate_type != "user" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.admit(aggregate_id, seq)? == Admit::AlreadySeen {
            return Ok(());
        }

        if aggregate_type == "company" {
            let event: CompanyEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            self.apply_company(event);
        } else {
            let event: UserEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            if let UserEvent::CompanyAffiliated(e) = event {
                if let Ok(mut affiliations) = self.affiliations.write() {
                    affiliations.insert(e.user_id, e.company_id);
                }
            }
        }

        self.cursors.advance(aggregate_id, seq);
        Ok(())
    }

    fn apply_company(&self, event: CompanyEvent) {
        match event {
            CompanyEvent::Registered(e) => {
                self.store.upsert(
                    e.company_id,
                    CompanyReadModel {
                        company_id: e.company_id,
                        name: e.name,
                        contact_person: e.contact_person,
                        tax: e.tax,
                        address: e.address,
                        status: RecordStatus::Active,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            CompanyEvent::DetailsUpdated(e) => {
                if let Some(mut model) = self.store.get(&e.company_id) {
                    model.name = e.name;
                    model.contact_person = e.contact_person;
                    model.address = e.address;
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.company_id, model);
                }
            }
            CompanyEvent::TaxIdentifiersUpdated(e) => {
                if let Some(mut model) = self.store.get(&e.company_id) {
                    model.tax = e.tax;
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.company_id, model);
                }
            }
            CompanyEvent::Deactivated(e) => {
                if let Some(mut model) = self.store.get(&e.company_id) {
                    model.status = RecordStatus::Inactive;
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.company_id, model);
                }
            }
        }
    }

    pub fn get(&self, company_id: &CompanyId) -> Option<CompanyReadModel> {
        self.store.get(company_id)
    }

    /// Active companies only.
    pub fn list(&self) -> Vec<CompanyReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|c| c.status.is_active())
            .collect()
    }

    /// Drop everything before a replay.
    pub fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
        if let Ok(mut affiliations) = self.affiliations.write() {
            affiliations.clear();
        }
    }
}

impl<S> CompanyDirectory for DirectoryProjection<S>
where
    S: ReadModelStore<CompanyId, CompanyReadModel>,
{
    /// Explicit affiliation wins; otherwise the active company the user is
    /// contact person for (linear scan).
    fn company_of_user(&self, user_id: UserId) -> Option<CompanyId> {
        let affiliated = self
            .affiliations
            .read()
            .ok()
            .and_then(|a| a.get(&user_id).copied());
        if affiliated.is_some() {
            return affiliated;
        }

        self.store
            .list()
            .into_iter()
            .find(|c| c.status.is_active() && c.contact_person == user_id)
            .map(|c| c.company_id)
    }

    fn company_is_active(&self, company_id: CompanyId) -> bool {
        self.store
            .get(&company_id)
            .is_some_and(|c| c.status.is_active())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use escrowdesk_auth::user::CompanyAffiliated;
    use escrowdesk_companies::{CompanyDeactivated, CompanyRegistered};

    use super::*;
    use crate::projections::envelope_of as envelope;
    use crate::read_model::InMemoryReadModelStore;

    type Store = Arc<InMemoryReadModelStore<CompanyId, CompanyReadModel>>;

    fn registered(company_id: CompanyId, contact: UserId) -> CompanyEvent {
        CompanyEvent::Registered(CompanyRegistered {
            company_id,
            name: "Acme Metals".to_string(),
            contact_person: contact,
            tax: TaxIdentifiers::default(),
            address: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn contact_person_resolves_to_company_until_deactivated() {
        let projection = DirectoryProjection::new(Store::default());
        let company_id = CompanyId::new();
        let contact = UserId::new();

        projection
            .apply_envelope(&envelope(company_id.into(), "company", 1, &registered(company_id, contact)))
            .unwrap();
        assert_eq!(projection.company_of_user(contact), Some(company_id));
        assert!(projection.company_is_active(company_id));

        let deactivated = CompanyEvent::Deactivated(CompanyDeactivated {
            company_id,
            reason: None,
            occurred_at: Utc::now(),
        });
        projection
            .apply_envelope(&envelope(company_id.into(), "company", 2, &deactivated))
            .unwrap();
        assert!(!projection.company_is_active(company_id));
        assert_eq!(projection.company_of_user(contact), None);
        assert!(projection.list().is_empty());
    }

    #[test]
    fn explicit_affiliation_beats_contact_person() {
        let projection = DirectoryProjection::new(Store::default());
        let user = UserId::new();
        let first = CompanyId::new();
        let second = CompanyId::new();

        projection
            .apply_envelope(&envelope(first.into(), "company", 1, &registered(first, user)))
            .unwrap();
        projection
            .apply_envelope(&envelope(second.into(), "company", 1, &registered(second, UserId::new())))
            .unwrap();

        let affiliated = UserEvent::CompanyAffiliated(CompanyAffiliated {
            user_id: user,
            company_id: second,
            occurred_at: Utc::now(),
        });
        projection
            .apply_envelope(&envelope(user.into(), "user", 1, &affiliated))
            .unwrap();

        assert_eq!(projection.company_of_user(user), Some(second));
    }

    #[test]
    fn redelivered_envelope_is_ignored() {
        let projection = DirectoryProjection::new(Store::default());
        let company_id = CompanyId::new();
        let env = envelope(company_id.into(), "company", 1, &registered(company_id, UserId::new()));

        projection.apply_envelope(&env).unwrap();
        projection.apply_envelope(&env).unwrap();

        assert_eq!(projection.list().len(), 1);
    }
}
