//! Projection implementations (read model builders).
//!
//! Projections consume committed event envelopes and build query-optimized
//! read models. All projections are:
//! - **Rebuildable**: can be reconstructed from the event store
//! - **Idempotent**: an envelope at or below the stream cursor is skipped,
//!   so at-least-once delivery is safe

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use escrowdesk_auth::StoreError;
use escrowdesk_core::AggregateId;
use escrowdesk_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError};

pub mod contracts;
pub mod directory;
pub mod transactions;
pub mod users;

pub use contracts::{ContractSummary, ContractsProjection};
pub use directory::{CompanyReadModel, DirectoryProjection};
pub use transactions::{TransactionReadModel, TransactionsProjection};
pub use users::{UserReadModel, UsersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("{0} projection state lock poisoned")]
    Poisoned(&'static str),

    #[error("failed to sync user-role links: {0}")]
    RoleLinks(#[from] StoreError),
}

/// Rebuild support: feed every stored event through `apply`, each stream in
/// order. Failures are logged and skipped; returns the number applied.
pub fn replay<S, F, E>(store: &S, mut apply: F) -> Result<usize, EventStoreError>
where
    S: EventStore + ?Sized,
    F: FnMut(&EventEnvelope<JsonValue>) -> Result<(), E>,
    E: core::fmt::Display,
{
    let events = store.load_all()?;
    let total = events.len();
    let mut applied = 0;
    for stored in &events {
        let envelope = stored.to_envelope();
        match apply(&envelope) {
            Ok(()) => applied += 1,
            Err(err) => warn!(
                aggregate_id = %stored.aggregate_id,
                sequence_number = stored.sequence_number,
                error = %err,
                "replay skipped event"
            ),
        }
    }
    info!(total, applied, "projection replay finished");
    Ok(applied)
}

/// Outcome of checking an envelope against a stream cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admit {
    Apply,
    AlreadySeen,
}

/// Compare `found` with the last applied sequence of its stream.
pub(crate) fn admit(last: u64, found: u64) -> Result<Admit, ProjectionError> {
    if found == 0 {
        return Err(ProjectionError::NonMonotonicSequence { last, found });
    }
    if found <= last {
        return Ok(Admit::AlreadySeen);
    }
    if found != last + 1 {
        return Err(ProjectionError::NonMonotonicSequence { last, found });
    }
    Ok(Admit::Apply)
}

/// Per-stream cursors for projections whose read model does not carry a version.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub(crate) fn admit(&self, aggregate_id: AggregateId, found: u64) -> Result<Admit, ProjectionError> {
        let last = match self.inner.read() {
            Ok(cursors) => cursors.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        };
        admit(last, found)
    }

    pub(crate) fn advance(&self, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(aggregate_id, sequence_number);
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

/// Wrap a typed event the way the dispatcher publishes it.
#[cfg(test)]
pub(crate) fn envelope_of<E>(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    sequence_number: u64,
    event: &E,
) -> escrowdesk_events::EventEnvelope<serde_json::Value>
where
    E: escrowdesk_events::Event + serde::Serialize,
{
    escrowdesk_events::EventEnvelope::new(
        uuid::Uuid::now_v7(),
        aggregate_id,
        aggregate_type,
        sequence_number,
        event.event_type(),
        event.occurred_at(),
        event.status_transition(),
        serde_json::to_value(event).unwrap(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_skips_replays_and_rejects_gaps() {
        assert_eq!(admit(0, 1).unwrap(), Admit::Apply);
        assert_eq!(admit(3, 4).unwrap(), Admit::Apply);
        assert_eq!(admit(3, 3).unwrap(), Admit::AlreadySeen);
        assert_eq!(admit(3, 1).unwrap(), Admit::AlreadySeen);
        assert!(matches!(
            admit(3, 5),
            Err(ProjectionError::NonMonotonicSequence { last: 3, found: 5 })
        ));
        assert!(admit(0, 0).is_err());
    }

    #[test]
    fn replay_rebuilds_from_the_store() {
        use crate::event_store::{InMemoryEventStore, UncommittedEvent};
        use escrowdesk_core::ExpectedVersion;

        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let event = |seq: u64| UncommittedEvent {
            event_id: uuid::Uuid::now_v7(),
            aggregate_id: id,
            aggregate_type: "contract".to_string(),
            event_type: format!("contract.test_{seq}"),
            event_version: 1,
            occurred_at: chrono::Utc::now(),
            status_transition: None,
            payload: JsonValue::Null,
        };
        store
            .append(vec![event(1), event(2), event(3)], ExpectedVersion::Exact(0))
            .unwrap();

        let mut seen = Vec::new();
        let applied = replay(&store, |env| {
            seen.push(env.sequence_number());
            if env.sequence_number() == 2 { Err("bad payload") } else { Ok(()) }
        })
        .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(applied, 2);
    }

    #[test]
    fn cursors_track_streams_independently() {
        let cursors = StreamCursors::default();
        let a = AggregateId::new();
        let b = AggregateId::new();

        assert_eq!(cursors.admit(a, 1).unwrap(), Admit::Apply);
        cursors.advance(a, 1);
        assert_eq!(cursors.admit(a, 1).unwrap(), Admit::AlreadySeen);
        assert_eq!(cursors.admit(b, 1).unwrap(), Admit::Apply);

        cursors.clear();
        assert_eq!(cursors.admit(a, 1).unwrap(), Admit::Apply);
    }
}
