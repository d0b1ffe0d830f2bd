//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply history)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append to store (optimistic concurrency check)
//!   ↓  └─ stale version → back to 1 (bounded)
//! 5. Publish committed events to bus
//! ```
//!
//! A writer that loses an optimistic race does not see an infrastructure
//! error: it reloads and re-decides against the winner's state. The second
//! decision either succeeds, is an idempotent no-op, or fails with the guard
//! the new state no longer satisfies.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use escrowdesk_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use escrowdesk_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// How many times a command is decided before a persistent race is reported.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Deterministic domain failure (validation, guard, not found, ...).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Every attempt lost the optimistic race.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// Historical payloads could not be decoded into the aggregate's event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::Publish(msg) => DispatchError::Publish(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - Events are persisted before publication; if the append fails nothing is
///   published.
/// - Each dispatch touches exactly one aggregate stream.
/// - A publish failure is returned to the caller even though the events are
///   durable; consumers are idempotent so re-publication is safe.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_attempts: usize,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `command` against the aggregate identified by `aggregate_id`.
    ///
    /// Returns the committed events; an empty vector means the command was
    /// already satisfied and nothing was written.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: escrowdesk_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            let (aggregate, expected) = self.rehydrate(aggregate_id, &make_aggregate)?;

            let decided = aggregate.handle(command)?;
            if decided.is_empty() {
                debug!(%aggregate_id, aggregate_type, "command already satisfied");
                return Ok(vec![]);
            }

            let uncommitted = decided
                .iter()
                .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
                .collect::<Result<Vec<_>, _>>()?;

            match self.store.append(uncommitted, expected) {
                Ok(committed) => {
                    self.publish(&committed)?;
                    return Ok(committed);
                }
                Err(EventStoreError::Concurrency(msg)) if attempt < self.max_attempts => {
                    debug!(%aggregate_id, attempt, reason = %msg, "lost optimistic race; re-deciding");
                    attempt += 1;
                }
                Err(err) => {
                    if !matches!(err, EventStoreError::Concurrency(_)) {
                        warn!(%aggregate_id, aggregate_type, error = %err, "event append failed");
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Rehydrate an aggregate from its stream. Aggregates with no events come
    /// back in their `make_aggregate` state (callers check `is_created`).
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.rehydrate(aggregate_id, &make_aggregate)
            .map(|(aggregate, _)| aggregate)
    }

    fn rehydrate<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<(A, ExpectedVersion), DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;

        Ok((aggregate, ExpectedVersion::Exact(stream_version(&history))))
    }

    fn publish(&self, committed: &[StoredEvent]) -> Result<(), DispatchError> {
        for stored in committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;
    use escrowdesk_companies::{Company, CompanyCommand, DeactivateCompany, RegisterCompany};
    use escrowdesk_core::{AggregateRoot, CompanyId, UserId};
    use escrowdesk_events::InMemoryEventBus;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn register(company_id: CompanyId) -> CompanyCommand {
        CompanyCommand::Register(RegisterCompany {
            company_id,
            name: "Acme Metals".to_string(),
            contact_person: UserId::new(),
            gstn: None,
            pan: None,
            tan: None,
            address: None,
            occurred_at: Utc::now(),
        })
    }

    fn deactivate(company_id: CompanyId) -> CompanyCommand {
        CompanyCommand::Deactivate(DeactivateCompany {
            company_id,
            reason: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_publishes_and_reloads() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let company_id = CompanyId::new();

        let committed = dispatcher
            .dispatch(company_id.into(), "company", &register(company_id), |id| {
                Company::empty(id.into())
            })
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(sub.try_recv().unwrap().event_type(), "company.registered");

        let loaded: Company = dispatcher
            .load(company_id.into(), |id| Company::empty(id.into()))
            .unwrap();
        assert!(loaded.is_created());
        assert_eq!(loaded.version(), 1);
    }

    #[test]
    fn satisfied_command_writes_nothing() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let id = CompanyId::new();
        let make = |agg: AggregateId| Company::empty(agg.into());

        dispatcher.dispatch(id.into(), "company", &register(id), make).unwrap();
        dispatcher.dispatch(id.into(), "company", &deactivate(id), make).unwrap();
        let again = dispatcher.dispatch(id.into(), "company", &deactivate(id), make).unwrap();

        assert!(again.is_empty());
        assert_eq!(dispatcher.store().load_stream(id.into()).unwrap().len(), 2);
    }

    #[test]
    fn domain_errors_pass_through() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let id = CompanyId::new();

        let err = dispatcher
            .dispatch(id.into(), "company", &deactivate(id), |agg| Company::empty(agg.into()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound(_))));
    }

    /// Store that lets a competing writer in between the first load and append.
    struct RacingStore {
        inner: InMemoryEventStore,
        raced: AtomicBool,
        competitor: Vec<UncommittedEvent>,
    }

    impl EventStore for RacingStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.append(self.competitor.clone(), ExpectedVersion::Any)?;
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_all()
        }
    }

    #[test]
    fn losing_a_race_re_decides_against_the_winner() {
        let id = CompanyId::new();
        let make = |agg: AggregateId| Company::empty(agg.into());

        let inner = InMemoryEventStore::new();
        let seed: Bus = Arc::new(InMemoryEventBus::new());
        let seeding = CommandDispatcher::new(inner, seed);
        seeding.dispatch(id.into(), "company", &register(id), make).unwrap();

        // The competitor deactivates the company first.
        let company = seeding.load(id.into(), make).unwrap();
        let competitor = company
            .handle(&deactivate(id))
            .unwrap()
            .iter()
            .map(|ev| UncommittedEvent::from_typed(id.into(), "company", Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let (inner, _) = (seeding.store, seeding.bus);
        let store = RacingStore {
            inner,
            raced: AtomicBool::new(false),
            competitor,
        };
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(store, bus);

        // Our deactivation loses the race, reloads, and becomes a no-op.
        let ours = dispatcher.dispatch(id.into(), "company", &deactivate(id), make).unwrap();
        assert!(ours.is_empty());
        assert_eq!(dispatcher.store().load_stream(id.into()).unwrap().len(), 2);
    }
}
