//! Fire-and-forget status-change notifications.
//!
//! Turns every published envelope that carries a status transition into a
//! [`StatusChanged`] and hands it to a [`NotificationSink`]. Sink failures are
//! logged and dropped; they never reach the command that caused the change.

use std::io;

use serde_json::Value as JsonValue;
use tracing::warn;

use escrowdesk_events::{EventBus, EventEnvelope, NotificationSink, StatusChanged};

use super::projection_worker::{ProjectionWorker, WorkerHandle};

#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    pub fn spawn<B, N>(bus: &B, sink: N) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>> + ?Sized,
        N: NotificationSink + 'static,
    {
        ProjectionWorker::spawn(
            "notification-worker",
            bus,
            move |envelope: EventEnvelope<JsonValue>| {
                deliver(&sink, &envelope);
                Ok::<(), core::convert::Infallible>(())
            },
        )
    }
}

/// Notify `sink` about `envelope` if it changed a status. Returns whether a
/// notification was produced.
pub fn deliver<N>(sink: &N, envelope: &EventEnvelope<JsonValue>) -> bool
where
    N: NotificationSink + ?Sized,
{
    let Some(notification) = StatusChanged::from_envelope(envelope) else {
        return false;
    };
    if let Err(err) = sink.notify(&notification) {
        warn!(
            topic = %notification.topic,
            aggregate_id = %notification.aggregate_id,
            error = ?err,
            "notification delivery failed"
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use escrowdesk_core::AggregateId;
    use escrowdesk_events::StatusTransition;
    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<StatusChanged>>,
        fail: bool,
    }

    impl NotificationSink for Recorder {
        type Error = &'static str;

        fn notify(&self, n: &StatusChanged) -> Result<(), Self::Error> {
            self.seen.lock().unwrap().push(n.clone());
            if self.fail { Err("smtp down") } else { Ok(()) }
        }
    }

    fn envelope(transition: Option<StatusTransition>) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "contract",
            3,
            "contract.execution_started",
            Utc::now(),
            transition,
            JsonValue::Null,
        )
    }

    #[test]
    fn only_status_transitions_are_notified() {
        let sink = Recorder::default();

        assert!(!deliver(&sink, &envelope(None)));
        assert!(deliver(
            &sink,
            &envelope(Some(StatusTransition::new("created", "in_progress")))
        ));

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "contract.status_changed");
        assert_eq!(seen[0].to, "in_progress");
    }

    #[test]
    fn milestone_transitions_are_notified_with_their_index() {
        use escrowdesk_contracts::{ContractEvent, MilestoneClosed, MilestoneStarted};
        use escrowdesk_core::{ContractId, TransactionId};
        use escrowdesk_events::Event;

        let sink = Recorder::default();
        let contract_id = ContractId::new();
        let events = [
            ContractEvent::MilestoneStarted(MilestoneStarted {
                contract_id,
                index: 2,
                occurred_at: Utc::now(),
            }),
            ContractEvent::MilestoneClosed(MilestoneClosed {
                contract_id,
                index: 2,
                transaction_id: TransactionId::new(),
                occurred_at: Utc::now(),
            }),
        ];
        for (seq, event) in events.iter().enumerate() {
            let env = EventEnvelope::new(
                Uuid::now_v7(),
                contract_id.into(),
                "contract",
                seq as u64 + 5,
                event.event_type(),
                event.occurred_at(),
                event.status_transition(),
                JsonValue::Null,
            );
            assert!(deliver(&sink, &env));
        }

        let seen = sink.seen.lock().unwrap();
        let changes: Vec<_> = seen
            .iter()
            .map(|n| (n.topic.as_str(), n.subject.as_deref(), n.from.as_str(), n.to.as_str()))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("contract.status_changed", Some("milestone:2"), "created", "in_progress"),
                ("contract.status_changed", Some("milestone:2"), "in_progress", "closed"),
            ]
        );
    }

    #[test]
    fn sink_failure_is_swallowed() {
        let sink = Recorder {
            fail: true,
            ..Recorder::default()
        };
        assert!(deliver(
            &sink,
            &envelope(Some(StatusTransition::new("in_progress", "closed")))
        ));
    }
}
