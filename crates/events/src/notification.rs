//! Outbound status-change notifications (fire-and-forget).
//!
//! Notification/email/SMS adapters live outside the core. They receive
//! [`StatusChanged`] values through a [`NotificationSink`]; the core never
//! waits on, or fails because of, a sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_core::AggregateId;

use crate::envelope::EventEnvelope;

/// A lifecycle status change on some aggregate (e.g. a contract moving from
/// `created` to `in_progress`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    /// e.g. `contract.status_changed`, `transaction.status_changed`.
    pub topic: String,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    /// Set when a part of the aggregate changed, e.g. `milestone:2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub from: String,
    pub to: String,
    pub occurred_at: DateTime<Utc>,
}

impl StatusChanged {
    /// Build a notification from a published envelope, if it carries a status
    /// transition.
    pub fn from_envelope<E>(envelope: &EventEnvelope<E>) -> Option<Self> {
        let transition = envelope.status_transition()?;
        let resource = envelope
            .aggregate_type()
            .split('.')
            .next()
            .unwrap_or_else(|| envelope.aggregate_type());

        Some(Self {
            topic: format!("{resource}.status_changed"),
            aggregate_id: envelope.aggregate_id(),
            event_type: envelope.event_type().to_string(),
            subject: transition.subject.clone(),
            from: transition.from.clone(),
            to: transition.to.clone(),
            occurred_at: envelope.occurred_at(),
        })
    }
}

/// Consumer of status-change notifications.
pub trait NotificationSink: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn notify(&self, notification: &StatusChanged) -> Result<(), Self::Error>;
}

impl<S> NotificationSink for std::sync::Arc<S>
where
    S: NotificationSink + ?Sized,
{
    type Error = S::Error;

    fn notify(&self, notification: &StatusChanged) -> Result<(), Self::Error> {
        (**self).notify(notification)
    }
}

/// Default sink: records notifications as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    type Error = core::convert::Infallible;

    fn notify(&self, n: &StatusChanged) -> Result<(), Self::Error> {
        tracing::info!(
            topic = %n.topic,
            aggregate_id = %n.aggregate_id,
            event_type = %n.event_type,
            subject = n.subject.as_deref().unwrap_or("-"),
            from = %n.from,
            to = %n.to,
            "status changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StatusTransition;
    use uuid::Uuid;

    fn envelope(transition: Option<StatusTransition>) -> EventEnvelope<()> {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "contract",
            3,
            "contract.execution_started",
            Utc::now(),
            transition,
            (),
        )
    }

    #[test]
    fn envelopes_with_transitions_become_notifications() {
        let env = envelope(Some(StatusTransition::new("created", "in_progress")));
        let n = StatusChanged::from_envelope(&env).unwrap();
        assert_eq!(n.topic, "contract.status_changed");
        assert_eq!(n.from, "created");
        assert_eq!(n.to, "in_progress");
        assert_eq!(n.aggregate_id, env.aggregate_id());
        assert_eq!(n.subject, None);
    }

    #[test]
    fn subject_is_carried_onto_the_notification() {
        let transition = StatusTransition::new("in_progress", "closed").with_subject("milestone:2");
        let n = StatusChanged::from_envelope(&envelope(Some(transition))).unwrap();
        assert_eq!(n.topic, "contract.status_changed");
        assert_eq!(n.subject.as_deref(), Some("milestone:2"));
    }

    #[test]
    fn envelopes_without_transitions_are_ignored() {
        assert!(StatusChanged::from_envelope(&envelope(None)).is_none());
    }
}
