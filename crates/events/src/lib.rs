//! Domain events, the event envelope, pub/sub mechanics, and outbound
//! status-change notifications.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::{Event, StatusTransition};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::{NotificationSink, StatusChanged, TracingNotificationSink};
