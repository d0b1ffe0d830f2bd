//! Background consumers of the event bus.

pub mod notification_worker;
pub mod projection_worker;

pub use notification_worker::NotificationWorker;
pub use projection_worker::{ProjectionWorker, WorkerHandle};
