//! Infrastructure layer: event storage, command dispatch, privilege stores,
//! projections, background workers and the authorize → transition workflow.

pub mod command_dispatcher;
pub mod event_store;
pub mod privilege_store;
pub mod projections;
pub mod read_model;
pub mod workers;
pub mod workflow;
