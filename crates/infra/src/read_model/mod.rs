//! Disposable read model storage.
//!
//! Read models are rebuilt from event streams, so stores only need simple
//! keyed access.

pub mod store;

pub use store::{InMemoryReadModelStore, ReadModelStore};
