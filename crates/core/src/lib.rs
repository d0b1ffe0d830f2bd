//! `escrowdesk-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod status;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, CompanyId, ContractId, DisputeId, PrivilegeId, RoleId, TransactionId, UserId,
};
pub use money::{BasisPoints, Money};
pub use status::RecordStatus;
pub use value_object::ValueObject;
