//! Companies domain module (event-sourced).
//!
//! Organizational entities that own contracts: contact person, tax
//! identifiers, default address. Pure domain logic (no IO, no HTTP, no storage).

pub mod company;
pub mod tax;

pub use company::{
    Address, Company, CompanyCommand, CompanyDeactivated, CompanyDetailsUpdated, CompanyEvent,
    CompanyRegistered, DeactivateCompany, RegisterCompany, TaxIdentifiersUpdated,
    UpdateCompanyDetails, UpdateTaxIdentifiers,
};
pub use tax::TaxIdentifiers;
