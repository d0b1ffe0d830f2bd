use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_core::{Aggregate, AggregateRoot, CompanyId, DomainError, RecordStatus, UserId};
use escrowdesk_events::{Event, StatusTransition};

use crate::tax::TaxIdentifiers;

/// Default (registered) address of a company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("line1", &self.line1),
            ("city", &self.city),
            ("country", &self.country),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("address {field} cannot be empty")));
            }
        }
        Ok(())
    }
}

/// Aggregate root: Company.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    id: CompanyId,
    name: String,
    contact_person: Option<UserId>,
    tax: TaxIdentifiers,
    address: Option<Address>,
    status: RecordStatus,
    version: u64,
    created: bool,
}

impl Company {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CompanyId) -> Self {
        Self {
            id,
            name: String::new(),
            contact_person: None,
            tax: TaxIdentifiers::default(),
            address: None,
            status: RecordStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact_person(&self) -> Option<UserId> {
        self.contact_person
    }

    pub fn tax_identifiers(&self) -> &TaxIdentifiers {
        &self.tax
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("company {}", self.id)));
        }
        if !self.status.is_active() {
            return Err(DomainError::guard("company_active", "company is inactive"));
        }
        Ok(())
    }
}

impl AggregateRoot for Company {
    type Id = CompanyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCompany {
    pub company_id: CompanyId,
    pub name: String,
    pub contact_person: UserId,
    pub gstn: Option<String>,
    pub pan: Option<String>,
    pub tan: Option<String>,
    pub address: Option<Address>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCompanyDetails {
    pub company_id: CompanyId,
    /// If None, keep existing.
    pub name: Option<String>,
    pub contact_person: Option<UserId>,
    pub address: Option<Address>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTaxIdentifiers {
    pub company_id: CompanyId,
    pub gstn: Option<String>,
    pub pan: Option<String>,
    pub tan: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateCompany {
    pub company_id: CompanyId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyCommand {
    Register(RegisterCompany),
    UpdateDetails(UpdateCompanyDetails),
    UpdateTaxIdentifiers(UpdateTaxIdentifiers),
    Deactivate(DeactivateCompany),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRegistered {
    pub company_id: CompanyId,
    pub name: String,
    pub contact_person: UserId,
    pub tax: TaxIdentifiers,
    pub address: Option<Address>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyDetailsUpdated {
    pub company_id: CompanyId,
    pub name: String,
    pub contact_person: UserId,
    pub address: Option<Address>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxIdentifiersUpdated {
    pub company_id: CompanyId,
    pub tax: TaxIdentifiers,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyDeactivated {
    pub company_id: CompanyId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyEvent {
    Registered(CompanyRegistered),
    DetailsUpdated(CompanyDetailsUpdated),
    TaxIdentifiersUpdated(TaxIdentifiersUpdated),
    Deactivated(CompanyDeactivated),
}

impl Event for CompanyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CompanyEvent::Registered(_) => "company.registered",
            CompanyEvent::DetailsUpdated(_) => "company.details_updated",
            CompanyEvent::TaxIdentifiersUpdated(_) => "company.tax_identifiers_updated",
            CompanyEvent::Deactivated(_) => "company.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CompanyEvent::Registered(e) => e.occurred_at,
            CompanyEvent::DetailsUpdated(e) => e.occurred_at,
            CompanyEvent::TaxIdentifiersUpdated(e) => e.occurred_at,
            CompanyEvent::Deactivated(e) => e.occurred_at,
        }
    }

    fn status_transition(&self) -> Option<StatusTransition> {
        match self {
            CompanyEvent::Deactivated(_) => Some(StatusTransition::new("active", "inactive")),
            _ => None,
        }
    }
}

impl Aggregate for Company {
    type Command = CompanyCommand;
    type Event = CompanyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CompanyEvent::Registered(e) => {
                self.id = e.company_id;
                self.name = e.name.clone();
                self.contact_person = Some(e.contact_person);
                self.tax = e.tax.clone();
                self.address = e.address.clone();
                self.status = RecordStatus::Active;
                self.created = true;
            }
            CompanyEvent::DetailsUpdated(e) => {
                self.name = e.name.clone();
                self.contact_person = Some(e.contact_person);
                self.address = e.address.clone();
            }
            CompanyEvent::TaxIdentifiersUpdated(e) => self.tax = e.tax.clone(),
            CompanyEvent::Deactivated(_) => self.status = RecordStatus::Inactive,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CompanyCommand::Register(cmd) => self.handle_register(cmd),
            CompanyCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            CompanyCommand::UpdateTaxIdentifiers(cmd) => self.handle_update_tax(cmd),
            CompanyCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Company {
    fn handle_register(&self, cmd: &RegisterCompany) -> Result<Vec<CompanyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("company already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if let Some(address) = &cmd.address {
            address.validate()?;
        }

        let tax = TaxIdentifiers::normalized(
            cmd.gstn.as_deref(),
            cmd.pan.as_deref(),
            cmd.tan.as_deref(),
        )?;

        Ok(vec![CompanyEvent::Registered(CompanyRegistered {
            company_id: cmd.company_id,
            name: cmd.name.trim().to_string(),
            contact_person: cmd.contact_person,
            tax,
            address: cmd.address.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateCompanyDetails) -> Result<Vec<CompanyEvent>, DomainError> {
        self.ensure_live()?;

        let name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let address = cmd.address.clone().or_else(|| self.address.clone());
        if let Some(address) = &address {
            address.validate()?;
        }
        let contact_person = cmd
            .contact_person
            .or(self.contact_person)
            .ok_or_else(|| DomainError::validation("contact person is required"))?;

        Ok(vec![CompanyEvent::DetailsUpdated(CompanyDetailsUpdated {
            company_id: self.id,
            name: name.trim().to_string(),
            contact_person,
            address,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_tax(&self, cmd: &UpdateTaxIdentifiers) -> Result<Vec<CompanyEvent>, DomainError> {
        self.ensure_live()?;

        let tax = TaxIdentifiers::normalized(
            cmd.gstn.as_deref(),
            cmd.pan.as_deref(),
            cmd.tan.as_deref(),
        )?;
        if tax == self.tax {
            return Ok(vec![]);
        }

        Ok(vec![CompanyEvent::TaxIdentifiersUpdated(TaxIdentifiersUpdated {
            company_id: self.id,
            tax,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateCompany) -> Result<Vec<CompanyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("company {}", self.id)));
        }
        if !self.status.is_active() {
            return Ok(vec![]);
        }

        Ok(vec![CompanyEvent::Deactivated(CompanyDeactivated {
            company_id: self.id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
