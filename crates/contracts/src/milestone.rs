use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrowdesk_core::{DisputeId, Money, TransactionId, UserId};

use crate::status::StatusType;

/// Ordered sub-unit of a part-payment contract (`index` starts at 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub index: u32,
    pub name: String,
    pub amount: Money,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub status: StatusType,
    /// Escrow for this milestone has been deposited.
    pub funded: bool,
    /// The successful release transaction that closed this milestone.
    pub transaction_id: Option<TransactionId>,
}

impl Milestone {
    pub fn is_closed(&self) -> bool {
        self.status == StatusType::Closed
    }
}

/// A dispute raised against a contract, or one of its milestones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub raised_by: UserId,
    pub milestone_index: Option<u32>,
    pub reason: String,
    pub is_blocking: bool,
    pub is_resolved: bool,
    pub arbitrator: Option<UserId>,
    pub resolution: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl Dispute {
    /// Whether this dispute holds up work on `milestone` (`None` = the
    /// contract as a whole). Contract-level disputes block every milestone.
    pub fn blocks(&self, milestone: Option<u32>) -> bool {
        if !self.is_blocking || self.is_resolved {
            return false;
        }
        match (self.milestone_index, milestone) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }
}
