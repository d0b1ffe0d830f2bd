//! Explicit record lifecycle status (replaces boolean soft-delete flags).

use serde::{Deserialize, Serialize};

/// Whether a stored record currently participates in lookups.
///
/// Records are never physically removed; deactivation flips this status and
/// every query filters on it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn is_active(self) -> bool {
        self == RecordStatus::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RecordStatus::Active),
            "inactive" => Some(RecordStatus::Inactive),
            _ => None,
        }
    }
}

impl From<bool> for RecordStatus {
    /// Maps a legacy `is_active` flag.
    fn from(is_active: bool) -> Self {
        if is_active {
            RecordStatus::Active
        } else {
            RecordStatus::Inactive
        }
    }
}

impl core::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
