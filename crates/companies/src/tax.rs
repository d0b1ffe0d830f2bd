use serde::{Deserialize, Serialize};

use escrowdesk_core::{DomainError, ValueObject};

/// Indian tax identifiers held by a company. Each is optional; when present it
/// is stored uppercased and must have the expected length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxIdentifiers {
    pub gstn: Option<String>,
    pub pan: Option<String>,
    pub tan: Option<String>,
}

impl ValueObject for TaxIdentifiers {}

const GSTN_LEN: usize = 15;
const PAN_LEN: usize = 10;
const TAN_LEN: usize = 10;

impl TaxIdentifiers {
    /// Normalize (trim, uppercase, drop blanks) and validate shapes.
    pub fn normalized(
        gstn: Option<&str>,
        pan: Option<&str>,
        tan: Option<&str>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            gstn: normalize("gstn", gstn, GSTN_LEN)?,
            pan: normalize("pan", pan, PAN_LEN)?,
            tan: normalize("tan", tan, TAN_LEN)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.gstn.is_none() && self.pan.is_none() && self.tan.is_none()
    }
}

fn normalize(field: &str, value: Option<&str>, len: usize) -> Result<Option<String>, DomainError> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let upper = raw.to_ascii_uppercase();
    if upper.len() != len || !upper.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DomainError::validation(format!(
            "{field} must be {len} alphanumeric characters"
        )));
    }
    Ok(Some(upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identifiers_are_uppercased() {
        let ids =
            TaxIdentifiers::normalized(Some("27aapfu0939f1zv"), Some(" aapfu0939f "), None).unwrap();
        assert_eq!(ids.gstn.as_deref(), Some("27AAPFU0939F1ZV"));
        assert_eq!(ids.pan.as_deref(), Some("AAPFU0939F"));
        assert_eq!(ids.tan, None);
    }

    #[test]
    fn blank_identifiers_are_absent() {
        let ids = TaxIdentifiers::normalized(Some("  "), None, Some("")).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        assert!(TaxIdentifiers::normalized(None, Some("ABC"), None).is_err());
        assert!(TaxIdentifiers::normalized(None, None, Some("MUMA-12345")).is_err());
    }

    proptest! {
        #[test]
        fn any_ten_alphanumerics_are_a_valid_pan(pan in "[a-zA-Z0-9]{10}") {
            let ids = TaxIdentifiers::normalized(None, Some(&pan), None).unwrap();
            prop_assert_eq!(ids.pan, Some(pan.to_ascii_uppercase()));
        }
    }
}
