//! Local per-country required-field rules.
//!
//! These catch obviously incomplete locations before any network call;
//! the validation service remains authoritative for everything subtler
//! (postal code existence, subdivision spelling, VAT registry lookups).

use super::{FieldError, TaxField};
use crate::cart::types::TaxLocation;

/// Countries where a tax location is unusable without a postal code.
const POSTAL_CODE_REQUIRED: &[&str] = &[
    "US", "CA", "GB", "AU", "DE", "FR", "ES", "IT", "NL", "BE", "AT", "PT", "IE", "JP", "IN",
];

/// Countries where a tax location is unusable without a subdivision.
const SUBDIVISION_REQUIRED: &[&str] = &["CA", "US", "AU", "IN"];

/// Check a location against the local rules.
///
/// Returns an empty list when the location is plausible enough to send
/// to the validation service.
#[must_use]
pub fn check(location: &TaxLocation) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let country = location.country_code.trim();
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        errors.push(FieldError {
            field: TaxField::CountryCode,
            message: "Country must be a two-letter code".to_string(),
        });
        // Without a country the per-country rules below are meaningless.
        return errors;
    }
    let country = country.to_ascii_uppercase();

    if POSTAL_CODE_REQUIRED.contains(&country.as_str()) && is_blank(&location.postal_code) {
        errors.push(FieldError {
            field: TaxField::PostalCode,
            message: "Postal code is required for this country".to_string(),
        });
    }

    if SUBDIVISION_REQUIRED.contains(&country.as_str()) && is_blank(&location.subdivision) {
        errors.push(FieldError {
            field: TaxField::Subdivision,
            message: "State or province is required for this country".to_string(),
        });
    }

    if let Some(organization) = &location.organization
        && organization.trim().is_empty()
    {
        errors.push(FieldError {
            field: TaxField::Organization,
            message: "Organization must not be blank".to_string(),
        });
    }

    errors
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().is_none_or(|value| value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(country: &str) -> TaxLocation {
        TaxLocation {
            country_code: country.to_string(),
            postal_code: None,
            subdivision: None,
            city: None,
            organization: None,
        }
    }

    #[test]
    fn bad_country_code_is_the_only_error_reported() {
        let errors = check(&location("USA"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, TaxField::CountryCode);

        assert_eq!(check(&location("1A")).len(), 1);
    }

    #[test]
    fn us_requires_postal_code_and_subdivision() {
        let mut loc = location("US");
        let fields: Vec<TaxField> = check(&loc).iter().map(|e| e.field).collect();
        assert_eq!(fields, vec![TaxField::PostalCode, TaxField::Subdivision]);

        loc.postal_code = Some("94110".to_string());
        loc.subdivision = Some("CA".to_string());
        assert!(check(&loc).is_empty());
    }

    #[test]
    fn lowercase_country_codes_are_accepted() {
        let mut loc = location("de");
        loc.postal_code = Some("10115".to_string());
        assert!(check(&loc).is_empty());
    }

    #[test]
    fn countries_without_postal_rules_pass_bare() {
        assert!(check(&location("AE")).is_empty());
    }

    #[test]
    fn blank_organization_is_rejected() {
        let mut loc = location("DE");
        loc.postal_code = Some("10115".to_string());
        loc.organization = Some("  ".to_string());
        let errors = check(&loc);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, TaxField::Organization);
    }
}
