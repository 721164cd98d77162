use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::super::domain::{DocumentEvidence, DocumentRequirement, DocumentType};

/// Age assigned to documents whose issue date is missing or unreadable.
pub const UNKNOWN_AGE_DAYS: u32 = u32::MAX;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"];

const COMMITTEE_FIELDS: [&str; 4] = ["company_name", "tax_id", "approved_limit", "approval_date"];

pub(crate) fn parse_issue_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|datetime| datetime.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|datetime| datetime.date_naive())
        })
}

/// Days elapsed since `issued_on`; missing or unparsable dates are maximally old.
pub(crate) fn document_age(issued_on: Option<&str>, today: NaiveDate) -> u32 {
    match issued_on.and_then(parse_issue_date) {
        Some(date) => {
            let days = today.signed_duration_since(date).num_days().max(0);
            u32::try_from(days).unwrap_or(UNKNOWN_AGE_DAYS)
        }
        None => UNKNOWN_AGE_DAYS,
    }
}

pub(crate) struct RuleOutcome {
    pub age_days: Option<u32>,
    pub failures: Vec<String>,
}

/// Apply the age limit and the type-specific checks to a present document.
pub(crate) fn validate_present(
    requirement: &DocumentRequirement,
    evidence: &DocumentEvidence,
    today: NaiveDate,
) -> RuleOutcome {
    let mut failures = Vec::new();
    let mut age_days = None;

    if let Some(max_age) = requirement.max_age_days {
        let age = document_age(evidence.issued_on.as_deref(), today);
        if age == UNKNOWN_AGE_DAYS {
            failures.push("Issue date missing or unreadable; document treated as expired".to_string());
        } else {
            age_days = Some(age);
            if age > max_age {
                failures.push(format!(
                    "Document expired: {age} days old (maximum {max_age})"
                ));
            }
        }
    } else if let Some(raw) = evidence.issued_on.as_deref() {
        let age = document_age(Some(raw), today);
        if age != UNKNOWN_AGE_DAYS {
            age_days = Some(age);
        }
    }

    failures.extend(type_specific_failures(requirement.document_type, evidence));

    RuleOutcome { age_days, failures }
}

fn type_specific_failures(document: DocumentType, evidence: &DocumentEvidence) -> Vec<String> {
    let mut failures = Vec::new();

    match document {
        DocumentType::TaxCard => {
            if let Some(tax_id) = evidence.text("tax_id") {
                let digits = tax_id.chars().filter(char::is_ascii_digit).count();
                if digits != super::super::identifier::TAX_ID_DIGITS {
                    failures.push(format!(
                        "Tax id '{tax_id}' does not have {} digits",
                        super::super::identifier::TAX_ID_DIGITS
                    ));
                }
            }
        }
        DocumentType::SocialContract => {
            if evidence.flag("has_registration_number") == Some(false) {
                failures.push("Latest consolidation lacks a registration number".to_string());
            }
        }
        DocumentType::PowerOfAttorney => {
            if evidence.flag("notarized") == Some(false) {
                failures.push("Signature is neither notarized nor digital".to_string());
            }
            if evidence.flag("in_force") == Some(false) {
                failures.push("Power of attorney is no longer in force".to_string());
            }
        }
        DocumentType::PartnerIds => {
            if evidence.flag("legible") == Some(false) {
                failures.push("Identity documents are illegible".to_string());
            }
            if evidence.flag("expired") == Some(true) {
                failures.push("Identity documents are expired".to_string());
            }
        }
        DocumentType::AddressProof => {
            if evidence.flag("is_utility_bill") == Some(false) {
                failures.push("Must be a utility bill showing consumption data".to_string());
            }
        }
        DocumentType::BalanceSheet
        | DocumentType::FinancialStatements
        | DocumentType::RevenueStatement
        | DocumentType::CreditRelationshipDeclaration
        | DocumentType::VisitReport => {
            if evidence.flag("signed") == Some(false) {
                failures.push("Missing required signature".to_string());
            }
        }
        DocumentType::CreditCommitteeMinutes => {
            let missing: Vec<&str> = COMMITTEE_FIELDS
                .iter()
                .copied()
                .filter(|field| evidence.text(field).is_none())
                .collect();
            if !missing.is_empty() {
                failures.push(format!("Required fields missing: {}", missing.join(", ")));
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
    }

    #[test]
    fn parses_supported_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date");
        for raw in [
            "2025-06-01",
            "01/06/2025",
            "2025-06-01T08:30:00",
            "2025-06-01T08:30:00Z",
            "2025-06-01 08:30:00",
            "2025-06-01T08:30:00-03:00",
        ] {
            assert_eq!(parse_issue_date(raw), Some(expected), "format {raw}");
        }
    }

    #[test]
    fn unreadable_dates_are_maximally_old() {
        assert_eq!(document_age(Some("last spring"), today()), UNKNOWN_AGE_DAYS);
        assert_eq!(document_age(None, today()), UNKNOWN_AGE_DAYS);
    }

    #[test]
    fn future_dates_have_zero_age() {
        assert_eq!(document_age(Some("2025-07-15"), today()), 0);
    }

    #[test]
    fn committee_minutes_report_every_missing_field() {
        let evidence = DocumentEvidence::present(None)
            .with_field("company_name", "Acme Ltda")
            .with_field("approved_limit", 250000);
        let failures = type_specific_failures(DocumentType::CreditCommitteeMinutes, &evidence);
        assert_eq!(
            failures,
            vec!["Required fields missing: tax_id, approval_date".to_string()]
        );
    }
}
