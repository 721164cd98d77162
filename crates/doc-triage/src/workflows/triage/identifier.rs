//! Company tax identifier extraction.
//!
//! The identifier feeds the auto-generated tax-card artifact. Sources are
//! tried in a fixed order and the first well-formed value wins.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::adapters::CaseRecord;
use super::domain::{CaseContext, DocumentType, Evidence};

pub const TAX_ID_DIGITS: usize = 14;

static FORMATTED_TAX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b").expect("tax id pattern compiles")
});

const STRUCTURED_SOURCES: [(DocumentType, &str); 2] = [
    (DocumentType::TaxCard, "tax_id"),
    (DocumentType::CreditCommitteeMinutes, "tax_id"),
];
const LOOSE_KEYS: [&str; 3] = ["tax_id", "cnpj", "company_tax_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierSource {
    CaseContext,
    StructuredField,
    TextScan,
    CaseRecord,
}

impl IdentifierSource {
    pub const fn label(self) -> &'static str {
        match self {
            IdentifierSource::CaseContext => "case_context",
            IdentifierSource::StructuredField => "structured_field",
            IdentifierSource::TextScan => "text_scan",
            IdentifierSource::CaseRecord => "case_record",
        }
    }
}

impl fmt::Display for IdentifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentifier {
    pub value: String,
    pub source: IdentifierSource,
}

/// Digits of `raw` when they form a plausible identifier.
///
/// Only the digit count is checked; a run of one repeated digit is rejected.
pub fn normalize_tax_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != TAX_ID_DIGITS {
        return None;
    }
    let first = digits.chars().next()?;
    if digits.chars().all(|digit| digit == first) {
        return None;
    }
    Some(digits)
}

pub fn from_context(context: &CaseContext) -> Option<ResolvedIdentifier> {
    context
        .tax_id
        .as_deref()
        .and_then(normalize_tax_id)
        .or_else(|| {
            LOOSE_KEYS
                .iter()
                .filter_map(|key| context.extensions.get(*key))
                .find_map(value_tax_id)
        })
        .map(|value| ResolvedIdentifier {
            value,
            source: IdentifierSource::CaseContext,
        })
}

pub fn from_evidence(evidence: &Evidence) -> Option<ResolvedIdentifier> {
    STRUCTURED_SOURCES
        .iter()
        .filter_map(|(document, key)| evidence.get(*document).and_then(|doc| doc.text(key)))
        .find_map(|raw| normalize_tax_id(&raw))
        .or_else(|| {
            LOOSE_KEYS
                .iter()
                .filter_map(|key| evidence.unrecognized.get(*key))
                .find_map(value_tax_id)
        })
        .map(|value| ResolvedIdentifier {
            value,
            source: IdentifierSource::StructuredField,
        })
}

/// First well-formed identifier mentioned anywhere in `texts`.
pub fn scan_texts<'a, I>(texts: I) -> Option<ResolvedIdentifier>
where
    I: IntoIterator<Item = &'a str>,
{
    texts
        .into_iter()
        .flat_map(|text| FORMATTED_TAX_ID.find_iter(text))
        .find_map(|found| normalize_tax_id(found.as_str()))
        .map(|value| ResolvedIdentifier {
            value,
            source: IdentifierSource::TextScan,
        })
}

pub fn from_case_record(record: &CaseRecord) -> Option<ResolvedIdentifier> {
    let fields = LOOSE_KEYS
        .iter()
        .filter_map(|key| record.fields.get(*key))
        .find_map(|raw| normalize_tax_id(raw));
    let extensions = || {
        LOOSE_KEYS
            .iter()
            .filter_map(|key| record.extensions.get(*key))
            .find_map(value_tax_id)
    };

    fields
        .or_else(extensions)
        .or_else(|| {
            scan_texts(record.fields.values().map(String::as_str)).map(|found| found.value)
        })
        .map(|value| ResolvedIdentifier {
            value,
            source: IdentifierSource::CaseRecord,
        })
}

fn value_tax_id(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => normalize_tax_id(raw),
        Value::Number(number) => normalize_tax_id(&number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::triage::domain::DocumentEvidence;

    #[test]
    fn normalizes_formatted_and_bare_identifiers() {
        assert_eq!(
            normalize_tax_id("12.345.678/0001-95"),
            Some("12345678000195".to_string())
        );
        assert_eq!(
            normalize_tax_id("12345678000195"),
            Some("12345678000195".to_string())
        );
        assert_eq!(normalize_tax_id("1234567800019"), None);
        assert_eq!(normalize_tax_id("11.111.111/1111-11"), None);
    }

    #[test]
    fn context_identifier_falls_back_to_extensions() {
        let mut context = CaseContext::new("case-1", "Acme");
        assert_eq!(from_context(&context), None);

        context
            .extensions
            .insert("cnpj".to_string(), Value::from("12.345.678/0001-95"));
        let resolved = from_context(&context).expect("identifier from extensions");
        assert_eq!(resolved.value, "12345678000195");
        assert_eq!(resolved.source, IdentifierSource::CaseContext);
    }

    #[test]
    fn evidence_fields_take_precedence_over_loose_keys() {
        let evidence = Evidence::new()
            .with(
                DocumentType::TaxCard,
                DocumentEvidence::present(Some("2025-06-01"))
                    .with_field("tax_id", "98.765.432/0001-10"),
            );
        let resolved = from_evidence(&evidence).expect("identifier from tax card");
        assert_eq!(resolved.value, "98765432000110");
        assert_eq!(resolved.source, IdentifierSource::StructuredField);
    }

    #[test]
    fn text_scan_skips_malformed_matches() {
        let texts = [
            "Partner id 11.111.111/1111-11 on file",
            "Company registered under 12.345.678/0001-95 since 2010",
        ];
        let resolved = scan_texts(texts).expect("second text carries a valid id");
        assert_eq!(resolved.value, "12345678000195");
        assert_eq!(resolved.source, IdentifierSource::TextScan);
        assert_eq!(scan_texts(["no identifier here"]), None);
    }

    #[test]
    fn case_record_searches_fields_then_free_text() {
        let mut record = CaseRecord::default();
        record.fields.insert(
            "notes".to_string(),
            "Cliente CNPJ 12345678000195, aguardando".to_string(),
        );
        let resolved = from_case_record(&record).expect("identifier in notes");
        assert_eq!(resolved.value, "12345678000195");
        assert_eq!(resolved.source, IdentifierSource::CaseRecord);
    }
}
