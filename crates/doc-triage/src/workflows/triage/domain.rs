use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier wrapper for a case tracked in the external pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CaseId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for CaseId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Documents the triage checklist knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    TaxCard,
    SocialContract,
    PowerOfAttorney,
    PartnerIds,
    AddressProof,
    BalanceSheet,
    FinancialStatements,
    RevenueStatement,
    CreditRelationshipDeclaration,
    VisitReport,
    CreditCommitteeMinutes,
}

impl DocumentType {
    pub const ALL: [DocumentType; 11] = [
        DocumentType::TaxCard,
        DocumentType::SocialContract,
        DocumentType::PowerOfAttorney,
        DocumentType::PartnerIds,
        DocumentType::AddressProof,
        DocumentType::BalanceSheet,
        DocumentType::FinancialStatements,
        DocumentType::RevenueStatement,
        DocumentType::CreditRelationshipDeclaration,
        DocumentType::VisitReport,
        DocumentType::CreditCommitteeMinutes,
    ];

    /// Key used in evidence payloads.
    pub const fn key(self) -> &'static str {
        match self {
            DocumentType::TaxCard => "tax_card",
            DocumentType::SocialContract => "social_contract",
            DocumentType::PowerOfAttorney => "power_of_attorney",
            DocumentType::PartnerIds => "partner_ids",
            DocumentType::AddressProof => "address_proof",
            DocumentType::BalanceSheet => "balance_sheet",
            DocumentType::FinancialStatements => "financial_statements",
            DocumentType::RevenueStatement => "revenue_statement",
            DocumentType::CreditRelationshipDeclaration => "credit_relationship_declaration",
            DocumentType::VisitReport => "visit_report",
            DocumentType::CreditCommitteeMinutes => "credit_committee_minutes",
        }
    }

    /// Kebab-case slug used in auto-action labels and artifact names.
    pub fn slug(self) -> String {
        self.key().replace('_', "-")
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            DocumentType::TaxCard => "Tax registration card issued within 90 days",
            DocumentType::SocialContract => "Latest consolidated social contract or bylaws",
            DocumentType::PowerOfAttorney => "Power of attorney with notarized signature",
            DocumentType::PartnerIds => "Identity documents of partners and signatories",
            DocumentType::AddressProof => "Proof of address (utility bill)",
            DocumentType::BalanceSheet => "Signed balance sheet",
            DocumentType::FinancialStatements => "Signed financial statements",
            DocumentType::RevenueStatement => "Signed revenue statement",
            DocumentType::CreditRelationshipDeclaration => "Credit relationship declaration",
            DocumentType::VisitReport => "Client visit report",
            DocumentType::CreditCommitteeMinutes => "Complete credit committee minutes",
        }
    }

    /// Accepts both `snake_case` and `kebab-case` spellings.
    pub fn from_key(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        DocumentType::ALL
            .into_iter()
            .find(|doc| doc.key() == normalized)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Static checklist entry describing how a document is judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRequirement {
    pub document_type: DocumentType,
    pub required: bool,
    pub max_age_days: Option<u32>,
    pub can_auto_generate: bool,
    pub blocking_if_missing: bool,
    pub blocking_if_invalid: bool,
    pub validation_rules: Vec<&'static str>,
}

/// Evidence submitted for one document type.
///
/// `fields` is the passthrough bucket for type-specific attributes such as
/// `has_registration_number` or `legible`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentEvidence {
    pub present: bool,
    pub issued_on: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

impl DocumentEvidence {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(issued_on: Option<&str>) -> Self {
        Self {
            present: true,
            issued_on: issued_on.map(str::to_string),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Boolean sub-field; non-boolean values read as missing.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    /// Non-empty textual (or numeric) sub-field.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return Self::absent();
        };

        let present = matches!(map.get("present"), Some(Value::Bool(true)));
        let issued_on = ["issued_on", "date"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        let fields = map
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "present" | "issued_on" | "date"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            present,
            issued_on,
            fields,
        }
    }
}

/// Evidence map for one classification call.
///
/// Built permissively from JSON: entries of the wrong shape read as absent and
/// keys that do not name a document land in `unrecognized`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct Evidence {
    pub documents: BTreeMap<DocumentType, DocumentEvidence>,
    pub unrecognized: BTreeMap<String, Value>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, document: DocumentType, evidence: DocumentEvidence) -> Self {
        self.documents.insert(document, evidence);
        self
    }

    pub fn get(&self, document: DocumentType) -> Option<&DocumentEvidence> {
        self.documents.get(&document)
    }

    pub fn is_present(&self, document: DocumentType) -> bool {
        self.get(document).map(|doc| doc.present).unwrap_or(false)
    }
}

/// Evidence payload that cannot be read at all.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("evidence must be a JSON object keyed by document type")]
    NotAnObject,
}

impl Evidence {
    /// Strict entry point for files and request bodies; entries inside the
    /// object are still read permissively.
    pub fn from_json_str(raw: &str) -> Result<Self, EvidenceError> {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(EvidenceError::NotAnObject);
        }
        Ok(Evidence::from(value))
    }
}

impl From<Value> for Evidence {
    fn from(value: Value) -> Self {
        let mut evidence = Evidence::default();
        let Value::Object(map) = value else {
            return evidence;
        };

        for (key, entry) in map {
            match DocumentType::from_key(&key) {
                Some(document) => {
                    evidence
                        .documents
                        .insert(document, DocumentEvidence::from_value(&entry));
                }
                None => {
                    evidence.unrecognized.insert(key, entry);
                }
            }
        }

        evidence
    }
}

impl Serialize for Evidence {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.unrecognized {
            map.insert(key.clone(), value.clone());
        }
        for (document, evidence) in &self.documents {
            let mut entry = serde_json::Map::new();
            entry.insert("present".to_string(), Value::Bool(evidence.present));
            if let Some(issued_on) = &evidence.issued_on {
                entry.insert("issued_on".to_string(), Value::String(issued_on.clone()));
            }
            for (key, value) in &evidence.fields {
                entry.insert(key.clone(), value.clone());
            }
            map.insert(document.key().to_string(), Value::Object(entry));
        }
        Value::Object(map).serialize(serializer)
    }
}

/// Derived verdict for one checklist requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentAnalysis {
    pub document_type: DocumentType,
    pub present: bool,
    pub valid: bool,
    pub issues: Vec<String>,
    pub age_days: Option<u32>,
    pub can_auto_generate: bool,
}

/// Closed set of triage verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Approved,
    BlockingPending,
    NonBlockingPending,
}

impl Classification {
    pub const fn label(self) -> &'static str {
        match self {
            Classification::Approved => "approved",
            Classification::BlockingPending => "blocking_pending",
            Classification::NonBlockingPending => "non_blocking_pending",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized classification value '{0}'")]
pub struct UnrecognizedClassification(pub String);

impl FromStr for Classification {
    type Err = UnrecognizedClassification;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "approved" | "aprovado" => Ok(Classification::Approved),
            "blocking_pending" | "blockingpending" | "pendencia_bloqueante" => {
                Ok(Classification::BlockingPending)
            }
            "non_blocking_pending" | "nonblockingpending" | "pendencia_naobloqueante" => {
                Ok(Classification::NonBlockingPending)
            }
            _ => Err(UnrecognizedClassification(raw.to_string())),
        }
    }
}

/// A single finding attached to a document or to a document group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

/// Automatic remediation suggested by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoAction {
    pub document_type: DocumentType,
}

impl AutoAction {
    pub fn label(&self) -> String {
        format!("generate {}", self.document_type.slug())
    }

    /// Stable artifact name keyed together with the case id for idempotent writes.
    pub fn artifact_name(&self) -> String {
        format!("{}.pdf", self.document_type.slug())
    }
}

/// Output of the classification engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub confidence: f32,
    pub document_analyses: Vec<DocumentAnalysis>,
    pub blocking_issues: Vec<Issue>,
    pub non_blocking_issues: Vec<Issue>,
    pub auto_actions: Vec<AutoAction>,
}

impl ClassificationResult {
    pub fn valid_documents(&self) -> usize {
        self.document_analyses
            .iter()
            .filter(|analysis| analysis.valid)
            .count()
    }
}

/// Recipient of outbound notifications (a phone number or messaging handle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub address: String,
}

/// Case metadata supplied by the inbound boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseContext {
    pub case_id: CaseId,
    pub display_name: String,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub responsible: Option<Recipient>,
    #[serde(default, flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl CaseContext {
    pub fn new(case_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            case_id: CaseId(case_id.into()),
            display_name: display_name.into(),
            tax_id: None,
            pipeline_id: None,
            responsible: None,
            extensions: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evidence_degrades_malformed_entries_to_absent() {
        let evidence = Evidence::from(json!({
            "tax_card": "yes",
            "social_contract": { "present": "true" },
            "partner_ids": { "present": true, "legible": false },
            "company_notes": { "anything": 1 }
        }));

        assert!(!evidence.is_present(DocumentType::TaxCard));
        assert!(!evidence.is_present(DocumentType::SocialContract));
        assert!(evidence.is_present(DocumentType::PartnerIds));
        assert_eq!(
            evidence
                .get(DocumentType::PartnerIds)
                .and_then(|doc| doc.flag("legible")),
            Some(false)
        );
        assert!(evidence.unrecognized.contains_key("company_notes"));
    }

    #[test]
    fn evidence_accepts_kebab_case_keys_and_date_alias() {
        let evidence = Evidence::from(json!({
            "address-proof": { "present": true, "date": "2024-01-10" }
        }));

        let proof = evidence
            .get(DocumentType::AddressProof)
            .expect("kebab key recognized");
        assert_eq!(proof.issued_on.as_deref(), Some("2024-01-10"));
    }

    #[test]
    fn non_object_payload_yields_empty_evidence() {
        let evidence = Evidence::from(json!([1, 2, 3]));
        assert!(evidence.documents.is_empty());
        assert!(evidence.unrecognized.is_empty());
    }

    #[test]
    fn classification_parses_known_tags_only() {
        assert_eq!(
            "Pendencia_Bloqueante".parse::<Classification>(),
            Ok(Classification::BlockingPending)
        );
        assert_eq!(
            "non-blocking-pending".parse::<Classification>(),
            Ok(Classification::NonBlockingPending)
        );
        assert!("escalated".parse::<Classification>().is_err());
    }
}
