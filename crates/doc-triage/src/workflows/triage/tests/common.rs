use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::workflows::triage::adapters::memory::MemoryAdapters;
use crate::workflows::triage::classification::ClassificationEngine;
use crate::workflows::triage::domain::{
    CaseContext, DocumentEvidence, DocumentType, Evidence, Recipient,
};
use crate::workflows::triage::orchestrator::{Orchestrator, PipelineSettings};
use crate::workflows::triage::resilience::{
    BreakerConfig, ResilienceContext, ResiliencePolicy, RetryConfig,
};

pub(super) const TAX_ID: &str = "12.345.678/0001-95";
pub(super) const TAX_ID_DIGITS: &str = "12345678000195";

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
}

pub(super) fn valid_evidence() -> Evidence {
    Evidence::new()
        .with(
            DocumentType::TaxCard,
            DocumentEvidence::present(Some("2025-06-01")).with_field("tax_id", TAX_ID),
        )
        .with(
            DocumentType::SocialContract,
            DocumentEvidence::present(Some("2024-01-10"))
                .with_field("has_registration_number", true),
        )
        .with(
            DocumentType::PartnerIds,
            DocumentEvidence::present(None).with_field("legible", true),
        )
        .with(
            DocumentType::AddressProof,
            DocumentEvidence::present(Some("2025-05-20")).with_field("is_utility_bill", true),
        )
        .with(
            DocumentType::BalanceSheet,
            DocumentEvidence::present(Some("2025-03-31")).with_field("signed", true),
        )
}

/// Everything valid except the tax card, which is missing.
pub(super) fn missing_tax_card() -> Evidence {
    let mut evidence = valid_evidence();
    evidence.documents.remove(&DocumentType::TaxCard);
    evidence
}

/// Social contract missing and illegible partner ids; the rest valid.
pub(super) fn blocking_evidence() -> Evidence {
    let mut evidence = valid_evidence();
    evidence.documents.remove(&DocumentType::SocialContract);
    evidence.documents.insert(
        DocumentType::PartnerIds,
        DocumentEvidence::present(None).with_field("legible", false),
    );
    evidence
}

pub(super) fn recipient() -> Recipient {
    Recipient {
        name: "Ana Souza".to_string(),
        address: "+5511988887777".to_string(),
    }
}

pub(super) fn case(id: &str) -> CaseContext {
    let mut context = CaseContext::new(id, "Acme Comercio Ltda");
    context.tax_id = Some(TAX_ID.to_string());
    context.responsible = Some(recipient());
    context
}

pub(super) fn policy() -> ResiliencePolicy {
    ResiliencePolicy {
        retry: RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            exponential_base: 2.0,
            jitter: false,
        },
        breaker: BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        },
        call_timeout: Duration::from_secs(5),
        cold_start_timeout: Duration::from_secs(10),
        critical_services: vec!["record_store".to_string()],
    }
}

pub(super) struct Harness {
    pub(super) orchestrator: Orchestrator,
    pub(super) memory: MemoryAdapters,
    pub(super) resilience: Arc<ResilienceContext>,
}

pub(super) fn harness() -> Harness {
    harness_with(PipelineSettings::default())
}

pub(super) fn harness_with(settings: PipelineSettings) -> Harness {
    let memory = MemoryAdapters::default();
    let resilience = Arc::new(ResilienceContext::new(policy()));
    let orchestrator = Orchestrator::new(
        ClassificationEngine::default(),
        memory.adapters(),
        Arc::clone(&resilience),
        settings,
    );
    Harness {
        orchestrator,
        memory,
        resilience,
    }
}
