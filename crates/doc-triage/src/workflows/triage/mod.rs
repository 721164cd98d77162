//! Document triage: classify submitted evidence, then drive the case through
//! the pipeline with every external call guarded by the resilience layer.

pub mod adapters;
pub mod classification;
pub mod domain;
pub mod identifier;
pub mod orchestrator;
pub mod report;
pub mod resilience;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use adapters::{
    AdapterError, Adapters, ArtifactGenerator, CaseManagement, CaseRecord, DocumentRecord,
    MessageReceipt, Messaging, NotificationRecord, ObjectStorage, RecordStore,
};
pub use classification::{ClassificationEngine, RequirementCatalog};
pub use domain::{
    AutoAction, CaseContext, CaseId, Classification, ClassificationResult, DocumentAnalysis,
    DocumentEvidence, DocumentRequirement, DocumentType, Evidence, EvidenceError, Issue,
    Recipient, UnrecognizedClassification,
};
pub use orchestrator::{
    ActionKind, ActionOutcome, ActionRecord, OrchestrationError, OrchestrationResult,
    OrchestrationState, Orchestrator, PhaseIds, PipelineSettings,
};
pub use resilience::{
    AlertConfig, BreakerConfig, ErrorKind, OpsAlerter, ResilienceContext, ResilienceError,
    ResiliencePolicy, RetryConfig, ServiceError, Severity,
};
pub use router::triage_router;
pub use service::{ClassificationView, TriageRequest, TriageService, TriageServiceError};
