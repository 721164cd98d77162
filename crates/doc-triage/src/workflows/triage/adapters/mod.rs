//! Boundaries to the external collaborators the orchestrator drives.
//!
//! Every method is one network round-trip in production; the orchestrator
//! wraps each call with the resilience layer and never talks to a vendor API
//! directly.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{CaseId, Recipient};

pub const CASE_MANAGEMENT: &str = "case_management";
pub const ARTIFACT_GENERATOR: &str = "artifact_generator";
pub const OBJECT_STORAGE: &str = "object_storage";
pub const MESSAGING: &str = "messaging";
pub const RECORD_STORE: &str = "record_store";

/// Failure surfaced by an adapter, prior to classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("service not ready: {0}")]
    NotReady(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("storage backend error: {0}")]
    Storage(String),
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AdapterError::Http { status, .. } => Some(*status),
            AdapterError::NotReady(_) => Some(503),
            _ => None,
        }
    }

    /// Cold-start signal from a downstream service that is still booting.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, AdapterError::NotReady(_))
    }
}

/// Snapshot of a case as held by the case-management pipeline.
///
/// Attributes outside `phase_id` and `fields` are kept in `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub phase_id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default, flatten)]
    pub extensions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub success: bool,
    pub message_id: Option<String>,
}

/// Stored document row, unique on `(case_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub case_id: CaseId,
    pub name: String,
    pub tag: String,
    pub url: String,
}

/// Ledger row proving a notification went out for `(case_id, phase_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub case_id: CaseId,
    pub phase_id: String,
    pub recipient: String,
    pub message_id: Option<String>,
}

#[async_trait]
pub trait CaseManagement: Send + Sync {
    async fn get_case(&self, case_id: &CaseId) -> Result<CaseRecord, AdapterError>;
    async fn move_case(&self, case_id: &CaseId, phase_id: &str) -> Result<bool, AdapterError>;
    async fn update_field(
        &self,
        case_id: &CaseId,
        field_key: &str,
        text: &str,
    ) -> Result<bool, AdapterError>;
}

#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, identifier: &str) -> Result<Vec<u8>, AdapterError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Returns the public URL of the stored object; overwrites on the same key.
    async fn store(
        &self,
        case_id: &CaseId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AdapterError>;
}

#[async_trait]
pub trait Messaging: Send + Sync {
    async fn send(&self, recipient: &Recipient, text: &str) -> Result<MessageReceipt, AdapterError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert-or-update keyed by `(case_id, name)`.
    async fn upsert_document(&self, record: DocumentRecord) -> Result<(), AdapterError>;
    async fn documents_for_case(&self, case_id: &CaseId)
        -> Result<Vec<DocumentRecord>, AdapterError>;
    async fn notification_for(
        &self,
        case_id: &CaseId,
        phase_id: &str,
    ) -> Result<Option<NotificationRecord>, AdapterError>;
    /// Insert-or-update keyed by `(case_id, phase_id)`.
    async fn record_notification(&self, record: NotificationRecord) -> Result<(), AdapterError>;
}

/// Bundle of adapters handed to the orchestrator.
#[derive(Clone)]
pub struct Adapters {
    pub cases: Arc<dyn CaseManagement>,
    pub artifacts: Arc<dyn ArtifactGenerator>,
    pub storage: Arc<dyn ObjectStorage>,
    pub messaging: Arc<dyn Messaging>,
    pub records: Arc<dyn RecordStore>,
}
