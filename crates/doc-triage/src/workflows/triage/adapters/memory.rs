//! In-process adapters for local runs and tests.
//!
//! Each adapter counts its calls per operation and can be scripted to fail,
//! so callers can assert both side effects and "no network attempt".

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    AdapterError, Adapters, ArtifactGenerator, CaseManagement, CaseRecord, DocumentRecord,
    MessageReceipt, Messaging, NotificationRecord, ObjectStorage, RecordStore,
};
use crate::workflows::triage::domain::{CaseId, Recipient};

/// Scripted failures plus per-operation call counters.
#[derive(Debug, Default)]
pub struct FaultPlan {
    queued: Mutex<VecDeque<AdapterError>>,
    persistent: Mutex<Option<AdapterError>>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl FaultPlan {
    /// Fail the next call with `error`; queued failures are consumed in order.
    pub fn fail_next(&self, error: AdapterError) {
        self.queued
            .lock()
            .expect("fault plan mutex poisoned")
            .push_back(error);
    }

    /// Fail every call until [`FaultPlan::heal`].
    pub fn fail_always(&self, error: AdapterError) {
        *self.persistent.lock().expect("fault plan mutex poisoned") = Some(error);
    }

    pub fn heal(&self) {
        self.queued.lock().expect("fault plan mutex poisoned").clear();
        *self.persistent.lock().expect("fault plan mutex poisoned") = None;
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("fault plan mutex poisoned")
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .expect("fault plan mutex poisoned")
            .values()
            .sum()
    }

    fn enter(&self, operation: &'static str) -> Result<(), AdapterError> {
        *self
            .calls
            .lock()
            .expect("fault plan mutex poisoned")
            .entry(operation)
            .or_default() += 1;

        if let Some(error) = self
            .queued
            .lock()
            .expect("fault plan mutex poisoned")
            .pop_front()
        {
            return Err(error);
        }
        match self
            .persistent
            .lock()
            .expect("fault plan mutex poisoned")
            .as_ref()
        {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCaseManagement {
    pub faults: FaultPlan,
    cases: Mutex<HashMap<CaseId, CaseRecord>>,
}

impl MemoryCaseManagement {
    pub fn insert_case(&self, case_id: CaseId, record: CaseRecord) {
        self.cases
            .lock()
            .expect("case mutex poisoned")
            .insert(case_id, record);
    }

    pub fn case(&self, case_id: &CaseId) -> Option<CaseRecord> {
        self.cases
            .lock()
            .expect("case mutex poisoned")
            .get(case_id)
            .cloned()
    }

    pub fn phase_of(&self, case_id: &CaseId) -> Option<String> {
        self.case(case_id).map(|record| record.phase_id)
    }
}

#[async_trait]
impl CaseManagement for MemoryCaseManagement {
    async fn get_case(&self, case_id: &CaseId) -> Result<CaseRecord, AdapterError> {
        self.faults.enter("get_case")?;
        Ok(self.case(case_id).unwrap_or_default())
    }

    async fn move_case(&self, case_id: &CaseId, phase_id: &str) -> Result<bool, AdapterError> {
        self.faults.enter("move_case")?;
        let mut guard = self.cases.lock().expect("case mutex poisoned");
        guard.entry(case_id.clone()).or_default().phase_id = phase_id.to_string();
        Ok(true)
    }

    async fn update_field(
        &self,
        case_id: &CaseId,
        field_key: &str,
        text: &str,
    ) -> Result<bool, AdapterError> {
        self.faults.enter("update_field")?;
        let mut guard = self.cases.lock().expect("case mutex poisoned");
        guard
            .entry(case_id.clone())
            .or_default()
            .fields
            .insert(field_key.to_string(), text.to_string());
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct MemoryArtifactGenerator {
    pub faults: FaultPlan,
}

#[async_trait]
impl ArtifactGenerator for MemoryArtifactGenerator {
    async fn generate(&self, identifier: &str) -> Result<Vec<u8>, AdapterError> {
        self.faults.enter("generate")?;
        Ok(format!("%PDF-1.4\ncompany registration card {identifier}\n").into_bytes())
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    pub faults: FaultPlan,
    objects: Mutex<HashMap<(CaseId, String), Vec<u8>>>,
}

impl MemoryObjectStorage {
    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("storage mutex poisoned").len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn store(
        &self,
        case_id: &CaseId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AdapterError> {
        self.faults.enter("store")?;
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .insert((case_id.clone(), filename.to_string()), bytes);
        Ok(format!("memory://documents/{case_id}/{filename}"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryMessaging {
    pub faults: FaultPlan,
    sent: Mutex<Vec<(Recipient, String)>>,
}

impl MemoryMessaging {
    pub fn sent(&self) -> Vec<(Recipient, String)> {
        self.sent.lock().expect("messaging mutex poisoned").clone()
    }
}

#[async_trait]
impl Messaging for MemoryMessaging {
    async fn send(&self, recipient: &Recipient, text: &str) -> Result<MessageReceipt, AdapterError> {
        self.faults.enter("send")?;
        let mut guard = self.sent.lock().expect("messaging mutex poisoned");
        guard.push((recipient.clone(), text.to_string()));
        Ok(MessageReceipt {
            success: true,
            message_id: Some(format!("msg-{}", guard.len())),
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    pub faults: FaultPlan,
    documents: Mutex<BTreeMap<(CaseId, String), DocumentRecord>>,
    notifications: Mutex<BTreeMap<(CaseId, String), NotificationRecord>>,
}

impl MemoryRecordStore {
    pub fn document_count(&self) -> usize {
        self.documents.lock().expect("record mutex poisoned").len()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications
            .lock()
            .expect("record mutex poisoned")
            .len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_document(&self, record: DocumentRecord) -> Result<(), AdapterError> {
        self.faults.enter("upsert_document")?;
        self.documents
            .lock()
            .expect("record mutex poisoned")
            .insert((record.case_id.clone(), record.name.clone()), record);
        Ok(())
    }

    async fn documents_for_case(
        &self,
        case_id: &CaseId,
    ) -> Result<Vec<DocumentRecord>, AdapterError> {
        self.faults.enter("documents_for_case")?;
        Ok(self
            .documents
            .lock()
            .expect("record mutex poisoned")
            .values()
            .filter(|record| &record.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn notification_for(
        &self,
        case_id: &CaseId,
        phase_id: &str,
    ) -> Result<Option<NotificationRecord>, AdapterError> {
        self.faults.enter("notification_for")?;
        Ok(self
            .notifications
            .lock()
            .expect("record mutex poisoned")
            .get(&(case_id.clone(), phase_id.to_string()))
            .cloned())
    }

    async fn record_notification(&self, record: NotificationRecord) -> Result<(), AdapterError> {
        self.faults.enter("record_notification")?;
        self.notifications
            .lock()
            .expect("record mutex poisoned")
            .insert((record.case_id.clone(), record.phase_id.clone()), record);
        Ok(())
    }
}

/// Concrete handles kept alongside the type-erased [`Adapters`] bundle.
#[derive(Debug, Default, Clone)]
pub struct MemoryAdapters {
    pub cases: Arc<MemoryCaseManagement>,
    pub artifacts: Arc<MemoryArtifactGenerator>,
    pub storage: Arc<MemoryObjectStorage>,
    pub messaging: Arc<MemoryMessaging>,
    pub records: Arc<MemoryRecordStore>,
}

impl MemoryAdapters {
    pub fn adapters(&self) -> Adapters {
        Adapters {
            cases: self.cases.clone(),
            artifacts: self.artifacts.clone(),
            storage: self.storage.clone(),
            messaging: self.messaging.clone(),
            records: self.records.clone(),
        }
    }
}
