//! Process-local backends for the collaborator traits, used by the demo binary and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::domain::{
    ActivityLogEntry, Communication, DocumentRequest, DocumentRequestId, DocumentStatus,
    FinancingRequest, FinancingRequestId, FinancingStage, Notification,
};
use super::repository::{
    ActivitySink, BlobStore, FinancingRepository, MarkSubmittedResponse, RepositoryError,
    RequestFilter, SinkError, StorageError,
};

#[derive(Debug, Default)]
struct StoreState {
    requests: HashMap<FinancingRequestId, FinancingRequest>,
    documents: HashMap<DocumentRequestId, DocumentRequest>,
    communications: Vec<Communication>,
}

/// Row store whose `mark_doc_submitted` runs under one lock, so the document and stage
/// updates are observed together.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFinancingStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryFinancingStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl FinancingRepository for InMemoryFinancingStore {
    async fn insert_request(
        &self,
        request: FinancingRequest,
    ) -> Result<FinancingRequest, RepositoryError> {
        let mut state = self.lock()?;
        if state.requests.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn update_request(&self, request: &FinancingRequest) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        match state.requests.get_mut(&request.id) {
            Some(stored) => {
                *stored = request.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn fetch_request(
        &self,
        id: FinancingRequestId,
    ) -> Result<Option<FinancingRequest>, RepositoryError> {
        Ok(self.lock()?.requests.get(&id).cloned())
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<FinancingRequest>, RepositoryError> {
        let state = self.lock()?;
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(requests)
    }

    async fn insert_document_request(
        &self,
        document: DocumentRequest,
        entered: Option<&FinancingRequest>,
    ) -> Result<DocumentRequest, RepositoryError> {
        let mut state = self.lock()?;
        if !state.requests.contains_key(&document.financing_request_id) {
            return Err(RepositoryError::NotFound);
        }
        if state.documents.contains_key(&document.id) {
            return Err(RepositoryError::Conflict);
        }
        if let Some(request) = entered {
            if request.id != document.financing_request_id {
                return Err(RepositoryError::Conflict);
            }
            state.requests.insert(request.id, request.clone());
        }
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn fetch_document_request(
        &self,
        id: DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, RepositoryError> {
        Ok(self.lock()?.documents.get(&id).cloned())
    }

    async fn list_document_requests(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<DocumentRequest>, RepositoryError> {
        let state = self.lock()?;
        let mut documents: Vec<_> = state
            .documents
            .values()
            .filter(|document| document.financing_request_id == financing_request_id)
            .cloned()
            .collect();
        documents.sort_by_key(|document| document.created_at);
        Ok(documents)
    }

    async fn mark_doc_submitted(
        &self,
        doc_req_id: DocumentRequestId,
        uploaded_urls: Vec<String>,
        response_notes: Option<String>,
    ) -> Result<MarkSubmittedResponse, RepositoryError> {
        let mut state = self.lock()?;

        let Some(document) = state.documents.get(&doc_req_id) else {
            return Ok(MarkSubmittedResponse::rejected("document request not found"));
        };
        if document.status != DocumentStatus::Pending {
            return Ok(MarkSubmittedResponse::rejected(
                "document request already submitted",
            ));
        }
        if uploaded_urls.is_empty() {
            return Ok(MarkSubmittedResponse::rejected("no files uploaded"));
        }
        let financing_request_id = document.financing_request_id;
        if !state.requests.contains_key(&financing_request_id) {
            return Ok(MarkSubmittedResponse::rejected("financing request not found"));
        }

        // Validation is complete; nothing below can fail, so both writes land together.
        let now = Utc::now();
        if let Some(document) = state.documents.get_mut(&doc_req_id) {
            document.status = DocumentStatus::Submitted;
            document.user_file_urls = uploaded_urls;
            document.response_notes = response_notes;
            document.submitted_at = Some(now);
        }

        let still_pending = state.documents.values().any(|document| {
            document.financing_request_id == financing_request_id && document.is_pending()
        });
        let mut stage_advanced = false;
        if let Some(request) = state.requests.get_mut(&financing_request_id) {
            if !still_pending && request.stage == FinancingStage::DocumentCollection {
                request.stage = FinancingStage::UnderReview;
                request.sent_back_to_responsible = false;
                request.sent_back_notes = None;
                request.updated_at = now;
                stage_advanced = true;
            }
        }

        Ok(MarkSubmittedResponse::accepted(stage_advanced))
    }

    async fn insert_communication(
        &self,
        communication: Communication,
    ) -> Result<Communication, RepositoryError> {
        let mut state = self.lock()?;
        if !state
            .requests
            .contains_key(&communication.financing_request_id)
        {
            return Err(RepositoryError::NotFound);
        }
        state.communications.push(communication.clone());
        Ok(communication)
    }

    async fn list_communications(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<Communication>, RepositoryError> {
        Ok(self
            .lock()?
            .communications
            .iter()
            .filter(|message| message.financing_request_id == financing_request_id)
            .cloned()
            .collect())
    }
}

/// Activity log and notifications table.
#[derive(Debug, Default, Clone)]
pub struct InMemoryActivityLog {
    entries: Arc<Mutex<Vec<ActivityLogEntry>>>,
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryActivityLog {
    pub fn entries(&self) -> Vec<ActivityLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|notifications| notifications.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActivitySink for InMemoryActivityLog {
    async fn append_activity(&self, entry: ActivityLogEntry) -> Result<(), SinkError> {
        self.entries
            .lock()
            .map_err(|_| SinkError::Unavailable("activity mutex poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn list_activity(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<ActivityLogEntry>, SinkError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SinkError::Unavailable("activity mutex poisoned".to_string()))?;
        Ok(entries
            .iter()
            .filter(|entry| entry.financing_request_id == financing_request_id)
            .cloned()
            .collect())
    }

    async fn notify(&self, notification: Notification) -> Result<(), SinkError> {
        self.notifications
            .lock()
            .map_err(|_| SinkError::Unavailable("notification mutex poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Bucket-scoped object store handing out public URLs under a fixed base.
#[derive(Debug, Clone)]
pub struct InMemoryBlobStore {
    bucket: String,
    public_base_url: String,
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            objects: Arc::default(),
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(path).cloned())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("blob mutex poisoned".to_string()))?;
        if objects.contains_key(path) {
            return Err(StorageError::Exists(path.to_string()));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, path)
    }
}
