use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::workflows::financing::documents::{
    DocumentUploadManager, StagedFile, UploadDrafts, UploadPolicy,
};
use crate::workflows::financing::domain::{
    ActivityLogEntry, Communication, CurrentActor, DocumentRequest, DocumentRequestId,
    FinancingApplication, FinancingRequest, FinancingRequestId, FinancingStage,
    NewDocumentRequest, Notification, PropertyId, UserRole,
};
use crate::workflows::financing::memory::{
    InMemoryActivityLog, InMemoryBlobStore, InMemoryFinancingStore,
};
use crate::workflows::financing::repository::{
    ActivitySink, BlobStore, FinancingRepository, MarkSubmittedResponse, RepositoryError,
    RequestFilter, SinkError, StorageError,
};
use crate::workflows::financing::service::FinancingWorkflowService;

pub(super) fn admin() -> CurrentActor {
    CurrentActor::new("admin-1", UserRole::Admin)
}

pub(super) fn moderator() -> CurrentActor {
    CurrentActor::new("mod-1", UserRole::Moderator)
}

pub(super) fn owner() -> CurrentActor {
    CurrentActor::new("buyer-1", UserRole::User)
}

pub(super) fn specialist() -> CurrentActor {
    CurrentActor::new("specialist-1", UserRole::Moderator)
}

pub(super) fn outsider() -> CurrentActor {
    CurrentActor::new("stranger-1", UserRole::User)
}

pub(super) fn application() -> FinancingApplication {
    FinancingApplication {
        property_id: PropertyId("villa-42".to_string()),
        requested_amount: 350_000,
        cash_available: 90_000,
        period_months: 240,
    }
}

pub(super) fn pdf(name: &str) -> StagedFile {
    StagedFile::new(name, b"%PDF-1.7 statement".to_vec())
}

pub(super) fn income_statement() -> NewDocumentRequest {
    NewDocumentRequest {
        document_type: "Income Statement".to_string(),
        description: Some("Last three months".to_string()),
        deadline_at: None,
    }
}

pub(super) struct Harness<R: FinancingRepository, B: BlobStore> {
    pub(super) workflow: FinancingWorkflowService<R, InMemoryActivityLog>,
    pub(super) documents: DocumentUploadManager<R, B, InMemoryActivityLog>,
    pub(super) store: Arc<R>,
    pub(super) activity: Arc<InMemoryActivityLog>,
    pub(super) blobs: Arc<B>,
}

pub(super) fn harness() -> Harness<InMemoryFinancingStore, InMemoryBlobStore> {
    harness_with(
        InMemoryFinancingStore::default(),
        InMemoryBlobStore::new("halal-finance-docs", "https://storage.test/public"),
    )
}

pub(super) fn harness_with<R, B>(store: R, blobs: B) -> Harness<R, B>
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
{
    let store = Arc::new(store);
    let blobs = Arc::new(blobs);
    let activity = Arc::new(InMemoryActivityLog::default());
    Harness {
        workflow: FinancingWorkflowService::new(store.clone(), activity.clone()),
        documents: DocumentUploadManager::new(
            store.clone(),
            blobs.clone(),
            activity.clone(),
            UploadPolicy::default(),
        ),
        store,
        activity,
        blobs,
    }
}

impl<R, B> Harness<R, B>
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
{
    pub(super) async fn submitted(&self) -> FinancingRequest {
        self.workflow
            .submit_request(&owner(), application())
            .await
            .expect("request submitted")
    }

    pub(super) async fn assigned(&self) -> FinancingRequest {
        let request = self.submitted().await;
        self.workflow
            .assign(&admin(), request.id, specialist().id)
            .await
            .expect("request assigned")
    }

    /// Request in `document_collection` with one pending "Income Statement".
    pub(super) async fn collecting(&self) -> (FinancingRequest, DocumentRequest) {
        let request = self.assigned().await;
        let document = self
            .workflow
            .request_document(&specialist(), request.id, income_statement())
            .await
            .expect("document requested");
        let request = self.reload(request.id).await;
        (request, document)
    }

    pub(super) async fn under_review(&self) -> FinancingRequest {
        let request = self.assigned().await;
        self.workflow
            .progress(&specialist(), request.id)
            .await
            .expect("document collection started");
        self.workflow
            .progress(&specialist(), request.id)
            .await
            .expect("review started")
    }

    pub(super) async fn final_approval(&self) -> FinancingRequest {
        let request = self.under_review().await;
        self.workflow
            .progress(&specialist(), request.id)
            .await
            .expect("submitted for final approval")
    }

    pub(super) async fn reload(&self, id: FinancingRequestId) -> FinancingRequest {
        self.store
            .fetch_request(id)
            .await
            .expect("fetch succeeds")
            .expect("request present")
    }

    pub(super) async fn document(&self, id: DocumentRequestId) -> DocumentRequest {
        self.store
            .fetch_document_request(id)
            .await
            .expect("fetch succeeds")
            .expect("document present")
    }

    pub(super) async fn stage_of(&self, id: FinancingRequestId) -> FinancingStage {
        self.reload(id).await.stage
    }

    pub(super) fn activity_for(&self, id: FinancingRequestId) -> Vec<ActivityLogEntry> {
        self.activity
            .entries()
            .into_iter()
            .filter(|entry| entry.financing_request_id == id)
            .collect()
    }

    pub(super) fn stage_files(
        &self,
        document: DocumentRequestId,
        files: Vec<StagedFile>,
    ) -> UploadDrafts {
        let mut drafts = UploadDrafts::new();
        drafts.select_files(document, files);
        drafts
    }
}

/// Blob store that accepts `succeed_first` uploads and then fails.
pub(super) struct FlakyBlobStore {
    pub(super) inner: InMemoryBlobStore,
    pub(super) succeed_first: usize,
    pub(super) attempts: AtomicUsize,
}

impl FlakyBlobStore {
    pub(super) fn new(succeed_first: usize) -> Self {
        Self {
            inner: InMemoryBlobStore::new("halal-finance-docs", "https://storage.test/public"),
            succeed_first,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.succeed_first {
            return Err(StorageError::Unavailable("bucket offline".to_string()));
        }
        self.inner.upload(path, bytes, content_type).await
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }
}

/// Store whose `mark_doc_submitted` procedure is unreachable; everything else works.
#[derive(Default)]
pub(super) struct ProcedureOfflineStore {
    pub(super) inner: InMemoryFinancingStore,
}

#[async_trait]
impl FinancingRepository for ProcedureOfflineStore {
    async fn insert_request(
        &self,
        request: FinancingRequest,
    ) -> Result<FinancingRequest, RepositoryError> {
        self.inner.insert_request(request).await
    }

    async fn update_request(&self, request: &FinancingRequest) -> Result<(), RepositoryError> {
        self.inner.update_request(request).await
    }

    async fn fetch_request(
        &self,
        id: FinancingRequestId,
    ) -> Result<Option<FinancingRequest>, RepositoryError> {
        self.inner.fetch_request(id).await
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<FinancingRequest>, RepositoryError> {
        self.inner.list_requests(filter).await
    }

    async fn insert_document_request(
        &self,
        document: DocumentRequest,
        entered: Option<&FinancingRequest>,
    ) -> Result<DocumentRequest, RepositoryError> {
        self.inner.insert_document_request(document, entered).await
    }

    async fn fetch_document_request(
        &self,
        id: DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, RepositoryError> {
        self.inner.fetch_document_request(id).await
    }

    async fn list_document_requests(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<DocumentRequest>, RepositoryError> {
        self.inner.list_document_requests(financing_request_id).await
    }

    async fn mark_doc_submitted(
        &self,
        _doc_req_id: DocumentRequestId,
        _uploaded_urls: Vec<String>,
        _response_notes: Option<String>,
    ) -> Result<MarkSubmittedResponse, RepositoryError> {
        Err(RepositoryError::Unavailable("rpc timeout".to_string()))
    }

    async fn insert_communication(
        &self,
        communication: Communication,
    ) -> Result<Communication, RepositoryError> {
        self.inner.insert_communication(communication).await
    }

    async fn list_communications(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<Communication>, RepositoryError> {
        self.inner.list_communications(financing_request_id).await
    }
}

/// Store that rejects every write.
pub(super) struct ReadOnlyStore {
    pub(super) inner: InMemoryFinancingStore,
}

#[async_trait]
impl FinancingRepository for ReadOnlyStore {
    async fn insert_request(
        &self,
        _request: FinancingRequest,
    ) -> Result<FinancingRequest, RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }

    async fn update_request(&self, _request: &FinancingRequest) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }

    async fn fetch_request(
        &self,
        id: FinancingRequestId,
    ) -> Result<Option<FinancingRequest>, RepositoryError> {
        self.inner.fetch_request(id).await
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<FinancingRequest>, RepositoryError> {
        self.inner.list_requests(filter).await
    }

    async fn insert_document_request(
        &self,
        _document: DocumentRequest,
        _entered: Option<&FinancingRequest>,
    ) -> Result<DocumentRequest, RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }

    async fn fetch_document_request(
        &self,
        id: DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, RepositoryError> {
        self.inner.fetch_document_request(id).await
    }

    async fn list_document_requests(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<DocumentRequest>, RepositoryError> {
        self.inner.list_document_requests(financing_request_id).await
    }

    async fn mark_doc_submitted(
        &self,
        _doc_req_id: DocumentRequestId,
        _uploaded_urls: Vec<String>,
        _response_notes: Option<String>,
    ) -> Result<MarkSubmittedResponse, RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }

    async fn insert_communication(
        &self,
        _communication: Communication,
    ) -> Result<Communication, RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }

    async fn list_communications(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<Communication>, RepositoryError> {
        self.inner.list_communications(financing_request_id).await
    }
}

/// Store that accepts new rows but refuses to move a request to another stage.
pub(super) struct StageLockedStore {
    pub(super) inner: InMemoryFinancingStore,
}

#[async_trait]
impl FinancingRepository for StageLockedStore {
    async fn insert_request(
        &self,
        request: FinancingRequest,
    ) -> Result<FinancingRequest, RepositoryError> {
        self.inner.insert_request(request).await
    }

    async fn update_request(&self, _request: &FinancingRequest) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("stage column locked".to_string()))
    }

    async fn fetch_request(
        &self,
        id: FinancingRequestId,
    ) -> Result<Option<FinancingRequest>, RepositoryError> {
        self.inner.fetch_request(id).await
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<FinancingRequest>, RepositoryError> {
        self.inner.list_requests(filter).await
    }

    async fn insert_document_request(
        &self,
        document: DocumentRequest,
        entered: Option<&FinancingRequest>,
    ) -> Result<DocumentRequest, RepositoryError> {
        if entered.is_some() {
            return Err(RepositoryError::Unavailable("stage column locked".to_string()));
        }
        self.inner.insert_document_request(document, None).await
    }

    async fn fetch_document_request(
        &self,
        id: DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, RepositoryError> {
        self.inner.fetch_document_request(id).await
    }

    async fn list_document_requests(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<DocumentRequest>, RepositoryError> {
        self.inner.list_document_requests(financing_request_id).await
    }

    async fn mark_doc_submitted(
        &self,
        doc_req_id: DocumentRequestId,
        uploaded_urls: Vec<String>,
        response_notes: Option<String>,
    ) -> Result<MarkSubmittedResponse, RepositoryError> {
        self.inner
            .mark_doc_submitted(doc_req_id, uploaded_urls, response_notes)
            .await
    }

    async fn insert_communication(
        &self,
        communication: Communication,
    ) -> Result<Communication, RepositoryError> {
        self.inner.insert_communication(communication).await
    }

    async fn list_communications(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<Communication>, RepositoryError> {
        self.inner.list_communications(financing_request_id).await
    }
}

/// Activity sink whose notification table is unreachable.
#[derive(Default)]
pub(super) struct MutedNotifications {
    pub(super) inner: InMemoryActivityLog,
}

#[async_trait]
impl ActivitySink for MutedNotifications {
    async fn append_activity(&self, entry: ActivityLogEntry) -> Result<(), SinkError> {
        self.inner.append_activity(entry).await
    }

    async fn list_activity(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<ActivityLogEntry>, SinkError> {
        self.inner.list_activity(financing_request_id).await
    }

    async fn notify(&self, _notification: Notification) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("notifications offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
