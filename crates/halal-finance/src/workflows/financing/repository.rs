use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{
    ActivityLogEntry, Communication, DocumentRequest, DocumentRequestId, FinancingRequest,
    FinancingRequestId, FinancingStage, Notification, UserId,
};

/// Row filter for listing financing requests. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    #[serde(default)]
    pub stage: Option<FinancingStage>,
    #[serde(default)]
    pub responsible_person_id: Option<UserId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl RequestFilter {
    pub fn matches(&self, request: &FinancingRequest) -> bool {
        self.stage.map_or(true, |stage| request.stage == stage)
            && self
                .responsible_person_id
                .as_ref()
                .map_or(true, |id| request.is_responsible(id))
            && self.user_id.as_ref().map_or(true, |id| &request.user_id == id)
    }
}

/// Reply of the `mark_doc_submitted` procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSubmittedResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Whether the procedure moved the financing request to `under_review`.
    #[serde(default)]
    pub stage_advanced: bool,
}

impl MarkSubmittedResponse {
    pub fn accepted(stage_advanced: bool) -> Self {
        Self {
            ok: true,
            err: None,
            stage_advanced,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: Some(reason.into()),
            stage_advanced: false,
        }
    }
}

/// Row store and procedure surface of the hosted database.
#[async_trait]
pub trait FinancingRepository: Send + Sync {
    async fn insert_request(
        &self,
        request: FinancingRequest,
    ) -> Result<FinancingRequest, RepositoryError>;
    async fn update_request(&self, request: &FinancingRequest) -> Result<(), RepositoryError>;
    async fn fetch_request(
        &self,
        id: FinancingRequestId,
    ) -> Result<Option<FinancingRequest>, RepositoryError>;
    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<FinancingRequest>, RepositoryError>;

    /// Inserts a document request and, when `entered` is given, stores that updated financing
    /// request in the same write. Neither row changes if either write is rejected.
    async fn insert_document_request(
        &self,
        document: DocumentRequest,
        entered: Option<&FinancingRequest>,
    ) -> Result<DocumentRequest, RepositoryError>;
    async fn fetch_document_request(
        &self,
        id: DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, RepositoryError>;
    async fn list_document_requests(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<DocumentRequest>, RepositoryError>;

    /// Marks a document submitted and, when it was the last pending one, advances the request
    /// to `under_review`. Both effects apply together or not at all.
    async fn mark_doc_submitted(
        &self,
        doc_req_id: DocumentRequestId,
        uploaded_urls: Vec<String>,
        response_notes: Option<String>,
    ) -> Result<MarkSubmittedResponse, RepositoryError>;

    async fn insert_communication(
        &self,
        communication: Communication,
    ) -> Result<Communication, RepositoryError>;
    async fn list_communications(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<Communication>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Audit trail and notification tables.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn append_activity(&self, entry: ActivityLogEntry) -> Result<(), SinkError>;
    async fn list_activity(
        &self,
        financing_request_id: FinancingRequestId,
    ) -> Result<Vec<ActivityLogEntry>, SinkError>;
    async fn notify(&self, notification: Notification) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("activity sink unavailable: {0}")]
    Unavailable(String),
}

/// Object storage for uploaded documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;
    fn public_url(&self, path: &str) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object already exists at {0}")]
    Exists(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
