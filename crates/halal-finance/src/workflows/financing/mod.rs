//! Halal financing approval workflow: stage table, document collection, detail and
//! back-office views.

pub mod admin;
pub mod documents;
pub mod domain;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;
pub mod transitions;
pub mod view;

#[cfg(test)]
mod tests;

pub use admin::{BulkAssignOutcome, DashboardOverview, FinancingDashboard, RequestSummary};
pub use documents::{
    object_path, DocumentSubmissionReceipt, DocumentUploadManager, StagedFile,
    SubmissionConfirmation, UploadDrafts, UploadPolicy,
};
pub use domain::{
    ActivityAction, ActivityLogEntry, Communication, CurrentActor, DocumentRequest,
    DocumentRequestId, DocumentStatus, FinancingApplication, FinancingRequest, FinancingRequestId,
    FinancingStage, FinancingStatus, NewDocumentRequest, Notification, PropertyId, UserId,
    UserRole,
};
pub use memory::{InMemoryActivityLog, InMemoryBlobStore, InMemoryFinancingStore};
pub use repository::{
    ActivitySink, BlobStore, FinancingRepository, MarkSubmittedResponse, RepositoryError,
    RequestFilter, SinkError, StorageError,
};
pub use router::{financing_router, FinancingApi};
pub use service::{FinancingWorkflowService, ValidationError, WorkflowError};
pub use transitions::{next_stage, ForwardStep, Permissions, WorkflowAction};
pub use view::{ActionAffordance, DocumentMode, FinancingRequestDetail};
