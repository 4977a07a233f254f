use super::common::*;

use crate::workflows::financing::documents::{object_path, StagedFile, UploadDrafts, UploadPolicy};
use crate::workflows::financing::domain::{
    ActivityAction, DocumentRequestId, DocumentStatus, FinancingStage, UserId,
};
use crate::workflows::financing::memory::{InMemoryBlobStore, InMemoryFinancingStore};
use crate::workflows::financing::repository::RepositoryError;
use crate::workflows::financing::service::{ValidationError, WorkflowError};

#[test]
fn object_path_is_scoped_by_user_and_document() {
    let id = DocumentRequestId::new();
    let path = object_path(&UserId::new("buyer-1"), id, 1_700_000_000_123, "pdf");
    assert_eq!(path, format!("buyer-1/{id}/1700000000123.pdf"));
}

#[test]
fn extension_prefers_file_name_then_content_type() {
    assert_eq!(pdf("Statement.PDF").extension(), "pdf");
    assert_eq!(
        StagedFile::new("scan", vec![1])
            .with_content_type("image/png")
            .extension(),
        "png"
    );
    assert_eq!(StagedFile::new("blob", vec![1]).extension(), "bin");
}

#[test]
fn declared_type_decides_stored_extension() {
    let disguised = StagedFile::new("invoice.exe", vec![1]).with_content_type("application/pdf");
    assert_eq!(disguised.extension(), "pdf");

    let photo = StagedFile::new("IMG_0042.JPG", vec![1]);
    assert_eq!(photo.extension(), "jpg");
    let relabelled = StagedFile::new("scan.pdf", vec![1]).with_content_type("image/png");
    assert_eq!(relabelled.extension(), "png");
}

#[test]
fn policy_rejects_empty_oversized_and_unsupported_files() {
    let policy = UploadPolicy {
        max_upload_bytes: 8,
        ..UploadPolicy::default()
    };

    assert_eq!(
        policy.validate(&StagedFile::new("empty.pdf", Vec::new())),
        Err(ValidationError::EmptyFile("empty.pdf".to_string()))
    );
    assert!(matches!(
        policy.validate(&StagedFile::new("big.pdf", vec![0; 9])),
        Err(ValidationError::FileTooLarge { size: 9, limit: 8, .. })
    ));
    assert!(matches!(
        policy.validate(&StagedFile::new("notes.txt", vec![1])),
        Err(ValidationError::UnsupportedFileType { .. })
    ));
    assert!(matches!(
        policy.validate(&StagedFile::new("mystery", vec![1])),
        Err(ValidationError::UnsupportedFileType { .. })
    ));

    let accepted = policy
        .validate(&StagedFile::new("photo.jpg", vec![1, 2, 3]))
        .expect("jpeg accepted");
    assert_eq!(accepted.essence_str(), "image/jpeg");
}

#[test]
fn declared_content_type_wins_over_file_name() {
    let policy = UploadPolicy::default();
    let file = StagedFile::new("payslip", vec![1]).with_content_type("application/pdf");
    assert_eq!(
        policy.validate(&file).expect("pdf accepted").essence_str(),
        "application/pdf"
    );
}

#[test]
fn confirmation_requires_staged_files() {
    let id = DocumentRequestId::new();
    let mut drafts = UploadDrafts::new();

    assert_eq!(drafts.confirm(id), Err(ValidationError::NoFilesStaged(id)));

    drafts.select_files(id, vec![pdf("a.pdf")]);
    assert!(drafts.has_files(id));
    let confirmation = drafts.confirm(id).expect("files staged");
    assert_eq!(confirmation.document_request_id(), id);
    assert_eq!(confirmation.file_count(), 1);

    drafts.select_files(id, Vec::new());
    assert!(!drafts.has_files(id));
    assert!(drafts.staged(id).is_none());
}

#[test]
fn response_notes_survive_reselection() {
    let id = DocumentRequestId::new();
    let mut drafts = UploadDrafts::new();

    drafts.set_response_notes(id, Some("  ".to_string()));
    assert!(drafts.staged(id).is_none());

    drafts.set_response_notes(id, Some("Signed copy".to_string()));
    drafts.select_files(id, vec![pdf("a.pdf")]);
    drafts.select_files(id, vec![pdf("b.pdf")]);

    let draft = drafts.staged(id).expect("draft kept");
    assert_eq!(draft.response_notes.as_deref(), Some("Signed copy"));
    assert_eq!(draft.files[0].file_name, "b.pdf");
}

#[tokio::test]
async fn submitting_last_pending_document_moves_request_to_review() {
    let harness = harness();
    let (request, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(document.id, vec![pdf("march.pdf"), pdf("april.pdf")]);
    drafts.set_response_notes(document.id, Some("Two payslips".to_string()));
    let confirmation = drafts.confirm(document.id).expect("confirmed");

    let receipt = harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
        .expect("submission accepted");

    assert!(receipt.stage_advanced);
    assert_eq!(receipt.request.stage, FinancingStage::UnderReview);
    assert_eq!(receipt.document.status, DocumentStatus::Submitted);
    assert!(receipt.document.submitted_at.is_some());
    assert_eq!(receipt.document.response_notes.as_deref(), Some("Two payslips"));
    assert_eq!(receipt.document.user_file_urls.len(), 2);
    let prefix = format!(
        "https://storage.test/public/halal-finance-docs/buyer-1/{}/",
        document.id
    );
    assert!(receipt
        .document
        .user_file_urls
        .iter()
        .all(|url| url.starts_with(&prefix) && url.ends_with(".pdf")));

    let paths = harness.blobs.paths();
    assert_eq!(paths.len(), 2);
    let stored = harness.blobs.object(&paths[0]).expect("object stored");
    assert_eq!(stored.content_type, "application/pdf");

    assert!(!drafts.has_files(document.id));
    assert!(harness
        .activity_for(request.id)
        .iter()
        .any(|entry| entry.action_type == ActivityAction::DocSubmitted));
    assert!(harness
        .activity
        .notifications()
        .iter()
        .any(|notification| notification.user_id == specialist().id
            && notification.title == "Document submitted"));
}

#[tokio::test]
async fn request_waits_in_collection_until_every_document_arrives() {
    let harness = harness();
    let (request, first) = harness.collecting().await;
    let second = harness
        .workflow
        .request_document(
            &specialist(),
            request.id,
            crate::workflows::financing::domain::NewDocumentRequest {
                document_type: "Bank Statement".to_string(),
                description: None,
                deadline_at: None,
            },
        )
        .await
        .expect("second document requested");

    let mut drafts = harness.stage_files(first.id, vec![pdf("income.pdf")]);
    let confirmation = drafts.confirm(first.id).expect("confirmed");
    let receipt = harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
        .expect("first submission");
    assert!(!receipt.stage_advanced);
    assert_eq!(receipt.request.stage, FinancingStage::DocumentCollection);

    drafts.select_files(second.id, vec![pdf("bank.pdf")]);
    let confirmation = drafts.confirm(second.id).expect("confirmed");
    let receipt = harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
        .expect("second submission");
    assert!(receipt.stage_advanced);
    assert_eq!(receipt.request.stage, FinancingStage::UnderReview);
}

#[tokio::test]
async fn changed_selection_invalidates_confirmation() {
    let harness = harness();
    let (_, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(document.id, vec![pdf("first.pdf")]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");
    drafts.select_files(document.id, vec![pdf("second.pdf")]);

    match harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
    {
        Err(WorkflowError::Validation(ValidationError::StaleConfirmation(id))) => {
            assert_eq!(id, document.id)
        }
        other => panic!("expected stale confirmation, got {other:?}"),
    }
    assert!(harness.blobs.paths().is_empty());
    assert!(harness.document(document.id).await.is_pending());
}

#[tokio::test]
async fn invalid_file_blocks_every_upload() {
    let harness = harness();
    let (_, document) = harness.collecting().await;

    let mut drafts =
        harness.stage_files(document.id, vec![pdf("ok.pdf"), StagedFile::new("run.exe", vec![1])]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");

    match harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
    {
        Err(WorkflowError::Validation(ValidationError::UnsupportedFileType { name, .. })) => {
            assert_eq!(name, "run.exe")
        }
        other => panic!("expected unsupported type, got {other:?}"),
    }
    assert!(harness.blobs.paths().is_empty());
    assert!(drafts.has_files(document.id));
}

#[tokio::test]
async fn only_the_owner_can_submit() {
    let harness = harness();
    let (_, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(document.id, vec![pdf("a.pdf")]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");

    match harness
        .documents
        .submit(&specialist(), &mut drafts, confirmation)
        .await
    {
        Err(WorkflowError::Forbidden { .. }) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }
    assert!(harness.blobs.paths().is_empty());
}

#[tokio::test]
async fn submitted_document_cannot_be_resubmitted() {
    let harness = harness();
    let (_, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(document.id, vec![pdf("a.pdf")]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");
    harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
        .expect("first submission");

    drafts.select_files(document.id, vec![pdf("again.pdf")]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");
    match harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
    {
        Err(WorkflowError::AlreadySubmitted(id)) => assert_eq!(id, document.id),
        other => panic!("expected already submitted, got {other:?}"),
    }
    assert_eq!(harness.blobs.paths().len(), 1);
}

#[tokio::test]
async fn procedure_failure_leaves_no_partial_state() {
    let harness = harness_with(
        ProcedureOfflineStore::default(),
        InMemoryBlobStore::new("halal-finance-docs", "https://storage.test/public"),
    );
    let (request, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(document.id, vec![pdf("a.pdf")]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");

    match harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
    {
        Err(WorkflowError::Repository(RepositoryError::Unavailable(_))) => {}
        other => panic!("expected procedure failure, got {other:?}"),
    }

    let stored = harness.document(document.id).await;
    assert_eq!(stored.status, DocumentStatus::Pending);
    assert!(stored.user_file_urls.is_empty());
    assert_eq!(
        harness.stage_of(request.id).await,
        FinancingStage::DocumentCollection
    );
    assert!(drafts.has_files(document.id));
    assert!(!harness
        .activity_for(request.id)
        .iter()
        .any(|entry| entry.action_type == ActivityAction::DocSubmitted));
}

#[tokio::test]
async fn upload_failure_stops_before_the_procedure() {
    let harness = harness_with(InMemoryFinancingStore::default(), FlakyBlobStore::new(1));
    let (request, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(document.id, vec![pdf("a.pdf"), pdf("b.pdf")]);
    let confirmation = drafts.confirm(document.id).expect("confirmed");

    match harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
    {
        Err(WorkflowError::Storage(_)) => {}
        other => panic!("expected storage failure, got {other:?}"),
    }

    assert!(harness.document(document.id).await.is_pending());
    assert_eq!(
        harness.stage_of(request.id).await,
        FinancingStage::DocumentCollection
    );
    assert_eq!(harness.blobs.inner.paths().len(), 1);
}

#[tokio::test]
async fn stored_path_follows_declared_content_type() {
    let harness = harness();
    let (_, document) = harness.collecting().await;

    let mut drafts = harness.stage_files(
        document.id,
        vec![StagedFile::new("statement.exe", b"%PDF-1.7".to_vec())
            .with_content_type("application/pdf")],
    );
    let confirmation = drafts.confirm(document.id).expect("confirmed");
    let receipt = harness
        .documents
        .submit(&owner(), &mut drafts, confirmation)
        .await
        .expect("submission accepted");

    let paths = harness.blobs.paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].ends_with(".pdf"));
    assert!(receipt.document.user_file_urls[0].ends_with(".pdf"));
}
