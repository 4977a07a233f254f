//! Applicant-side document upload and the single atomic submission step.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use mime::Mime;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::domain::{
    non_blank, ActivityAction, ActivityLogEntry, CurrentActor, DocumentRequest,
    DocumentRequestId, FinancingRequest, Notification, UserId,
};
use super::repository::{ActivitySink, BlobStore, FinancingRepository};
use super::service::{ValidationError, WorkflowError};
use super::transitions::Permissions;
use crate::config::StorageConfig;

/// Content types accepted for financing documents.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/webp",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// File checks applied before anything is uploaded.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_upload_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

impl UploadPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            allowed_content_types: ALLOWED_CONTENT_TYPES
                .iter()
                .map(|value| value.to_string())
                .collect(),
        }
    }

    /// Returns the content type the file will be stored with.
    pub fn validate(&self, file: &StagedFile) -> Result<Mime, ValidationError> {
        if file.bytes.is_empty() {
            return Err(ValidationError::EmptyFile(file.file_name.clone()));
        }
        let size = file.bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(ValidationError::FileTooLarge {
                name: file.file_name.clone(),
                size,
                limit: self.max_upload_bytes,
            });
        }

        let content_type = file.resolved_content_type();
        let accepted = content_type.as_ref().map_or(false, |mime| {
            self.allowed_content_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(mime.essence_str()))
        });
        match content_type {
            Some(mime) if accepted => Ok(mime),
            other => Err(ValidationError::UnsupportedFileType {
                name: file.file_name.clone(),
                content_type: other
                    .map(|mime| mime.essence_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }
}

/// A file picked by the applicant but not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Declared type first, otherwise guessed from the file name.
    pub fn resolved_content_type(&self) -> Option<Mime> {
        self.content_type
            .as_deref()
            .and_then(|raw| raw.parse::<Mime>().ok())
            .or_else(|| mime_guess::from_path(&self.file_name).first())
    }

    pub fn extension(&self) -> String {
        match self.resolved_content_type() {
            Some(content_type) => self.extension_for(&content_type),
            None => self.named_extension().unwrap_or_else(|| "bin".to_string()),
        }
    }

    /// Extension matching the type the file is stored with. The file name's extension is kept
    /// only when it maps to that same type.
    pub fn extension_for(&self, content_type: &Mime) -> String {
        let named = self.named_extension();
        if let Some(ext) = &named {
            if mime_guess::from_ext(ext)
                .iter()
                .any(|guess| guess.essence_str() == content_type.essence_str())
            {
                return ext.clone();
            }
        }
        let known = mime_guess::get_mime_extensions(content_type).unwrap_or_default();
        let subtype = content_type.subtype().as_str();
        known
            .iter()
            .find(|ext| **ext == subtype)
            .or_else(|| known.first())
            .map(|ext| ext.to_string())
            .or(named)
            .unwrap_or_else(|| "bin".to_string())
    }

    fn named_extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Blob path for one uploaded file: `{userId}/{docRequestId}/{timestamp}.{ext}`.
pub fn object_path(
    user_id: &UserId,
    document_request_id: DocumentRequestId,
    timestamp_millis: i64,
    extension: &str,
) -> String {
    format!("{user_id}/{document_request_id}/{timestamp_millis}.{extension}")
}

#[derive(Debug, Clone, Default)]
pub struct UploadDraft {
    pub files: Vec<StagedFile>,
    pub response_notes: Option<String>,
    revision: u64,
}

/// Per-document staging area held by the applicant's session. Nothing here touches a backend.
#[derive(Debug, Default)]
pub struct UploadDrafts {
    drafts: BTreeMap<DocumentRequestId, UploadDraft>,
}

impl UploadDrafts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the staged files; an empty list clears them.
    pub fn select_files(&mut self, id: DocumentRequestId, files: Vec<StagedFile>) {
        let draft = self.drafts.entry(id).or_default();
        draft.files = files;
        draft.revision += 1;
        if draft.files.is_empty() && draft.response_notes.is_none() {
            self.drafts.remove(&id);
        }
    }

    pub fn set_response_notes(&mut self, id: DocumentRequestId, notes: Option<String>) {
        let notes = non_blank(notes);
        match self.drafts.get_mut(&id) {
            Some(draft) => draft.response_notes = notes,
            None if notes.is_some() => {
                self.drafts.insert(
                    id,
                    UploadDraft {
                        response_notes: notes,
                        ..UploadDraft::default()
                    },
                );
            }
            None => {}
        }
    }

    pub fn staged(&self, id: DocumentRequestId) -> Option<&UploadDraft> {
        self.drafts.get(&id)
    }

    pub fn has_files(&self, id: DocumentRequestId) -> bool {
        self.staged(id).map_or(false, |draft| !draft.files.is_empty())
    }

    /// The explicit confirmation step. Only the returned token can start a submission, and it
    /// goes stale if the selection changes afterwards.
    pub fn confirm(&self, id: DocumentRequestId) -> Result<SubmissionConfirmation, ValidationError> {
        match self.staged(id) {
            Some(draft) if !draft.files.is_empty() => Ok(SubmissionConfirmation {
                document_request_id: id,
                file_count: draft.files.len(),
                revision: draft.revision,
            }),
            _ => Err(ValidationError::NoFilesStaged(id)),
        }
    }

    pub fn clear(&mut self, id: DocumentRequestId) {
        self.drafts.remove(&id);
    }
}

/// Proof that the applicant confirmed a specific staged selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfirmation {
    document_request_id: DocumentRequestId,
    file_count: usize,
    revision: u64,
}

impl SubmissionConfirmation {
    pub fn document_request_id(&self) -> DocumentRequestId {
        self.document_request_id
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSubmissionReceipt {
    pub document: DocumentRequest,
    pub request: FinancingRequest,
    pub stage_advanced: bool,
}

/// Uploads staged files and marks the document submitted through the atomic procedure.
pub struct DocumentUploadManager<R, B, S> {
    repository: Arc<R>,
    storage: Arc<B>,
    activity: Arc<S>,
    policy: UploadPolicy,
}

impl<R, B, S> DocumentUploadManager<R, B, S>
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    pub fn new(repository: Arc<R>, storage: Arc<B>, activity: Arc<S>, policy: UploadPolicy) -> Self {
        Self {
            repository,
            storage,
            activity,
            policy,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub async fn submit(
        &self,
        actor: &CurrentActor,
        drafts: &mut UploadDrafts,
        confirmation: SubmissionConfirmation,
    ) -> Result<DocumentSubmissionReceipt, WorkflowError> {
        let id = confirmation.document_request_id;
        let draft = drafts
            .staged(id)
            .filter(|draft| !draft.files.is_empty())
            .ok_or(ValidationError::NoFilesStaged(id))?;
        if draft.revision != confirmation.revision {
            return Err(ValidationError::StaleConfirmation(id).into());
        }

        let content_types = draft
            .files
            .iter()
            .map(|file| self.policy.validate(file))
            .collect::<Result<Vec<_>, _>>()?;

        let document = self
            .repository
            .fetch_document_request(id)
            .await?
            .ok_or(WorkflowError::DocumentNotFound(id))?;
        if !document.is_pending() {
            return Err(WorkflowError::AlreadySubmitted(id));
        }
        let request = self
            .repository
            .fetch_request(document.financing_request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound(document.financing_request_id))?;
        if !Permissions::resolve(actor, &request).is_owner {
            return Err(WorkflowError::Forbidden {
                operation: "submit documents for this financing request",
            });
        }

        let mut uploaded_paths = Vec::with_capacity(draft.files.len());
        let mut uploaded_urls = Vec::with_capacity(draft.files.len());
        let mut last_timestamp = 0_i64;
        for (file, content_type) in draft.files.iter().zip(&content_types) {
            let mut timestamp = Utc::now().timestamp_millis();
            if timestamp <= last_timestamp {
                timestamp = last_timestamp + 1;
            }
            last_timestamp = timestamp;

            let path = object_path(&actor.id, id, timestamp, &file.extension_for(content_type));
            if let Err(err) = self
                .storage
                .upload(&path, file.bytes.clone(), content_type.essence_str())
                .await
            {
                report_orphans(id, &uploaded_paths, "upload failed");
                return Err(err.into());
            }
            uploaded_urls.push(self.storage.public_url(&path));
            uploaded_paths.push(path);
        }

        let response = match self
            .repository
            .mark_doc_submitted(id, uploaded_urls, draft.response_notes.clone())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                report_orphans(id, &uploaded_paths, "mark_doc_submitted failed");
                return Err(err.into());
            }
        };
        if !response.ok {
            report_orphans(id, &uploaded_paths, "mark_doc_submitted rejected");
            return Err(WorkflowError::Rejected(
                response
                    .err
                    .unwrap_or_else(|| "submission was not accepted".to_string()),
            ));
        }

        let entry = ActivityLogEntry::new(
            request.id,
            actor.id.clone(),
            ActivityAction::DocSubmitted,
            json!({
                "document_request_id": id,
                "document_type": document.document_type,
                "file_count": uploaded_paths.len(),
                "stage_advanced": response.stage_advanced,
            }),
        );
        if let Err(err) = self.activity.append_activity(entry).await {
            warn!(request_id = %request.id, error = %err, "activity log append failed");
        }

        if let Some(responsible) = request
            .responsible_person_id
            .clone()
            .filter(|responsible| responsible != &actor.id)
        {
            let notification = Notification::for_request(
                responsible,
                request.id,
                "Document submitted",
                format!("\"{}\" was submitted by the applicant.", document.document_type),
            );
            if let Err(err) = self.activity.notify(notification).await {
                warn!(request_id = %request.id, error = %err, "notification enqueue failed");
            }
        }

        drafts.clear(id);
        info!(
            request_id = %request.id,
            document_request_id = %id,
            files = uploaded_paths.len(),
            stage_advanced = response.stage_advanced,
            "document submitted"
        );

        let document = self
            .repository
            .fetch_document_request(id)
            .await?
            .ok_or(WorkflowError::DocumentNotFound(id))?;
        let request = self
            .repository
            .fetch_request(request.id)
            .await?
            .ok_or(WorkflowError::RequestNotFound(request.id))?;

        Ok(DocumentSubmissionReceipt {
            document,
            request,
            stage_advanced: response.stage_advanced,
        })
    }
}

fn report_orphans(id: DocumentRequestId, paths: &[String], reason: &str) {
    if !paths.is_empty() {
        warn!(
            document_request_id = %id,
            orphaned = ?paths,
            reason,
            "uploaded blobs left unreferenced"
        );
    }
}
