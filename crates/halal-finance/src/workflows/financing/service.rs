use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::domain::{
    non_blank, ActivityAction, ActivityLogEntry, Communication, CurrentActor, DocumentRequest,
    DocumentRequestId, DocumentStatus, FinancingApplication, FinancingRequest, FinancingRequestId,
    FinancingStage, FinancingStatus, NewDocumentRequest, Notification, UserId,
};
use super::repository::{
    ActivitySink, FinancingRepository, RepositoryError, SinkError, StorageError,
};
use super::transitions::{
    self, next_stage, GuardContext, GuardViolation, Guard, Permissions, Transition,
    WorkflowAction,
};
use super::view::FinancingRequestDetail;

/// Drives financing requests through the stage table.
///
/// Every mutation re-reads the stored request afterwards and returns that copy, so callers never
/// act on a locally predicted stage.
pub struct FinancingWorkflowService<R, S> {
    repository: Arc<R>,
    activity: Arc<S>,
}

#[derive(Debug, Default)]
struct TransitionInput {
    responsible: Option<UserId>,
    notes: Option<String>,
}

impl<R, S> FinancingWorkflowService<R, S>
where
    R: FinancingRepository + 'static,
    S: ActivitySink + 'static,
{
    pub fn new(repository: Arc<R>, activity: Arc<S>) -> Self {
        Self {
            repository,
            activity,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn activity(&self) -> &Arc<S> {
        &self.activity
    }

    /// Create a request at `submitted` on behalf of the buyer.
    pub async fn submit_request(
        &self,
        actor: &CurrentActor,
        application: FinancingApplication,
    ) -> Result<FinancingRequest, WorkflowError> {
        if application.requested_amount == 0 {
            return Err(ValidationError::InvalidAmount.into());
        }
        if application.period_months == 0 {
            return Err(ValidationError::InvalidPeriod.into());
        }

        let request = FinancingRequest::new(actor.id.clone(), application, Utc::now());
        let stored = self.repository.insert_request(request).await?;
        self.record(ActivityLogEntry::new(
            stored.id,
            actor.id.clone(),
            ActivityAction::RequestCreated,
            json!({
                "property_id": stored.property_id.0,
                "requested_amount": stored.requested_amount,
                "period_months": stored.period_months,
            }),
        ))
        .await;

        info!(request_id = %stored.id, owner = %actor.id, "financing request submitted");
        Ok(stored)
    }

    /// Fetch a request the actor is allowed to see.
    pub async fn get(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
    ) -> Result<FinancingRequest, WorkflowError> {
        let request = self.load(id).await?;
        let permissions = Permissions::resolve(actor, &request);
        if !permissions.can_view() {
            return Err(WorkflowError::Forbidden {
                operation: "view this financing request",
            });
        }
        Ok(request)
    }

    pub async fn assign(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        responsible: UserId,
    ) -> Result<FinancingRequest, WorkflowError> {
        if responsible.as_str().trim().is_empty() {
            return Err(ValidationError::MissingResponsiblePerson.into());
        }
        self.execute(
            actor,
            id,
            WorkflowAction::Assign,
            TransitionInput {
                responsible: Some(responsible),
                notes: None,
            },
        )
        .await
    }

    /// Hand an in-flight request to a different responsible person without moving its stage.
    pub async fn reassign(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        responsible: UserId,
    ) -> Result<FinancingRequest, WorkflowError> {
        if responsible.as_str().trim().is_empty() {
            return Err(ValidationError::MissingResponsiblePerson.into());
        }
        let request = self.load(id).await?;
        if !actor.is_admin() {
            return Err(WorkflowError::Forbidden {
                operation: "reassign this financing request",
            });
        }
        if !request.stage.requires_responsible_person() || request.stage.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                action: WorkflowAction::Assign,
                stage: request.stage,
            });
        }
        if request.is_responsible(&responsible) {
            return Ok(request);
        }

        let previous = request.responsible_person_id.clone();
        let mut updated = request;
        updated.responsible_person_id = Some(responsible.clone());
        updated.updated_at = Utc::now();
        self.repository.update_request(&updated).await?;

        self.record(ActivityLogEntry::new(
            id,
            actor.id.clone(),
            ActivityAction::Assignment,
            json!({
                "responsible_person_id": responsible.0,
                "previous_responsible_person_id": previous.as_ref().map(|user| user.0.clone()),
                "stage": updated.stage,
            }),
        ))
        .await;
        self.notify(Notification::for_request(
            responsible,
            id,
            "Financing request assigned",
            "A financing request was reassigned to you.",
        ))
        .await;

        self.load(id).await
    }

    /// Take the single forward step the actor is offered for the current stage.
    pub async fn progress(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
    ) -> Result<FinancingRequest, WorkflowError> {
        let request = self.load(id).await?;
        let permissions = Permissions::resolve(actor, &request);
        if !permissions.can_view() {
            return Err(WorkflowError::Forbidden {
                operation: "view this financing request",
            });
        }
        match next_stage(request.stage, &permissions) {
            Some(step) => self.advance(actor, id, step.action).await,
            None if transitions::outgoing(request.stage)
                .any(|transition| transition.action.is_progress()) =>
            {
                Err(WorkflowError::Forbidden {
                    operation: "advance this financing request",
                })
            }
            None => Err(WorkflowError::NoForwardStep {
                stage: request.stage,
            }),
        }
    }

    /// Run one of the progress actions explicitly.
    pub async fn advance(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        action: WorkflowAction,
    ) -> Result<FinancingRequest, WorkflowError> {
        if !action.is_progress() {
            return Err(WorkflowError::NotAProgressAction(action));
        }
        self.execute(actor, id, action, TransitionInput::default())
            .await
    }

    pub async fn send_back(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        notes: String,
    ) -> Result<FinancingRequest, WorkflowError> {
        let notes = non_blank(Some(notes)).ok_or(ValidationError::EmptySendBackNotes)?;
        self.execute(
            actor,
            id,
            WorkflowAction::SendBack,
            TransitionInput {
                responsible: None,
                notes: Some(notes),
            },
        )
        .await
    }

    pub async fn approve(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        admin_notes: Option<String>,
    ) -> Result<FinancingRequest, WorkflowError> {
        self.execute(
            actor,
            id,
            WorkflowAction::Approve,
            TransitionInput {
                responsible: None,
                notes: non_blank(admin_notes),
            },
        )
        .await
    }

    pub async fn deny(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        admin_notes: Option<String>,
    ) -> Result<FinancingRequest, WorkflowError> {
        self.execute(
            actor,
            id,
            WorkflowAction::Deny,
            TransitionInput {
                responsible: None,
                notes: non_blank(admin_notes),
            },
        )
        .await
    }

    /// Ask the applicant for a document, entering `document_collection` if needed.
    pub async fn request_document(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        input: NewDocumentRequest,
    ) -> Result<DocumentRequest, WorkflowError> {
        let document_type = input.document_type.trim().to_string();
        if document_type.is_empty() {
            return Err(ValidationError::MissingDocumentType.into());
        }

        let request = self.load(id).await?;
        let permissions = Permissions::resolve(actor, &request);
        let transition = self.authorize(&request, &permissions, WorkflowAction::RequestDocument)?;
        transition.guard.check(&GuardContext {
            has_responsible_person: request.responsible_person_id.is_some(),
            document_type: Some(&document_type),
            ..GuardContext::default()
        })?;

        let now = Utc::now();
        let document = DocumentRequest {
            id: DocumentRequestId::new(),
            financing_request_id: id,
            requested_by: actor.id.clone(),
            document_type,
            description: non_blank(input.description),
            deadline_at: input.deadline_at,
            status: DocumentStatus::Pending,
            response_notes: None,
            user_file_urls: Vec::new(),
            submitted_at: None,
            created_at: now,
        };
        let from_stage = request.stage;
        let stage_changed = from_stage != transition.to;
        let entered = stage_changed.then(|| {
            let mut updated = request.clone();
            apply_stage(&mut updated, transition, now);
            updated
        });
        let document = self
            .repository
            .insert_document_request(document, entered.as_ref())
            .await?;

        self.record(ActivityLogEntry::new(
            id,
            actor.id.clone(),
            ActivityAction::DocRequested,
            json!({
                "document_request_id": document.id,
                "document_type": document.document_type,
                "deadline_at": document.deadline_at,
                "from_stage": from_stage,
                "to_stage": transition.to,
            }),
        ))
        .await;
        self.notify(Notification::for_request(
            request.user_id.clone(),
            id,
            "Document requested",
            format!(
                "Please upload \"{}\" for your financing request.",
                document.document_type
            ),
        ))
        .await;

        info!(
            request_id = %id,
            document_request_id = %document.id,
            stage_changed,
            "document requested"
        );

        self.repository
            .fetch_document_request(document.id)
            .await?
            .ok_or(WorkflowError::DocumentNotFound(document.id))
    }

    pub async fn post_message(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        message: String,
        is_internal: bool,
    ) -> Result<Communication, WorkflowError> {
        let message = non_blank(Some(message)).ok_or(ValidationError::EmptyMessage)?;
        let request = self.load(id).await?;
        let permissions = Permissions::resolve(actor, &request);
        if !(permissions.is_owner || permissions.can_manage) {
            return Err(WorkflowError::Forbidden {
                operation: "post messages on this financing request",
            });
        }
        if is_internal && !permissions.can_manage {
            return Err(WorkflowError::Forbidden {
                operation: "post internal notes",
            });
        }

        let communication = Communication {
            id: Uuid::new_v4(),
            financing_request_id: id,
            sender_id: actor.id.clone(),
            message,
            is_internal,
            created_at: Utc::now(),
        };
        let stored = self.repository.insert_communication(communication).await?;
        debug!(request_id = %id, is_internal, "financing message posted");
        Ok(stored)
    }

    /// Messages visible to the actor; internal notes are staff-only.
    pub async fn messages(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
    ) -> Result<Vec<Communication>, WorkflowError> {
        let request = self.get(actor, id).await?;
        let permissions = Permissions::resolve(actor, &request);
        let messages = self.repository.list_communications(id).await?;
        Ok(visible_messages(messages, &permissions))
    }

    /// Assemble the full detail view for the actor.
    pub async fn detail(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
    ) -> Result<FinancingRequestDetail, WorkflowError> {
        let request = self.get(actor, id).await?;
        let permissions = Permissions::resolve(actor, &request);
        let documents = self.repository.list_document_requests(id).await?;
        let communications = self.repository.list_communications(id).await?;
        let timeline = self.activity.list_activity(id).await?;

        Ok(FinancingRequestDetail::build(
            request,
            permissions,
            documents,
            visible_messages(communications, &permissions),
            timeline,
        ))
    }

    pub(crate) async fn load(
        &self,
        id: FinancingRequestId,
    ) -> Result<FinancingRequest, WorkflowError> {
        self.repository
            .fetch_request(id)
            .await?
            .ok_or(WorkflowError::RequestNotFound(id))
    }

    fn authorize(
        &self,
        request: &FinancingRequest,
        permissions: &Permissions,
        action: WorkflowAction,
    ) -> Result<&'static Transition, WorkflowError> {
        if !permissions.can_view() {
            return Err(WorkflowError::Forbidden {
                operation: "view this financing request",
            });
        }
        let transition =
            transitions::lookup(request.stage, action).ok_or(WorkflowError::InvalidTransition {
                action,
                stage: request.stage,
            })?;
        if !transition.actor.permits(permissions) {
            return Err(WorkflowError::Forbidden {
                operation: action.label(),
            });
        }
        Ok(transition)
    }

    async fn execute(
        &self,
        actor: &CurrentActor,
        id: FinancingRequestId,
        action: WorkflowAction,
        input: TransitionInput,
    ) -> Result<FinancingRequest, WorkflowError> {
        let request = self.load(id).await?;
        let permissions = Permissions::resolve(actor, &request);
        let transition = self.authorize(&request, &permissions, action)?;

        let pending_documents = if transition.guard == Guard::NoPendingDocuments {
            self.repository
                .list_document_requests(id)
                .await?
                .iter()
                .filter(|document| document.is_pending())
                .count()
        } else {
            0
        };
        transition.guard.check(&GuardContext {
            has_responsible_person: request.responsible_person_id.is_some(),
            pending_documents,
            notes: input.notes.as_deref(),
            document_type: None,
        })?;

        let now = Utc::now();
        let mut updated = request.clone();
        apply_stage(&mut updated, transition, now);
        match action {
            WorkflowAction::Assign => {
                updated.responsible_person_id = input.responsible.clone();
            }
            WorkflowAction::Approve | WorkflowAction::Deny => {
                updated.admin_notes = input.notes.clone();
                updated.reviewed_at = Some(now);
                updated.reviewed_by = Some(actor.id.clone());
            }
            WorkflowAction::SendBack => {
                updated.sent_back_to_responsible = true;
                updated.sent_back_notes = input.notes.clone();
            }
            _ => {}
        }

        self.repository.update_request(&updated).await?;

        let (activity_action, details) = match action {
            WorkflowAction::Assign => (
                ActivityAction::Assignment,
                json!({
                    "responsible_person_id": input.responsible.as_ref().map(|user| user.0.clone()),
                    "from_stage": transition.from,
                    "to_stage": transition.to,
                }),
            ),
            WorkflowAction::Approve => (
                ActivityAction::Approved,
                json!({
                    "admin_notes": input.notes,
                    "from_stage": transition.from,
                    "to_stage": transition.to,
                }),
            ),
            WorkflowAction::Deny => (
                ActivityAction::Denied,
                json!({
                    "admin_notes": input.notes,
                    "from_stage": transition.from,
                    "to_stage": transition.to,
                }),
            ),
            WorkflowAction::SendBack => (
                ActivityAction::SentBack,
                json!({
                    "notes": input.notes,
                    "from_stage": transition.from,
                    "to_stage": transition.to,
                }),
            ),
            _ => (
                ActivityAction::StageChange,
                json!({
                    "from_stage": transition.from,
                    "to_stage": transition.to,
                }),
            ),
        };
        self.record(ActivityLogEntry::new(
            id,
            actor.id.clone(),
            activity_action,
            details,
        ))
        .await;

        if let Some(notification) = transition_notification(&updated, action) {
            self.notify(notification).await;
        }

        info!(
            request_id = %id,
            actor = %actor.id,
            from = %transition.from,
            to = %transition.to,
            ?action,
            "financing request transitioned"
        );

        self.load(id).await
    }

    /// Append to the audit trail. A failed append cannot undo the committed change it
    /// describes, so it is logged rather than returned.
    pub(crate) async fn record(&self, entry: ActivityLogEntry) {
        let request_id = entry.financing_request_id;
        let action = entry.action_type;
        if let Err(err) = self.activity.append_activity(entry).await {
            warn!(%request_id, action = action.as_str(), error = %err, "activity log append failed");
        }
    }

    pub(crate) async fn notify(&self, notification: Notification) {
        let user = notification.user_id.clone();
        if let Err(err) = self.activity.notify(notification).await {
            warn!(%user, error = %err, "notification enqueue failed");
        }
    }
}

/// Moves the request to the transition's target stage. Send-back context survives only the
/// send-back itself.
fn apply_stage(
    request: &mut FinancingRequest,
    transition: &Transition,
    now: chrono::DateTime<Utc>,
) {
    request.stage = transition.to;
    request.status = FinancingStatus::for_stage(transition.to);
    request.updated_at = now;
    if transition.action != WorkflowAction::SendBack {
        request.sent_back_to_responsible = false;
        request.sent_back_notes = None;
    }
}

fn transition_notification(
    request: &FinancingRequest,
    action: WorkflowAction,
) -> Option<Notification> {
    match action {
        WorkflowAction::Assign => request.responsible_person_id.clone().map(|user| {
            Notification::for_request(
                user,
                request.id,
                "Financing request assigned",
                "A new financing request was assigned to you.",
            )
        }),
        WorkflowAction::SendBack => request.responsible_person_id.clone().map(|user| {
            Notification::for_request(
                user,
                request.id,
                "Financing request sent back",
                request
                    .sent_back_notes
                    .clone()
                    .unwrap_or_else(|| "Returned for further review.".to_string()),
            )
        }),
        WorkflowAction::Approve => Some(Notification::for_request(
            request.user_id.clone(),
            request.id,
            "Financing approved",
            "Your financing request has been approved.",
        )),
        WorkflowAction::Deny => Some(Notification::for_request(
            request.user_id.clone(),
            request.id,
            "Financing denied",
            "Your financing request has been denied.",
        )),
        _ => None,
    }
}

pub(crate) fn visible_messages(
    messages: Vec<Communication>,
    permissions: &Permissions,
) -> Vec<Communication> {
    let sees_internal = permissions.can_manage || permissions.is_staff;
    messages
        .into_iter()
        .filter(|message| sees_internal || !message.is_internal)
        .collect()
}

/// Input problems caught before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("document type is required")]
    MissingDocumentType,
    #[error("send-back notes are required")]
    EmptySendBackNotes,
    #[error("responsible person is required")]
    MissingResponsiblePerson,
    #[error("no files staged for document request {0}")]
    NoFilesStaged(DocumentRequestId),
    #[error("staged files changed after confirmation for document request {0}")]
    StaleConfirmation(DocumentRequestId),
    #[error("file `{0}` is empty")]
    EmptyFile(String),
    #[error("file `{0}` is not valid base64")]
    InvalidFileEncoding(String),
    #[error("file `{name}` is {size} bytes, above the {limit} byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },
    #[error("file `{name}` has unsupported type `{content_type}`")]
    UnsupportedFileType { name: String, content_type: String },
    #[error("requested amount must be greater than zero")]
    InvalidAmount,
    #[error("financing period must be at least one month")]
    InvalidPeriod,
    #[error("message cannot be empty")]
    EmptyMessage,
}

/// Error raised by the financing workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not permitted to {operation}")]
    Forbidden { operation: &'static str },
    #[error("{action:?} is not available while the request is {stage}")]
    InvalidTransition {
        action: WorkflowAction,
        stage: FinancingStage,
    },
    #[error("no forward step is available from {stage}")]
    NoForwardStep { stage: FinancingStage },
    #[error("{0:?} is not a progress action")]
    NotAProgressAction(WorkflowAction),
    #[error(transparent)]
    Guard(#[from] GuardViolation),
    #[error("financing request {0} not found")]
    RequestNotFound(FinancingRequestId),
    #[error("document request {0} not found")]
    DocumentNotFound(DocumentRequestId),
    #[error("document request {0} was already submitted")]
    AlreadySubmitted(DocumentRequestId),
    #[error("document submission rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Activity(#[from] SinkError),
}
