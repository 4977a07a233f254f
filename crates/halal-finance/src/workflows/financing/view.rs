use serde::Serialize;

use super::domain::{
    ActivityLogEntry, Communication, DocumentRequest, DocumentStatus, FinancingRequest,
    FinancingStage,
};
use super::transitions::{
    next_stage, outgoing, ForwardStep, Guard, GuardContext, Permissions, WorkflowAction,
};

/// How a document request renders for the current viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentMode {
    Upload,
    AwaitingApplicant,
    ReadOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentCard {
    pub document: DocumentRequest,
    pub mode: DocumentMode,
}

impl DocumentCard {
    pub fn new(document: DocumentRequest, permissions: &Permissions) -> Self {
        let mode = match document.status {
            DocumentStatus::Submitted => DocumentMode::ReadOnly,
            DocumentStatus::Pending if permissions.is_owner => DocumentMode::Upload,
            DocumentStatus::Pending => DocumentMode::AwaitingApplicant,
        };
        Self { document, mode }
    }
}

/// A control the viewer could use, with the reason when it is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionAffordance {
    pub action: WorkflowAction,
    pub label: &'static str,
    pub to: FinancingStage,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

/// Everything the request detail screen shows, resolved for one viewer.
#[derive(Debug, Clone, Serialize)]
pub struct FinancingRequestDetail {
    pub request: FinancingRequest,
    pub permissions: Permissions,
    pub documents: Vec<DocumentCard>,
    pub pending_documents: usize,
    pub communications: Vec<Communication>,
    pub timeline: Vec<ActivityLogEntry>,
    pub actions: Vec<ActionAffordance>,
    pub next_step: Option<ForwardStep>,
    pub can_reassign: bool,
}

impl FinancingRequestDetail {
    pub fn build(
        request: FinancingRequest,
        permissions: Permissions,
        mut documents: Vec<DocumentRequest>,
        mut communications: Vec<Communication>,
        mut timeline: Vec<ActivityLogEntry>,
    ) -> Self {
        documents.sort_by_key(|document| document.created_at);
        communications.sort_by_key(|message| message.created_at);
        timeline.sort_by_key(|entry| entry.created_at);

        let pending_documents = documents
            .iter()
            .filter(|document| document.is_pending())
            .count();
        let actions = available_actions(&request, &permissions, pending_documents);
        let next_step = next_stage(request.stage, &permissions);
        let can_reassign = permissions.is_admin
            && request.stage.requires_responsible_person()
            && !request.stage.is_terminal();
        let documents = documents
            .into_iter()
            .map(|document| DocumentCard::new(document, &permissions))
            .collect();

        Self {
            request,
            permissions,
            documents,
            pending_documents,
            communications,
            timeline,
            actions,
            next_step,
            can_reassign,
        }
    }
}

/// Actions from the stage table the viewer is authorized for. Guards that depend on live data
/// decide `enabled`; guards on form input are checked when the form is sent.
pub fn available_actions(
    request: &FinancingRequest,
    permissions: &Permissions,
    pending_documents: usize,
) -> Vec<ActionAffordance> {
    let context = GuardContext {
        has_responsible_person: request.responsible_person_id.is_some(),
        pending_documents,
        notes: None,
        document_type: None,
    };

    outgoing(request.stage)
        .filter(|transition| transition.actor.permits(permissions))
        .map(|transition| {
            let verdict = match transition.guard {
                Guard::NotesPresent | Guard::DocumentTypePresent => Ok(()),
                guard => guard.check(&context),
            };
            ActionAffordance {
                action: transition.action,
                label: transition.action.label(),
                to: transition.to,
                enabled: verdict.is_ok(),
                disabled_reason: verdict.err().map(|violation| violation.to_string()),
            }
        })
        .collect()
}
