//! The financing stage machine expressed as a lookup table.
//!
//! Every legal move is one [`Transition`] row: the stage it starts from, the action that drives
//! it, who may take it, which guard must hold and where it lands. Callers never branch on stages
//! directly; they look up `(stage, action)` and evaluate the row.

use serde::{Deserialize, Serialize};

use super::domain::{CurrentActor, FinancingRequest, FinancingStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Assign,
    StartDocumentCollection,
    BeginReview,
    SubmitForFinalApproval,
    Approve,
    Deny,
    SendBack,
    RequestDocument,
}

impl WorkflowAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Assign => "Assign responsible person",
            Self::StartDocumentCollection => "Start document collection",
            Self::BeginReview => "Begin review",
            Self::SubmitForFinalApproval => "Submit for final approval",
            Self::Approve => "Approve",
            Self::Deny => "Deny",
            Self::SendBack => "Send back to responsible person",
            Self::RequestDocument => "Request document",
        }
    }

    /// Progress actions are the ones surfaced by the single "next stage" button.
    pub const fn is_progress(self) -> bool {
        matches!(
            self,
            Self::StartDocumentCollection | Self::BeginReview | Self::SubmitForFinalApproval
        )
    }
}

/// Who may drive a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRequirement {
    Admin,
    /// The assigned responsible person or an admin.
    Manager,
}

impl ActorRequirement {
    pub fn permits(self, permissions: &Permissions) -> bool {
        match self {
            Self::Admin => permissions.is_admin,
            Self::Manager => permissions.can_manage,
        }
    }
}

/// Precondition checked against live data before a transition is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Always,
    Unassigned,
    NoPendingDocuments,
    NotesPresent,
    DocumentTypePresent,
}

/// Facts a guard may consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardContext<'a> {
    pub has_responsible_person: bool,
    pub pending_documents: usize,
    pub notes: Option<&'a str>,
    pub document_type: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("request already has a responsible person")]
    AlreadyAssigned,
    #[error("{0} document request(s) still pending")]
    PendingDocuments(usize),
    #[error("send-back notes are required")]
    MissingNotes,
    #[error("document type is required")]
    MissingDocumentType,
}

fn present(value: Option<&str>) -> bool {
    value.map(|text| !text.trim().is_empty()).unwrap_or(false)
}

impl Guard {
    pub fn check(self, context: &GuardContext<'_>) -> Result<(), GuardViolation> {
        match self {
            Self::Always => Ok(()),
            Self::Unassigned if context.has_responsible_person => {
                Err(GuardViolation::AlreadyAssigned)
            }
            Self::Unassigned => Ok(()),
            Self::NoPendingDocuments if context.pending_documents > 0 => {
                Err(GuardViolation::PendingDocuments(context.pending_documents))
            }
            Self::NoPendingDocuments => Ok(()),
            Self::NotesPresent if present(context.notes) => Ok(()),
            Self::NotesPresent => Err(GuardViolation::MissingNotes),
            Self::DocumentTypePresent if present(context.document_type) => Ok(()),
            Self::DocumentTypePresent => Err(GuardViolation::MissingDocumentType),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: FinancingStage,
    pub action: WorkflowAction,
    pub actor: ActorRequirement,
    pub guard: Guard,
    pub to: FinancingStage,
}

const fn row(
    from: FinancingStage,
    action: WorkflowAction,
    actor: ActorRequirement,
    guard: Guard,
    to: FinancingStage,
) -> Transition {
    Transition {
        from,
        action,
        actor,
        guard,
        to,
    }
}

use ActorRequirement::{Admin, Manager};
use FinancingStage::*;
use WorkflowAction::*;

pub const TRANSITIONS: &[Transition] = &[
    row(Submitted, Assign, Admin, Guard::Unassigned, Assigned),
    row(
        Assigned,
        StartDocumentCollection,
        Manager,
        Guard::Always,
        DocumentCollection,
    ),
    row(
        DocumentCollection,
        BeginReview,
        Manager,
        Guard::NoPendingDocuments,
        UnderReview,
    ),
    row(
        UnderReview,
        SubmitForFinalApproval,
        Manager,
        Guard::Always,
        FinalApproval,
    ),
    row(FinalApproval, WorkflowAction::Approve, Admin, Guard::Always, Approved),
    row(FinalApproval, WorkflowAction::Deny, Admin, Guard::Always, Denied),
    row(FinalApproval, SendBack, Admin, Guard::NotesPresent, UnderReview),
    row(
        Assigned,
        RequestDocument,
        Manager,
        Guard::DocumentTypePresent,
        DocumentCollection,
    ),
    row(
        DocumentCollection,
        RequestDocument,
        Manager,
        Guard::DocumentTypePresent,
        DocumentCollection,
    ),
    row(
        UnderReview,
        RequestDocument,
        Manager,
        Guard::DocumentTypePresent,
        DocumentCollection,
    ),
    row(
        FinalApproval,
        RequestDocument,
        Manager,
        Guard::DocumentTypePresent,
        DocumentCollection,
    ),
];

pub fn lookup(from: FinancingStage, action: WorkflowAction) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|transition| transition.from == from && transition.action == action)
}

/// All rows leaving `from`, in table order.
pub fn outgoing(from: FinancingStage) -> impl Iterator<Item = &'static Transition> {
    TRANSITIONS
        .iter()
        .filter(move |transition| transition.from == from)
}

/// Role predicates resolved for one actor against one request. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub is_admin: bool,
    pub is_staff: bool,
    pub is_responsible_person: bool,
    pub can_manage: bool,
    pub is_owner: bool,
}

impl Permissions {
    pub fn resolve(actor: &CurrentActor, request: &FinancingRequest) -> Self {
        let is_admin = actor.is_admin();
        let is_responsible_person = request.is_responsible(&actor.id);
        Self {
            is_admin,
            is_staff: actor.is_staff(),
            is_responsible_person,
            can_manage: is_admin || is_responsible_person,
            is_owner: request.user_id == actor.id,
        }
    }

    pub fn can_view(&self) -> bool {
        self.is_owner || self.can_manage || self.is_staff
    }
}

/// The forward step offered by the "progress" affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForwardStep {
    pub action: WorkflowAction,
    pub from: FinancingStage,
    pub to: FinancingStage,
}

/// Returns the single legal forward progress step for `stage` if the actor may take it.
pub fn next_stage(stage: FinancingStage, permissions: &Permissions) -> Option<ForwardStep> {
    outgoing(stage)
        .find(|transition| transition.action.is_progress())
        .filter(|transition| transition.actor.permits(permissions))
        .map(|transition| ForwardStep {
            action: transition.action,
            from: transition.from,
            to: transition.to,
        })
}
