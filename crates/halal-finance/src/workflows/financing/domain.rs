use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a financing request row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinancingRequestId(pub Uuid);

impl FinancingRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FinancingRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FinancingRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a single document ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRequestId(pub Uuid);

impl DocumentRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity provider user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "moderator" => Some(Self::Moderator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The authenticated caller, passed explicitly into every workflow operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentActor {
    pub id: UserId,
    pub role: UserRole,
}

impl CurrentActor {
    pub fn new(id: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: UserId::new(id),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Admins and moderators both work the back office.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Moderator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancingStage {
    Submitted,
    Assigned,
    DocumentCollection,
    UnderReview,
    FinalApproval,
    Approved,
    Denied,
}

impl FinancingStage {
    pub const fn ordered() -> [Self; 7] {
        [
            Self::Submitted,
            Self::Assigned,
            Self::DocumentCollection,
            Self::UnderReview,
            Self::FinalApproval,
            Self::Approved,
            Self::Denied,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Assigned => "Assigned",
            Self::DocumentCollection => "Document Collection",
            Self::UnderReview => "Under Review",
            Self::FinalApproval => "Final Approval",
            Self::Approved => "Approved",
            Self::Denied => "Denied",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Assigned => "assigned",
            Self::DocumentCollection => "document_collection",
            Self::UnderReview => "under_review",
            Self::FinalApproval => "final_approval",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Denied)
    }

    /// Every stage after `submitted` carries an assigned specialist.
    pub const fn requires_responsible_person(self) -> bool {
        !matches!(self, Self::Submitted)
    }
}

impl fmt::Display for FinancingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancingStatus {
    Pending,
    Approved,
    Denied,
}

impl FinancingStatus {
    pub const fn for_stage(stage: FinancingStage) -> Self {
        match stage {
            FinancingStage::Approved => Self::Approved,
            FinancingStage::Denied => Self::Denied,
            _ => Self::Pending,
        }
    }
}

/// A buyer's request to finance a property purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancingRequest {
    pub id: FinancingRequestId,
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub stage: FinancingStage,
    pub status: FinancingStatus,
    pub responsible_person_id: Option<UserId>,
    pub requested_amount: u64,
    pub cash_available: u64,
    pub period_months: u16,
    pub admin_notes: Option<String>,
    pub sent_back_to_responsible: bool,
    pub sent_back_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinancingRequest {
    pub fn new(owner: UserId, application: FinancingApplication, now: DateTime<Utc>) -> Self {
        Self {
            id: FinancingRequestId::new(),
            property_id: application.property_id,
            user_id: owner,
            stage: FinancingStage::Submitted,
            status: FinancingStatus::Pending,
            responsible_person_id: None,
            requested_amount: application.requested_amount,
            cash_available: application.cash_available,
            period_months: application.period_months,
            admin_notes: None,
            sent_back_to_responsible: false,
            sent_back_notes: None,
            reviewed_at: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_responsible(&self, user: &UserId) -> bool {
        self.responsible_person_id.as_ref() == Some(user)
    }
}

/// Buyer-provided fields for a new financing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancingApplication {
    pub property_id: PropertyId,
    pub requested_amount: u64,
    pub cash_available: u64,
    pub period_months: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub id: DocumentRequestId,
    pub financing_request_id: FinancingRequestId,
    pub requested_by: UserId,
    pub document_type: String,
    pub description: Option<String>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
    pub response_notes: Option<String>,
    pub user_file_urls: Vec<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRequest {
    pub fn is_pending(&self) -> bool {
        self.status == DocumentStatus::Pending
    }
}

/// Staff input for asking the applicant for a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocumentRequest {
    pub document_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deadline_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    RequestCreated,
    Assignment,
    StageChange,
    DocRequested,
    DocSubmitted,
    SentBack,
    Approved,
    Denied,
}

impl ActivityAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::Assignment => "assignment",
            Self::StageChange => "stage_change",
            Self::DocRequested => "doc_requested",
            Self::DocSubmitted => "doc_submitted",
            Self::SentBack => "sent_back",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub financing_request_id: FinancingRequestId,
    pub actor_id: UserId,
    pub action_type: ActivityAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn new(
        financing_request_id: FinancingRequestId,
        actor_id: UserId,
        action_type: ActivityAction,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            financing_request_id,
            actor_id,
            action_type,
            details,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Communication {
    pub id: Uuid,
    pub financing_request_id: FinancingRequestId,
    pub sender_id: UserId,
    pub message: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

/// Row for the user-facing notifications table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub financing_request_id: Option<FinancingRequestId>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_request(
        user_id: UserId,
        financing_request_id: FinancingRequestId,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            message: message.into(),
            financing_request_id: Some(financing_request_id),
            read: false,
            created_at: Utc::now(),
        }
    }
}

/// Normalizes optional free text: trimmed, and `None` when blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
