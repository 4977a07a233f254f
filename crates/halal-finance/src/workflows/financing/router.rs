use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::admin::FinancingDashboard;
use super::documents::{DocumentUploadManager, StagedFile, UploadDrafts, UploadPolicy};
use super::domain::{
    CurrentActor, DocumentRequestId, FinancingApplication, FinancingRequestId,
    NewDocumentRequest, UserId, UserRole,
};
use super::repository::{
    ActivitySink, BlobStore, FinancingRepository, RepositoryError, RequestFilter,
};
use super::service::{FinancingWorkflowService, ValidationError, WorkflowError};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Largest batch of maximum-size files one submit body is sized for.
pub const MAX_FILES_PER_SUBMISSION: u64 = 5;
const SUBMISSION_ENVELOPE_BYTES: u64 = 64 * 1024;

/// Body limit for the document submit route: base64 inflates each file by 4/3, plus room for
/// the JSON envelope and response notes.
pub fn submission_body_limit(policy: &UploadPolicy) -> usize {
    let encoded_file = policy.max_upload_bytes.div_ceil(3).saturating_mul(4);
    let limit = encoded_file
        .saturating_mul(MAX_FILES_PER_SUBMISSION)
        .saturating_add(SUBMISSION_ENVELOPE_BYTES);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Shared handles behind the financing routes.
pub struct FinancingApi<R, B, S> {
    pub workflow: Arc<FinancingWorkflowService<R, S>>,
    pub documents: Arc<DocumentUploadManager<R, B, S>>,
    pub dashboard: Arc<FinancingDashboard<R, S>>,
}

impl<R, B, S> FinancingApi<R, B, S>
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    pub fn new(repository: Arc<R>, storage: Arc<B>, activity: Arc<S>, policy: UploadPolicy) -> Self {
        let workflow = Arc::new(FinancingWorkflowService::new(
            repository.clone(),
            activity.clone(),
        ));
        let documents = Arc::new(DocumentUploadManager::new(
            repository, storage, activity, policy,
        ));
        let dashboard = Arc::new(FinancingDashboard::new(workflow.clone()));
        Self {
            workflow,
            documents,
            dashboard,
        }
    }
}

/// Router builder exposing the financing workflow over HTTP.
pub fn financing_router<R, B, S>(api: Arc<FinancingApi<R, B, S>>) -> Router
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let body_limit = submission_body_limit(api.documents.policy());
    Router::new()
        .route(
            "/api/v1/financing/requests",
            post(submit_request_handler::<R, B, S>).get(list_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id",
            get(detail_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/assign",
            post(assign_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/reassign",
            post(reassign_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/progress",
            post(progress_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/send-back",
            post(send_back_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/approve",
            post(approve_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/deny",
            post(deny_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/documents",
            post(request_document_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/requests/:request_id/messages",
            get(messages_handler::<R, B, S>).post(post_message_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/documents/:document_id/submit",
            post(submit_document_handler::<R, B, S>).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/api/v1/financing/dashboard",
            get(dashboard_handler::<R, B, S>),
        )
        .route(
            "/api/v1/financing/bulk-assign",
            post(bulk_assign_handler::<R, B, S>),
        )
        .with_state(api)
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkflowError::Validation(_) | WorkflowError::NotAProgressAction(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WorkflowError::Forbidden { .. } => StatusCode::FORBIDDEN,
            WorkflowError::RequestNotFound(_)
            | WorkflowError::DocumentNotFound(_)
            | WorkflowError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            WorkflowError::InvalidTransition { .. }
            | WorkflowError::NoForwardStep { .. }
            | WorkflowError::Guard(_)
            | WorkflowError::AlreadySubmitted(_)
            | WorkflowError::Rejected(_)
            | WorkflowError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            WorkflowError::Repository(_) | WorkflowError::Storage(_) | WorkflowError::Activity(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let payload = json!({ "error": self.to_string() });
        (status, Json(payload)).into_response()
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

/// Reads the caller identity forwarded by the upstream identity gateway.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<CurrentActor, Response> {
    let id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| unauthorized("missing x-user-id header"))?;
    let role = match headers
        .get(USER_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(raw) => UserRole::parse(raw).ok_or_else(|| unauthorized("unknown x-user-role"))?,
        None => UserRole::User,
    };
    Ok(CurrentActor::new(id, role))
}

macro_rules! actor_or_return {
    ($headers:expr) => {
        match actor_from_headers(&$headers) {
            Ok(actor) => actor,
            Err(response) => return response,
        }
    };
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, WorkflowError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignBody {
    pub(crate) responsible_person_id: UserId,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DecisionBody {
    #[serde(default)]
    pub(crate) admin_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SendBackBody {
    #[serde(default)]
    pub(crate) notes: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageBody {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) is_internal: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkAssignBody {
    pub(crate) ids: Vec<FinancingRequestId>,
    pub(crate) responsible_person_id: UserId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadedFileBody {
    pub(crate) file_name: String,
    #[serde(default)]
    pub(crate) content_type: Option<String>,
    pub(crate) content_base64: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitDocumentBody {
    #[serde(default)]
    pub(crate) confirmed: bool,
    #[serde(default)]
    pub(crate) files: Vec<UploadedFileBody>,
    #[serde(default)]
    pub(crate) response_notes: Option<String>,
}

pub(crate) async fn submit_request_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Json(application): Json<FinancingApplication>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::CREATED,
        api.workflow.submit_request(&actor, application).await,
    )
}

pub(crate) async fn list_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Query(filter): Query<RequestFilter>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(StatusCode::OK, api.dashboard.list(&actor, &filter).await)
}

pub(crate) async fn detail_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .detail(&actor, FinancingRequestId(request_id))
            .await,
    )
}

pub(crate) async fn assign_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .assign(
                &actor,
                FinancingRequestId(request_id),
                body.responsible_person_id,
            )
            .await,
    )
}

pub(crate) async fn reassign_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .reassign(
                &actor,
                FinancingRequestId(request_id),
                body.responsible_person_id,
            )
            .await,
    )
}

pub(crate) async fn progress_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .progress(&actor, FinancingRequestId(request_id))
            .await,
    )
}

pub(crate) async fn send_back_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<SendBackBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .send_back(&actor, FinancingRequestId(request_id), body.notes)
            .await,
    )
}

pub(crate) async fn approve_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .approve(&actor, FinancingRequestId(request_id), body.admin_notes)
            .await,
    )
}

pub(crate) async fn deny_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .deny(&actor, FinancingRequestId(request_id), body.admin_notes)
            .await,
    )
}

pub(crate) async fn request_document_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<NewDocumentRequest>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::CREATED,
        api.workflow
            .request_document(&actor, FinancingRequestId(request_id), body)
            .await,
    )
}

pub(crate) async fn messages_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.workflow
            .messages(&actor, FinancingRequestId(request_id))
            .await,
    )
}

pub(crate) async fn post_message_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<MessageBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::CREATED,
        api.workflow
            .post_message(
                &actor,
                FinancingRequestId(request_id),
                body.message,
                body.is_internal,
            )
            .await,
    )
}

pub(crate) async fn submit_document_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Path(document_id): Path<Uuid>,
    body: Result<Json<SubmitDocumentBody>, JsonRejection>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    let id = DocumentRequestId(document_id);
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response()
        }
    };

    let mut files = Vec::with_capacity(body.files.len());
    for file in body.files {
        let bytes = match STANDARD.decode(file.content_base64.trim()) {
            Ok(bytes) => bytes,
            Err(_) => {
                return WorkflowError::from(ValidationError::InvalidFileEncoding(file.file_name))
                    .into_response()
            }
        };
        let staged = StagedFile::new(file.file_name, bytes);
        files.push(match file.content_type {
            Some(content_type) => staged.with_content_type(content_type),
            None => staged,
        });
    }

    let mut drafts = UploadDrafts::new();
    drafts.select_files(id, files);
    drafts.set_response_notes(id, body.response_notes);

    if !body.confirmed {
        let payload = json!({
            "error": "submission must be explicitly confirmed",
            "document_request_id": id,
            "staged_files": drafts.staged(id).map_or(0, |draft| draft.files.len()),
        });
        return (StatusCode::PRECONDITION_REQUIRED, Json(payload)).into_response();
    }

    let confirmation = match drafts.confirm(id) {
        Ok(confirmation) => confirmation,
        Err(err) => return WorkflowError::from(err).into_response(),
    };
    respond(
        StatusCode::OK,
        api.documents.submit(&actor, &mut drafts, confirmation).await,
    )
}

pub(crate) async fn dashboard_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(StatusCode::OK, api.dashboard.overview(&actor).await)
}

pub(crate) async fn bulk_assign_handler<R, B, S>(
    State(api): State<Arc<FinancingApi<R, B, S>>>,
    headers: HeaderMap,
    Json(body): Json<BulkAssignBody>,
) -> Response
where
    R: FinancingRepository + 'static,
    B: BlobStore + 'static,
    S: ActivitySink + 'static,
{
    let actor = actor_or_return!(headers);
    respond(
        StatusCode::OK,
        api.dashboard
            .bulk_assign(&actor, &body.ids, &body.responsible_person_id)
            .await,
    )
}
