use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::domain::{
    CurrentActor, FinancingRequest, FinancingRequestId, FinancingStage, PropertyId, UserId,
};
use super::repository::{ActivitySink, FinancingRepository, RequestFilter};
use super::service::{FinancingWorkflowService, WorkflowError};

#[derive(Debug, Clone, Serialize)]
pub struct StageCount {
    pub stage: FinancingStage,
    pub label: &'static str,
    pub count: usize,
}

/// Row shown in back-office tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSummary {
    pub id: FinancingRequestId,
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub stage: FinancingStage,
    pub responsible_person_id: Option<UserId>,
    pub requested_amount: u64,
    pub sent_back_to_responsible: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&FinancingRequest> for RequestSummary {
    fn from(request: &FinancingRequest) -> Self {
        Self {
            id: request.id,
            property_id: request.property_id.clone(),
            user_id: request.user_id.clone(),
            stage: request.stage,
            responsible_person_id: request.responsible_person_id.clone(),
            requested_amount: request.requested_amount,
            sent_back_to_responsible: request.sent_back_to_responsible,
            updated_at: request.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardOverview {
    pub total: usize,
    pub stages: Vec<StageCount>,
    pub unassigned: Vec<RequestSummary>,
    pub awaiting_final_approval: Vec<RequestSummary>,
    pub sent_back: Vec<RequestSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkAssignFailure {
    pub id: FinancingRequestId,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkAssignOutcome {
    pub assigned: Vec<FinancingRequestId>,
    pub failed: Vec<BulkAssignFailure>,
}

/// Back-office aggregation over financing requests.
pub struct FinancingDashboard<R, S> {
    workflow: Arc<FinancingWorkflowService<R, S>>,
}

impl<R, S> FinancingDashboard<R, S>
where
    R: FinancingRepository + 'static,
    S: ActivitySink + 'static,
{
    pub fn new(workflow: Arc<FinancingWorkflowService<R, S>>) -> Self {
        Self { workflow }
    }

    pub async fn overview(&self, actor: &CurrentActor) -> Result<DashboardOverview, WorkflowError> {
        if !actor.is_staff() {
            return Err(WorkflowError::Forbidden {
                operation: "view the financing dashboard",
            });
        }

        let requests = self
            .workflow
            .repository()
            .list_requests(&RequestFilter::default())
            .await?;

        let stages = FinancingStage::ordered()
            .into_iter()
            .map(|stage| StageCount {
                stage,
                label: stage.label(),
                count: requests
                    .iter()
                    .filter(|request| request.stage == stage)
                    .count(),
            })
            .collect();
        Ok(DashboardOverview {
            total: requests.len(),
            stages,
            unassigned: summaries(&requests, |request| {
                request.stage == FinancingStage::Submitted
            }),
            awaiting_final_approval: summaries(&requests, |request| {
                request.stage == FinancingStage::FinalApproval
            }),
            sent_back: summaries(&requests, |request| request.sent_back_to_responsible),
        })
    }

    /// Staff see every match; other callers only see requests they own or are assigned to.
    pub async fn list(
        &self,
        actor: &CurrentActor,
        filter: &RequestFilter,
    ) -> Result<Vec<RequestSummary>, WorkflowError> {
        let requests = self.workflow.repository().list_requests(filter).await?;
        Ok(requests
            .iter()
            .filter(|request| {
                actor.is_staff() || request.user_id == actor.id || request.is_responsible(&actor.id)
            })
            .map(RequestSummary::from)
            .collect())
    }

    /// Assign each request independently; one failure does not stop the batch.
    pub async fn bulk_assign(
        &self,
        actor: &CurrentActor,
        ids: &[FinancingRequestId],
        responsible: &UserId,
    ) -> Result<BulkAssignOutcome, WorkflowError> {
        if !actor.is_admin() {
            return Err(WorkflowError::Forbidden {
                operation: "bulk assign financing requests",
            });
        }

        let mut outcome = BulkAssignOutcome::default();
        for id in ids {
            match self.workflow.assign(actor, *id, responsible.clone()).await {
                Ok(_) => outcome.assigned.push(*id),
                Err(err) => outcome.failed.push(BulkAssignFailure {
                    id: *id,
                    error: err.to_string(),
                }),
            }
        }

        info!(
            responsible = %responsible,
            assigned = outcome.assigned.len(),
            failed = outcome.failed.len(),
            "bulk assignment finished"
        );
        Ok(outcome)
    }
}

fn summaries(
    requests: &[FinancingRequest],
    predicate: impl Fn(&FinancingRequest) -> bool,
) -> Vec<RequestSummary> {
    requests
        .iter()
        .filter(|request| predicate(request))
        .map(RequestSummary::from)
        .collect()
}
