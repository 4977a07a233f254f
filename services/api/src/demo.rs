use crate::infra::InMemoryBackends;
use clap::{Args, ValueEnum};
use halal_finance::config::StorageConfig;
use halal_finance::error::AppError;
use halal_finance::workflows::financing::{
    CurrentActor, FinancingApplication, FinancingRequest, NewDocumentRequest, PropertyId,
    StagedFile, UploadDrafts, UserRole, WorkflowError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum DemoDecision {
    #[default]
    Approve,
    Deny,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Amount the buyer asks to finance.
    #[arg(long, default_value_t = 350_000)]
    pub(crate) requested_amount: u64,
    /// Number of documents the responsible person requests from the buyer.
    #[arg(long, default_value_t = 2)]
    pub(crate) documents: usize,
    /// Have the admin send the request back once before deciding.
    #[arg(long)]
    pub(crate) send_back: bool,
    /// Final decision taken by the admin.
    #[arg(long, value_enum, default_value_t = DemoDecision::Approve)]
    pub(crate) decision: DemoDecision,
}

const DOCUMENT_TYPES: &[&str] = &[
    "Income Statement",
    "Bank Statement",
    "Employment Letter",
    "Property Valuation",
];

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        requested_amount,
        documents,
        send_back,
        decision,
    } = args;

    let storage = StorageConfig::default();
    let backends = InMemoryBackends::new(&storage);
    let api = backends.api(&storage);

    let buyer = CurrentActor::new("buyer-demo", UserRole::User);
    let admin = CurrentActor::new("admin-demo", UserRole::Admin);
    let specialist = CurrentActor::new("specialist-demo", UserRole::Moderator);

    println!("Halal financing workflow demo");
    let request = api
        .workflow
        .submit_request(
            &buyer,
            FinancingApplication {
                property_id: PropertyId("villa-demo".to_string()),
                requested_amount,
                cash_available: requested_amount / 4,
                period_months: 240,
            },
        )
        .await?;
    print_stage("Buyer submitted request", &request);

    let request = api
        .workflow
        .assign(&admin, request.id, specialist.id.clone())
        .await?;
    print_stage("Admin assigned specialist", &request);

    let mut requested = Vec::with_capacity(documents);
    for document_type in DOCUMENT_TYPES.iter().cycle().take(documents) {
        let document = api
            .workflow
            .request_document(
                &specialist,
                request.id,
                NewDocumentRequest {
                    document_type: document_type.to_string(),
                    description: None,
                    deadline_at: None,
                },
            )
            .await?;
        println!("  requested \"{}\"", document.document_type);
        requested.push(document);
    }

    if requested.is_empty() {
        let request = api.workflow.progress(&specialist, request.id).await?;
        print_stage("Specialist started document collection", &request);
        let request = api.workflow.progress(&specialist, request.id).await?;
        print_stage("Specialist began review", &request);
    } else {
        let detail = api.workflow.detail(&specialist, request.id).await?;
        println!(
            "  {} document(s) pending; available actions: {}",
            detail.pending_documents,
            detail
                .actions
                .iter()
                .map(|action| {
                    if action.enabled {
                        action.label.to_string()
                    } else {
                        format!("{} (disabled)", action.label)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut drafts = UploadDrafts::new();
        for document in &requested {
            let slug = document.document_type.to_ascii_lowercase().replace(' ', "-");
            drafts.select_files(
                document.id,
                vec![StagedFile::new(
                    format!("{slug}.pdf"),
                    format!("%PDF-1.7 {slug}").into_bytes(),
                )],
            );
            let confirmation = drafts.confirm(document.id).map_err(WorkflowError::from)?;
            let receipt = api.documents.submit(&buyer, &mut drafts, confirmation).await?;
            println!(
                "  buyer submitted \"{}\" ({} file) -> stage {}",
                receipt.document.document_type,
                receipt.document.user_file_urls.len(),
                receipt.request.stage.label()
            );
        }
    }

    let request = api.workflow.progress(&specialist, request.id).await?;
    print_stage("Specialist submitted for final approval", &request);

    let request = if send_back {
        let returned = api
            .workflow
            .send_back(&admin, request.id, "Please confirm the valuation date".to_string())
            .await?;
        print_stage("Admin sent back", &returned);
        let resubmitted = api.workflow.progress(&specialist, request.id).await?;
        print_stage("Specialist resubmitted", &resubmitted);
        resubmitted
    } else {
        request
    };

    let request = match decision {
        DemoDecision::Approve => {
            api.workflow
                .approve(&admin, request.id, Some("Meets financing policy".to_string()))
                .await?
        }
        DemoDecision::Deny => {
            api.workflow
                .deny(&admin, request.id, Some("Insufficient income".to_string()))
                .await?
        }
    };
    print_stage("Admin decided", &request);

    let detail = api.workflow.detail(&admin, request.id).await?;
    println!("\nTimeline");
    for entry in &detail.timeline {
        println!("- {} by {}", entry.action_type.as_str(), entry.actor_id);
    }

    let notifications = backends.activity.notifications();
    println!("\nNotifications ({})", notifications.len());
    for notification in notifications {
        println!("- {} -> {}", notification.title, notification.user_id);
    }

    println!("\nStored objects ({})", backends.blobs.paths().len());
    for path in backends.blobs.paths() {
        println!("- {}", path);
    }

    Ok(())
}

fn print_stage(step: &str, request: &FinancingRequest) {
    let responsible = request
        .responsible_person_id
        .as_ref()
        .map(|user| user.to_string())
        .unwrap_or_else(|| "unassigned".to_string());
    let flag = if request.sent_back_to_responsible {
        " [sent back]"
    } else {
        ""
    };
    println!(
        "{step}: {} (responsible: {responsible}){flag}",
        request.stage.label()
    );
}
