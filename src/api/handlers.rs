use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::logic::alignment::GroupAlignmentService;
use crate::logic::approval::{ApprovalBridge, ImportAction};
use crate::logic::grouping::GroupingService;
use crate::logic::ingest::{FileUpload, ImportService};
use crate::logic::loaders::LoaderRegistry;
use crate::logic::rules::RuleRegistry;
use crate::logic::workflow::{ImportWorkflow, WorkflowRegistry};
use crate::model::{
    GroupMembership, GroupRole, Id, RecipientType, ServiceOutcome, UserDecision,
};
use crate::store::traits::Store;

/// Wired service graph shared by every handler.
pub struct AppContext<S> {
    pub store: Arc<S>,
    pub config: AppConfig,
    pub import: ImportService<S>,
    pub bridge: Arc<ApprovalBridge<S>>,
    pub alignment: Arc<GroupAlignmentService<S>>,
}

pub type AppState<S> = Arc<AppContext<S>>;

impl<S: Store + 'static> AppContext<S> {
    pub fn new(store: Arc<S>, config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let schema = config.import.schema()?;
        let rules = Arc::new(RuleRegistry::with_defaults());
        let alignment = Arc::new(GroupAlignmentService::new(store.clone()));
        let grouping = Arc::new(GroupingService::new(
            store.clone(),
            alignment.clone(),
            config.import.clone(),
        ));
        let bridge = Arc::new(ApprovalBridge::new(
            store.clone(),
            config.import.clone(),
            grouping,
        ));

        let workflows = Arc::new(WorkflowRegistry::new());
        workflows.register(
            "individual",
            "individual-import",
            Arc::new(ImportWorkflow::new(
                store.clone(),
                rules.clone(),
                schema.clone(),
                bridge.clone(),
                ImportAction::Import,
            )),
        );
        workflows.register(
            "individual",
            "individual-update",
            Arc::new(ImportWorkflow::new(
                store.clone(),
                rules,
                schema,
                bridge.clone(),
                ImportAction::Update,
            )),
        );

        let import = ImportService::new(
            store.clone(),
            Arc::new(LoaderRegistry::new()),
            workflows,
            config.import.inline_workflows,
        );

        Ok(Arc::new(Self {
            store,
            config,
            import,
            bridge,
            alignment,
        }))
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn internal_error<E: std::fmt::Display>(e: E) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(&e.to_string())),
    )
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub file_name: String,
    pub content_type: String,
    /// File body as text; delimited formats only on this surface.
    pub content: String,
    pub workflow_group: String,
    pub workflow_name: String,
    #[serde(default)]
    pub group_aggregation_column: Option<String>,
    pub user_uuid: Id,
}

pub async fn import_individuals<S: Store + 'static>(
    State(context): State<AppState<S>>,
    RequestJson(request): RequestJson<ImportRequest>,
) -> HandlerResult<ServiceOutcome> {
    let file = FileUpload {
        name: request.file_name,
        content_type: request.content_type,
        bytes: request.content.into_bytes(),
    };
    let outcome = context
        .import
        .import_individuals(
            file,
            &request.workflow_group,
            &request.workflow_name,
            request.group_aggregation_column,
            &request.user_uuid,
        )
        .await;
    if outcome.success {
        Ok(Json(outcome))
    } else {
        let message = outcome.message.unwrap_or_else(|| "import failed".to_string());
        Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&message))))
    }
}

pub async fn get_upload_status<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(upload_id): Path<Id>,
) -> HandlerResult<ServiceOutcome> {
    let outcome = context.import.upload_status(&upload_id).await;
    if outcome.success {
        Ok(Json(outcome))
    } else {
        let message = outcome.message.unwrap_or_else(|| "not found".to_string());
        Err((StatusCode::NOT_FOUND, Json(ErrorResponse::new(&message))))
    }
}

pub async fn download_invalid_items<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(upload_id): Path<Id>,
) -> Result<([(header::HeaderName, &'static str); 2], String), (StatusCode, Json<ErrorResponse>)> {
    let csv = context
        .import
        .invalid_items_csv(&upload_id)
        .await
        .map_err(internal_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"individuals_invalid_items.csv\"",
            ),
        ],
        csv,
    ))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub user_uuid: Id,
    #[serde(default)]
    pub accepted: Vec<Id>,
    #[serde(default)]
    pub rejected: Vec<Id>,
    /// Marks the task COMPLETED instead of merely ACCEPTED-with-decisions.
    #[serde(default)]
    pub complete: bool,
}

pub async fn post_task_decisions<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(task_id): Path<Id>,
    RequestJson(request): RequestJson<DecisionRequest>,
) -> HandlerResult<ServiceOutcome> {
    let decision = UserDecision {
        accepted: request.accepted,
        rejected: request.rejected,
    };
    let outcome = context
        .bridge
        .record_decisions(&task_id, &request.user_uuid, decision, request.complete)
        .await;
    Ok(Json(outcome))
}

pub async fn get_group<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(group_id): Path<Id>,
) -> HandlerResult<crate::model::Group> {
    match context.store.get_group(&group_id).await {
        Ok(Some(group)) => Ok(Json(group)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Group not found")),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

pub async fn list_individuals<S: Store + 'static>(
    State(context): State<AppState<S>>,
) -> HandlerResult<ListResponse<crate::model::Individual>> {
    let individuals = context
        .store
        .list_individuals()
        .await
        .map_err(internal_error)?;
    let total = individuals.len();
    Ok(Json(ListResponse {
        items: individuals,
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct NewGroupRequest {
    #[serde(default)]
    pub code: Option<String>,
    /// Membership to move into the freshly created group.
    pub membership_id: Id,
    pub user_uuid: Id,
}

pub async fn create_group_with_member<S: Store + 'static>(
    State(context): State<AppState<S>>,
    RequestJson(request): RequestJson<NewGroupRequest>,
) -> HandlerResult<crate::model::Group> {
    context
        .alignment
        .create_group_and_move_individual(request.code, &request.membership_id, &request.user_uuid)
        .await
        .map(|(group, _)| Json(group))
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string()))))
}

#[derive(Debug, Deserialize)]
pub struct NewMembershipRequest {
    pub individual_id: Id,
    #[serde(default)]
    pub role: Option<GroupRole>,
    #[serde(default)]
    pub recipient_type: Option<RecipientType>,
    pub user_uuid: Id,
}

pub async fn create_group_membership<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(group_id): Path<Id>,
    RequestJson(request): RequestJson<NewMembershipRequest>,
) -> HandlerResult<GroupMembership> {
    let mut membership = GroupMembership::new(
        group_id,
        request.individual_id,
        request.role,
        &request.user_uuid,
    );
    membership.recipient_type = request.recipient_type;
    context
        .alignment
        .create_membership(membership, &request.user_uuid)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string()))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMembershipRequest {
    #[serde(default)]
    pub role: Option<GroupRole>,
    #[serde(default)]
    pub recipient_type: Option<RecipientType>,
    pub user_uuid: Id,
}

pub async fn update_group_membership<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(membership_id): Path<Id>,
    RequestJson(request): RequestJson<UpdateMembershipRequest>,
) -> HandlerResult<GroupMembership> {
    let existing = match context.store.get_membership(&membership_id).await {
        Ok(Some(membership)) => membership,
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Group membership not found")),
            ))
        }
        Err(e) => return Err(internal_error(e)),
    };
    let mut updated = existing;
    updated.role = request.role;
    updated.recipient_type = request.recipient_type;
    context
        .alignment
        .update_membership(updated, &request.user_uuid)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string()))))
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub user_uuid: Id,
}

pub async fn delete_group_membership<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(membership_id): Path<Id>,
    RequestJson(request): RequestJson<ActorRequest>,
) -> HandlerResult<ServiceOutcome> {
    match context
        .alignment
        .delete_membership(&membership_id, &request.user_uuid)
        .await
    {
        Ok(()) => Ok(Json(ServiceOutcome::ok_empty())),
        Err(e) => Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string())))),
    }
}

pub async fn delete_group<S: Store + 'static>(
    State(context): State<AppState<S>>,
    Path(group_id): Path<Id>,
    RequestJson(request): RequestJson<ActorRequest>,
) -> HandlerResult<ServiceOutcome> {
    match context
        .alignment
        .delete_group(&group_id, &request.user_uuid)
        .await
    {
        Ok(()) => Ok(Json(ServiceOutcome::ok_empty())),
        Err(e) => Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string())))),
    }
}
