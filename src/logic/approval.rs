use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ImportConfig;
use crate::logic::grouping::GroupingService;
use crate::logic::merge::{MergeEngine, MergeScope};
use crate::logic::validate::{percentage_of_invalid_items, ValidationSummary};
use crate::model::{
    business_event, error_stage, ApprovalTask, Id, ServiceOutcome, TaskStatus, UploadAttempt,
    UploadRecord, UploadStatus, UserDecision,
};
use crate::store::traits::Store;

/// Which business action this upload performs; decides the maker-checker
/// flag and the task's business-event tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAction {
    Import,
    Update,
}

impl ImportAction {
    pub fn business_event(&self) -> &'static str {
        match self {
            ImportAction::Import => business_event::VALIDATION_IMPORT_VALID_ITEMS,
            ImportAction::Update => business_event::VALIDATION_UPLOAD_VALID_ITEMS,
        }
    }

    fn maker_checker_enabled(&self, config: &ImportConfig) -> bool {
        match self {
            ImportAction::Import => config.enable_maker_checker_import,
            ImportAction::Update => config.enable_maker_checker_update,
        }
    }
}

/// Routes validated uploads into human review or straight-through merge, and
/// resolves review decisions back into staging-record dispositions.
pub struct ApprovalBridge<S> {
    store: Arc<S>,
    config: ImportConfig,
    grouping: Arc<GroupingService<S>>,
}

impl<S: Store> ApprovalBridge<S> {
    pub fn new(store: Arc<S>, config: ImportConfig, grouping: Arc<GroupingService<S>>) -> Self {
        Self {
            store,
            config,
            grouping,
        }
    }

    /// Post-validation decision: a review task is created when the
    /// maker-checker policy demands one or any row failed validation;
    /// otherwise the merge runs immediately with every row implicitly
    /// accepted.
    pub async fn route_after_validation(
        &self,
        upload: &UploadAttempt,
        upload_record: &UploadRecord,
        summary: &ValidationSummary,
        action: ImportAction,
        user_id: &Id,
    ) -> Result<()> {
        if summary.invalid > 0 || action.maker_checker_enabled(&self.config) {
            let data = json!({
                "source_name": upload.source_name,
                "workflow": upload_record.workflow_name,
                "percentage_of_invalid_items": summary.percentage_of_invalid_items,
                "data_upload_id": upload.id,
                "group_aggregation_column": upload_record.group_aggregation_column,
            });
            let task = ApprovalTask::new(
                action.business_event().to_string(),
                upload_record.id.clone(),
                data,
                user_id,
            );
            self.store.upsert_task(task).await?;
            self.store
                .set_upload_status(&upload.id, UploadStatus::WaitingForVerification, None)
                .await?;
            return Ok(());
        }

        let report = MergeEngine::merge_upload(
            &*self.store,
            &upload.id,
            user_id,
            &MergeScope::AllValid,
            summary.percentage_of_invalid_items,
        )
        .await?;

        if report.status != UploadStatus::Fail {
            if let Some(column) = &upload_record.group_aggregation_column {
                self.grouping.assign_groups(&upload.id, column, user_id).await?;
            }
        }
        Ok(())
    }

    /// Append one reviewer's decision snapshot to the task's log and run
    /// resolution. The new entry carries the previous entry's decisions for
    /// every other reviewer, so the log diff only surfaces what changed.
    pub async fn record_decisions(
        &self,
        task_id: &Id,
        reviewer_id: &Id,
        decision: UserDecision,
        complete: bool,
    ) -> ServiceOutcome {
        let result = async {
            let mut task = self
                .store
                .get_task(task_id)
                .await?
                .ok_or_else(|| anyhow!("Task not found: {}", task_id))?;

            let mut entry = task.decision_log.last().cloned().unwrap_or_default();
            entry.insert(reviewer_id.clone(), decision);
            task.decision_log.push(entry);
            task.status = if complete {
                TaskStatus::Completed
            } else {
                TaskStatus::Accepted
            };
            task.audit.touch(reviewer_id);
            self.store.upsert_task(task).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            return ServiceOutcome::error(e.to_string());
        }
        self.resolve_task(task_id, reviewer_id).await
    }

    /// Reconcile a task's latest decisions. Failures are logged, recorded on
    /// the upload under `Task Resolve` and returned as a structured error;
    /// they never propagate to the external caller.
    pub async fn resolve_task(&self, task_id: &Id, user_id: &Id) -> ServiceOutcome {
        match self.try_resolve(task_id, user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Error while resolving task {}: {:#}", task_id, e);
                if let Ok(Some(upload_id)) = self.upload_id_for_task(task_id).await {
                    let mut error = HashMap::new();
                    error.insert(error_stage::TASK_RESOLVE.to_string(), json!(e.to_string()));
                    let _ = self
                        .store
                        .set_upload_status(&upload_id, UploadStatus::Fail, Some(error))
                        .await;
                }
                ServiceOutcome::error(e.to_string())
            }
        }
    }

    async fn upload_id_for_task(&self, task_id: &Id) -> Result<Option<Id>> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        let Some(record) = self.store.get_upload_record(&task.entity_id).await? else {
            return Ok(None);
        };
        Ok(Some(record.data_upload_id))
    }

    async fn try_resolve(&self, task_id: &Id, user_id: &Id) -> Result<ServiceOutcome> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| anyhow!("Task not found: {}", task_id))?;

        let recognized = task.business_event == business_event::VALIDATION_IMPORT_VALID_ITEMS
            || task.business_event == business_event::VALIDATION_UPLOAD_VALID_ITEMS;
        if !recognized {
            return Ok(ServiceOutcome::ok_empty());
        }
        // ALL/ANY/N completion policies all route through the same diff; the
        // distinction is intentionally not differentiated yet.
        let resolvable = task.status == TaskStatus::Completed
            || (task.status == TaskStatus::Accepted && !task.decision_log.is_empty());
        if !resolvable {
            return Ok(ServiceOutcome::ok_empty());
        }

        let upload_record = self
            .store
            .get_upload_record(&task.entity_id)
            .await?
            .ok_or_else(|| anyhow!("Upload record not found: {}", task.entity_id))?;
        let upload_id = upload_record.data_upload_id.clone();

        let diff = task.incremental_decisions();

        // Rejected rows are soft-deleted, never removed: audit history must
        // survive, and a soft-deleted row is excluded from any future merge.
        if !diff.newly_rejected.is_empty() {
            let mut rejected = Vec::new();
            for id in &diff.newly_rejected {
                if let Some(mut record) = self.store.get_staging_record(id).await? {
                    record.is_deleted = true;
                    record.audit.touch(user_id);
                    rejected.push(record);
                }
            }
            self.store.update_staging_batch(rejected).await?;
        }

        if diff.newly_accepted.is_empty() {
            return Ok(ServiceOutcome::ok_empty());
        }

        let percentage = self.effective_percentage(&task, &upload_id).await?;
        let report = MergeEngine::merge_upload(
            &*self.store,
            &upload_id,
            user_id,
            &MergeScope::Accepted(diff.newly_accepted.clone()),
            percentage,
        )
        .await?;

        if report.status != UploadStatus::Fail {
            if let Some(column) = &upload_record.group_aggregation_column {
                self.grouping.assign_groups(&upload_id, column, user_id).await?;
            }
        }

        Ok(ServiceOutcome::ok(json!({
            "upload_uuid": upload_id,
            "merged": report.created,
            "rejected": diff.newly_rejected.len(),
            "status": report.status,
        })))
    }

    /// The task context carries the validation-time percentage; rejected
    /// rows count as invalid too, so a clean upload with rejections still
    /// ends PARTIAL_SUCCESS.
    async fn effective_percentage(&self, task: &ApprovalTask, upload_id: &Id) -> Result<f64> {
        let from_task = task
            .data
            .get("percentage_of_invalid_items")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        if from_task > 0.0 {
            return Ok(from_task);
        }
        let records = self.store.list_staging_for_upload(upload_id).await?;
        let rejected = records.iter().filter(|r| r.is_deleted).count();
        let active = records.len() - rejected;
        Ok(percentage_of_invalid_items(rejected, active))
    }
}
