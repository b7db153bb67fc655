use anyhow::Result;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::logic::loaders::LoaderRegistry;
use crate::logic::workflow::WorkflowRegistry;
use crate::model::{
    error_stage, Id, ServiceOutcome, StagingRecord, UploadAttempt, UploadRecord, UploadStatus,
};
use crate::store::traits::Store;

/// One uploaded file as the entry point receives it.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Ingestion entry point: parses the file, stages its rows, and dispatches
/// the processing workflow. Returns as soon as the attempt is TRIGGERED; it
/// never waits for validation, review or merge.
pub struct ImportService<S> {
    store: Arc<S>,
    loaders: Arc<LoaderRegistry>,
    workflows: Arc<WorkflowRegistry>,
    /// Await the workflow instead of spawning it (tests, one-shot tools).
    inline_workflows: bool,
}

impl<S: Store + 'static> ImportService<S> {
    pub fn new(
        store: Arc<S>,
        loaders: Arc<LoaderRegistry>,
        workflows: Arc<WorkflowRegistry>,
        inline_workflows: bool,
    ) -> Self {
        Self {
            store,
            loaders,
            workflows,
            inline_workflows,
        }
    }

    pub async fn import_individuals(
        &self,
        file: FileUpload,
        workflow_group: &str,
        workflow_name: &str,
        group_aggregation_column: Option<String>,
        user_id: &Id,
    ) -> ServiceOutcome {
        match self
            .try_import(file, workflow_group, workflow_name, group_aggregation_column, user_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Error while uploading individuals: {:#}", e);
                ServiceOutcome::error(e.to_string())
            }
        }
    }

    async fn try_import(
        &self,
        file: FileUpload,
        workflow_group: &str,
        workflow_name: &str,
        group_aggregation_column: Option<String>,
        user_id: &Id,
    ) -> Result<ServiceOutcome> {
        let executor = self
            .workflows
            .get(workflow_group, workflow_name)
            .ok_or(PipelineError::WorkflowNotFound)?;

        let rows = self.loaders.load(&file.content_type, &file.bytes)?;

        let upload = UploadAttempt::new(file.name, file.content_type, user_id);
        let upload_id = upload.id.clone();
        self.store.upsert_upload(upload).await?;

        let records: Vec<StagingRecord> = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| StagingRecord::new(upload_id.clone(), index, row, user_id))
            .collect();
        self.store.insert_staging_batch(records).await?;

        let record = UploadRecord::new(
            upload_id.clone(),
            workflow_group.to_string(),
            workflow_name.to_string(),
            group_aggregation_column,
            user_id,
        );
        self.store.upsert_upload_record(record).await?;

        // TRIGGERED is set only after every staging row is durably
        // committed, so the executor can never observe a half-staged upload.
        self.store
            .set_upload_status(&upload_id, UploadStatus::Triggered, None)
            .await?;

        let mut payload = HashMap::new();
        payload.insert("user_uuid".to_string(), json!(user_id));
        payload.insert("upload_uuid".to_string(), json!(upload_id));

        if self.inline_workflows {
            let outcome = executor.invoke(payload).await;
            executor_failure_to_status(&*self.store, &upload_id, outcome).await?;
        } else {
            let store = self.store.clone();
            let upload_id = upload_id.clone();
            tokio::spawn(async move {
                let outcome = executor.invoke(payload).await;
                if let Err(e) = executor_failure_to_status(&*store, &upload_id, outcome).await {
                    log::error!("Failed to record workflow outcome: {:#}", e);
                }
            });
        }

        Ok(ServiceOutcome::ok(json!({ "upload_uuid": upload_id })))
    }

    /// Attempt status plus the structured error payload, for status polling.
    pub async fn upload_status(&self, upload_id: &Id) -> ServiceOutcome {
        match self.store.get_upload(upload_id).await {
            Ok(Some(upload)) => ServiceOutcome::ok(json!({
                "upload_uuid": upload.id,
                "status": upload.status,
                "error": upload.error,
            })),
            Ok(None) => ServiceOutcome::error(format!("Upload attempt not found: {}", upload_id)),
            Err(e) => ServiceOutcome::error(e.to_string()),
        }
    }

    /// Rows that failed validation, re-serialized as CSV with their staging
    /// id and validation results in extra columns.
    pub async fn invalid_items_csv(&self, upload_id: &Id) -> Result<String> {
        let records = self.store.list_staging_for_upload(upload_id).await?;
        let invalid: Vec<_> = records
            .iter()
            .filter(|r| !r.is_deleted && r.has_validation_failures())
            .collect();

        let mut columns: BTreeSet<String> = BTreeSet::new();
        for record in &invalid {
            columns.extend(record.fields.keys().cloned());
        }
        let mut header: Vec<String> = columns.into_iter().collect();
        header.push("id".to_string());
        header.push("error".to_string());

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&header)?;
        for record in &invalid {
            let mut row = Vec::with_capacity(header.len());
            for column in &header {
                match column.as_str() {
                    "id" => row.push(record.id.clone()),
                    "error" => row.push(serde_json::to_string(&record.validations)?),
                    _ => row.push(cell_text(record.fields.get(column))),
                }
            }
            writer.write_record(&row)?;
        }
        let bytes = writer.into_inner()?;
        Ok(String::from_utf8(bytes)?)
    }
}

fn cell_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Executor failures (an `Err` or a `success: false` return) mark the
/// attempt FAIL under the `workflow` stage with the executor's message.
/// Workflows that already recorded a terminal status keep it: a FAIL with
/// a more specific stage, or a SUCCESS, is never overwritten.
async fn executor_failure_to_status<S: Store>(
    store: &S,
    upload_id: &Id,
    outcome: Result<crate::logic::workflow::WorkflowOutcome>,
) -> Result<()> {
    let message = match outcome {
        Ok(outcome) if outcome.success => return Ok(()),
        Ok(outcome) => outcome
            .message
            .unwrap_or_else(|| "workflow reported failure".to_string()),
        Err(e) => e.to_string(),
    };

    let current = store.get_upload(upload_id).await?;
    if let Some(upload) = current {
        if upload.status.is_terminal() {
            return Ok(());
        }
        let mut error = upload.error.clone();
        error.insert(error_stage::WORKFLOW.to_string(), json!(message));
        store
            .set_upload_status(upload_id, UploadStatus::Fail, Some(error))
            .await?;
    }
    Ok(())
}
