use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::logic::approval::{ApprovalBridge, ImportAction};
use crate::logic::rules::RuleRegistry;
use crate::logic::validate::UploadValidator;
use crate::model::{error_stage, Id, ImportSchema, UploadStatus};
use crate::store::traits::Store;

/// What the pipeline inspects of an executor's return value: `success`, and
/// `message` on failure. Everything else is the executor's business.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl WorkflowOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Contract between the pipeline and the executor that runs validation and
/// merge asynchronously. Called with a flat `{user_uuid, upload_uuid, ...}`
/// mapping; may run anywhere, the caller never blocks on it.
#[async_trait::async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn invoke(
        &self,
        payload: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowOutcome>;
}

/// Executors resolved by (group, name), the way the external workflow
/// registry addresses them.
#[derive(Default)]
pub struct WorkflowRegistry {
    executors: RwLock<HashMap<(String, String), Arc<dyn WorkflowExecutor>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, group: &str, name: &str, executor: Arc<dyn WorkflowExecutor>) {
        self.executors
            .write()
            .insert((group.to_string(), name.to_string()), executor);
    }

    pub fn get(&self, group: &str, name: &str) -> Option<Arc<dyn WorkflowExecutor>> {
        self.executors
            .read()
            .get(&(group.to_string(), name.to_string()))
            .cloned()
    }
}

/// The in-process executor: header validation, schema-driven row validation,
/// then routing through the approval bridge. Any failure transitions the
/// attempt to FAIL with a stage-keyed error; nothing escapes as an unhandled
/// error.
pub struct ImportWorkflow<S> {
    store: Arc<S>,
    rules: Arc<RuleRegistry>,
    schema: ImportSchema,
    bridge: Arc<ApprovalBridge<S>>,
    action: ImportAction,
}

impl<S: Store> ImportWorkflow<S> {
    pub fn new(
        store: Arc<S>,
        rules: Arc<RuleRegistry>,
        schema: ImportSchema,
        bridge: Arc<ApprovalBridge<S>>,
        action: ImportAction,
    ) -> Self {
        Self {
            store,
            rules,
            schema,
            bridge,
            action,
        }
    }

    async fn run(&self, user_id: &Id, upload_id: &Id) -> Result<Option<String>> {
        self.store
            .set_upload_status(upload_id, UploadStatus::InProgress, None)
            .await?;

        let records = self.store.list_staging_for_upload(upload_id).await?;
        let records: Vec<_> = records.into_iter().filter(|r| !r.is_deleted).collect();

        // Valid headers are a necessary condition for the whole upload: if
        // the file structure is wrong no row can be validated, so the
        // attempt is aborted before any row-level work.
        if let Err(errors) = UploadValidator::validate_headers(&records, &self.schema) {
            let joined = errors.join("\n");
            let mut error = HashMap::new();
            error.insert(error_stage::FILE_STRUCTURE.to_string(), json!(joined));
            self.store
                .set_upload_status(upload_id, UploadStatus::Fail, Some(error))
                .await?;
            return Ok(Some(joined));
        }

        let summary = UploadValidator::validate_upload(
            &*self.store,
            &self.rules,
            &self.schema,
            upload_id,
            user_id,
        )
        .await?;

        let upload = self
            .store
            .get_upload(upload_id)
            .await?
            .ok_or_else(|| anyhow!("Upload attempt not found: {}", upload_id))?;
        let upload_record = self
            .store
            .find_upload_record_for_upload(upload_id)
            .await?
            .ok_or_else(|| anyhow!("Upload record not found for upload: {}", upload_id))?;

        self.bridge
            .route_after_validation(&upload, &upload_record, &summary, self.action, user_id)
            .await?;
        Ok(None)
    }
}

#[async_trait::async_trait]
impl<S: Store> WorkflowExecutor for ImportWorkflow<S> {
    async fn invoke(
        &self,
        payload: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowOutcome> {
        let user_id = payload
            .get("user_uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("workflow payload missing user_uuid"))?
            .to_string();
        let upload_id = payload
            .get("upload_uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("workflow payload missing upload_uuid"))?
            .to_string();

        match self.run(&user_id, &upload_id).await {
            Ok(None) => Ok(WorkflowOutcome::ok()),
            Ok(Some(message)) => Ok(WorkflowOutcome::failed(message)),
            Err(e) => {
                log::warn!(
                    "Error during individual upload workflow, details:\n{:#}",
                    e
                );
                let mut error = HashMap::new();
                error.insert(error_stage::EXCEPTION.to_string(), json!(e.to_string()));
                self.store
                    .set_upload_status(&upload_id, UploadStatus::Fail, Some(error))
                    .await?;
                Ok(WorkflowOutcome::failed(e.to_string()))
            }
        }
    }
}
