use crate::model::{generate_id, AuditInfo, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of one file-import attempt. Wire-stable: these names are what
/// external clients poll for, do not rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    Triggered,
    InProgress,
    Success,
    PartialSuccess,
    WaitingForVerification,
    Fail,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::PartialSuccess | UploadStatus::Fail
        )
    }
}

/// Keys under which stage errors are recorded on a failed attempt.
pub mod error_stage {
    pub const FILE_STRUCTURE: &str = "file_structure";
    pub const PROGRAMMING_ERROR: &str = "programming_error";
    pub const EXCEPTION: &str = "exception";
    pub const WORKFLOW: &str = "workflow";
    pub const TASK_RESOLVE: &str = "Task Resolve";
}

/// One file-upload attempt. Never physically deleted; a failed attempt is
/// retried by creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAttempt {
    pub id: Id,
    pub source_name: String,
    pub source_type: String,
    pub status: UploadStatus,
    /// Structured error payload keyed by the stage that failed.
    pub error: HashMap<String, serde_json::Value>,
    pub is_deleted: bool,
    pub audit: AuditInfo,
}

impl UploadAttempt {
    pub fn new(source_name: String, source_type: String, user_id: &Id) -> Self {
        Self {
            id: generate_id(),
            source_name,
            source_type,
            status: UploadStatus::Pending,
            error: HashMap::new(),
            is_deleted: false,
            audit: AuditInfo::new(user_id),
        }
    }
}

/// Binds one upload attempt to the workflow that processes it and the
/// aggregation column used for household grouping. Exactly one per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Id,
    pub data_upload_id: Id,
    pub workflow_group: String,
    pub workflow_name: String,
    pub group_aggregation_column: Option<String>,
    pub audit: AuditInfo,
}

impl UploadRecord {
    pub fn new(
        data_upload_id: Id,
        workflow_group: String,
        workflow_name: String,
        group_aggregation_column: Option<String>,
        user_id: &Id,
    ) -> Self {
        Self {
            id: generate_id(),
            data_upload_id,
            workflow_group,
            workflow_name,
            group_aggregation_column,
            audit: AuditInfo::new(user_id),
        }
    }
}
