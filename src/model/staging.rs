use crate::model::{generate_id, AuditInfo, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one named rule applied to one field of one staged row.
/// Uniqueness results are stored under `<field>_uniqueness`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub success: bool,
    pub field_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One raw input row staged for validation and merge. Columns are kept
/// verbatim in `fields`; rejection during review soft-deletes the record so
/// audit history survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub id: Id,
    pub upload_id: Option<Id>,
    /// Ordinal of the source row inside its file, for stable ordering and
    /// error reporting.
    pub row_index: usize,
    pub fields: HashMap<String, serde_json::Value>,
    pub validations: HashMap<String, FieldValidation>,
    /// Set once the row has produced a canonical individual; a linked row is
    /// never merged again.
    pub individual_id: Option<Id>,
    pub is_deleted: bool,
    pub audit: AuditInfo,
}

impl StagingRecord {
    pub fn new(
        upload_id: Id,
        row_index: usize,
        fields: HashMap<String, serde_json::Value>,
        user_id: &Id,
    ) -> Self {
        Self {
            id: generate_id(),
            upload_id: Some(upload_id),
            row_index,
            fields,
            validations: HashMap::new(),
            individual_id: None,
            is_deleted: false,
            audit: AuditInfo::new(user_id),
        }
    }

    /// A row is invalid when any recorded outcome failed.
    pub fn has_validation_failures(&self) -> bool {
        self.validations.values().any(|v| !v.success)
    }

    /// Eligible for the straight-through merge path.
    pub fn is_mergeable(&self) -> bool {
        !self.is_deleted && self.individual_id.is_none() && !self.has_validation_failures()
    }
}
