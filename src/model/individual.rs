use crate::model::{generate_id, AuditInfo, Id};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical person record produced by the merge engine (or created
/// directly). `json_ext` carries the full extensible attribute mapping; for
/// merged individuals that is the verbatim raw row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub id: Id,
    pub first_name: String,
    pub last_name: String,
    pub dob: NaiveDate,
    pub json_ext: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Id>,
    pub version: u32,
    pub is_deleted: bool,
    pub audit: AuditInfo,
}

impl Individual {
    pub fn new(
        first_name: String,
        last_name: String,
        dob: NaiveDate,
        json_ext: HashMap<String, serde_json::Value>,
        user_id: &Id,
    ) -> Self {
        Self {
            id: generate_id(),
            first_name,
            last_name,
            dob,
            json_ext,
            location_id: None,
            version: 1,
            is_deleted: false,
            audit: AuditInfo::new(user_id),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
