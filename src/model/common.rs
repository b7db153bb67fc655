use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Uniform envelope returned by every public service operation.
/// Callers always get a `success` flag, never a bare partial object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ServiceOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Audit stamps carried by every domain entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_by: Id,
    pub created_at: String, // ISO 8601 timestamp
    pub updated_by: Id,
    pub updated_at: String,
}

impl AuditInfo {
    pub fn new(user_id: &Id) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            created_by: user_id.clone(),
            created_at: now.clone(),
            updated_by: user_id.clone(),
            updated_at: now,
        }
    }

    pub fn touch(&mut self, user_id: &Id) {
        self.updated_by = user_id.clone();
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
