use crate::model::{generate_id, AuditInfo, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Family relationship of a member to their household. At most one HEAD per
/// group; the alignment service enforces this on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupRole {
    Head,
    Spouse,
    Son,
    Daughter,
    Grandfather,
    Grandmother,
    Mother,
    Father,
}

/// Benefit-recipient designation. At most one PRIMARY per group; a non-empty
/// group always has exactly one after any membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientType {
    Primary,
    Secondary,
}

/// Keys of the denormalized summary the alignment service maintains inside a
/// group's `json_ext`. These keys are owned by the service; custom fields
/// share the mapping but are never touched by cache refresh.
pub mod group_cache {
    pub const MEMBERS: &str = "members";
    pub const HEAD: &str = "head";
    pub const HEAD_ID: &str = "head_id";
    pub const PRIMARY_RECIPIENT: &str = "primary_recipient";
    pub const PRIMARY_RECIPIENT_ID: &str = "primary_recipient_id";
    pub const SECONDARY_RECIPIENT: &str = "secondary_recipient";
    pub const SECONDARY_RECIPIENT_ID: &str = "secondary_recipient_id";

    pub const ALL: [&str; 7] = [
        MEMBERS,
        HEAD,
        HEAD_ID,
        PRIMARY_RECIPIENT,
        PRIMARY_RECIPIENT_ID,
        SECONDARY_RECIPIENT,
        SECONDARY_RECIPIENT_ID,
    ];
}

/// Household group. `code` is the business identifier used by explicit
/// group-code imports, unique when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub json_ext: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Id>,
    pub version: u32,
    pub is_deleted: bool,
    pub audit: AuditInfo,
}

impl Group {
    pub fn new(code: Option<String>, user_id: &Id) -> Self {
        Self {
            id: generate_id(),
            code,
            json_ext: HashMap::new(),
            location_id: None,
            version: 1,
            is_deleted: false,
            audit: AuditInfo::new(user_id),
        }
    }
}

/// Link between one group and one individual. Mutated only through the
/// alignment service, which re-derives the group cache after every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub id: Id,
    pub group_id: Id,
    pub individual_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<GroupRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_type: Option<RecipientType>,
    pub json_ext: HashMap<String, serde_json::Value>,
    pub is_deleted: bool,
    pub audit: AuditInfo,
}

impl GroupMembership {
    pub fn new(group_id: Id, individual_id: Id, role: Option<GroupRole>, user_id: &Id) -> Self {
        Self {
            id: generate_id(),
            group_id,
            individual_id,
            role,
            recipient_type: None,
            json_ext: HashMap::new(),
            is_deleted: false,
            audit: AuditInfo::new(user_id),
        }
    }
}
