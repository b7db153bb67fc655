use crate::model::{generate_id, AuditInfo, Id};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Business-event tags recognized by the approval bridge.
pub mod business_event {
    /// Import path: merge the valid/accepted items of a fresh upload.
    pub const VALIDATION_IMPORT_VALID_ITEMS: &str = "validation_import_valid_items";
    /// Update path: merge the valid/accepted items of an update upload.
    pub const VALIDATION_UPLOAD_VALID_ITEMS: &str = "validation_upload_valid_items";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Received,
    Accepted,
    Completed,
    Failed,
}

/// Completion policy of the external task system. All variants currently
/// resolve through the same accept/reject diff; see the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionPolicy {
    All,
    Any,
    N,
}

/// One reviewer's decisions over staging-record ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserDecision {
    pub accepted: Vec<Id>,
    pub rejected: Vec<Id>,
}

/// Review task consumed from the external approval system. The decision log
/// is append-only: every round of review pushes a full snapshot of the
/// per-user decision mapping, and resolution diffs the latest two entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: Id,
    pub business_event: String,
    pub status: TaskStatus,
    pub completion_policy: CompletionPolicy,
    /// The entity under review; an upload record in this pipeline.
    pub entity_id: Id,
    /// Free-form context payload handed to reviewers.
    pub data: serde_json::Value,
    pub decision_log: Vec<HashMap<Id, UserDecision>>,
    pub audit: AuditInfo,
}

impl ApprovalTask {
    pub fn new(
        business_event: String,
        entity_id: Id,
        data: serde_json::Value,
        user_id: &Id,
    ) -> Self {
        Self {
            id: generate_id(),
            business_event,
            status: TaskStatus::Received,
            completion_policy: CompletionPolicy::Any,
            entity_id,
            data,
            decision_log: Vec::new(),
            audit: AuditInfo::new(user_id),
        }
    }

    /// Union of all reviewers' accepted ids in one log entry.
    fn accepted_in(entry: &HashMap<Id, UserDecision>) -> BTreeSet<Id> {
        entry
            .values()
            .flat_map(|d| d.accepted.iter().cloned())
            .collect()
    }

    fn rejected_in(entry: &HashMap<Id, UserDecision>) -> BTreeSet<Id> {
        entry
            .values()
            .flat_map(|d| d.rejected.iter().cloned())
            .collect()
    }

    /// Incremental decisions: latest log entry minus the immediately
    /// preceding one, supporting multiple rounds of partial review.
    pub fn incremental_decisions(&self) -> IncrementalDecisions {
        let current = match self.decision_log.last() {
            Some(entry) => entry,
            None => return IncrementalDecisions::default(),
        };
        let previous = self.decision_log.iter().rev().nth(1);

        let accepted_now = Self::accepted_in(current);
        let rejected_now = Self::rejected_in(current);
        let (accepted_before, rejected_before) = match previous {
            Some(entry) => (Self::accepted_in(entry), Self::rejected_in(entry)),
            None => (BTreeSet::new(), BTreeSet::new()),
        };

        IncrementalDecisions {
            newly_accepted: accepted_now.difference(&accepted_before).cloned().collect(),
            newly_rejected: rejected_now.difference(&rejected_before).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncrementalDecisions {
    pub newly_accepted: Vec<Id>,
    pub newly_rejected: Vec<Id>,
}
