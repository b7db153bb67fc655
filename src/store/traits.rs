use crate::model::{
    ApprovalTask, Group, GroupMembership, Id, Individual, StagingRecord, UploadAttempt,
    UploadRecord, UploadStatus,
};
use anyhow::Result;
use std::collections::HashMap;

#[async_trait::async_trait]
pub trait UploadStore: Send + Sync {
    async fn get_upload(&self, id: &Id) -> Result<Option<UploadAttempt>>;
    async fn upsert_upload(&self, upload: UploadAttempt) -> Result<()>;
    /// Status transitions are an independently scoped write so a crash never
    /// leaves a transition ambiguous relative to partial row data.
    async fn set_upload_status(
        &self,
        id: &Id,
        status: UploadStatus,
        error: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()>;

    async fn get_upload_record(&self, id: &Id) -> Result<Option<UploadRecord>>;
    async fn find_upload_record_for_upload(&self, upload_id: &Id) -> Result<Option<UploadRecord>>;
    async fn upsert_upload_record(&self, record: UploadRecord) -> Result<()>;
}

#[async_trait::async_trait]
pub trait StagingStore: Send + Sync {
    async fn get_staging_record(&self, id: &Id) -> Result<Option<StagingRecord>>;
    /// All records for one upload, ordered by source row. Includes
    /// soft-deleted rows; callers filter.
    async fn list_staging_for_upload(&self, upload_id: &Id) -> Result<Vec<StagingRecord>>;
    /// Every staging record in the store, across all uploads. Uniqueness
    /// rules look at this set, not just the current upload.
    async fn list_all_staging(&self) -> Result<Vec<StagingRecord>>;
    /// Insert a whole upload's rows in one transaction.
    async fn insert_staging_batch(&self, records: Vec<StagingRecord>) -> Result<()>;
    /// Update a set of records in one transaction (validation results,
    /// soft-deletes, entity links).
    async fn update_staging_batch(&self, records: Vec<StagingRecord>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait IndividualStore: Send + Sync {
    async fn get_individual(&self, id: &Id) -> Result<Option<Individual>>;
    async fn list_individuals(&self) -> Result<Vec<Individual>>;
    async fn upsert_individual(&self, individual: Individual) -> Result<()>;
}

#[async_trait::async_trait]
pub trait GroupStore: Send + Sync {
    async fn get_group(&self, id: &Id) -> Result<Option<Group>>;
    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>>;
    async fn list_groups(&self) -> Result<Vec<Group>>;
    async fn upsert_group(&self, group: Group) -> Result<()>;

    async fn get_membership(&self, id: &Id) -> Result<Option<GroupMembership>>;
    /// All memberships of a group in stable (creation, id) order, including
    /// soft-deleted ones; callers filter.
    async fn list_memberships_for_group(&self, group_id: &Id) -> Result<Vec<GroupMembership>>;
    /// All memberships held by one individual, same ordering and inclusion
    /// rules as the per-group listing.
    async fn list_memberships_for_individual(
        &self,
        individual_id: &Id,
    ) -> Result<Vec<GroupMembership>>;
}

#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, id: &Id) -> Result<Option<ApprovalTask>>;
    async fn list_tasks_for_entity(&self, entity_id: &Id) -> Result<Vec<ApprovalTask>>;
    async fn upsert_task(&self, task: ApprovalTask) -> Result<()>;
}

/// Multi-entity writes that must land in one transaction.
#[async_trait::async_trait]
pub trait BulkWriteStore: Send + Sync {
    /// Create canonical individuals and link their staging records
    /// atomically; a failure rolls back both sides.
    async fn commit_merge(
        &self,
        individuals: Vec<Individual>,
        linked_records: Vec<StagingRecord>,
    ) -> Result<()>;

    /// Apply membership writes and the resulting group-cache refresh
    /// atomically.
    async fn commit_group_writes(
        &self,
        groups: Vec<Group>,
        memberships: Vec<GroupMembership>,
    ) -> Result<()>;
}

pub trait Store:
    UploadStore + StagingStore + IndividualStore + GroupStore + TaskStore + BulkWriteStore
{
}

impl<T> Store for T where
    T: UploadStore + StagingStore + IndividualStore + GroupStore + TaskStore + BulkWriteStore
{
}
