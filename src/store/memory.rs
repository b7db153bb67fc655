use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::{
    ApprovalTask, Group, GroupMembership, Id, Individual, StagingRecord, UploadAttempt,
    UploadRecord, UploadStatus,
};
use crate::store::traits::{
    BulkWriteStore, GroupStore, IndividualStore, StagingStore, TaskStore, UploadStore,
};

#[derive(Debug, Default)]
struct State {
    uploads: HashMap<Id, UploadAttempt>,
    upload_records: HashMap<Id, UploadRecord>,
    staging: HashMap<Id, StagingRecord>,
    individuals: HashMap<Id, Individual>,
    groups: HashMap<Id, Group>,
    memberships: HashMap<Id, GroupMembership>,
    tasks: HashMap<Id, ApprovalTask>,
}

/// In-memory store backing the pipeline. All collections live behind one
/// lock so every batch method is a single atomic transaction: writers take
/// the write guard once, mutate everything, then release.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_creation<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> (String, Id),
{
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait::async_trait]
impl UploadStore for MemoryStore {
    async fn get_upload(&self, id: &Id) -> Result<Option<UploadAttempt>> {
        let state = self.state.read().await;
        Ok(state.uploads.get(id).cloned())
    }

    async fn upsert_upload(&self, upload: UploadAttempt) -> Result<()> {
        let mut state = self.state.write().await;
        state.uploads.insert(upload.id.clone(), upload);
        Ok(())
    }

    async fn set_upload_status(
        &self,
        id: &Id,
        status: UploadStatus,
        error: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let upload = state
            .uploads
            .get_mut(id)
            .ok_or_else(|| anyhow!("Upload attempt not found: {}", id))?;
        upload.status = status;
        if let Some(error) = error {
            upload.error = error;
        }
        Ok(())
    }

    async fn get_upload_record(&self, id: &Id) -> Result<Option<UploadRecord>> {
        let state = self.state.read().await;
        Ok(state.upload_records.get(id).cloned())
    }

    async fn find_upload_record_for_upload(&self, upload_id: &Id) -> Result<Option<UploadRecord>> {
        let state = self.state.read().await;
        Ok(state
            .upload_records
            .values()
            .find(|r| &r.data_upload_id == upload_id)
            .cloned())
    }

    async fn upsert_upload_record(&self, record: UploadRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.upload_records.insert(record.id.clone(), record);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StagingStore for MemoryStore {
    async fn get_staging_record(&self, id: &Id) -> Result<Option<StagingRecord>> {
        let state = self.state.read().await;
        Ok(state.staging.get(id).cloned())
    }

    async fn list_staging_for_upload(&self, upload_id: &Id) -> Result<Vec<StagingRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .staging
            .values()
            .filter(|r| r.upload_id.as_ref() == Some(upload_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.row_index, r.id.clone()));
        Ok(records)
    }

    async fn list_all_staging(&self) -> Result<Vec<StagingRecord>> {
        let state = self.state.read().await;
        let records: Vec<_> = state.staging.values().cloned().collect();
        Ok(sorted_by_creation(records, |r| {
            (r.audit.created_at.clone(), r.id.clone())
        }))
    }

    async fn insert_staging_batch(&self, records: Vec<StagingRecord>) -> Result<()> {
        let mut state = self.state.write().await;
        for record in records {
            state.staging.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn update_staging_batch(&self, records: Vec<StagingRecord>) -> Result<()> {
        let mut state = self.state.write().await;
        for record in &records {
            if !state.staging.contains_key(&record.id) {
                return Err(anyhow!("Staging record not found: {}", record.id));
            }
        }
        for record in records {
            state.staging.insert(record.id.clone(), record);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IndividualStore for MemoryStore {
    async fn get_individual(&self, id: &Id) -> Result<Option<Individual>> {
        let state = self.state.read().await;
        Ok(state.individuals.get(id).cloned())
    }

    async fn list_individuals(&self) -> Result<Vec<Individual>> {
        let state = self.state.read().await;
        let individuals: Vec<_> = state.individuals.values().cloned().collect();
        Ok(sorted_by_creation(individuals, |i| {
            (i.audit.created_at.clone(), i.id.clone())
        }))
    }

    async fn upsert_individual(&self, individual: Individual) -> Result<()> {
        let mut state = self.state.write().await;
        state.individuals.insert(individual.id.clone(), individual);
        Ok(())
    }
}

#[async_trait::async_trait]
impl GroupStore for MemoryStore {
    async fn get_group(&self, id: &Id) -> Result<Option<Group>> {
        let state = self.state.read().await;
        Ok(state.groups.get(id).cloned())
    }

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .find(|g| !g.is_deleted && g.code.as_deref() == Some(code))
            .cloned())
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        let groups: Vec<_> = state.groups.values().cloned().collect();
        Ok(sorted_by_creation(groups, |g| {
            (g.audit.created_at.clone(), g.id.clone())
        }))
    }

    async fn upsert_group(&self, group: Group) -> Result<()> {
        let mut state = self.state.write().await;
        state.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn get_membership(&self, id: &Id) -> Result<Option<GroupMembership>> {
        let state = self.state.read().await;
        Ok(state.memberships.get(id).cloned())
    }

    async fn list_memberships_for_group(&self, group_id: &Id) -> Result<Vec<GroupMembership>> {
        let state = self.state.read().await;
        let memberships: Vec<_> = state
            .memberships
            .values()
            .filter(|m| &m.group_id == group_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(memberships, |m| {
            (m.audit.created_at.clone(), m.id.clone())
        }))
    }

    async fn list_memberships_for_individual(
        &self,
        individual_id: &Id,
    ) -> Result<Vec<GroupMembership>> {
        let state = self.state.read().await;
        let memberships: Vec<_> = state
            .memberships
            .values()
            .filter(|m| &m.individual_id == individual_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(memberships, |m| {
            (m.audit.created_at.clone(), m.id.clone())
        }))
    }
}

#[async_trait::async_trait]
impl TaskStore for MemoryStore {
    async fn get_task(&self, id: &Id) -> Result<Option<ApprovalTask>> {
        let state = self.state.read().await;
        Ok(state.tasks.get(id).cloned())
    }

    async fn list_tasks_for_entity(&self, entity_id: &Id) -> Result<Vec<ApprovalTask>> {
        let state = self.state.read().await;
        let tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| &t.entity_id == entity_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(tasks, |t| {
            (t.audit.created_at.clone(), t.id.clone())
        }))
    }

    async fn upsert_task(&self, task: ApprovalTask) -> Result<()> {
        let mut state = self.state.write().await;
        state.tasks.insert(task.id.clone(), task);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BulkWriteStore for MemoryStore {
    async fn commit_merge(
        &self,
        individuals: Vec<Individual>,
        linked_records: Vec<StagingRecord>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for record in &linked_records {
            if !state.staging.contains_key(&record.id) {
                return Err(anyhow!("Staging record not found: {}", record.id));
            }
        }
        for individual in individuals {
            state.individuals.insert(individual.id.clone(), individual);
        }
        for record in linked_records {
            state.staging.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn commit_group_writes(
        &self,
        groups: Vec<Group>,
        memberships: Vec<GroupMembership>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for group in groups {
            state.groups.insert(group.id.clone(), group);
        }
        for membership in memberships {
            state.memberships.insert(membership.id.clone(), membership);
        }
        Ok(())
    }
}
