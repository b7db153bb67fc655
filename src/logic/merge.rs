use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::model::{error_stage, Id, Individual, StagingRecord, UploadStatus};
use crate::store::traits::Store;

pub const CORE_FIELDS: [&str; 3] = ["first_name", "last_name", "dob"];

/// Which staging records are eligible for one merge run.
#[derive(Debug, Clone)]
pub enum MergeScope {
    /// Straight-through path: every unlinked, non-deleted record with no
    /// validation failures.
    AllValid,
    /// Reviewed path: only records the checker explicitly accepted.
    Accepted(Vec<Id>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub created: usize,
    pub status: UploadStatus,
}

/// Set-based, idempotent transformation of staged rows into canonical
/// individuals. A row already linked to an individual is never merged again,
/// so rerunning the merge for an upload creates zero new individuals.
pub struct MergeEngine;

impl MergeEngine {
    pub async fn merge_upload<S: Store>(
        store: &S,
        upload_id: &Id,
        user_id: &Id,
        scope: &MergeScope,
        percentage_of_invalid_items: f64,
    ) -> Result<MergeReport> {
        let records = store.list_staging_for_upload(upload_id).await?;
        let eligible: Vec<StagingRecord> = records
            .into_iter()
            .filter(|r| !r.is_deleted && r.individual_id.is_none())
            .filter(|r| match scope {
                MergeScope::AllValid => !r.has_validation_failures(),
                MergeScope::Accepted(ids) => ids.contains(&r.id),
            })
            .collect();

        // All-or-nothing guard on the core fields, separate from per-field
        // validation: a malformed schema must not produce half a merge.
        if let Some(error) = Self::missing_core_fields_error(upload_id, &eligible) {
            store
                .set_upload_status(upload_id, UploadStatus::Fail, Some(error))
                .await?;
            return Ok(MergeReport {
                created: 0,
                status: UploadStatus::Fail,
            });
        }

        let mut pool = match Self::build_individuals(&eligible, user_id) {
            Ok(pool) => pool,
            Err(e) => {
                return Self::fail(store, upload_id, error_stage::EXCEPTION, e.to_string()).await;
            }
        };

        // Link each staged row to the freshly built individual whose
        // attribute mapping equals the row's raw fields. A row with no match
        // (a retry after partial prior success) is skipped, not duplicated.
        let mut created = Vec::new();
        let mut linked = Vec::new();
        for mut record in eligible {
            let position = pool.iter().position(|i| i.json_ext == record.fields);
            if let Some(position) = position {
                let individual = pool.swap_remove(position);
                record.individual_id = Some(individual.id.clone());
                record.audit.touch(user_id);
                created.push(individual);
                linked.push(record);
            }
        }

        let created_count = created.len();
        // A store-level failure here is a database problem, not bad input.
        if let Err(e) = store.commit_merge(created, linked).await {
            return Self::fail(store, upload_id, error_stage::PROGRAMMING_ERROR, e.to_string())
                .await;
        }

        let status = if percentage_of_invalid_items > 0.0 {
            UploadStatus::PartialSuccess
        } else {
            UploadStatus::Success
        };
        // Success clears the error payload.
        store
            .set_upload_status(upload_id, status, Some(HashMap::new()))
            .await?;

        Ok(MergeReport {
            created: created_count,
            status,
        })
    }

    async fn fail<S: Store>(
        store: &S,
        upload_id: &Id,
        stage: &str,
        message: String,
    ) -> Result<MergeReport> {
        let mut error = HashMap::new();
        error.insert(stage.to_string(), json!(message));
        store
            .set_upload_status(upload_id, UploadStatus::Fail, Some(error))
            .await?;
        Ok(MergeReport {
            created: 0,
            status: UploadStatus::Fail,
        })
    }

    /// Itemized lists of offending row ids per missing core field, shaped
    /// like the error payload clients already parse.
    fn missing_core_fields_error(
        upload_id: &Id,
        eligible: &[StagingRecord],
    ) -> Option<HashMap<String, Value>> {
        let mut failing: HashMap<&str, Vec<Id>> = HashMap::new();
        for record in eligible {
            for field in CORE_FIELDS {
                if !record.fields.contains_key(field) {
                    failing.entry(field).or_default().push(record.id.clone());
                }
            }
        }
        if failing.is_empty() {
            return None;
        }

        let details = json!({
            "error": "Invalid entries",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "upload_id": upload_id,
            "failing_entries_first_name": failing.get("first_name").cloned().unwrap_or_default(),
            "failing_entries_last_name": failing.get("last_name").cloned().unwrap_or_default(),
            "failing_entries_dob": failing.get("dob").cloned().unwrap_or_default(),
        });
        let mut error = HashMap::new();
        error.insert("errors".to_string(), details);
        Some(error)
    }

    fn build_individuals(eligible: &[StagingRecord], user_id: &Id) -> Result<Vec<Individual>> {
        eligible
            .iter()
            .map(|record| {
                let first_name = text_field(record, "first_name")?;
                let last_name = text_field(record, "last_name")?;
                let dob_raw = text_field(record, "dob")?;
                let dob = NaiveDate::parse_from_str(&dob_raw, "%Y-%m-%d").map_err(|e| {
                    anyhow!("row {}: invalid dob '{}': {}", record.id, dob_raw, e)
                })?;
                Ok(Individual::new(
                    first_name,
                    last_name,
                    dob,
                    record.fields.clone(),
                    user_id,
                ))
            })
            .collect()
    }
}

fn text_field(record: &StagingRecord, field: &str) -> Result<String> {
    let value = record
        .fields
        .get(field)
        .ok_or_else(|| anyhow!("row {}: missing {}", record.id, field))?;
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(anyhow!("row {}: empty {}", record.id, field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalTask, Group, GroupMembership, UploadAttempt, UploadRecord};
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{
        BulkWriteStore, GroupStore, IndividualStore, StagingStore, TaskStore, UploadStore,
    };

    fn fields(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn staged_upload(store: &MemoryStore, rows: Vec<HashMap<String, Value>>) -> Id {
        let user = "tester".to_string();
        let upload = UploadAttempt::new("people.csv".to_string(), "text/csv".to_string(), &user);
        let upload_id = upload.id.clone();
        store.upsert_upload(upload).await.unwrap();
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| StagingRecord::new(upload_id.clone(), index, row, &user))
            .collect();
        store.insert_staging_batch(records).await.unwrap();
        upload_id
    }

    #[tokio::test]
    async fn missing_core_fields_abort_the_whole_merge() {
        let store = MemoryStore::new();
        let upload_id = staged_upload(
            &store,
            vec![
                fields(&[
                    ("last_name", json!("Diallo")),
                    ("dob", json!("1985-02-11")),
                ]),
                fields(&[
                    ("first_name", json!("Binta")),
                    ("last_name", json!("Diallo")),
                ]),
            ],
        )
        .await;

        let report = MergeEngine::merge_upload(
            &store,
            &upload_id,
            &"tester".to_string(),
            &MergeScope::AllValid,
            0.0,
        )
        .await
        .unwrap();

        assert_eq!(report.status, UploadStatus::Fail);
        assert_eq!(report.created, 0);
        assert!(store.list_individuals().await.unwrap().is_empty());

        let records = store.list_staging_for_upload(&upload_id).await.unwrap();
        let upload = store.get_upload(&upload_id).await.unwrap().unwrap();
        let details = &upload.error["errors"];
        assert_eq!(details["error"], json!("Invalid entries"));
        assert_eq!(
            details["failing_entries_first_name"],
            json!([records[0].id])
        );
        assert_eq!(details["failing_entries_dob"], json!([records[1].id]));
        assert_eq!(details["failing_entries_last_name"], json!([]));
    }

    struct BrokenCommitStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl UploadStore for BrokenCommitStore {
        async fn get_upload(&self, id: &Id) -> Result<Option<UploadAttempt>> {
            self.inner.get_upload(id).await
        }
        async fn upsert_upload(&self, upload: UploadAttempt) -> Result<()> {
            self.inner.upsert_upload(upload).await
        }
        async fn set_upload_status(
            &self,
            id: &Id,
            status: UploadStatus,
            error: Option<HashMap<String, Value>>,
        ) -> Result<()> {
            self.inner.set_upload_status(id, status, error).await
        }
        async fn get_upload_record(&self, id: &Id) -> Result<Option<UploadRecord>> {
            self.inner.get_upload_record(id).await
        }
        async fn find_upload_record_for_upload(
            &self,
            upload_id: &Id,
        ) -> Result<Option<UploadRecord>> {
            self.inner.find_upload_record_for_upload(upload_id).await
        }
        async fn upsert_upload_record(&self, record: UploadRecord) -> Result<()> {
            self.inner.upsert_upload_record(record).await
        }
    }

    #[async_trait::async_trait]
    impl StagingStore for BrokenCommitStore {
        async fn get_staging_record(&self, id: &Id) -> Result<Option<StagingRecord>> {
            self.inner.get_staging_record(id).await
        }
        async fn list_staging_for_upload(&self, upload_id: &Id) -> Result<Vec<StagingRecord>> {
            self.inner.list_staging_for_upload(upload_id).await
        }
        async fn list_all_staging(&self) -> Result<Vec<StagingRecord>> {
            self.inner.list_all_staging().await
        }
        async fn insert_staging_batch(&self, records: Vec<StagingRecord>) -> Result<()> {
            self.inner.insert_staging_batch(records).await
        }
        async fn update_staging_batch(&self, records: Vec<StagingRecord>) -> Result<()> {
            self.inner.update_staging_batch(records).await
        }
    }

    #[async_trait::async_trait]
    impl IndividualStore for BrokenCommitStore {
        async fn get_individual(&self, id: &Id) -> Result<Option<Individual>> {
            self.inner.get_individual(id).await
        }
        async fn list_individuals(&self) -> Result<Vec<Individual>> {
            self.inner.list_individuals().await
        }
        async fn upsert_individual(&self, individual: Individual) -> Result<()> {
            self.inner.upsert_individual(individual).await
        }
    }

    #[async_trait::async_trait]
    impl GroupStore for BrokenCommitStore {
        async fn get_group(&self, id: &Id) -> Result<Option<Group>> {
            self.inner.get_group(id).await
        }
        async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>> {
            self.inner.find_group_by_code(code).await
        }
        async fn list_groups(&self) -> Result<Vec<Group>> {
            self.inner.list_groups().await
        }
        async fn upsert_group(&self, group: Group) -> Result<()> {
            self.inner.upsert_group(group).await
        }
        async fn get_membership(&self, id: &Id) -> Result<Option<GroupMembership>> {
            self.inner.get_membership(id).await
        }
        async fn list_memberships_for_group(&self, group_id: &Id) -> Result<Vec<GroupMembership>> {
            self.inner.list_memberships_for_group(group_id).await
        }
        async fn list_memberships_for_individual(
            &self,
            individual_id: &Id,
        ) -> Result<Vec<GroupMembership>> {
            self.inner.list_memberships_for_individual(individual_id).await
        }
    }

    #[async_trait::async_trait]
    impl TaskStore for BrokenCommitStore {
        async fn get_task(&self, id: &Id) -> Result<Option<ApprovalTask>> {
            self.inner.get_task(id).await
        }
        async fn list_tasks_for_entity(&self, entity_id: &Id) -> Result<Vec<ApprovalTask>> {
            self.inner.list_tasks_for_entity(entity_id).await
        }
        async fn upsert_task(&self, task: ApprovalTask) -> Result<()> {
            self.inner.upsert_task(task).await
        }
    }

    #[async_trait::async_trait]
    impl BulkWriteStore for BrokenCommitStore {
        async fn commit_merge(
            &self,
            _individuals: Vec<Individual>,
            _linked_records: Vec<StagingRecord>,
        ) -> Result<()> {
            Err(anyhow!("connection reset by peer"))
        }
        async fn commit_group_writes(
            &self,
            groups: Vec<Group>,
            memberships: Vec<GroupMembership>,
        ) -> Result<()> {
            self.inner.commit_group_writes(groups, memberships).await
        }
    }

    #[tokio::test]
    async fn store_failure_during_commit_is_a_programming_error() {
        let store = BrokenCommitStore {
            inner: MemoryStore::new(),
        };
        let upload_id = staged_upload(
            &store.inner,
            vec![fields(&[
                ("first_name", json!("Amina")),
                ("last_name", json!("Diallo")),
                ("dob", json!("1985-02-11")),
            ])],
        )
        .await;

        let report = MergeEngine::merge_upload(
            &store,
            &upload_id,
            &"tester".to_string(),
            &MergeScope::AllValid,
            0.0,
        )
        .await
        .unwrap();

        assert_eq!(report.status, UploadStatus::Fail);
        let upload = store.inner.get_upload(&upload_id).await.unwrap().unwrap();
        assert!(upload.error["programming_error"]
            .as_str()
            .unwrap()
            .contains("connection reset"));
        assert!(store.inner.list_individuals().await.unwrap().is_empty());
    }
}
