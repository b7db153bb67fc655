use anyhow::Result;
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ImportConfig;
use crate::logic::alignment::GroupAlignmentService;
use crate::model::{Group, GroupMembership, GroupRole, Id, StagingRecord};
use crate::store::traits::Store;

/// Derives household membership from an aggregation key after merge.
/// Implicit mode clusters by an arbitrary column and creates fresh groups;
/// explicit mode resolves the reserved group-code column against existing
/// groups, accumulating members idempotently.
pub struct GroupingService<S> {
    store: Arc<S>,
    alignment: Arc<GroupAlignmentService<S>>,
    config: ImportConfig,
}

impl<S: Store> GroupingService<S> {
    pub fn new(
        store: Arc<S>,
        alignment: Arc<GroupAlignmentService<S>>,
        config: ImportConfig,
    ) -> Self {
        Self {
            store,
            alignment,
            config,
        }
    }

    /// Returns the number of groups touched.
    pub async fn assign_groups(
        &self,
        upload_id: &Id,
        aggregation_column: &str,
        user_id: &Id,
    ) -> Result<usize> {
        let records = self.store.list_staging_for_upload(upload_id).await?;
        let linked: Vec<StagingRecord> = records
            .into_iter()
            .filter(|r| !r.is_deleted && r.individual_id.is_some())
            .collect();

        let key_of = |record: &StagingRecord| -> Option<String> {
            match record.fields.get(aggregation_column) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            }
        };

        // Cluster keys in first-seen (file) order.
        let keys: Vec<String> = linked.iter().filter_map(&key_of).unique().collect();
        let explicit = aggregation_column == self.config.group_code_column;

        let mut touched = 0usize;
        for key in keys {
            let members: Vec<&StagingRecord> = linked
                .iter()
                .filter(|r| key_of(r).as_deref() == Some(key.as_str()))
                .collect();
            self.attach_cluster(&key, &members, explicit, user_id).await?;
            touched += 1;
        }

        self.strip_import_plumbing(&linked, user_id).await?;
        Ok(touched)
    }

    async fn attach_cluster(
        &self,
        key: &str,
        members: &[&StagingRecord],
        explicit: bool,
        user_id: &Id,
    ) -> Result<()> {
        let group = if explicit {
            match self.store.find_group_by_code(key).await? {
                Some(group) => group,
                None => {
                    let group = Group::new(Some(key.to_string()), user_id);
                    self.store.upsert_group(group.clone()).await?;
                    group
                }
            }
        } else {
            match self.existing_cluster_group(members).await? {
                Some(group) => group,
                None => {
                    let group = Group::new(None, user_id);
                    self.store.upsert_group(group.clone()).await?;
                    group
                }
            }
        };

        // Existing members accumulate; re-importing the same rows adds no
        // duplicate memberships.
        let already_members: HashSet<Id> = self
            .store
            .list_memberships_for_group(&group.id)
            .await?
            .into_iter()
            .filter(|m| !m.is_deleted)
            .map(|m| m.individual_id)
            .collect();

        let head_index = self.pick_head(members, explicit);

        for (index, record) in members.iter().enumerate() {
            let Some(individual_id) = record.individual_id.clone() else {
                continue;
            };
            if already_members.contains(&individual_id) {
                continue;
            }
            let role = if Some(index) == head_index {
                Some(GroupRole::Head)
            } else {
                None
            };
            let membership = GroupMembership::new(group.id.clone(), individual_id, role, user_id);
            self.alignment.create_membership(membership, user_id).await?;
        }
        Ok(())
    }

    /// Partial approval merges a household over several review rounds, and
    /// grouping reruns after each one. Merged individuals are created fresh
    /// by this upload, so any live membership one of them already holds
    /// points at the cluster's own group from an earlier round; extend that
    /// group instead of opening a second one.
    async fn existing_cluster_group(&self, members: &[&StagingRecord]) -> Result<Option<Group>> {
        for record in members {
            let Some(individual_id) = &record.individual_id else {
                continue;
            };
            for membership in self
                .store
                .list_memberships_for_individual(individual_id)
                .await?
            {
                if membership.is_deleted {
                    continue;
                }
                if let Some(group) = self.store.get_group(&membership.group_id).await? {
                    if !group.is_deleted {
                        return Ok(Some(group));
                    }
                }
            }
        }
        Ok(None)
    }

    /// First member whose `recipient_info` equals 1 (integer or string)
    /// becomes head. When no member qualifies, implicit grouping forces the
    /// first clustered individual to head; explicit groups keep whatever
    /// head they already have.
    fn pick_head(&self, members: &[&StagingRecord], explicit: bool) -> Option<usize> {
        let flagged = members.iter().position(|record| {
            matches!(
                record.fields.get(&self.config.recipient_info_column),
                Some(Value::Number(n)) if n.as_i64() == Some(1)
            ) || matches!(
                record.fields.get(&self.config.recipient_info_column),
                Some(Value::String(s)) if s.trim() == "1"
            )
        });
        match flagged {
            Some(index) => Some(index),
            None if !explicit && !members.is_empty() => Some(0),
            None => None,
        }
    }

    /// `group_code`/`recipient_info` were import plumbing, not domain data.
    /// Strip them from the merged individuals once; a no-op when already
    /// absent.
    async fn strip_import_plumbing(
        &self,
        linked: &[StagingRecord],
        user_id: &Id,
    ) -> Result<()> {
        let plumbing = [
            self.config.group_code_column.clone(),
            self.config.recipient_info_column.clone(),
        ];
        for record in linked {
            let Some(individual_id) = &record.individual_id else {
                continue;
            };
            let Some(mut individual) = self.store.get_individual(individual_id).await? else {
                continue;
            };
            let mut changed = false;
            for key in &plumbing {
                if individual.json_ext.remove(key).is_some() {
                    changed = true;
                }
            }
            if changed {
                individual.version += 1;
                individual.audit.touch(user_id);
                self.store.upsert_individual(individual).await?;
            }
        }
        Ok(())
    }
}
