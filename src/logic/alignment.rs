use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::model::{
    group_cache, Group, GroupMembership, GroupRole, Id, Individual, RecipientType, TaskStatus,
};
use crate::store::traits::Store;

/// Sole mutation path for group memberships. Every create/update/delete runs
/// the full alignment pass before anything is committed: head uniqueness,
/// primary-recipient uniqueness, primary-existence promotion, then the
/// denormalized cache refresh. The write and the invariant maintenance land
/// as one transaction.
pub struct GroupAlignmentService<S> {
    store: Arc<S>,
}

impl<S: Store> GroupAlignmentService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create_membership(
        &self,
        membership: GroupMembership,
        user_id: &Id,
    ) -> Result<GroupMembership> {
        let group_id = membership.group_id.clone();
        self.apply(&group_id, membership, user_id).await
    }

    pub async fn update_membership(
        &self,
        membership: GroupMembership,
        user_id: &Id,
    ) -> Result<GroupMembership> {
        self.ensure_no_pending_review(&membership.group_id).await?;
        let existing = self
            .store
            .get_membership(&membership.id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("group membership", membership.id.clone()))?;
        let group_id = existing.group_id.clone();
        self.apply(&group_id, membership, user_id).await
    }

    pub async fn delete_membership(&self, id: &Id, user_id: &Id) -> Result<()> {
        let mut membership = self
            .store
            .get_membership(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("group membership", id.clone()))?;
        membership.is_deleted = true;
        membership.role = None;
        membership.recipient_type = None;
        let group_id = membership.group_id.clone();
        self.apply(&group_id, membership, user_id).await?;
        Ok(())
    }

    /// Soft-delete a group together with its memberships. Memberships are
    /// marked deleted individually, never removed, so history survives.
    pub async fn delete_group(&self, group_id: &Id, user_id: &Id) -> Result<()> {
        let mut group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("group", group_id.clone()))?;
        let mut memberships = self.store.list_memberships_for_group(group_id).await?;
        for membership in &mut memberships {
            membership.is_deleted = true;
            membership.audit.touch(user_id);
        }
        group.is_deleted = true;
        group.audit.touch(user_id);
        self.store
            .commit_group_writes(vec![group], memberships)
            .await
    }

    /// Create a new group and move one existing member into it as a single
    /// operation. The old household re-settles its head and primary first,
    /// then the moved member joins the new group carrying their role; as
    /// its sole member they are promoted to primary (and head if the role
    /// does not already say so).
    pub async fn create_group_and_move_individual(
        &self,
        code: Option<String>,
        membership_id: &Id,
        user_id: &Id,
    ) -> Result<(Group, GroupMembership)> {
        let existing = self
            .store
            .get_membership(membership_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("group membership", membership_id.clone()))?;
        let old_group_id = existing.group_id.clone();

        let group = Group::new(code, user_id);
        self.store.upsert_group(group.clone()).await?;

        let mut detached = existing.clone();
        detached.is_deleted = true;
        detached.role = None;
        detached.recipient_type = None;
        self.apply(&old_group_id, detached, user_id).await?;

        let moved = GroupMembership::new(
            group.id.clone(),
            existing.individual_id.clone(),
            existing.role,
            user_id,
        );
        let moved = self.apply(&group.id, moved, user_id).await?;
        let group = self
            .store
            .get_group(&group.id)
            .await?
            .ok_or_else(|| anyhow!("group vanished during alignment"))?;
        Ok((group, moved))
    }

    /// Membership mutations are blocked while a review task on the group is
    /// still open.
    async fn ensure_no_pending_review(&self, group_id: &Id) -> Result<()> {
        let tasks = self.store.list_tasks_for_entity(group_id).await?;
        let pending = tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Received | TaskStatus::Accepted));
        if pending {
            return Err(PipelineError::GroupTaskPending(group_id.clone()).into());
        }
        Ok(())
    }

    /// Stage `incoming` into the group's membership set, enforce the
    /// invariants, refresh the cache and commit everything at once.
    async fn apply(
        &self,
        group_id: &Id,
        mut incoming: GroupMembership,
        user_id: &Id,
    ) -> Result<GroupMembership> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("group", group_id.clone()))?;

        incoming.audit.touch(user_id);
        let mut memberships = self.store.list_memberships_for_group(group_id).await?;
        let mut changed: HashMap<Id, ()> = HashMap::new();
        match memberships.iter_mut().find(|m| m.id == incoming.id) {
            Some(slot) => *slot = incoming.clone(),
            None => memberships.push(incoming.clone()),
        }
        changed.insert(incoming.id.clone(), ());

        let established_primary = incoming.recipient_type == Some(RecipientType::Primary)
            && !incoming.is_deleted;

        // Head uniqueness: the incoming HEAD demotes any other head.
        if incoming.role == Some(GroupRole::Head) && !incoming.is_deleted {
            for m in memberships.iter_mut() {
                if m.id != incoming.id && m.role == Some(GroupRole::Head) {
                    m.role = None;
                    m.audit.touch(user_id);
                    changed.insert(m.id.clone(), ());
                }
            }
        }

        // Primary-recipient uniqueness, symmetric rule.
        if established_primary {
            for m in memberships.iter_mut() {
                if m.id != incoming.id && m.recipient_type == Some(RecipientType::Primary) {
                    m.recipient_type = None;
                    m.audit.touch(user_id);
                    changed.insert(m.id.clone(), ());
                }
            }
        }

        // Primary-existence guarantee: a non-empty group always keeps one
        // PRIMARY; the promoted member also takes HEAD when no head is left.
        if !established_primary {
            let has_primary = memberships
                .iter()
                .any(|m| !m.is_deleted && m.recipient_type == Some(RecipientType::Primary));
            if !has_primary {
                let has_head = memberships
                    .iter()
                    .any(|m| !m.is_deleted && m.role == Some(GroupRole::Head));
                if let Some(first) = memberships.iter_mut().find(|m| !m.is_deleted) {
                    first.recipient_type = Some(RecipientType::Primary);
                    if !has_head {
                        first.role = Some(GroupRole::Head);
                    }
                    first.audit.touch(user_id);
                    changed.insert(first.id.clone(), ());
                }
            }
        }

        // Structurally impossible after the passes above; reject rather than
        // silently resolve if it happens anyway.
        let heads = memberships
            .iter()
            .filter(|m| !m.is_deleted && m.role == Some(GroupRole::Head))
            .count();
        if heads > 1 {
            return Err(PipelineError::GroupInvariantViolated {
                role: "head",
                group_id: group_id.clone(),
            }
            .into());
        }
        let primaries = memberships
            .iter()
            .filter(|m| !m.is_deleted && m.recipient_type == Some(RecipientType::Primary))
            .count();
        if primaries > 1 {
            return Err(PipelineError::GroupInvariantViolated {
                role: "primary recipient",
                group_id: group_id.clone(),
            }
            .into());
        }

        let group_writes = self.refresh_cache(group, &memberships, user_id).await?;

        let result = memberships
            .iter()
            .find(|m| m.id == incoming.id)
            .cloned()
            .ok_or_else(|| anyhow!("membership vanished during alignment"))?;

        let membership_writes: Vec<GroupMembership> = memberships
            .into_iter()
            .filter(|m| changed.contains_key(&m.id))
            .collect();
        self.store
            .commit_group_writes(group_writes, membership_writes)
            .await?;

        Ok(result)
    }

    /// Recompute the denormalized summary. Writes are skipped entirely when
    /// nothing changed, so untouched groups never get a version bump.
    async fn refresh_cache(
        &self,
        mut group: Group,
        memberships: &[GroupMembership],
        user_id: &Id,
    ) -> Result<Vec<Group>> {
        let active: Vec<&GroupMembership> =
            memberships.iter().filter(|m| !m.is_deleted).collect();

        let mut individuals: HashMap<Id, Individual> = HashMap::new();
        for membership in &active {
            if let Some(individual) = self.store.get_individual(&membership.individual_id).await? {
                individuals.insert(individual.id.clone(), individual);
            }
        }

        let mut members = serde_json::Map::new();
        for membership in &active {
            if let Some(individual) = individuals.get(&membership.individual_id) {
                if !individual.is_deleted {
                    members.insert(
                        individual.id.clone(),
                        Value::String(individual.display_name()),
                    );
                }
            }
        }

        let named = |role_member: Option<&&GroupMembership>| -> (Value, Value) {
            match role_member.and_then(|m| individuals.get(&m.individual_id)) {
                Some(individual) => (
                    Value::String(individual.display_name()),
                    Value::String(individual.id.clone()),
                ),
                None => (Value::Null, Value::Null),
            }
        };

        let head = active.iter().find(|m| m.role == Some(GroupRole::Head));
        let primary = active
            .iter()
            .find(|m| m.recipient_type == Some(RecipientType::Primary));
        let secondary = active
            .iter()
            .find(|m| m.recipient_type == Some(RecipientType::Secondary));

        let (head_name, head_id) = named(head);
        let (primary_name, primary_id) = named(primary);
        let (secondary_name, secondary_id) = named(secondary);

        let mut desired: Vec<(String, Value)> = vec![
            (group_cache::MEMBERS.to_string(), Value::Object(members)),
            (group_cache::HEAD.to_string(), head_name),
            (group_cache::HEAD_ID.to_string(), head_id),
            (group_cache::PRIMARY_RECIPIENT.to_string(), primary_name),
            (group_cache::PRIMARY_RECIPIENT_ID.to_string(), primary_id),
            (group_cache::SECONDARY_RECIPIENT.to_string(), secondary_name),
            (
                group_cache::SECONDARY_RECIPIENT_ID.to_string(),
                secondary_id,
            ),
        ];

        // The head's own extensible attributes ride along on the group,
        // minus the cache keys themselves.
        if let Some(individual) = head.and_then(|m| individuals.get(&m.individual_id)) {
            for (key, value) in &individual.json_ext {
                if !group_cache::ALL.contains(&key.as_str()) {
                    desired.push((key.clone(), value.clone()));
                }
            }
        }

        let mut changes = false;
        for (key, value) in desired {
            if group.json_ext.get(&key) != Some(&value) {
                group.json_ext.insert(key, value);
                changes = true;
            }
        }

        if changes {
            group.version += 1;
            group.audit.touch(user_id);
            Ok(vec![group])
        } else {
            Ok(Vec::new())
        }
    }
}
